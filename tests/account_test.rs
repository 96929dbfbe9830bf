mod common;

use certfleet_operator::account::{AccountManager, KeyPair};
use certfleet_operator::error::Result;
use certfleet_operator::protocol::{DirectoryManager, NonceManager};
use certfleet_operator::types::Contact;
use common::MockAcmeServer;

#[tokio::test]
async fn test_full_account_lifecycle() -> Result<()> {
    let mut mock_server = MockAcmeServer::new().await;
    let _m_dir = mock_server.mock_directory().await;
    let _m_nonce = mock_server.mock_new_nonce().await;
    let _m_account = mock_server.mock_new_account().await;

    let http_client = reqwest::Client::new();
    let directory_manager =
        DirectoryManager::new(format!("{}/directory", mock_server.url()), http_client.clone());
    let nonce_manager = NonceManager::new(
        format!("{}/new-nonce", mock_server.url()),
        http_client.clone(),
    );
    let key_pair = KeyPair::generate()?;
    let account_manager =
        AccountManager::new(&key_pair, &nonce_manager, &directory_manager, &http_client)?;

    let account = account_manager
        .register(vec![Contact::email("admin@example.com")], true)
        .await?;

    assert_eq!(account.status, "valid");
    assert!(account.id.ends_with("/account/1"));

    Ok(())
}
