mod common;

use certfleet_operator::account::{AccountManager, KeyPair};
use certfleet_operator::error::Result;
use certfleet_operator::order::{NewOrderRequest, OrderManager};
use certfleet_operator::protocol::{DirectoryManager, NonceManager};
use certfleet_operator::types::Contact;
use common::MockAcmeServer;
use serde_json::json;

#[tokio::test]
async fn test_certificate_order_flow() -> Result<()> {
    let mut mock_server = MockAcmeServer::new().await;
    let url = mock_server.url();

    let _m_dir = mock_server.mock_directory().await;
    let _m_nonce = mock_server.mock_new_nonce().await;
    let _m_account = mock_server.mock_new_account().await;

    let _m_order = mock_server
        .server
        .mock("POST", "/new-order")
        .with_status(201)
        .with_header("location", &format!("{}/order/1", url))
        .with_body(
            json!({
                "status": "pending",
                "expires": "2026-02-10T00:00:00Z",
                "identifiers": [{"type": "dns", "value": "example.com"}],
                "authorizations": [format!("{}/authz/1", url)],
                "finalize": format!("{}/order/1/finalize", url)
            })
            .to_string(),
        )
        .create_async()
        .await;

    let http_client = reqwest::Client::new();
    let directory_manager =
        DirectoryManager::new(format!("{}/directory", url), http_client.clone());
    let nonce_manager = NonceManager::new(format!("{}/new-nonce", url), http_client.clone());
    let key_pair = KeyPair::generate()?;
    let account_manager =
        AccountManager::new(&key_pair, &nonce_manager, &directory_manager, &http_client)?;

    let account = account_manager
        .register(vec![Contact::email("admin@example.com")], true)
        .await?;

    let order_manager = OrderManager::new(
        &account_manager,
        &directory_manager,
        &nonce_manager,
        &http_client,
        account.id.clone(),
    );

    let (order_url, order) = order_manager
        .create_order(&NewOrderRequest::new(vec!["example.com".to_string()]))
        .await?;

    assert_eq!(order.status, "pending");
    assert!(order_url.ends_with("/order/1"));

    Ok(())
}
