//! DNS-over-HTTPS propagation check (spec §4.3 step 4): after writing the
//! `_acme-challenge.<fqdn>` TXT record, poll a public DoH resolver until
//! the expected digest is visible before telling the CA to validate.
use crate::config::{DnsPropagationSettings, DohAnswerMode};
use crate::error::{AcmeError, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswerRecord>,
}

#[derive(Debug, Deserialize)]
struct DohAnswerRecord {
    data: String,
}

/// Poll the configured DoH endpoint for `_acme-challenge.<fqdn>` until its
/// TXT record contains `expected_digest`, retrying per `settings`.
pub async fn check_propagation(
    http_client: &reqwest::Client,
    settings: &DnsPropagationSettings,
    fqdn: &str,
    expected_digest: &str,
) -> Result<()> {
    let challenge_name = format!("_acme-challenge.{fqdn}");

    for attempt in 1..=settings.max_attempts {
        match query_once(http_client, settings, &challenge_name, expected_digest).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(fqdn, attempt, error = %e, "DoH propagation query failed");
            }
        }

        if attempt < settings.max_attempts {
            tokio::time::sleep(settings.retry_delay()).await;
        }
    }

    Err(AcmeError::propagation(format!(
        "DNS challenge for {fqdn} not observed propagated after {} attempts",
        settings.max_attempts
    )))
}

async fn query_once(
    http_client: &reqwest::Client,
    settings: &DnsPropagationSettings,
    challenge_name: &str,
    expected_digest: &str,
) -> Result<bool> {
    let response = http_client
        .get(&settings.endpoint)
        .query(&[("name", challenge_name), ("type", "TXT")])
        .header("Accept", "application/dns-json")
        .timeout(settings.request_timeout())
        .send()
        .await
        .map_err(|e| AcmeError::transport(format!("DoH request failed: {e}")))?;

    if !response.status().is_success() {
        return Err(AcmeError::transport(format!(
            "DoH request failed: HTTP {}",
            response.status()
        )));
    }

    match settings.answer_mode {
        DohAnswerMode::JsonSchema => {
            let body = response
                .json::<DohResponse>()
                .await
                .map_err(|e| AcmeError::protocol(format!("Failed to parse DoH JSON answer: {e}")))?;

            Ok(body
                .answer
                .iter()
                .any(|a| a.data.trim_matches('"') == expected_digest))
        }
        DohAnswerMode::Substring => {
            let text = response
                .text()
                .await
                .map_err(|e| AcmeError::transport(format!("Failed to read DoH response: {e}")))?;
            Ok(text.contains(expected_digest))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn json_schema_mode_matches_quoted_txt_data() {
        let mut server = mockito::Server::new_async().await;
        let settings = DnsPropagationSettings {
            endpoint: server.url(),
            max_attempts: 1,
            retry_delay_secs: 0,
            request_timeout_secs: 5,
            answer_mode: DohAnswerMode::JsonSchema,
        };

        let _m = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/dns-json")
            .with_body(
                serde_json::json!({
                    "Answer": [{"name": "_acme-challenge.api.example.com", "type": 16, "TTL": 60, "data": "\"abc123\""}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = reqwest::Client::new();
        check_propagation(&client, &settings, "api.example.com", "abc123")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn exhausts_retries_and_errors_when_never_propagated() {
        let mut server = mockito::Server::new_async().await;
        let settings = DnsPropagationSettings {
            endpoint: server.url(),
            max_attempts: 2,
            retry_delay_secs: 0,
            request_timeout_secs: 5,
            answer_mode: DohAnswerMode::Substring,
        };

        let _m = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body("no match here")
            .expect(2)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let err = check_propagation(&client, &settings, "api.example.com", "abc123")
            .await
            .unwrap_err();
        assert_eq!(err.classify(), crate::error::Disposition::Validation);
    }
}
