// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::debug;

use super::BillingProvider;
use crate::config::StripeConfig;
use crate::error::{EntitlementError, EntitlementResult};
use crate::observability::Sensitive;

/// Stripe REST client for subscription cancellation.
pub struct StripeBillingClient {
    client: Client,
    api_base: String,
    secret_key: Sensitive<String>,
}

impl StripeBillingClient {
    pub fn new(config: &StripeConfig) -> EntitlementResult<Self> {
        if config.secret_key.is_empty() {
            return Err(EntitlementError::config("Stripe secret key is not set"));
        }
        Ok(Self {
            client: Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn subscription_url(&self, subscription_id: &str) -> String {
        format!("{}/v1/subscriptions/{}", self.api_base, subscription_id)
    }

    async fn send(
        &self,
        method: Method,
        subscription_id: &str,
        form: &[(&str, &str)],
    ) -> EntitlementResult<()> {
        if subscription_id.trim().is_empty() {
            return Err(EntitlementError::validation("Empty billing subscription id"));
        }

        let url = self.subscription_url(subscription_id);
        debug!("Stripe request: {} {}", method, url);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(self.secret_key.expose());
        if !form.is_empty() {
            request = request.form(form);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EntitlementError::billing(format!("Stripe request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let msg = extract_api_error(&body).unwrap_or_else(|| format!("HTTP {}: {}", status, body));
            return Err(EntitlementError::billing(msg));
        }
        Ok(())
    }
}

#[async_trait]
impl BillingProvider for StripeBillingClient {
    fn provider_id(&self) -> &'static str {
        "stripe"
    }

    async fn cancel_at_period_end(&self, subscription_id: &str) -> EntitlementResult<()> {
        self.send(Method::POST, subscription_id, &[("cancel_at_period_end", "true")])
            .await
    }

    async fn resume(&self, subscription_id: &str) -> EntitlementResult<()> {
        self.send(Method::POST, subscription_id, &[("cancel_at_period_end", "false")])
            .await
    }

    async fn cancel_immediately(&self, subscription_id: &str) -> EntitlementResult<()> {
        self.send(Method::DELETE, subscription_id, &[]).await
    }
}

/// Stripe errors look like `{ "error": { "message": "..." } }`.
fn extract_api_error(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed["error"]["message"].as_str().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_secret_key() {
        let config = StripeConfig::default();
        assert!(matches!(
            StripeBillingClient::new(&config),
            Err(EntitlementError::Config { .. })
        ));
    }

    #[test]
    fn builds_subscription_url_without_double_slash() {
        let config = StripeConfig {
            api_base: "https://billing.example.com/".into(),
            secret_key: Sensitive::new("sk_test".into()),
        };
        let client = StripeBillingClient::new(&config).unwrap();
        assert_eq!(
            client.subscription_url("sub_123"),
            "https://billing.example.com/v1/subscriptions/sub_123"
        );
    }

    #[test]
    fn extracts_stripe_error_message() {
        let body = r#"{"error":{"message":"No such subscription: 'sub_x'","type":"invalid_request_error"}}"#;
        assert_eq!(
            extract_api_error(body).as_deref(),
            Some("No such subscription: 'sub_x'")
        );
        assert_eq!(extract_api_error("<html>"), None);
    }

    #[tokio::test]
    async fn empty_subscription_id_is_rejected_before_sending() {
        let config = StripeConfig {
            api_base: "https://billing.invalid".into(),
            secret_key: Sensitive::new("sk_test".into()),
        };
        let client = StripeBillingClient::new(&config).unwrap();
        let err = client.cancel_immediately(" ").await.unwrap_err();
        assert!(matches!(err, EntitlementError::Validation { .. }));
    }
}
