//! Execution webhook client
//!
//! Forwards live trade signals to an external execution service as signed
//! HTTP POSTs. The engine never talks to a broker directly; the webhook
//! receiver owns order routing.

use hmac::{Hmac, Mac};
use reqwest;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, warn};

use crate::{Direction, EngineError};

type HmacSha256 = Hmac<Sha256>;

/// Order intent sent to the execution webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
    /// Close any open position.
    #[serde(rename = "FLAT")]
    Flat,
}

impl Action {
    pub fn entry(direction: Direction) -> Self {
        match direction {
            Direction::Long => Action::Buy,
            Direction::Short => Action::Sell,
        }
    }
}

/// Payload POSTed to the webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOrder {
    pub action: Action,
    pub contract: String,
    pub quantity: u32,
    pub pattern: String,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExecutionClient {
    webhook_url: String,
    secret: String,
    client: reqwest::Client,
}

impl ExecutionClient {
    pub fn new(webhook_url: String, secret: String) -> Self {
        ExecutionClient {
            webhook_url,
            secret,
            client: reqwest::Client::new(),
        }
    }

    fn generate_signature(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Send one order. A non-2xx status or `success: false` in the body is
    /// an execution error; the caller decides whether to persist the entry.
    pub async fn send(&self, order: &ExecutionOrder) -> Result<(), EngineError> {
        let body = serde_json::to_string(order)
            .map_err(|e| EngineError::Execution(e.to_string()))?;
        let signature = self.generate_signature(&body);

        let response = self
            .client
            .post(&self.webhook_url)
            .header("X-SIGNATURE", signature)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| EngineError::Execution(format!("webhook unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Execution(format!(
                "webhook returned status {status}"
            )));
        }

        let parsed: WebhookResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Execution(format!("unreadable webhook response: {e}")))?;

        if !parsed.success {
            let msg = parsed.message.unwrap_or_else(|| "no reason given".to_string());
            warn!("Execution webhook rejected order: {}", msg);
            return Err(EngineError::Execution(format!("order rejected: {msg}")));
        }

        info!(
            action = ?order.action,
            contract = %order.contract,
            pattern = %order.pattern,
            "order accepted by execution webhook"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_from_direction() {
        assert_eq!(Action::entry(Direction::Long), Action::Buy);
        assert_eq!(Action::entry(Direction::Short), Action::Sell);
    }

    #[test]
    fn order_serializes_with_uppercase_action() {
        let order = ExecutionOrder {
            action: Action::Flat,
            contract: "MES".to_string(),
            quantity: 1,
            pattern: "RSI2_OVERSOLD_BOUNCE".to_string(),
            entry_price: 5000.0,
            stop_price: 4995.5,
            target_price: 5006.0,
            timestamp: 1_741_618_800,
        };
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["action"], "FLAT");
        assert_eq!(json["contract"], "MES");
    }

    #[test]
    fn signature_is_hex_sha256() {
        let client = ExecutionClient::new(
            "http://localhost:9/hook".to_string(),
            "secret".to_string(),
        );
        let sig = client.generate_signature("{\"action\":\"BUY\"}");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        // Deterministic for the same payload and key.
        assert_eq!(sig, client.generate_signature("{\"action\":\"BUY\"}"));
    }
}
