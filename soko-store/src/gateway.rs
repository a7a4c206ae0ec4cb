use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use soko_core::gateway::{GatewayError, PaymentGateway, PaymentSession};
use soko_core::{verify_hmac_signature, Order};

#[derive(Debug, Serialize)]
struct InitializeRequest<'a> {
    reference: &'a str,
    amount: i64,
    currency: &'a str,
    order_id: uuid::Uuid,
}

#[derive(Debug, Deserialize)]
struct InitializeResponse {
    authorization_url: String,
    reference: String,
}

/// HTTP client for the hosted payment gateway: outbound
/// initialize-transaction calls plus inbound webhook HMAC verification,
/// both keyed on the same shared secret.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    secret: String,
    initialize_url: String,
}

impl HttpPaymentGateway {
    pub fn new(secret: String, initialize_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret,
            initialize_url,
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_hmac_signature(&self.secret, payload, signature)
    }

    async fn initialize_transaction(
        &self,
        order: &Order,
    ) -> Result<PaymentSession, GatewayError> {
        let reference = format!("ord_{}", order.id.simple());
        let body = InitializeRequest {
            reference: &reference,
            amount: order.amount,
            currency: &order.currency,
            order_id: order.id,
        };

        let response = self
            .client
            .post(&self.initialize_url)
            .bearer_auth(&self.secret)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::Request(format!(
                "gateway returned {}",
                response.status()
            )));
        }

        let parsed: InitializeResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        Ok(PaymentSession {
            authorization_url: parsed.authorization_url,
            reference: parsed.reference,
        })
    }
}
