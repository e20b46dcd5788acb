//! HTTP payment gateway client
//!
//! Talks JSON to the payment processor:
//! - `POST {base}/charges` with a `ChargeRequest`, answered with the outcome
//!   or `{"status": "pending"}` when the result will arrive by callback
//! - `POST {base}/refunds` with a `RefundRequest`
//!
//! Transport failures, timeouts and 5xx answers map to
//! `AppError::PaymentGateway`; business outcomes travel in `ChargeAck`.

use async_trait::async_trait;
use cine_core::{
    models::{ChargeAck, ChargeRequest, PaymentOutcome, RefundAck, RefundRequest},
    traits::PaymentGateway,
    AppError, AppResult,
};
use reqwest::{Client, ClientBuilder, StatusCode};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument};

/// Charge response body
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ChargeResponse {
    Pending,
    Succeeded {
        gateway_transaction_id: String,
        amount: Decimal,
    },
    Declined {
        reason: String,
    },
    Failed {
        reason: String,
        #[serde(default)]
        retryable: bool,
    },
}

impl From<ChargeResponse> for ChargeAck {
    fn from(response: ChargeResponse) -> Self {
        match response {
            ChargeResponse::Pending => ChargeAck::Pending,
            ChargeResponse::Succeeded {
                gateway_transaction_id,
                amount,
            } => ChargeAck::Completed(PaymentOutcome::Succeeded {
                gateway_transaction_id,
                amount,
            }),
            ChargeResponse::Declined { reason } => {
                ChargeAck::Completed(PaymentOutcome::Declined { reason })
            }
            ChargeResponse::Failed { reason, retryable } => {
                ChargeAck::Completed(PaymentOutcome::Failed { reason, retryable })
            }
        }
    }
}

/// reqwest-backed `PaymentGateway`
pub struct HttpPaymentGateway {
    http_client: Client,
    base_url: String,
}

impl HttpPaymentGateway {
    /// Build a client for the gateway at `base_url`
    ///
    /// # Arguments
    ///
    /// * `base_url` - Gateway root, e.g. "http://localhost:9090"
    /// * `timeout` - Per-request timeout
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let http_client = ClientBuilder::new()
            .timeout(timeout)
            .pool_max_idle_per_host(20)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Config(format!("payment gateway client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> AppResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    error!("Payment gateway timeout on {}", path);
                    AppError::PaymentGateway(format!("timeout calling {}", path))
                } else {
                    error!("Payment gateway connection error: {}", e);
                    AppError::PaymentGateway(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("Payment gateway returned {} for {}", status, path);
            return Err(AppError::PaymentGateway(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                    format!("request rejected by gateway ({})", status)
                }
                _ => format!("gateway answered {}", status),
            }));
        }

        response.json::<R>().await.map_err(|e| {
            error!("Unreadable payment gateway response: {}", e);
            AppError::PaymentGateway(format!("unreadable response: {}", e))
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(reference = %request.reference))]
    async fn charge(&self, request: &ChargeRequest) -> AppResult<ChargeAck> {
        let response: ChargeResponse = self.post("/charges", request).await?;
        Ok(response.into())
    }

    #[instrument(skip(self, request), fields(booking_id = %request.booking_id))]
    async fn refund(&self, request: &RefundRequest) -> AppResult<RefundAck> {
        self.post("/refunds", request).await
    }
}
