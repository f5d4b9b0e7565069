//! Payment gateway abstraction.
//!
//! The core only needs "given a method name, produce a `pay` capability".
//! Methods form a closed set; [`PaymentGateways`] maps each to a gateway.

mod scripted;
mod simulated;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use common::{Money, OrderId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::{RetryError, RetryPolicy, retry};

pub use scripted::{PaymentGate, ScriptedGateway};
pub use simulated::SimulatedGateway;

/// Supported payment methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    PayPal,
    CreditCard,
    /// Never completes; leaves the order pending. Used to exercise expiry.
    Pending,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 3] = [
        PaymentMethod::PayPal,
        PaymentMethod::CreditCard,
        PaymentMethod::Pending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::PayPal => "paypal",
            PaymentMethod::CreditCard => "creditcard",
            PaymentMethod::Pending => "pending",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentMethod::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PaymentError::UnsupportedMethod(s.to_string()))
    }
}

/// Gateway-reported state of a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Success,
    Pending,
    Declined,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentStatus::Success => "success",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Declined => "declined",
        };
        f.write_str(s)
    }
}

/// A charge request.
///
/// `idempotency_key` is the same for every attempt on the same order, so a
/// gateway that honors it charges at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub amount: Money,
    pub idempotency_key: String,
}

impl PaymentRequest {
    pub fn for_order(order_id: OrderId, amount: Money) -> Self {
        Self {
            order_id,
            amount,
            idempotency_key: format!("order-{order_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub success: bool,
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub message: String,
}

/// Errors that can occur while charging.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("Unsupported payment method: {0}")]
    UnsupportedMethod(String),

    #[error("No gateway configured for {0}")]
    NotConfigured(PaymentMethod),

    /// The gateway answered but did not capture the payment.
    #[error("Payment {status}: {message}")]
    Declined {
        status: PaymentStatus,
        message: String,
    },

    /// The gateway could not be reached or failed internally.
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),
}

/// A payment capability.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn pay(&self, request: &PaymentRequest) -> Result<PaymentResponse, PaymentError>;
}

/// Registry of gateways by method.
#[derive(Clone, Default)]
pub struct PaymentGateways {
    gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl PaymentGateways {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in simulated gateways for every method.
    pub fn simulated() -> Self {
        PaymentMethod::ALL
            .into_iter()
            .fold(Self::new(), |gateways, method| {
                gateways.with(method, SimulatedGateway::new(method))
            })
    }

    pub fn with(mut self, method: PaymentMethod, gateway: impl PaymentGateway + 'static) -> Self {
        self.gateways.insert(method, Arc::new(gateway));
        self
    }

    pub fn get(&self, method: PaymentMethod) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.get(&method).cloned()
    }

    /// Parses a method name and returns its gateway.
    pub fn resolve(
        &self,
        name: &str,
    ) -> Result<(PaymentMethod, Arc<dyn PaymentGateway>), PaymentError> {
        let method: PaymentMethod = name.parse()?;
        let gateway = self.get(method).ok_or(PaymentError::NotConfigured(method))?;
        Ok((method, gateway))
    }
}

/// Charges through `gateway`, retrying declines and outages per `policy`.
pub async fn charge(
    gateway: &dyn PaymentGateway,
    request: &PaymentRequest,
    policy: &RetryPolicy,
) -> Result<(PaymentResponse, u32), RetryError<PaymentError>> {
    let mut attempts = 0;
    let response = retry(policy, |attempt| {
        attempts = attempt + 1;
        async move {
            metrics::counter!("payment_attempts_total").increment(1);
            tracing::info!(
                order_id = %request.order_id,
                attempt = attempt + 1,
                "payment attempt"
            );
            let started = Instant::now();
            let result = gateway.pay(request).await;
            metrics::histogram!("payment_duration_seconds")
                .record(started.elapsed().as_secs_f64());

            match result {
                Ok(response) if response.success => Ok(response),
                Ok(response) => Err(PaymentError::Declined {
                    status: response.status,
                    message: response.message,
                }),
                Err(err) => Err(err),
            }
        }
    })
    .await?;
    Ok((response, attempts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_parse_case_insensitively() {
        assert_eq!("PayPal".parse::<PaymentMethod>().unwrap(), PaymentMethod::PayPal);
        assert_eq!(
            "creditcard".parse::<PaymentMethod>().unwrap(),
            PaymentMethod::CreditCard
        );
        assert!(matches!(
            "bitcoin".parse::<PaymentMethod>(),
            Err(PaymentError::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn idempotency_key_is_stable_per_order() {
        let order_id = OrderId::new();
        let a = PaymentRequest::for_order(order_id, Money::from_cents(100));
        let b = PaymentRequest::for_order(order_id, Money::from_cents(100));
        assert_eq!(a.idempotency_key, b.idempotency_key);
    }

    #[test]
    fn resolve_reports_missing_gateway() {
        let gateways = PaymentGateways::new().with(PaymentMethod::PayPal, ScriptedGateway::new());
        assert!(gateways.resolve("paypal").is_ok());
        assert!(matches!(
            gateways.resolve("creditcard"),
            Err(PaymentError::NotConfigured(PaymentMethod::CreditCard))
        ));
    }

    #[tokio::test]
    async fn charge_retries_declines() {
        let gateway = ScriptedGateway::new();
        gateway.fail_first(2);
        let request = PaymentRequest::for_order(OrderId::new(), Money::from_cents(100));

        let (response, attempts) = charge(&gateway, &request, &RetryPolicy::immediate(3))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(attempts, 3);
        assert_eq!(gateway.attempts(), 3);
    }

    #[tokio::test]
    async fn charge_gives_up_with_last_decline() {
        let gateway = SimulatedGateway::new(PaymentMethod::Pending);
        let request = PaymentRequest::for_order(OrderId::new(), Money::from_cents(100));

        let err = charge(&gateway, &request, &RetryPolicy::immediate(1))
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(matches!(
            err.last_error,
            PaymentError::Declined {
                status: PaymentStatus::Pending,
                ..
            }
        ));
    }
}
