use async_trait::async_trait;

use super::{PaymentError, PaymentGateway, PaymentMethod, PaymentRequest, PaymentResponse, PaymentStatus};

/// Stand-in gateway that answers immediately without moving money.
///
/// `PayPal` and `CreditCard` always succeed; `Pending` never completes.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedGateway {
    method: PaymentMethod,
}

impl SimulatedGateway {
    pub fn new(method: PaymentMethod) -> Self {
        Self { method }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn pay(&self, request: &PaymentRequest) -> Result<PaymentResponse, PaymentError> {
        let order_id = request.order_id;
        let amount = request.amount;

        let response = match self.method {
            PaymentMethod::PayPal => PaymentResponse {
                success: true,
                transaction_id: format!("PAYPAL-{order_id}"),
                status: PaymentStatus::Success,
                message: format!("Payment of {amount} completed via PayPal."),
            },
            PaymentMethod::CreditCard => PaymentResponse {
                success: true,
                transaction_id: format!("CREDIT-{order_id}"),
                status: PaymentStatus::Success,
                message: format!("Payment of {amount} completed via Credit Card."),
            },
            PaymentMethod::Pending => PaymentResponse {
                success: false,
                transaction_id: format!("TEST-PENDING-{order_id}"),
                status: PaymentStatus::Pending,
                message: "Payment intentionally left pending for testing".to_string(),
            },
        };

        tracing::debug!(
            method = %self.method,
            %order_id,
            success = response.success,
            "simulated payment"
        );
        Ok(response)
    }
}
