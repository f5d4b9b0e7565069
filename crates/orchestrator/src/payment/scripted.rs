use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{PaymentError, PaymentGateway, PaymentRequest, PaymentResponse, PaymentStatus};

#[derive(Debug, Default)]
struct ScriptState {
    /// Idempotency key -> captured charge.
    charges: HashMap<String, PaymentResponse>,
    attempts: u32,
    next_id: u32,
    fail_always: bool,
    fail_remaining: u32,
    unavailable: bool,
}

/// Lets a test hold a charge in flight until it decides to let it finish.
#[derive(Debug, Clone, Default)]
pub struct PaymentGate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl PaymentGate {
    /// Waits until a charge has reached the gateway.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Lets the held charge complete.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// In-memory gateway whose behavior is set by the caller.
///
/// Honors idempotency keys: a key that was already captured returns the
/// original response without charging again.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGateway {
    state: Arc<Mutex<ScriptState>>,
    latency: Option<Duration>,
    gate: Option<PaymentGate>,
}

impl ScriptedGateway {
    /// A gateway that captures every charge.
    pub fn new() -> Self {
        Self::default()
    }

    /// A gateway that declines every charge.
    pub fn declining() -> Self {
        let gateway = Self::new();
        gateway.set_fail(true);
        gateway
    }

    /// A gateway that parks each charge until the returned gate is released.
    pub fn gated() -> (Self, PaymentGate) {
        let gate = PaymentGate::default();
        let gateway = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (gateway, gate)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declines every charge while set.
    pub fn set_fail(&self, fail: bool) {
        self.state().fail_always = fail;
    }

    /// Declines the next `n` charges, then captures.
    pub fn fail_first(&self, n: u32) {
        self.state().fail_remaining = n;
    }

    /// Answers every charge with a transport error while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Number of `pay` calls received.
    pub fn attempts(&self) -> u32 {
        self.state().attempts
    }

    /// Number of distinct captured charges.
    pub fn charge_count(&self) -> usize {
        self.state().charges.len()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn pay(&self, request: &PaymentRequest) -> Result<PaymentResponse, PaymentError> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        state.attempts += 1;

        if state.unavailable {
            return Err(PaymentError::Unavailable("connection refused".to_string()));
        }
        if let Some(existing) = state.charges.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }
        if state.fail_always || state.fail_remaining > 0 {
            state.fail_remaining = state.fail_remaining.saturating_sub(1);
            return Ok(PaymentResponse {
                success: false,
                transaction_id: String::new(),
                status: PaymentStatus::Declined,
                message: "Payment declined".to_string(),
            });
        }

        state.next_id += 1;
        let response = PaymentResponse {
            success: true,
            transaction_id: format!("PAY-{:04}", state.next_id),
            status: PaymentStatus::Success,
            message: format!("Payment of {} captured", request.amount),
        };
        state
            .charges
            .insert(request.idempotency_key.clone(), response.clone());
        Ok(response)
    }
}
