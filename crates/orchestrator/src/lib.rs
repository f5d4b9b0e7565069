//! Order workflows on top of the inventory ledger.
//!
//! The orchestrator owns transaction boundaries for:
//! 1. Placing an order (pre-check, price snapshot, reservation)
//! 2. Paying a pending order (gateway call with retry, stock commit)
//! 3. Confirming and cancelling orders
//! 4. Expiring pending orders past their payment window
//!
//! Payment and cancellation of one order are serialized on the order row
//! lock. A payment captured for an order that can no longer be settled is
//! never dropped: the order is flagged for manual reconciliation.

pub mod clock;
pub mod error;
pub mod orchestrator;
pub mod outcome;
pub mod payment;
pub mod retry;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, OrchestratorError, Result};
pub use orchestrator::{OrchestratorConfig, OrderOrchestrator};
pub use outcome::{OrderOutcome, PaymentReceipt};
pub use payment::{
    PaymentError, PaymentGate, PaymentGateway, PaymentGateways, PaymentMethod, PaymentRequest,
    PaymentResponse, PaymentStatus, ScriptedGateway, SimulatedGateway,
};
pub use retry::{RetryError, RetryPolicy};
pub use sweeper::{ExpirySweeper, SweepReport, SweeperConfig};
