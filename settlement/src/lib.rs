//! Batch settlement pipeline: fills produced by the matching engine are accumulated together
//! with their signed taker and maker orders and flushed to the settlement contract as atomic
//! batches, with local replay and overfill guards, serialized broadcasts and gas escalation on
//! retry.

pub mod chain;
pub mod encoding;
pub mod queue;
pub mod submitter;

pub use encoding::SettlementBatch;
pub use queue::{PendingFill, SettlementQueue};
pub use submitter::{SettledFillsSink, SettlementSubmitting, Submitter, SubmitterConfig};
