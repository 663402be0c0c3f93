//! Append-only audit trail of exit attempts and position exits.
//!
//! The live decision path only ever writes here. Nothing in the engine reads
//! these records back.

pub mod records;
pub mod sink;

pub use records::{AttemptOutcome, ExitAttempt, PositionExit};
pub use sink::{AuditLog, JsonlAuditLog, MemoryAuditLog, TeeAuditLog};
