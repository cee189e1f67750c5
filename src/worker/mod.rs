//! Job execution.
//!
//! - `state`: job record and the `pending → processing → completed | failed` machine
//! - `worker`: claim/execute loop with progress relay and heartbeats
//! - `repair`: fails and requeues jobs whose worker stopped heartbeating

pub mod repair;
pub mod state;
pub mod worker;

pub use repair::{RepairReport, run_repair_cycle, spawn_repair_loop};
pub use state::{Job, JobFailure, JobStatus, NewJob};
pub use worker::Worker;
