//! Worker system — one job at a time, with background liveness and logging.
//!
//! Core components:
//! - `identity` — Per-process worker id
//! - `state` — Loop phases (Idle → Claimed → Locked → Dispatched → outcome) and shared runtime state
//! - `lock` — Advisory per-job lock and record cleanup
//! - `heartbeat` — Periodic liveness writes for the job in hand
//! - `log` — Buffered log stream emitter
//! - `worker` — Main loop: claim, dispatch, verify, report

pub mod heartbeat;
pub mod identity;
pub mod lock;
pub mod log;
pub mod state;
pub mod worker;

pub use heartbeat::{Heartbeat, spawn_heartbeat};
pub use identity::WorkerId;
pub use lock::{LockGuard, LockStatus};
pub use log::{LogEmitter, LogSender, log_channel, spawn_log_emitter};
pub use state::{RuntimeState, ShutdownHandle, WorkerPhase};
pub use worker::{JobOutcome, Worker};
