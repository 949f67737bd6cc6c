//! The per-process request loop.
//!
//! A worker serves connections strictly one after another. It stops when its
//! request budget runs out or when it is told to terminate; termination
//! never interrupts a request unless it is repeated.

mod budget;
mod graceful;
mod oob;
mod worker_loop;

pub use budget::{RequestBudget, jitter};
pub use graceful::{GracefulExitState, TermAction};
pub use oob::OobCollector;
pub use worker_loop::{Termination, TerminationHandle, WorkerExit, WorkerLoop};
