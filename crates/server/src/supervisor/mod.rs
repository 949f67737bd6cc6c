//! The parent process.
//!
//! [`Supervisor`] is the state machine over the worker set; it talks to the
//! operating system only through [`ProcessControl`], whose production
//! implementation [`ForkControl`] forks workers and polls signals and exits.

mod prefork;
mod process;

pub use prefork::{State, Supervisor, WorkerRecord};
pub use process::{Control, Event, ExitStatus, ForkControl, Pid, ProcessControl, unblock_termination};
