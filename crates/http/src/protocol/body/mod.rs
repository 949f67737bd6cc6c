//! Request body storage.
//!
//! - [`BufferedBody`]: write side used by the connection engine while the body
//!   is read off the socket; keeps small bodies in memory and spills large ones
//!   to a temporary file.
//! - [`RequestInput`]: read side handed to the application once the body is
//!   complete.

mod buffered;
mod input;

pub use buffered::BufferedBody;
pub use buffered::DEFAULT_MEMORY_MAX;
pub use input::RequestInput;
