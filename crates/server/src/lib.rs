//! A prefork HTTP/1.x server.
//!
//! The supervisor binds one listening socket, forks `max_workers` worker
//! processes and keeps that many alive. Each worker accepts and serves one
//! connection at a time with [`prefork_http`], retires after a jittered
//! number of requests, and exits gracefully on SIGTERM or SIGHUP. SIGUSR1
//! replaces the workers one by one.
//!
//! ```no_run
//! use http::Response;
//! use prefork_http::handler::make_application;
//! use prefork_http::protocol::{RequestFields, ResponseBody};
//! use prefork_server::{Server, ServerConfig};
//!
//! async fn hello(_req: RequestFields) -> Result<Response<ResponseBody>, std::io::Error> {
//!     Ok(Response::new(ResponseBody::from("hello\n")))
//! }
//!
//! let config = ServerConfig { port: 8080, max_workers: 4, ..ServerConfig::default() };
//! Server::new(config, make_application(hello)).run().unwrap();
//! ```

pub mod config;
pub mod listener;
pub mod supervisor;
pub mod worker;

mod error;
mod server;

pub use config::ServerConfig;
pub use error::{ConfigError, ServerError};
pub use server::{Server, run_worker};
