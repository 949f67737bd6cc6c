use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use http::{Response, StatusCode, header};
use prefork_http::handler::make_application;
use prefork_http::protocol::{RequestFields, ResponseBody};
use prefork_server::{Server, ServerConfig, ServerError};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "prefork_server=info,prefork_http=info";

/// Prefork HTTP server serving a request-echo application.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// TOML file with server options; flags override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Listen on a Unix-domain socket instead of host:port.
    #[arg(long)]
    path: Option<PathBuf>,
    #[arg(long)]
    workers: Option<usize>,
    /// Seconds allowed for reading a request and for each write.
    #[arg(long)]
    timeout: Option<u64>,
    /// 0 means unlimited.
    #[arg(long)]
    max_request_per_child: Option<u64>,
    #[arg(long)]
    min_request_per_child: Option<u64>,
    /// Seconds between worker replacements on SIGUSR1.
    #[arg(long)]
    spawn_interval: Option<f64>,
    #[arg(long)]
    err_respawn_interval: Option<f64>,
    #[arg(long)]
    backlog: Option<i32>,
    #[arg(long)]
    reuse_port: bool,
    /// Reclaim memory between requests.
    #[arg(long)]
    oobgc: bool,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, ServerError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.path.is_some() {
            config.path = self.path;
        }
        if let Some(workers) = self.workers {
            config.max_workers = workers;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(max) = self.max_request_per_child {
            config.max_request_per_child = max;
        }
        if self.min_request_per_child.is_some() {
            config.min_request_per_child = self.min_request_per_child;
        }
        if self.spawn_interval.is_some() {
            config.spawn_interval = self.spawn_interval;
        }
        if self.err_respawn_interval.is_some() {
            config.err_respawn_interval = self.err_respawn_interval;
        }
        if self.backlog.is_some() {
            config.backlog = self.backlog;
        }
        config.reuse_port |= self.reuse_port;
        config.oobgc |= self.oobgc;

        config.validate()?;
        Ok(config)
    }
}

async fn echo(mut req: RequestFields) -> Result<Response<ResponseBody>, std::io::Error> {
    let body = req.input().read_to_vec()?;

    let mut out = String::new();
    for (key, value) in req.iter() {
        let _ = writeln!(out, "{key}: {value}");
    }
    let _ = writeln!(out, "url_scheme: {}", req.url_scheme());
    let _ = writeln!(out, "body_length: {}", body.len());

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain")
        .header(header::CONTENT_LENGTH, out.len())
        .body(ResponseBody::from(out))
        .map_err(std::io::Error::other)?;
    Ok(response)
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            error!(cause = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    info!(pid = std::process::id(), ?config, "starting");
    match Server::new(config, make_application(echo)).run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(cause = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}
