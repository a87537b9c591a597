//! Ghostline - dispatches requests over a weighted backend pool with failover

use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use http::{Method, Request};
use http_body_util::Full;
use log::{error, info};

use ghostline_agent::{AgentConfig, FailoverAgent};
use ghostline_config::validator::validate as validate_config;
use ghostline_transport::{HttpClient, HttpTransport};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    // Sets a custom config file
    #[arg(short, long)]
    config: Option<String>,

    /// Path (and query) requested on every dispatch
    #[arg(short, long, default_value = "/")]
    path: String,

    /// Number of sequential dispatches
    #[arg(short = 'n', long, default_value_t = 1)]
    count: u32,

    #[arg(short, long, default_value = "GET")]
    method: String,
}

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    let config_path = cli
        .config
        .unwrap_or_else(|| "./config/config.yaml".to_string());

    // Read configuration file
    let config = match ghostline_config::loader::read_config(&config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Error loading config: {}", err);
            std::process::exit(1);
        }
    };

    // Initialize the Logger
    ghostline_utils::logger::init_logger(&config.log.level);

    // Validate Configurations
    if let Err(err) = validate_config(&config) {
        error!("Configuration validation failed: {}. Exiting...", err);
        std::process::exit(1);
    }

    let method = match Method::from_bytes(cli.method.to_uppercase().as_bytes()) {
        Ok(method) => method,
        Err(err) => {
            error!("Invalid method '{}': {}", cli.method, err);
            std::process::exit(1);
        }
    };

    let client = if config.transport.http2_only {
        HttpClient::http2_only()
    } else {
        HttpClient::new()
    };
    let transport = HttpTransport::new(
        client,
        Duration::from_millis(config.transport.timeout_ms),
        config.transport.max_inflight,
    );

    let agent = FailoverAgent::new(
        transport,
        AgentConfig {
            max_try: config.agent.max_try,
            max_fails: config.agent.max_fails,
            fail_timeout: Duration::from_millis(config.agent.fail_timeout_ms),
        },
    );

    for backend in &config.backends {
        if !agent.register(backend.host.as_str(), backend.port, i64::from(backend.weight)) {
            error!("Could not register backend {}:{}", backend.host, backend.port);
            std::process::exit(1);
        }
    }

    info!(
        "Ghostline is dispatching {} request(s) over {} backend(s)",
        cli.count,
        agent.len()
    );

    let mut failures = 0;
    for n in 1..=cli.count {
        let request = match Request::builder()
            .method(method.clone())
            .uri(cli.path.as_str())
            .body(Full::new(Bytes::new()))
        {
            Ok(request) => request,
            Err(err) => {
                error!("Invalid request path '{}': {}", cli.path, err);
                std::process::exit(1);
            }
        };

        match agent.dispatch(request).await {
            Ok(response) => info!("Request {} -> {}", n, response.status()),
            Err(err) => {
                error!("Request {} failed: {}", n, err);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        error!("{} of {} request(s) failed", failures, cli.count);
        std::process::exit(1);
    }
}
