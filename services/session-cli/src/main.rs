//! Session CLI
//!
//! Issues requests against a token-protected backend through the session
//! pipeline:
//! 1. Loads the TOML config and seeds the credential store
//! 2. Runs one command (`login`, `logout` or a plain request)
//! 3. Renews the access token transparently when it has expired
//! 4. Prints the response body, or the user-facing notice on failure
//!
//! Usage:
//!   session-cli [--config PATH] [--metrics] login <USERNAME>
//!   session-cli [--config PATH] [--metrics] logout
//!   session-cli [--config PATH] [--metrics] <METHOD> <PATH> [JSON_BODY]

mod config;
mod error;
mod metrics;

use anyhow::{Context, Result};
use common::Secret;
use reqwest::Method;
use session_auth::{
    AccessToken, CredentialStore, FileCredentialStore, MemoryCredentialStore, RefreshMode,
    RefreshToken,
};
use session_client::{PipelineSettings, RequestPipeline};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::{HttpTransport, RequestDescriptor};

use crate::config::Config;

/// Parsed command line
#[derive(Debug, PartialEq)]
struct Cli {
    config: Option<String>,
    metrics: bool,
    command: Command,
}

#[derive(Debug, PartialEq)]
enum Command {
    Login {
        username: String,
    },
    Logout,
    Request {
        method: Method,
        path: String,
        body: Option<serde_json::Value>,
    },
}

fn parse_args(args: &[String]) -> error::Result<Cli> {
    let mut config = None;
    let mut metrics = false;
    let mut positional = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| error::Error::Usage("--config needs a path".into()))?;
                config = Some(path.clone());
            }
            "--metrics" => metrics = true,
            _ => positional.push(arg.as_str()),
        }
    }

    let command = match positional.as_slice() {
        ["login", username] => Command::Login {
            username: (*username).to_string(),
        },
        ["logout"] => Command::Logout,
        [method, path] | [method, path, _] => {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| error::Error::Usage(format!("unknown method {method}")))?;
            if !path.starts_with('/') {
                return Err(error::Error::Usage(format!(
                    "path must start with '/', got: {path}"
                )));
            }
            let body = match positional.get(2) {
                Some(raw) => Some(serde_json::from_str(raw).map_err(|e| {
                    error::Error::Usage(format!("request body is not valid JSON: {e}"))
                })?),
                None => None,
            };
            Command::Request {
                method,
                path: (*path).to_string(),
                body,
            }
        }
        _ => {
            return Err(error::Error::Usage(
                "session-cli [--config PATH] [--metrics] (login <USERNAME> | logout | <METHOD> <PATH> [JSON_BODY])"
                    .into(),
            ));
        }
    };

    Ok(Cli {
        config,
        metrics,
        command,
    })
}

/// Build the pipeline described by `config`: HTTP transport (with a cookie
/// jar in cookie mode), credential store seeded from the environment, and a
/// termination hook that points the user at the login page.
async fn build_pipeline(config: &Config) -> Result<RequestPipeline> {
    let mode = config.credentials.mode;
    let transport = HttpTransport::new(&config.backend.base_url, mode == RefreshMode::Cookie)
        .context("failed to build HTTP transport")?;

    let store: Arc<dyn CredentialStore> = match &config.credentials.store_file {
        Some(path) => Arc::new(
            FileCredentialStore::load(path.clone())
                .await
                .with_context(|| format!("failed to load credentials from {}", path.display()))?,
        ),
        None => Arc::new(MemoryCredentialStore::new()),
    };
    seed_store(store.as_ref(), config).await?;

    let login_url = config.session.login_url.clone();
    let settings = PipelineSettings {
        refresh_path: config.backend.refresh_path.clone(),
        login_path: config.backend.login_path.clone(),
        logout_path: config.backend.logout_path.clone(),
        refresh_mode: mode,
        request_timeout: config.timeout(),
        renewal_timeout: config.timeout(),
    };

    Ok(RequestPipeline::builder(Arc::new(transport), store)
        .settings(settings)
        .termination_hook(move || {
            warn!("session expired");
            match &login_url {
                Some(url) => eprintln!("Your session has expired, please sign in again at {url}"),
                None => eprintln!("Your session has expired, please sign in again"),
            }
        })
        .build())
}

/// Write env/file-provided tokens into the store. A refresh token without an
/// access token is stored behind an empty access token, so the first request
/// goes out unauthenticated and triggers renewal.
async fn seed_store(store: &dyn CredentialStore, config: &Config) -> Result<()> {
    let access = config
        .credentials
        .access_token
        .as_ref()
        .map(|t| AccessToken::new(t.expose().as_str()));
    let refresh = config
        .credentials
        .refresh_token
        .as_ref()
        .map(|t| RefreshToken::new(t.expose().as_str()));

    let access = match (access, &refresh) {
        (Some(access), _) => access,
        (None, Some(_)) => match store.read().await {
            Some(existing) => existing,
            None => AccessToken::new(""),
        },
        (None, None) => return Ok(()),
    };

    store
        .write(access, refresh)
        .await
        .context("failed to seed credential store")?;
    info!("credential store seeded from environment");
    Ok(())
}

/// Run one command and return what to print on success.
async fn run(pipeline: &RequestPipeline, command: Command) -> error::Result<String> {
    match command {
        Command::Login { username } => {
            let password = std::env::var("SESSION_PASSWORD")
                .map(Secret::new)
                .map_err(|_| error::Error::MissingPassword)?;
            let user = pipeline.login(&username, &password).await?;
            Ok(serde_json::to_string_pretty(&user).unwrap_or_else(|_| user.to_string()))
        }
        Command::Logout => {
            pipeline.logout().await?;
            Ok("logged out".into())
        }
        Command::Request { method, path, body } => {
            let mut request = RequestDescriptor::new(method, path);
            if let Some(body) = body {
                request = request.with_json(body);
            }
            let response = pipeline.execute(request).await?;
            Ok(response.text())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{}", e.notice());
            std::process::exit(e.exit_code());
        }
    };

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.backend.base_url,
        mode = ?config.credentials.mode,
        timeout_secs = config.backend.timeout_secs,
        persistent = config.credentials.store_file.is_some(),
        "configuration loaded"
    );

    let pipeline = build_pipeline(&config).await?;
    let outcome = run(&pipeline, cli.command).await;

    if cli.metrics {
        for line in metrics::session_samples(&prometheus_handle.render()) {
            eprintln!("{line}");
        }
    }

    match outcome {
        Ok(output) => {
            println!("{output}");
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", e.notice());
            std::process::exit(e.exit_code());
        }
    }
}
