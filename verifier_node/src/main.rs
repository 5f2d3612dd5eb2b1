/// # Verifier Node
///
/// Runs the mod verifier behind a line-oriented TCP gateway. Every connection
/// must report its installed mods before the configured deadline; reports that
/// contain denylisted mods are disconnected with a templated message.
///
/// ## Usage
///
/// ```bash
/// # Write a default configuration if none exists
/// verifier-node --config verifier.toml init
///
/// # Validate the configuration and print the resulting policy
/// verifier-node --config verifier.toml check
///
/// # Run the gateway
/// verifier-node --config verifier.toml run --bind 0.0.0.0:25580
/// ```
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use verifier_node::admin::Admin;
use verifier_node::config::{ensure_default_config, LoggingConfig, Policy, PolicyHandle, VerifierConfig};
use verifier_node::gateway::Gateway;
use verifier_node::transport::ChannelTransport;
use verifier_node::verifier::Verifier;

/// Command line arguments for the verifier node
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", default_value = "verifier.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway (default)
    Run {
        /// Override `[gateway] bind_address`
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Load and validate the configuration, then print the policy
    Check,

    /// Write the default configuration if the file does not exist
    Init,
}

/// Printable summary of a policy
#[derive(Serialize)]
struct PolicySummary<'a> {
    version: u64,
    require_verification: bool,
    timeout_secs: u64,
    first_request_delay_ms: u64,
    resend_interval_ms: u64,
    max_attempts: u32,
    sweep_interval_ms: u64,
    denylist: Vec<&'a str>,
    per_mod_messages: Vec<&'a str>,
}

impl<'a> From<&'a Policy> for PolicySummary<'a> {
    fn from(policy: &'a Policy) -> Self {
        let mut per_mod_messages: Vec<&str> =
            policy.message_templates.keys().map(String::as_str).collect();
        per_mod_messages.sort_unstable();
        Self {
            version: policy.version,
            require_verification: policy.require_verification,
            timeout_secs: policy.timeout.as_secs(),
            first_request_delay_ms: policy.first_request_delay.as_millis() as u64,
            resend_interval_ms: policy.resend_interval.as_millis() as u64,
            max_attempts: policy.max_attempts,
            sweep_interval_ms: policy.sweep_interval.as_millis() as u64,
            denylist: policy.denylist.iter().collect(),
            per_mod_messages,
        }
    }
}

/// Initialize tracing from `RUST_LOG`, falling back to the configured level
fn init_tracing(logging: &LoggingConfig) {
    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.clone()));
    if logging.debug {
        if let Ok(directive) = "verifier_node=debug".parse() {
            filter = filter.add_directive(directive);
        }
    }

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Reload the policy whenever the process receives SIGHUP
#[cfg(unix)]
fn spawn_reload_on_hangup(admin: Arc<Admin>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangups = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to install SIGHUP handler: {}", e);
                return;
            }
        };
        while hangups.recv().await.is_some() {
            match admin.reload() {
                Ok(version) => info!(version, "Policy reloaded on SIGHUP"),
                Err(e) => error!("Reload on SIGHUP failed, keeping current policy: {}", e),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_admin: Arc<Admin>) {}

async fn run(config_path: PathBuf, config: VerifierConfig, bind: Option<String>) -> anyhow::Result<()> {
    let policy = PolicyHandle::from_config(&config)?;
    info!(
        denylist = ?policy.snapshot().denylist.iter().collect::<Vec<_>>(),
        "Loaded verification policy"
    );

    let transport = Arc::new(ChannelTransport::new());
    let verifier = Verifier::new(policy.clone(), transport);
    let sweeper = verifier.spawn_sweeper();

    let admin = Arc::new(Admin::new(config_path, policy, &config));
    spawn_reload_on_hangup(admin.clone());

    let bind_address = bind.unwrap_or_else(|| config.gateway.bind_address.clone());
    let listener = TcpListener::bind(&bind_address).await?;

    info!("Verifier node running. Press Ctrl+C to stop.");
    Gateway::new(verifier, admin)
        .serve(listener, shutdown_signal())
        .await?;

    sweeper.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Init) = cli.command {
        ensure_default_config(&cli.config)?;
        println!("Configuration ready at {}", cli.config.display());
        return Ok(());
    }

    let config = match VerifierConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from {:?}: {}", cli.config, e);
            process::exit(1);
        }
    };

    init_tracing(&config.logging);
    info!("Configuration loaded from {:?}", cli.config);

    match cli.command {
        Some(Commands::Check) => {
            let policy = Policy::from_config(&config, 1)?;
            println!("{}", serde_json::to_string_pretty(&PolicySummary::from(&policy))?);
            Ok(())
        }
        Some(Commands::Run { bind }) => run(cli.config, config, bind).await,
        Some(Commands::Init) | None => run(cli.config, config, None).await,
    }
}
