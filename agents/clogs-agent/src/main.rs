//! Clogs Agent CLI Entry Point
//!
//! This is the main entry point for the Clogs Agent binary.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use clogs_agent::agent::heartbeat::HeartbeatService;
use clogs_agent::agent::identity::{obtain_identity, IdentityStore, RetryPolicy};
use clogs_agent::backend::client::{BackendClient, HttpBackend};
use clogs_agent::cli::config::{Config, LoggingConfig};
use clogs_agent::discovery::context::{identify_self, Containment};
use clogs_agent::discovery::engine::{scan, DiscoveryService};
use clogs_agent::discovery::filter::TagFilter;
use clogs_agent::logs::collector::{LogCollector, PipelineSettings};
use clogs_agent::runtime::adapter::{ensure_available, RuntimeAdapter};
use clogs_agent::runtime::docker::adapter::DockerAdapter;

#[derive(Parser)]
#[command(name = "clogs-agent")]
#[command(author, version, about = "Clogs Agent - Container discovery and log forwarding")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "CLOGS_AGENT_CONFIG", default_value = "clogs-agent.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Settings that take precedence over the configuration file
#[derive(Args)]
struct Overrides {
    /// Backend base URL
    #[arg(long, global = true, env = "CLOGS_BACKEND_URL")]
    backend_url: Option<String>,

    /// Backend API key
    #[arg(long, global = true, env = "CLOGS_AGENT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Discovery interval in seconds
    #[arg(long, global = true, env = "CLOGS_AGENT_DISCOVERY_INTERVAL")]
    discovery_interval: Option<u64>,

    /// Heartbeat interval in seconds
    #[arg(long, global = true, env = "CLOGS_AGENT_HEARTBEAT_INTERVAL")]
    heartbeat_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "CLOGS_AGENT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Label that opts containers into monitoring
    #[arg(long, global = true, env = "CLOGS_AGENTS_MONITORING_TAG")]
    monitoring_tag: Option<String>,

    /// File holding the agent id
    #[arg(long, global = true, env = "CLOGS_AGENT_ID_FILE")]
    identity_file: Option<PathBuf>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(url) = self.backend_url {
            config.backend.url = url;
        }
        if let Some(key) = self.api_key {
            config.backend.api_key = Some(key);
        }
        if let Some(secs) = self.discovery_interval {
            config.discovery.interval_secs = secs;
        }
        if let Some(secs) = self.heartbeat_interval {
            config.agent.heartbeat_interval_secs = secs;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(tag) = self.monitoring_tag {
            config.discovery.monitoring_tag = tag;
        }
        if let Some(path) = self.identity_file {
            config.agent.identity_file = path;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agent
    Start,
    /// Classify and filter containers once and print the monitored groups
    Discover,
    /// Show agent status
    Status,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    cli.overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    init_logging(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Start => {
            start_agent(config).await?;
        }
        Commands::Discover => {
            discover(&config).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level: {}", level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match config.format.as_str() {
        "json" => builder.json().try_init(),
        "compact" => builder.compact().try_init(),
        _ => builder.pretty().try_init(),
    }
    .map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

fn connect_docker(config: &Config) -> Result<DockerAdapter> {
    match config.discovery.docker_socket.as_deref() {
        Some(socket) => DockerAdapter::with_socket(socket),
        None => DockerAdapter::new(),
    }
    .context("Failed to initialize Docker adapter")
}

async fn start_agent(config: Config) -> Result<()> {
    info!("Starting Clogs Agent...");

    // Initialize Docker adapter
    let docker = connect_docker(&config)?;

    // Verify Docker is accessible
    let version = ensure_available(&docker).await
        .context("Docker runtime unavailable")?;
    info!(docker_version = %version, socket = %docker.socket_path(), "Docker runtime initialized");

    let runtime = Arc::new(docker);
    let backend = Arc::new(
        HttpBackend::new(&config.backend).context("Failed to create backend client")?,
    );
    info!(url = %backend.base_url(), "Backend client ready");

    // Identity
    let store = IdentityStore::new(config.agent.identity_file.clone());
    let retry = RetryPolicy {
        attempts: config.backend.identity_retry_attempts,
        delay: config.backend.identity_retry_delay(),
    };
    let agent_id = obtain_identity(backend.as_ref(), &store, runtime.runtime_type(), retry).await?;

    // Where the agent itself runs decides what it may monitor
    let own_context = identify_self(runtime.as_ref()).await;
    let containment = Containment::for_agent(&own_context, config.discovery.cross_boundary);
    info!(
        context = %own_context,
        cross_boundary = containment.is_cross_boundary(),
        "Agent classified"
    );

    let collector = LogCollector::start(
        runtime.clone(),
        backend.clone(),
        &agent_id,
        PipelineSettings::from(&config.logs),
    );

    let filter = TagFilter::new(
        &config.discovery.monitoring_tag,
        config.discovery.tag_filter.as_deref(),
    );
    let discovery = Arc::new(DiscoveryService::new(
        runtime.clone(),
        backend.clone(),
        &agent_id,
        filter,
        containment,
        collector.clone(),
    ));
    discovery.seed_from_backend().await;

    let heartbeat = Arc::new(HeartbeatService::new(backend.clone(), &agent_id));
    let running = Arc::new(AtomicBool::new(true));

    let discovery_task = {
        let discovery = discovery.clone();
        let running = running.clone();
        let interval = config.discovery.interval();
        tokio::spawn(async move { discovery.run(interval, running).await })
    };
    let heartbeat_task = {
        let heartbeat = heartbeat.clone();
        let running = running.clone();
        let interval = config.agent.heartbeat_interval();
        tokio::spawn(async move { heartbeat.run(interval, running).await })
    };

    info!(agent_id = %agent_id, "Clogs Agent running");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    running.store(false, Ordering::SeqCst);
    for (name, task) in [("discovery", discovery_task), ("heartbeat", heartbeat_task)] {
        if let Err(e) = task.await {
            error!(service = name, error = %e, "Service task failed");
        }
    }
    collector.shutdown().await;

    info!("Clogs Agent stopped");
    Ok(())
}

async fn discover(config: &Config) -> Result<()> {
    let docker = connect_docker(config)?;
    ensure_available(&docker).await
        .context("Docker runtime unavailable")?;

    let own_context = identify_self(&docker).await;
    let containment = Containment::for_agent(&own_context, config.discovery.cross_boundary);
    let filter = TagFilter::new(
        &config.discovery.monitoring_tag,
        config.discovery.tag_filter.as_deref(),
    );

    let groups = scan(&docker, &filter, &containment).await?;

    println!("Agent context: {}", own_context);
    println!(
        "Mode: {}",
        if containment.is_cross_boundary() { "cross-boundary" } else { "bounded" }
    );
    if groups.is_empty() {
        println!("No monitored containers");
    }
    for (key, containers) in &groups {
        println!("{} ({} containers)", key, containers.len());
        for container in containers {
            println!(
                "  {}  {:<24} {:<10} {}",
                container.short_id(),
                container.name,
                container.status,
                container.image.as_deref().unwrap_or("-")
            );
        }
    }

    Ok(())
}

async fn show_status(config: &Config) -> Result<()> {
    println!("Agent Status: checking...");

    // Check Docker connectivity
    match connect_docker(config) {
        Ok(docker) => {
            match docker.health_check().await {
                Ok(true) => match docker.version().await {
                    Ok(version) => println!("  Docker: {} (connected)", version),
                    Err(e) => println!("  Docker: reachable, version unknown - {}", e),
                },
                Ok(false) => println!("  Docker: not responding on {}", docker.socket_path()),
                Err(e) => println!("  Docker: error - {}", e),
            }

            match docker.list_containers(false).await {
                Ok(containers) => println!("  Running containers: {}", containers.len()),
                Err(_) => println!("  Running containers: unknown"),
            }
        }
        Err(e) => println!("  Docker: not available - {}", e),
    }

    let store = IdentityStore::new(config.agent.identity_file.clone());
    let agent_id = match store.load() {
        Ok(Some(id)) => {
            println!("  Agent id: {}", id);
            Some(id)
        }
        Ok(None) => {
            println!("  Agent id: not registered ({})", store.path().display());
            None
        }
        Err(e) => {
            warn!(error = %e, "Failed to read identity file");
            println!("  Agent id: unreadable - {}", e);
            None
        }
    };

    let backend = HttpBackend::new(&config.backend)?;
    match agent_id {
        Some(id) => match backend.get_agent(&id).await {
            Ok(_) => println!("  Backend: {} (agent known)", backend.base_url()),
            Err(e) => println!("  Backend: {} - {}", backend.base_url(), e),
        },
        None => println!("  Backend: {}", backend.base_url()),
    }

    Ok(())
}

fn show_version() {
    println!("clogs-agent {}", env!("CARGO_PKG_VERSION"));
    println!("Host agent for Clogs container monitoring");
    println!();
    println!("Features:");
    println!("  - Docker container discovery and classification");
    println!("  - Compose and stack context registration");
    println!("  - Batched log forwarding with bounded buffering");
    println!("  - Heartbeat reporting");
}
