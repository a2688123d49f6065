//! domainwire - domain management protocol node and client
//!
//! Runs a domain controller that serves management requests, or talks to
//! one from the command line.

mod config;
mod handler;
mod network;
mod protocol;
mod repository;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use handler::{Dispatcher, ServerContext};
use network::{
    DomainClient, ManagementClient, ManagementServer, RequestSettings, ServerEvent,
    ServerManagerClient,
};
use protocol::{DeploymentPlan, DomainModelUpdate};
use repository::{
    ContentRepository, FileContentRepository, InMemoryDomainController, InMemoryHostController,
    MemoryContentRepository, RemoteHostController,
};

/// domainwire - domain management over the wire
#[derive(Parser)]
#[command(name = "domainwire")]
#[command(version = "0.1.0")]
#[command(about = "Serve or drive the domain management protocol", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Domain controller to talk to
    #[arg(long, global = true, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on or connect to (overrides the config file)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a domain controller with a local host controller
    Serve {
        /// Managed server to register locally, as GROUP/NAME
        #[arg(long = "server", value_name = "GROUP/NAME")]
        servers: Vec<String>,

        /// Server manager of another host to manage, as HOST:PORT
        #[arg(long = "remote", value_name = "HOST:PORT")]
        remotes: Vec<String>,
    },

    /// Print the domain model
    GetDomain,

    /// Apply domain updates from a JSON array
    Apply {
        /// File holding the updates
        file: PathBuf,
    },

    /// Upload deployment content
    Deploy {
        /// File to upload
        file: PathBuf,

        /// Deployment name (defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,

        /// Runtime name (defaults to the deployment name)
        #[arg(long)]
        runtime_name: Option<String>,
    },

    /// Execute a deployment plan from JSON and print each streamed item
    ExecutePlan {
        /// File holding the plan
        file: PathBuf,
    },

    /// List servers and their status
    Servers,

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show protocol information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };
    if let Some(port) = cli.port {
        config.network.port = port;
    }

    match cli.command {
        Commands::Serve { servers, remotes } => {
            run_server(config, servers, remotes).await?;
        }
        Commands::GetDomain => {
            let client = connect(&config, &cli.host).await?;
            let model = client.get_domain().await?;
            println!("{}", serde_json::to_string_pretty(&model)?);
        }
        Commands::Apply { file } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let updates: Vec<DomainModelUpdate> = serde_json::from_str(&contents)?;
            let client = connect(&config, &cli.host).await?;
            let results = client.apply_updates(updates.clone()).await?;
            for (update, result) in updates.iter().zip(&results) {
                match &result.domain_failure {
                    None => println!("ok      {} /{}", update.operation, update.address.join("/")),
                    Some(failure) => println!(
                        "failed  {} /{}: {}",
                        update.operation,
                        update.address.join("/"),
                        failure
                    ),
                }
            }
        }
        Commands::Deploy {
            file,
            name,
            runtime_name,
        } => {
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .context("deployment file has no name")?,
            };
            let runtime_name = runtime_name.unwrap_or_else(|| name.clone());
            let content = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("opening {}", file.display()))?;

            let client = connect(&config, &cli.host).await?;
            if !client.is_deployment_name_unique(&name).await? {
                anyhow::bail!("a deployment named {} already exists", name);
            }
            let hash = client
                .add_deployment_content(&name, &runtime_name, content)
                .await?;
            println!("{} {}", hash, name);
        }
        Commands::ExecutePlan { file } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let plan: DeploymentPlan = serde_json::from_str(&contents)?;
            let client = connect(&config, &cli.host).await?;
            for item in client.execute_deployment_plan(plan).await? {
                match &item.value {
                    Some(value) => println!("{:#04x} {:?}", item.protocol_value, value),
                    None => println!("{:#04x}", item.protocol_value),
                }
            }
        }
        Commands::Servers => {
            let client = connect(&config, &cli.host).await?;
            for (server, status) in client.server_statuses().await? {
                println!("{:<40} {}", server.to_string(), status);
            }
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_info(&config);
        }
    }

    Ok(())
}

/// Protocol client for `host` on `port`
async fn management_client(
    config: &Config,
    host: &str,
    port: u16,
) -> anyhow::Result<ManagementClient> {
    let settings = RequestSettings {
        codec: config.codec_config(),
        chunk_size: config.protocol.chunk_size,
    };
    let mut network = config.network_config();
    network.port = port;
    let client = ManagementClient::for_host(host, network)
        .await
        .with_context(|| format!("resolving {}", host))?
        .with_settings(settings);
    Ok(client)
}

/// Client for the domain controller at `host`
async fn connect(config: &Config, host: &str) -> anyhow::Result<DomainClient> {
    let client = management_client(config, host, config.network.port).await?;
    Ok(DomainClient::new(client))
}

/// Host controller for the server manager at `HOST:PORT`
async fn connect_remote(config: &Config, remote: &str) -> anyhow::Result<RemoteHostController> {
    let (host, port) = remote
        .rsplit_once(':')
        .with_context(|| format!("expected HOST:PORT, got {}", remote))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("bad port in {}", remote))?;
    let client = management_client(config, host, port).await?;
    RemoteHostController::connect(ServerManagerClient::new(client))
        .await
        .with_context(|| format!("connecting to server manager at {}", remote))
}

/// Run a domain controller until Ctrl+C
async fn run_server(
    config: Config,
    servers: Vec<String>,
    remotes: Vec<String>,
) -> anyhow::Result<()> {
    let content: Arc<dyn ContentRepository> = match &config.content.repository_dir {
        Some(dir) => {
            tracing::info!("Storing deployment content in {}", dir.display());
            Arc::new(FileContentRepository::new(dir.clone()))
        }
        None => Arc::new(MemoryContentRepository::new()),
    };

    let host = Arc::new(InMemoryHostController::new(&config.general.node_name));
    for entry in &servers {
        let (group, name) = entry
            .split_once('/')
            .with_context(|| format!("expected GROUP/NAME, got {}", entry))?;
        host.add_server(name, group).await;
    }

    let domain = Arc::new(InMemoryDomainController::new(Some(content.clone())));
    domain.register_host(host.clone()).await;
    for remote in &remotes {
        let controller = connect_remote(&config, remote).await?;
        domain.register_host(Arc::new(controller)).await;
    }

    let mut context = ServerContext::detached()
        .with_domain(domain)
        .with_content(content)
        .with_host(host);
    context.codec = config.codec_config();
    context.chunk_size = config.protocol.chunk_size;
    context.stream_queue_capacity = config.protocol.stream_queue_capacity;

    let mut server =
        ManagementServer::new(config.network_config(), Dispatcher::standard(), context);
    let mut event_rx = server
        .take_event_receiver()
        .context("server event receiver already taken")?;

    let addr = server.start().await?;

    println!("\n========================================");
    println!("  domainwire domain controller");
    println!("========================================");
    println!("  Node: {}", config.general.node_name);
    println!("  Listening: {}", addr);
    println!("  Servers: {}", servers.len());
    println!("  Remote hosts: {}", remotes.len());
    println!("========================================");
    println!("\nPress Ctrl+C to stop.\n");

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ServerEvent::ClientConnected { addr } => {
                        tracing::debug!("Client connected: {}", addr);
                    }
                    ServerEvent::ClientDisconnected { addr, reason } => {
                        tracing::debug!("Client disconnected: {} ({})", addr, reason);
                    }
                    ServerEvent::Stopped => break,
                    ServerEvent::Started { .. } => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    if server.is_running().await {
        server.stop().await?;
    }
    tracing::info!("Server stopped");

    Ok(())
}

/// Print protocol information
fn print_info(config: &Config) {
    println!("domainwire Protocol Information");
    println!("===============================\n");

    println!("Protocol Version: {}", protocol::PROTOCOL_VERSION);
    println!("Default Port: {}", protocol::DEFAULT_PORT);
    println!("Chunk Size: {} bytes", config.protocol.chunk_size);
    println!("Stream Queue: {} items", config.protocol.stream_queue_capacity);
    println!("Max Object Size: {} bytes", config.protocol.max_object_size);

    println!("\nDomain controller operations:");
    for entry in protocol::opcodes::domain_controller::TABLE {
        println!("  {:#04x}  {}", entry.request, entry.name);
    }
    println!("\nServer manager operations:");
    for entry in protocol::opcodes::server_manager::TABLE {
        println!("  {:#04x}  {}", entry.request, entry.name);
    }
}
