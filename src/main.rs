use std::net::SocketAddr;
use std::process::exit;

use clap::{Parser, Subcommand};
use fleetd::worker::WorkerSettings;
use fleetd::FleetConfig;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the fleet config file. A worker subprocess is always
    /// launched by a balancer with this flag forwarded automatically —
    /// see `fleetd::balancer::spawn_workers`.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP front-end (§4.1, §6).
    Service,
    /// Run one balancer, owning a fixed fleet of worker subprocesses (§4.3).
    Balancer,
    /// Run one worker process, hosting bots on behalf of a balancer (§4.4).
    Worker {
        #[arg(long)]
        control_addr: SocketAddr,
    },
    /// Run the media-info extractor RPC service (§4.7).
    Extractor {
        #[arg(long, default_value = "127.0.0.1:9000")]
        bind: String,
        #[arg(long, default_value_t = 8)]
        pool_size: usize,
    },
}

fn load_config(cli: &Cli) -> FleetConfig {
    let Some(path) = cli.config.as_deref() else {
        eprintln!("error: --config is required for this subcommand");
        exit(1);
    };
    FleetConfig::new_from_file_and_env(path).unwrap_or_else(|err| {
        eprintln!("error: {err}");
        exit(1);
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    tokio::runtime::Builder::new_multi_thread().enable_all().build()?.block_on(async move {
        match cli.command {
            Commands::Service => run_service(load_config(&cli)).await,
            Commands::Balancer => {
                let config_path = cli.config.clone().unwrap_or_else(|| {
                    eprintln!("error: --config is required for this subcommand");
                    exit(1);
                });
                fleetd::balancer::run(load_config(&cli), config_path).await
            }
            Commands::Worker { control_addr } => run_worker(load_config(&cli), control_addr).await,
            Commands::Extractor { bind, pool_size } => run_extractor(&bind, pool_size).await,
        }
    })
}

async fn run_service(config: FleetConfig) -> anyhow::Result<()> {
    let service = fleetd::service::ServiceState::connect(config).await?;
    fleetd::web::App::new(service).serve().await
}

async fn run_worker(config: FleetConfig, control_addr: SocketAddr) -> anyhow::Result<()> {
    let settings = WorkerSettings {
        chat_base_url: config.chat_base_url,
        chat_request_timeout: config.chat_request_timeout,
        extractor_host: config.extractor_host,
        extractor_port: config.extractor_port,
        instances_per_worker: config.instances_per_worker,
        ..WorkerSettings::default()
    };
    fleetd::worker::run(control_addr, settings).await
}

async fn run_extractor(bind: &str, pool_size: usize) -> anyhow::Result<()> {
    let server = fleetd::extractor::ExtractorServer::bind(bind, pool_size).await?;
    tracing::info!(%bind, "extractor listening");
    server.run().await?;
    Ok(())
}
