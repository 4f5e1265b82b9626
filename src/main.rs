use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use bindery::config::{ApiConfig, FleetConfig, SchedulerConfig};
use bindery::node::Node;
use bindery::scheduler::{CoverType, OrderSpec, PaperType};
use bindery::shutdown::install_shutdown_handler;
use bindery::store::{InMemoryDurableStore, InMemoryStateStore};
use bindery::transport::InMemoryBus;
use bindery::worker::spawn_fleet;

#[derive(Parser, Debug)]
#[command(name = "bindery")]
#[command(version)]
#[command(about = "Heartbeat-driven production scheduler for print-on-demand book orders")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the scheduler with a simulated machine fleet
    Serve(ServeArgs),
}

// =============================================================================
// Serve Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Expected period between machine heartbeats
    #[arg(long, default_value = "1000")]
    heartbeat_interval_ms: u64,

    /// Missed heartbeat periods before a machine is declared failed
    #[arg(long, default_value = "3")]
    timeout_cycles: u32,

    /// Period of the job assignment pass
    #[arg(long, default_value = "500")]
    assignment_interval_ms: u64,

    /// Period of the queue status broadcast
    #[arg(long, default_value = "1000")]
    queue_status_interval_ms: u64,

    // === Fleet Options ===
    /// Simulated machines per stage type (0 disables the fleet)
    #[arg(long, default_value = "2")]
    machines_per_stage: usize,

    /// Lower bound of simulated work time per unit
    #[arg(long, default_value = "2000")]
    min_work_ms: u64,

    /// Upper bound of simulated work time per unit
    #[arg(long, default_value = "5000")]
    max_work_ms: u64,

    /// Chance per progress tick that a simulated machine crashes
    #[arg(long, default_value = "0.0")]
    failure_probability: f64,

    /// Silence of a crashed machine before it restarts
    #[arg(long, default_value = "10000")]
    restart_delay_ms: u64,

    // === Inspection API ===
    /// Port for the read-only inspection API (optional)
    #[arg(long)]
    api_port: Option<u16>,

    // === Demo ===
    /// Demo orders to create on startup
    #[arg(long, default_value = "0")]
    demo_orders: u32,

    /// Units per demo order
    #[arg(long, default_value = "3")]
    demo_quantity: u32,
}

// =============================================================================
// Serve Implementation
// =============================================================================

async fn run_serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SchedulerConfig::default()
        .with_heartbeat_interval_ms(args.heartbeat_interval_ms)
        .with_timeout_cycles(args.timeout_cycles)
        .with_assignment_interval_ms(args.assignment_interval_ms)
        .with_queue_status_interval_ms(args.queue_status_interval_ms);

    let fleet = FleetConfig::default()
        .with_machines_per_stage(args.machines_per_stage)
        .with_work_range_ms(args.min_work_ms, args.max_work_ms)
        .with_failure_probability(args.failure_probability)
        .with_restart_delay_ms(args.restart_delay_ms)
        .with_heartbeat_interval_ms(args.heartbeat_interval_ms);
    fleet.validate(&config)?;

    let api_addr: Option<SocketAddr> = match args.api_port {
        Some(p) => Some(format!("0.0.0.0:{}", p).parse()?),
        None => None,
    };
    let api = ApiConfig {
        listen_addr: api_addr,
    };

    let state = Arc::new(InMemoryStateStore::new());
    let durable = Arc::new(InMemoryDurableStore::new());
    let bus = Arc::new(InMemoryBus::new());

    let node = Node::new(config, api, state, durable, bus.clone())?;
    let token = install_shutdown_handler();

    for n in 1..=args.demo_orders {
        node.orders
            .create_order(&demo_order(n, args.demo_quantity))
            .await?;
    }

    let fleet_handles = spawn_fleet(&fleet, bus, token.child_token());

    node.run(token).await?;

    for handle in fleet_handles {
        let _ = handle.await;
    }
    Ok(())
}

/// Demo order `n`. Page counts grow with `n` and saturate.
fn demo_order(n: u32, quantity: u32) -> OrderSpec {
    OrderSpec {
        title: format!("Demo Book {n}"),
        author: "Bindery".to_string(),
        pages: 40u32.saturating_mul(n).saturating_add(200),
        cover_type: if n % 2 == 0 {
            CoverType::Softcover
        } else {
            CoverType::Hardcover
        },
        paper_type: if n % 3 == 0 {
            PaperType::Glossy
        } else {
            PaperType::Matte
        },
        quantity,
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => {
            run_serve(serve_args).await?;
        }
    }

    Ok(())
}
