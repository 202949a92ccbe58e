#![allow(dead_code)]

mod config;
mod crypto;
mod db;
mod election;
mod engine;
mod graph;
mod monitor;
mod scheduler;
mod scorer;
mod topology;
mod traffic;

use clap::{Parser, Subcommand};
use config::Config;
use graph::ChannelGraph;
use log::{error, info, warn};
use scheduler::RebalancingScheduler;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use traffic::TrafficGenerator;

#[derive(Parser)]
#[command(name = "debal", about = "Decentralized balance-aware rebalancing daemon")]
struct Cli {
    /// Path to debal.toml config file
    #[arg(short, long, default_value = "debal.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulation daemon (default)
    Daemon,
    /// Execute a single protocol step and exit
    RunOnce,
    /// Print current status from the database
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;

    // Initialize logging
    let log_level = config.general.log_level.clone();
    env_logger::Builder::new()
        .filter_level(log_level.parse().unwrap_or(log::LevelFilter::Info))
        .format_timestamp_secs()
        .init();

    info!("debal v{} starting", env!("CARGO_PKG_VERSION"));

    if config.general.dry_run {
        warn!("DRY-RUN MODE: No transfers will be committed");
    }
    if !config.general.enabled {
        warn!("Master switch is OFF -- exiting");
        return Ok(());
    }

    let config = Arc::new(config);

    match cli.command.unwrap_or(Commands::Daemon) {
        Commands::Daemon => run_daemon(config).await,
        Commands::RunOnce => run_once(config).await,
        Commands::Status => print_status(&config),
    }
}

async fn run_daemon(config: Arc<Config>) -> anyhow::Result<()> {
    let mut graph = topology::load(&config.topology.file)?;
    info!(
        "Loaded topology: {} nodes, {} channels",
        graph.node_ids().count(),
        graph.channel_count()
    );

    let db = db::Database::open(&config.general.database_path)?;

    // Shutdown signal
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        info!("Received shutdown signal, finishing current tick...");
        let _ = shutdown_tx.send(true);
    });

    let mut sched = RebalancingScheduler::new(&config);
    let mut traffic = TrafficGenerator::new(&config.traffic);
    let interval = std::time::Duration::from_secs_f64(config.general.tick_secs);

    info!(
        "Entering main loop (tick: {}s{})",
        config.general.tick_secs,
        if config.general.max_ticks > 0 {
            format!(", {} ticks", config.general.max_ticks)
        } else {
            String::new()
        }
    );

    let mut now = 0.0;
    let mut ticks: u64 = 0;

    loop {
        if *shutdown_rx.borrow() {
            info!("Shutting down gracefully");
            break;
        }

        if let Err(e) = run_tick(&config, &mut graph, &mut traffic, &mut sched, &db, now) {
            error!("Tick error: {:#}", e);
        }

        ticks += 1;
        now += config.general.tick_secs;

        if config.general.max_ticks > 0 && ticks >= config.general.max_ticks {
            info!("Completed {} ticks", ticks);
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = shutdown_rx.changed() => {
                info!("Shutting down gracefully");
                break;
            }
        }
    }

    Ok(())
}

async fn run_once(config: Arc<Config>) -> anyhow::Result<()> {
    info!("Running single protocol step...");
    let mut graph = topology::load(&config.topology.file)?;
    let db = db::Database::open(&config.general.database_path)?;
    let mut sched = RebalancingScheduler::new(&config);

    sched.step(&mut graph, &db, 0.0)?;
    info!(
        "Single step complete ({} request(s) pending)",
        sched.pending_requests()
    );
    Ok(())
}

/// One driver tick: settle traffic, then run a protocol step.
pub fn run_tick(
    config: &Config,
    graph: &mut ChannelGraph,
    traffic: &mut TrafficGenerator,
    sched: &mut RebalancingScheduler,
    db: &db::Database,
    now: f64,
) -> anyhow::Result<()> {
    if config.traffic.enabled {
        traffic.tick(graph, config.general.tick_secs / 3600.0);
    }

    sched.step(graph, db, now)?;

    // A consistency failure at the tick boundary is a hard fault.
    graph.check_invariants()?;
    Ok(())
}

fn print_status(config: &Config) -> anyhow::Result<()> {
    let db = db::Database::open(&config.general.database_path)?;
    let conn = db.conn();

    let applied = db.cycle_count(Some("applied"))?;
    let rolled_back = db.cycle_count(Some("rolled_back"))?;
    let skipped = db.cycle_count(Some("skipped"))?;
    let terms = db.term_count()?;

    let current_leader: Option<String> = conn
        .query_row(
            "SELECT leader_id FROM leader_terms WHERE ended_at IS NULL \
             ORDER BY elected_at DESC LIMIT 1",
            [],
            |r| r.get(0),
        )
        .ok();

    println!("debal Status");
    println!("============");
    println!("Leader terms:          {}", terms);
    println!(
        "Current leader:        {}",
        current_leader.as_deref().unwrap_or("(none)")
    );
    println!("Cycles applied:        {}", applied);
    println!("Cycles rolled back:    {}", rolled_back);
    println!("Cycles skipped:        {}", skipped);

    Ok(())
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::db::Database;
    use crate::graph::Node;

    fn test_config() -> Config {
        let mut config = Config::test_default();
        config.traffic.enabled = false;
        config
    }

    fn balanced_triangle() -> ChannelGraph {
        let mut g = ChannelGraph::new();
        for id in ["node_a", "node_b", "node_c"] {
            g.add_node(Node::new(id));
        }
        g.add_channel("ab", "node_a", "node_b", 1000.0, 500.0, 0.001).unwrap();
        g.add_channel("bc", "node_b", "node_c", 1000.0, 500.0, 0.001).unwrap();
        g.add_channel("ca", "node_c", "node_a", 1000.0, 500.0, 0.001).unwrap();
        g
    }

    // -----------------------------------------------------------------------
    // Test 1: Healthy idle network does nothing
    // -----------------------------------------------------------------------
    #[test]
    fn test_tick_balanced_network_is_idle() {
        let config = test_config();
        let db = Database::open_in_memory().unwrap();
        let mut graph = balanced_triangle();
        let mut sched = RebalancingScheduler::new(&config);
        let mut traffic = TrafficGenerator::new(&config.traffic);

        for i in 0..5 {
            run_tick(&config, &mut graph, &mut traffic, &mut sched, &db, i as f64 * 60.0)
                .unwrap();
        }

        assert!(sched.current_leader().is_none());
        assert_eq!(db.term_count().unwrap(), 0);
        assert_eq!(db.cycle_count(None).unwrap(), 0);
        for ch in graph.channels() {
            assert_eq!(ch.local(ch.endpoints().0), 500.0);
        }
    }

    // -----------------------------------------------------------------------
    // Test 2: Draining node requests, wins the election, engine commits
    // -----------------------------------------------------------------------
    #[test]
    fn test_tick_drain_elects_and_rebalances() {
        let config = test_config();
        let db = Database::open_in_memory().unwrap();
        let mut graph = balanced_triangle();
        graph.node_mut("node_a").unwrap().outgoing_rate = 600.0;
        let mut sched = RebalancingScheduler::new(&config);
        let mut traffic = TrafficGenerator::new(&config.traffic);

        run_tick(&config, &mut graph, &mut traffic, &mut sched, &db, 0.0).unwrap();

        assert_eq!(sched.current_leader().unwrap().leader, "node_a");
        assert_eq!(db.term_count().unwrap(), 1);
        assert!(db.cycle_count(Some("applied")).unwrap() >= 1);

        // Every committed transfer kept the conservation and ratio bounds.
        graph.check_invariants().unwrap();
        for ch in graph.channels() {
            assert!(ch.balance_ratio() >= config.engine.theta);
            assert!(ch.skew() <= config.engine.sigma);
        }
    }

    // -----------------------------------------------------------------------
    // Test 3: Depleted endpoints request but cannot coordinate -- deferred
    // -----------------------------------------------------------------------
    #[test]
    fn test_tick_depleted_endpoints_defer() {
        let config = test_config();
        let db = Database::open_in_memory().unwrap();
        let mut graph = ChannelGraph::new();
        graph.add_node(Node::new("node_a"));
        graph.add_node(Node::new("node_b"));
        graph
            .add_channel("ab", "node_a", "node_b", 1000.0, 900.0, 0.001)
            .unwrap();
        let mut sched = RebalancingScheduler::new(&config);
        let mut traffic = TrafficGenerator::new(&config.traffic);

        run_tick(&config, &mut graph, &mut traffic, &mut sched, &db, 0.0).unwrap();

        assert!(sched.current_leader().is_none());
        assert_eq!(sched.pending_requests(), 2);
        assert_eq!(db.term_count().unwrap(), 0);
        assert_eq!(graph.channel("ab").unwrap().local("node_a"), 900.0);
    }

    // -----------------------------------------------------------------------
    // Test 4: Dry-run mode leaves the graph untouched
    // -----------------------------------------------------------------------
    #[test]
    fn test_tick_dry_run_no_mutations() {
        let mut config = test_config();
        config.general.dry_run = true;
        let db = Database::open_in_memory().unwrap();
        let mut graph = balanced_triangle();
        graph.node_mut("node_a").unwrap().outgoing_rate = 600.0;
        let mut sched = RebalancingScheduler::new(&config);
        let mut traffic = TrafficGenerator::new(&config.traffic);

        run_tick(&config, &mut graph, &mut traffic, &mut sched, &db, 0.0).unwrap();

        assert_eq!(db.cycle_count(None).unwrap(), 0);
        for ch in graph.channels() {
            assert_eq!(ch.local(ch.endpoints().0), 500.0);
        }
    }

    // -----------------------------------------------------------------------
    // Test 5: Full simulation with live traffic stays consistent
    // -----------------------------------------------------------------------
    #[test]
    fn test_simulation_with_traffic_stays_consistent() {
        let mut config = test_config();
        config.traffic.enabled = true;
        config.traffic.events_per_tick = 20;
        config.traffic.min_amount = 20.0;
        config.traffic.max_amount = 120.0;

        let db = Database::open_in_memory().unwrap();
        let mut graph = balanced_triangle();
        let mut sched = RebalancingScheduler::new(&config);
        let mut traffic = TrafficGenerator::new(&config.traffic);

        for i in 0..50 {
            run_tick(&config, &mut graph, &mut traffic, &mut sched, &db, i as f64 * 60.0)
                .unwrap();
            // Conservation and bounds hold after every tick.
            graph.check_invariants().unwrap();
            for ch in graph.channels() {
                let (u, v) = ch.endpoints();
                assert!((ch.local(u) + ch.local(v) - ch.capacity()).abs() < 1e-9);
            }
        }

        // The audit trail only ever contains well-formed outcomes.
        let total = db.cycle_count(None).unwrap();
        let by_outcome = db.cycle_count(Some("applied")).unwrap()
            + db.cycle_count(Some("rolled_back")).unwrap()
            + db.cycle_count(Some("skipped")).unwrap();
        assert_eq!(total, by_outcome);
    }

    // -----------------------------------------------------------------------
    // Test 6: Status queries work against a fresh database
    // -----------------------------------------------------------------------
    #[test]
    fn test_status_counts_on_empty_db() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.cycle_count(None).unwrap(), 0);
        assert_eq!(db.cycle_count(Some("applied")).unwrap(), 0);
        assert_eq!(db.term_count().unwrap(), 0);
    }
}
