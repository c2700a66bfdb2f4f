//! End-to-end scheduler runs against the simulated environment.
//!
//! Every test runs on a paused tokio clock, so simulated operations land at
//! exact, reproducible instants.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use siphon_core::config::{HostConfig, SchedulerConfig, SimulationConfig};
use siphon_core::{Environment, SiphonConfig, Target};
use siphon_pool::NodePool;
use siphon_scheduler::{BatchState, Scheduler, SchedulerError, select_target};
use siphon_sim::SimEnvironment;

const TARGET: &str = "joesguns";

fn host(name: &str, neighbors: &[&str], capacity: f64) -> HostConfig {
    HostConfig {
        name: name.to_string(),
        neighbors: neighbors.iter().map(|n| n.to_string()).collect(),
        admin: true,
        max_capacity: capacity,
        used_capacity: 0.0,
        level: 1.0,
        min_level: 1.0,
        value: 0.0,
        max_value: 0.0,
    }
}

/// A large home node and a Target that is not a worker.
fn network(level: f64, value: f64) -> SimulationConfig {
    let target = HostConfig {
        admin: false,
        level,
        min_level: 5.0,
        value,
        max_value: 1_000_000.0,
        ..host(TARGET, &["home"], 0.0)
    };
    SimulationConfig {
        extract_base_ms: 2000,
        hosts: vec![host("home", &[TARGET], 1024.0), target],
        ..SimulationConfig::default()
    }
}

fn build(config: &SimulationConfig) -> (Arc<SimEnvironment>, Scheduler, Target) {
    let sim = Arc::new(SimEnvironment::new(config));
    let env: Arc<dyn Environment> = sim.clone();
    let pool = NodePool::discover(env.clone(), "home").unwrap();
    let target = Target::new(TARGET, env.clone());
    let scheduler = Scheduler::new(env, target.clone(), pool, SchedulerConfig::default());
    (sim, scheduler, target)
}

#[tokio::test(start_paused = true)]
async fn phases_land_in_order_one_gap_apart() {
    let (_sim, mut scheduler, target) = build(&network(5.0, 1_000_000.0));
    scheduler.setup().await.unwrap();
    assert_eq!(scheduler.batches().len(), 3);

    // At minimum level: extract 2000 ms, replenish 6400 ms, stabilize 8000 ms.
    // Finishes land at 7500, 8000, 8500 and 9000 ms.
    scheduler.tick().unwrap();
    let ms = |v| tokio::time::sleep(Duration::from_millis(v));

    ms(7499).await;
    assert!(target.snapshot().unwrap().at_baseline());

    ms(1).await;
    let after_extract = target.snapshot().unwrap();
    assert!(after_extract.value < after_extract.max_value);
    assert!(after_extract.level > after_extract.min_level);

    ms(500).await;
    let after_stabilize = target.snapshot().unwrap();
    assert_eq!(after_stabilize.level, after_stabilize.min_level);
    assert!(after_stabilize.value < after_stabilize.max_value);

    ms(500).await;
    let after_replenish = target.snapshot().unwrap();
    assert_eq!(after_replenish.value, after_replenish.max_value);
    assert!(after_replenish.level > after_replenish.min_level);

    ms(500).await;
    let settled = target.snapshot().unwrap();
    assert_eq!(settled.level, settled.min_level);
    assert_eq!(settled.value, settled.max_value);
}

#[tokio::test(start_paused = true)]
async fn batches_cycle_and_go_idle() {
    let (sim, mut scheduler, _target) = build(&network(5.0, 1_000_000.0));
    scheduler.setup().await.unwrap();

    scheduler.tick().unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    scheduler.tick().unwrap();

    let env: &dyn Environment = sim.as_ref();
    let states: Vec<_> = scheduler.batches().iter().map(|b| b.state(env)).collect();
    assert_eq!(
        states,
        vec![BatchState::Running, BatchState::Running, BatchState::Planned]
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(sim.pending_count(), 0);
    assert!(scheduler.batches().iter().all(|b| b.state(env) != BatchState::Running));
}

#[tokio::test(start_paused = true)]
async fn unprepared_target_is_prepared_first() {
    let (_sim, mut scheduler, target) = build(&network(12.0, 250_000.0));
    scheduler.setup().await.unwrap();

    let snap = target.snapshot().unwrap();
    assert_eq!(snap.level, snap.min_level);
    assert_eq!(snap.value, snap.max_value);
    assert!(scheduler.plan().is_some());
}

#[tokio::test(start_paused = true)]
async fn operator_level_change_aborts_the_run() {
    let (sim, mut scheduler, _target) = build(&network(5.0, 1_000_000.0));
    let (_tx, rx) = watch::channel(false);

    let bump = sim.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        bump.set_operator_level(101);
    });

    let err = scheduler.run(rx).await.unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::OperatorLevelChanged { from: 100, to: 101 }
    ));
}

#[tokio::test(start_paused = true)]
async fn scaffold_config_runs_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("siphon.toml");
    std::fs::write(&path, SiphonConfig::scaffold().to_toml_string().unwrap()).unwrap();
    let config = SiphonConfig::from_file(&path).unwrap();

    let sim_config = config.simulation.clone().unwrap();
    let env: Arc<dyn Environment> = Arc::new(SimEnvironment::new(&sim_config));
    let pool = NodePool::discover(env.clone(), &config.discovery.root).unwrap();
    assert_eq!(pool.len(), 4);

    let name = select_target(env.as_ref(), &pool.names()).unwrap();
    assert_eq!(name, "foodnstuff");
    let target = Target::new(name, env.clone());

    let mut scheduler = Scheduler::new(env, target.clone(), pool, config.scheduler.clone());
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(300)).await;
        let _ = tx.send(true);
    });

    let summary = scheduler.run(rx).await.unwrap();
    assert!(summary.batches >= 1);
    assert!(summary.launches >= 3);

    // Let the last launch land.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(target.snapshot().unwrap().at_baseline());
}
