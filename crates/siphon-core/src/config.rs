//! siphon.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::OperationKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiphonConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    pub trainer: Option<TrainerConfig>,
    pub status: Option<StatusConfig>,
    pub simulation: Option<SimulationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Host to drain. Picked automatically when absent.
    pub target: Option<String>,
    /// Share of the Target's value taken per batch, in percent.
    pub extraction_percent: f64,
    /// Gap between successive phase completions within a batch.
    pub task_gap_ms: u64,
    /// Steady-state loop period.
    pub poll_interval_ms: u64,
    /// Preparer loop period.
    pub prepare_poll_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            target: None,
            extraction_percent: 10.0,
            task_gap_ms: 500,
            poll_interval_ms: 5000,
            prepare_poll_ms: 200,
        }
    }
}

impl SchedulerConfig {
    pub fn extraction_fraction(&self) -> f64 {
        self.extraction_percent / 100.0
    }

    pub fn task_gap(&self) -> Duration {
        Duration::from_millis(self.task_gap_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn prepare_poll(&self) -> Duration {
        Duration::from_millis(self.prepare_poll_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Host the topology scan starts from.
    pub root: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            root: "home".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Host the trainer spends leftover capacity against.
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub interval_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

/// Parameters of the in-process simulated environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Extract duration at minimum level. Replenish takes 3.2x, Stabilize 4x.
    pub extract_base_ms: u64,
    /// Share of current value one Extract thread takes.
    pub extract_fraction_per_thread: f64,
    /// Value multiplier per Replenish thread.
    pub growth_base: f64,
    pub extract_impact_per_thread: f64,
    pub replenish_impact_per_thread: f64,
    pub operator_level: u32,
    pub costs: CostConfig,
    pub hosts: Vec<HostConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            extract_base_ms: 2000,
            extract_fraction_per_thread: 0.002,
            growth_base: 1.0025,
            extract_impact_per_thread: 0.002,
            replenish_impact_per_thread: 0.004,
            operator_level: 100,
            costs: CostConfig::default(),
            hosts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    pub extract: f64,
    pub replenish: f64,
    pub stabilize: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            extract: 1.7,
            replenish: 1.75,
            stabilize: 1.75,
        }
    }
}

impl CostConfig {
    pub fn of(&self, kind: OperationKind) -> f64 {
        match kind {
            OperationKind::Extract => self.extract,
            OperationKind::Replenish => self.replenish,
            OperationKind::Stabilize => self.stabilize,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub name: String,
    #[serde(default)]
    pub neighbors: Vec<String>,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub max_capacity: f64,
    #[serde(default)]
    pub used_capacity: f64,
    #[serde(default)]
    pub level: f64,
    #[serde(default)]
    pub min_level: f64,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub max_value: f64,
}

impl SiphonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SiphonConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let pct = self.scheduler.extraction_percent;
        if !(pct > 0.0 && pct < 100.0) {
            anyhow::bail!("extraction_percent must be in (0, 100), got {pct}");
        }
        if self.scheduler.task_gap_ms == 0 {
            anyhow::bail!("task_gap_ms must be positive");
        }
        if let Some(sim) = &self.simulation {
            if sim.growth_base <= 1.0 {
                anyhow::bail!("simulation.growth_base must exceed 1.0");
            }
            for host in &sim.hosts {
                if host.used_capacity > host.max_capacity {
                    anyhow::bail!(
                        "host {} uses {} of {} capacity",
                        host.name,
                        host.used_capacity,
                        host.max_capacity
                    );
                }
            }
        }
        Ok(())
    }

    /// Scaffold a small simulated network rooted at `home`.
    pub fn scaffold() -> Self {
        let host = |name: &str, neighbors: &[&str], capacity: f64, stats: (f64, f64)| HostConfig {
            name: name.to_string(),
            neighbors: neighbors.iter().map(|n| n.to_string()).collect(),
            admin: true,
            max_capacity: capacity,
            used_capacity: 0.0,
            level: stats.0 * 3.0,
            min_level: stats.0,
            value: stats.1 * 0.25,
            max_value: stats.1,
        };

        let mut home = host("home", &["n00dles", "foodnstuff"], 256.0, (1.0, 0.0));
        home.used_capacity = 16.0;

        SiphonConfig {
            scheduler: SchedulerConfig::default(),
            discovery: DiscoveryConfig::default(),
            trainer: None,
            status: Some(StatusConfig::default()),
            simulation: Some(SimulationConfig {
                hosts: vec![
                    home,
                    host("n00dles", &["home"], 4.0, (1.0, 1_750_000.0)),
                    host("foodnstuff", &["home", "joesguns"], 16.0, (3.0, 50_000_000.0)),
                    host("joesguns", &["foodnstuff"], 16.0, (5.0, 62_500_000.0)),
                ],
                ..SimulationConfig::default()
            }),
        }
    }
}
