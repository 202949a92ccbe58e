use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub traffic: TrafficConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub election: ElectionConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    /// Path to the audit database
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Master enable/disable
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Dry-run mode: log decisions but commit nothing
    #[serde(default)]
    pub dry_run: bool,
    /// Simulated seconds advanced per driver tick
    #[serde(default = "default_tick_secs")]
    pub tick_secs: f64,
    /// Number of ticks to simulate (0 = run until shutdown)
    #[serde(default)]
    pub max_ticks: u64,
}

#[derive(Debug, Deserialize)]
pub struct TopologyConfig {
    /// Path to the network topology file
    #[serde(default = "default_topology_path")]
    pub file: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct TrafficConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Mean settlement events per tick
    #[serde(default = "default_events_per_tick")]
    pub events_per_tick: u32,
    /// Settlement amount range
    #[serde(default = "default_min_amount")]
    pub min_amount: f64,
    #[serde(default = "default_max_amount")]
    pub max_amount: f64,
    /// RNG seed for reproducible runs
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// EWMA smoothing factor for node rate estimates
    #[serde(default = "default_rate_alpha")]
    pub rate_alpha: f64,
}

#[derive(Debug, Deserialize)]
pub struct MonitorConfig {
    /// Minimum balance ratio before a channel counts as at-risk
    #[serde(default = "default_theta")]
    pub theta: f64,
    /// Time-to-depletion threshold in hours
    #[serde(default = "default_tau")]
    pub tau_hours: f64,
    /// Division guard for net-flow estimates
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

#[derive(Debug, Deserialize)]
pub struct ElectionConfig {
    /// Minimum total outgoing balance for leader eligibility.
    /// 0.0 means any requester with healthy channels may coordinate.
    #[serde(default)]
    pub kappa: f64,
    /// Minimum balance ratio each of a leader's channels must hold
    #[serde(default = "default_theta")]
    pub theta: f64,
    /// Re-election interval in simulated seconds
    #[serde(default = "default_delta_t")]
    pub delta_t_secs: f64,
    /// Shared key for announcement signatures
    #[serde(default = "default_signing_key")]
    pub signing_key: String,
}

#[derive(Debug, Deserialize)]
pub struct ScorerConfig {
    /// Maximum circular path length in channels
    #[serde(default = "default_max_path_len")]
    pub max_path_len: usize,
}

#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    /// Maximum rebalancing cycles per run
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
    /// Initial attempt amount per cycle
    #[serde(default = "default_initial_amount")]
    pub initial_amount: f64,
    /// Attempt-amount reduction factor applied after a rollback
    #[serde(default = "default_reduction_factor")]
    pub reduction_factor: f64,
    /// Maximum post-transfer skew tolerated on any touched channel
    #[serde(default = "default_sigma")]
    pub sigma: f64,
    /// Minimum balance ratio every touched channel must keep
    #[serde(default = "default_theta")]
    pub theta: f64,
    /// Convergence threshold on max-skew improvement
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from("debal.db")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_tick_secs() -> f64 {
    60.0
}
fn default_topology_path() -> PathBuf {
    PathBuf::from("topology.toml")
}
fn default_events_per_tick() -> u32 {
    4
}
fn default_min_amount() -> f64 {
    10.0
}
fn default_max_amount() -> f64 {
    100.0
}
fn default_seed() -> u64 {
    7
}
fn default_rate_alpha() -> f64 {
    0.2
}
fn default_theta() -> f64 {
    0.2
}
fn default_tau() -> f64 {
    2.0
}
fn default_epsilon() -> f64 {
    0.001
}
fn default_delta_t() -> f64 {
    600.0
}
fn default_signing_key() -> String {
    "debal-sim".to_string()
}
fn default_max_path_len() -> usize {
    4
}
fn default_max_cycles() -> u32 {
    10
}
fn default_initial_amount() -> f64 {
    100.0
}
fn default_reduction_factor() -> f64 {
    0.8
}
fn default_sigma() -> f64 {
    0.8
}

// Default implementations
impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            log_level: default_log_level(),
            enabled: true,
            dry_run: false,
            tick_secs: default_tick_secs(),
            max_ticks: 0,
        }
    }
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            file: default_topology_path(),
        }
    }
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            events_per_tick: default_events_per_tick(),
            min_amount: default_min_amount(),
            max_amount: default_max_amount(),
            seed: default_seed(),
            rate_alpha: default_rate_alpha(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            theta: default_theta(),
            tau_hours: default_tau(),
            epsilon: default_epsilon(),
        }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            kappa: 0.0,
            theta: default_theta(),
            delta_t_secs: default_delta_t(),
            signing_key: default_signing_key(),
        }
    }
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            max_path_len: default_max_path_len(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cycles: default_max_cycles(),
            initial_amount: default_initial_amount(),
            reduction_factor: default_reduction_factor(),
            sigma: default_sigma(),
            theta: default_theta(),
            epsilon: default_epsilon(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        // Hard limits (non-configurable safety rails)
        const ABS_MAX_CYCLES: u32 = 1000;
        const ABS_MAX_PATH_LEN: usize = 8;

        if !(0.0..1.0).contains(&self.monitor.theta) {
            anyhow::bail!("monitor.theta must be in [0, 1), got {}", self.monitor.theta);
        }
        if self.monitor.tau_hours <= 0.0 {
            anyhow::bail!("monitor.tau_hours must be positive");
        }
        if self.monitor.epsilon <= 0.0 {
            anyhow::bail!("monitor.epsilon must be positive");
        }
        if self.election.kappa < 0.0 {
            anyhow::bail!("election.kappa must be non-negative");
        }
        if !(0.0..1.0).contains(&self.election.theta) {
            anyhow::bail!("election.theta must be in [0, 1)");
        }
        if self.election.delta_t_secs <= 0.0 {
            anyhow::bail!("election.delta_t_secs must be positive");
        }
        if self.scorer.max_path_len < 3 {
            anyhow::bail!(
                "scorer.max_path_len ({}) below minimum cycle length (3)",
                self.scorer.max_path_len
            );
        }
        if self.scorer.max_path_len > ABS_MAX_PATH_LEN {
            anyhow::bail!(
                "scorer.max_path_len ({}) above absolute maximum ({})",
                self.scorer.max_path_len,
                ABS_MAX_PATH_LEN
            );
        }
        if self.engine.max_cycles == 0 || self.engine.max_cycles > ABS_MAX_CYCLES {
            anyhow::bail!(
                "engine.max_cycles must be in 1..={}, got {}",
                ABS_MAX_CYCLES,
                self.engine.max_cycles
            );
        }
        if self.engine.initial_amount <= 0.0 {
            anyhow::bail!("engine.initial_amount must be positive");
        }
        if self.engine.reduction_factor <= 0.0 || self.engine.reduction_factor >= 1.0 {
            anyhow::bail!(
                "engine.reduction_factor must be in (0, 1), got {}",
                self.engine.reduction_factor
            );
        }
        if self.engine.sigma <= 0.0 || self.engine.sigma > 1.0 {
            anyhow::bail!("engine.sigma must be in (0, 1], got {}", self.engine.sigma);
        }
        if !(0.0..1.0).contains(&self.engine.theta) {
            anyhow::bail!("engine.theta must be in [0, 1)");
        }
        if self.traffic.min_amount <= 0.0 || self.traffic.max_amount < self.traffic.min_amount {
            anyhow::bail!("traffic amount range is invalid");
        }
        if !(0.0..=1.0).contains(&self.traffic.rate_alpha) {
            anyhow::bail!("traffic.rate_alpha must be in [0, 1]");
        }
        Ok(())
    }

    /// Create a config with all defaults for testing purposes.
    #[cfg(test)]
    pub fn test_default() -> Self {
        Self {
            general: GeneralConfig::default(),
            topology: TopologyConfig::default(),
            traffic: TrafficConfig::default(),
            monitor: MonitorConfig::default(),
            election: ElectionConfig::default(),
            scorer: ScorerConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_defaults_pass() {
        let config = Config::test_default();
        assert!(config.validate().is_ok(), "{}", config.validate().unwrap_err());
    }

    #[test]
    fn test_validate_theta_out_of_range() {
        let mut config = Config::test_default();
        config.monitor.theta = 1.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("monitor.theta"));
    }

    #[test]
    fn test_validate_reduction_factor_bounds() {
        let mut config = Config::test_default();
        config.engine.reduction_factor = 1.0;
        assert!(config.validate().is_err());

        let mut config = Config::test_default();
        config.engine.reduction_factor = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_max_cycles_bounds() {
        let mut config = Config::test_default();
        config.engine.max_cycles = 0;
        assert!(config.validate().is_err());

        let mut config = Config::test_default();
        config.engine.max_cycles = 2000; // above ABS_MAX of 1000
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_path_len_bounds() {
        let mut config = Config::test_default();
        config.scorer.max_path_len = 2; // below minimum cycle length
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_path_len"));

        let mut config = Config::test_default();
        config.scorer.max_path_len = 9; // above ABS_MAX of 8
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_sigma_bounds() {
        let mut config = Config::test_default();
        config.engine.sigma = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::test_default();
        config.engine.sigma = 1.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_traffic_amount_range() {
        let mut config = Config::test_default();
        config.traffic.min_amount = 50.0;
        config.traffic.max_amount = 10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_deserialize_minimal() {
        let toml_str = r#"
[general]
dry_run = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.general.dry_run);
        // Defaults should be applied
        assert_eq!(config.monitor.theta, 0.2);
        assert_eq!(config.monitor.tau_hours, 2.0);
        assert_eq!(config.engine.max_cycles, 10);
        assert_eq!(config.engine.sigma, 0.8);
        assert_eq!(config.election.delta_t_secs, 600.0);
        assert_eq!(config.scorer.max_path_len, 4);
    }

    #[test]
    fn test_toml_deserialize_overrides() {
        let toml_str = r#"
[monitor]
theta = 0.35
tau_hours = 1.5

[engine]
max_cycles = 5
initial_amount = 250.0
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.monitor.theta, 0.35);
        assert_eq!(config.monitor.tau_hours, 1.5);
        assert_eq!(config.engine.max_cycles, 5);
        assert_eq!(config.engine.initial_amount, 250.0);
        assert!(config.validate().is_ok());
    }
}
