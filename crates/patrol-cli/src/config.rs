//! Patrol configuration – reads/writes `~/.patrol/config.toml`.
//!
//! Every field has a default, so a partial file (or none at all) is valid.
//! `PATROL_*` environment variables override the file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use patrol_intake::IntakeConfig;
use patrol_kernel::DeadlinePolicy;
use patrol_kernel::deadline::{REFERENCE_DEFAULT_TIMEOUT, REFERENCE_LONG_LEGS, REFERENCE_LONG_TIMEOUT};
use patrol_kernel::sequencer::REFERENCE_ROUTE;
use patrol_runtime::PatrolLoopConfig;
use patrol_types::Waypoint;

/// Which navigation service implementation to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    /// rosbridge WebSocket.
    #[default]
    Bridge,
    /// In-process simulator.
    Sim,
}

impl GatewayKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bridge" => Some(GatewayKind::Bridge),
            "sim" => Some(GatewayKind::Sim),
            _ => None,
        }
    }
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayKind::Bridge => write!(f, "bridge"),
            GatewayKind::Sim => write!(f, "sim"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationSection {
    pub gateway: GatewayKind,
    pub bridge_url: String,
    pub action_name: String,
    pub action_type: String,
    pub frame_id: String,
    /// Bound on one reachability probe.
    pub server_probe_secs: f64,
    /// Pause between goals.
    pub settle_secs: f64,
    pub check_period_ms: u64,
    pub failure_streak_threshold: usize,
}

impl Default for NavigationSection {
    fn default() -> Self {
        Self {
            gateway: GatewayKind::default(),
            bridge_url: "ws://localhost:9090".to_string(),
            action_name: "/navigate_to_pose".to_string(),
            action_type: "nav2_msgs/action/NavigateToPose".to_string(),
            frame_id: "map".to_string(),
            server_probe_secs: 5.0,
            settle_secs: 2.0,
            check_period_ms: 1000,
            failure_streak_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlineRuleSection {
    pub indices: Vec<usize>,
    pub secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlinesSection {
    pub default_secs: f64,
    pub rules: Vec<DeadlineRuleSection>,
}

impl Default for DeadlinesSection {
    fn default() -> Self {
        Self {
            default_secs: REFERENCE_DEFAULT_TIMEOUT.as_secs_f64(),
            rules: vec![DeadlineRuleSection {
                indices: REFERENCE_LONG_LEGS.to_vec(),
                secs: REFERENCE_LONG_TIMEOUT.as_secs_f64(),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    /// `host:port` receiving coordinate datagrams.
    pub target: String,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            target: "127.0.0.1:5005".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeSection {
    pub bind_host: String,
    pub environment_port: u16,
    pub coordinate_port: u16,
    pub log_path: PathBuf,
}

impl Default for IntakeSection {
    fn default() -> Self {
        let defaults = IntakeConfig::default();
        Self {
            bind_host: defaults.bind_host,
            environment_port: defaults.environment_port,
            coordinate_port: defaults.coordinate_port,
            log_path: defaults.log_path,
        }
    }
}

fn default_waypoints() -> Vec<Waypoint> {
    REFERENCE_ROUTE.to_vec()
}

/// Persisted configuration stored in `~/.patrol/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub navigation: NavigationSection,
    #[serde(default)]
    pub deadlines: DeadlinesSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
    #[serde(default)]
    pub intake: IntakeSection,
    #[serde(default = "default_waypoints")]
    pub waypoints: Vec<Waypoint>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            navigation: NavigationSection::default(),
            deadlines: DeadlinesSection::default(),
            telemetry: TelemetrySection::default(),
            intake: IntakeSection::default(),
            waypoints: default_waypoints(),
        }
    }
}

fn seconds(field: &str, value: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(value).map_err(|e| format!("{field} = {value}: {e}"))
}

impl Config {
    /// Driver settings.  Fails on an empty route, a non-positive deadline or
    /// overlapping deadline rules.
    pub fn loop_config(&self) -> Result<PatrolLoopConfig, String> {
        let mut deadlines =
            DeadlinePolicy::new(seconds("deadlines.default_secs", self.deadlines.default_secs)?)
                .map_err(|e| e.to_string())?;
        for rule in &self.deadlines.rules {
            deadlines = deadlines
                .with_rule(rule.indices.iter().copied(), seconds("deadlines.rules.secs", rule.secs)?)
                .map_err(|e| e.to_string())?;
        }
        if self.waypoints.is_empty() {
            return Err("no waypoints configured".to_string());
        }
        let nav = &self.navigation;
        Ok(PatrolLoopConfig {
            waypoints: self.waypoints.clone(),
            deadlines,
            frame_id: nav.frame_id.clone(),
            check_period: Duration::from_millis(nav.check_period_ms),
            settle_delay: seconds("navigation.settle_secs", nav.settle_secs)?,
            server_probe_timeout: seconds("navigation.server_probe_secs", nav.server_probe_secs)?,
            failure_streak_threshold: nav.failure_streak_threshold,
        })
    }

    /// Resolve the telemetry target to a socket address.
    pub fn telemetry_target(&self) -> Result<SocketAddr, String> {
        let target = &self.telemetry.target;
        target
            .to_socket_addrs()
            .map_err(|e| format!("telemetry.target {target:?}: {e}"))?
            .next()
            .ok_or_else(|| format!("telemetry.target {target:?} resolved to nothing"))
    }

    pub fn intake_config(&self) -> IntakeConfig {
        IntakeConfig {
            bind_host: self.intake.bind_host.clone(),
            environment_port: self.intake.environment_port,
            coordinate_port: self.intake.coordinate_port,
            log_path: self.intake.log_path.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Location
// ─────────────────────────────────────────────────────────────────────────────

/// `$PATROL_CONFIG`, or `~/.patrol/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("PATROL_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".patrol").join("config.toml")
}

// ─────────────────────────────────────────────────────────────────────────────
// Load / save
// ─────────────────────────────────────────────────────────────────────────────

/// Load from [`config_path`], writing the defaults there on first run.
/// Environment overrides are applied either way.
pub fn load_or_init() -> Result<Config, String> {
    let path = config_path();
    match load_from(&path)? {
        Some(cfg) => {
            tracing::info!(path = %path.display(), "config loaded");
            Ok(cfg)
        }
        None => {
            let mut cfg = Config::default();
            match save_to(&cfg, &path) {
                Ok(()) => tracing::info!(path = %path.display(), "default config written"),
                Err(e) => tracing::warn!(error = %e, "could not write default config"),
            }
            apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
    }
}

/// Load the config at `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Write `cfg` to `path`, creating parent directories.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}

/// Apply `PATROL_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `PATROL_GATEWAY` | `navigation.gateway` |
/// | `PATROL_BRIDGE_URL` | `navigation.bridge_url` |
/// | `PATROL_TELEMETRY_TARGET` | `telemetry.target` |
/// | `PATROL_INTAKE_LOG` | `intake.log_path` |
/// | `PATROL_COORDINATE_PORT` | `intake.coordinate_port` |
/// | `PATROL_ENVIRONMENT_PORT` | `intake.environment_port` |
///
/// Unparsable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("PATROL_GATEWAY")
        && let Some(kind) = GatewayKind::parse(&v)
    {
        cfg.navigation.gateway = kind;
    }
    if let Some(v) = lookup("PATROL_BRIDGE_URL") {
        cfg.navigation.bridge_url = v;
    }
    if let Some(v) = lookup("PATROL_TELEMETRY_TARGET") {
        cfg.telemetry.target = v;
    }
    if let Some(v) = lookup("PATROL_INTAKE_LOG") {
        cfg.intake.log_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("PATROL_COORDINATE_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.intake.coordinate_port = port;
    }
    if let Some(v) = lookup("PATROL_ENVIRONMENT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.intake.environment_port = port;
    }
}
