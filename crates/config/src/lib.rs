//! Configuration loading, validation, and management for chatloop.
//!
//! Loads configuration from `~/.chatloop/config.toml` with environment
//! variable overrides. Validation runs at load time and again whenever a
//! conversation loop is created, so a bad setting fails fast instead of
//! degrading a running loop.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.chatloop/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Conversation behaviour
    #[serde(default)]
    pub chat: ChatConfig,

    /// Energy model constants
    #[serde(default)]
    pub energy: EnergyConfig,

    /// Loop periods and delays
    #[serde(default)]
    pub timing: TimingConfig,

    /// Proactive (speak-first) behaviour
    #[serde(default)]
    pub proactive: ProactiveConfig,
}

/// Forced operating mode for group conversations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMode {
    /// Energy drives the mode
    #[default]
    Auto,
    /// Always engaged
    Engaged,
    /// Never engaged
    Idle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Engagement factor. Higher values make the bot engage sooner and stay longer.
    #[serde(default = "default_focus_value")]
    pub focus_value: f64,

    #[serde(default)]
    pub group_mode: GroupMode,

    /// Direct messages never drop out of engaged mode
    #[serde(default)]
    pub force_focus_private: bool,

    /// Upper bound on awaiting a generated reply
    #[serde(default = "default_thinking_timeout")]
    pub thinking_timeout_secs: u64,

    /// A mention removes `no_reply` from the planner's options in engaged mode
    #[serde(default = "default_true")]
    pub mention_forces_reply: bool,

    /// Multiplier applied to interest scores in idle mode
    #[serde(default = "default_talk_frequency")]
    pub talk_frequency: f64,

    /// Messages fetched per tick
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,

    /// Cycle records retained per conversation
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Per-stream talk frequency
    #[serde(default)]
    pub talk_frequency_overrides: HashMap<String, f64>,
}

fn default_focus_value() -> f64 {
    1.0
}
fn default_thinking_timeout() -> u64 {
    40
}
fn default_true() -> bool {
    true
}
fn default_talk_frequency() -> f64 {
    1.0
}
fn default_fetch_limit() -> usize {
    10
}
fn default_history_limit() -> usize {
    50
}

impl ChatConfig {
    pub fn thinking_timeout(&self) -> Duration {
        Duration::from_secs(self.thinking_timeout_secs)
    }

    /// Talk frequency for a stream, falling back to the global value.
    pub fn talk_frequency_for(&self, stream_id: &str) -> f64 {
        self.talk_frequency_overrides
            .get(stream_id)
            .copied()
            .unwrap_or(self.talk_frequency)
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            focus_value: default_focus_value(),
            group_mode: GroupMode::Auto,
            force_focus_private: false,
            thinking_timeout_secs: default_thinking_timeout(),
            mention_forces_reply: true,
            talk_frequency: default_talk_frequency(),
            fetch_limit: default_fetch_limit(),
            history_limit: default_history_limit(),
            talk_frequency_overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyConfig {
    #[serde(default = "default_floor")]
    pub floor: f64,

    #[serde(default = "default_ceiling")]
    pub ceiling: f64,

    /// Decay per tick while idle
    #[serde(default = "default_idle_decay")]
    pub idle_decay: f64,

    /// Decay per tick while engaged
    #[serde(default = "default_engaged_decay")]
    pub engaged_decay: f64,

    /// Energy at or above which idle switches to engaged
    #[serde(default = "default_engage_threshold")]
    pub engage_threshold: f64,

    /// Energy at or below which engaged drops back to idle
    #[serde(default = "default_disengage_threshold")]
    pub disengage_threshold: f64,

    /// Energy of a freshly started loop
    #[serde(default = "default_cold_start")]
    pub cold_start: f64,

    /// Base energy when a burst of messages forces engagement
    #[serde(default = "default_engaged_seed")]
    pub engaged_seed: f64,

    /// Energy restored for a forced-focus DM that ran dry
    #[serde(default = "default_private_reset")]
    pub private_reset: f64,

    /// Pinned energy for groups forced engaged
    #[serde(default = "default_forced_engaged")]
    pub forced_engaged: f64,

    /// Pinned energy for groups forced idle
    #[serde(default = "default_forced_idle")]
    pub forced_idle: f64,
}

fn default_floor() -> f64 {
    0.3
}
fn default_ceiling() -> f64 {
    100.0
}
fn default_idle_decay() -> f64 {
    0.3
}
fn default_engaged_decay() -> f64 {
    0.6
}
fn default_engage_threshold() -> f64 {
    30.0
}
fn default_disengage_threshold() -> f64 {
    1.0
}
fn default_cold_start() -> f64 {
    5.0
}
fn default_engaged_seed() -> f64 {
    10.0
}
fn default_private_reset() -> f64 {
    5.0
}
fn default_forced_engaged() -> f64 {
    35.0
}
fn default_forced_idle() -> f64 {
    15.0
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            floor: default_floor(),
            ceiling: default_ceiling(),
            idle_decay: default_idle_decay(),
            engaged_decay: default_engaged_decay(),
            engage_threshold: default_engage_threshold(),
            disengage_threshold: default_disengage_threshold(),
            cold_start: default_cold_start(),
            engaged_seed: default_engaged_seed(),
            private_reset: default_private_reset(),
            forced_engaged: default_forced_engaged(),
            forced_idle: default_forced_idle(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_energy_tick")]
    pub energy_tick_secs: u64,

    #[serde(default = "default_proactive_check")]
    pub proactive_check_secs: u64,

    /// Sleep when an idle tick finds nothing to read
    #[serde(default = "default_idle_poll")]
    pub idle_poll_ms: u64,

    /// Pause between driver ticks
    #[serde(default = "default_loop_pause")]
    pub loop_pause_ms: u64,

    /// Cooldown before a faulted driver is restarted
    #[serde(default = "default_restart_cooldown")]
    pub restart_cooldown_secs: u64,

    /// Consecutive reply timeouts before an operator warning
    #[serde(default = "default_timeout_warning_threshold")]
    pub timeout_warning_threshold: u32,
}

fn default_energy_tick() -> u64 {
    10
}
fn default_proactive_check() -> u64 {
    15
}
fn default_idle_poll() -> u64 {
    500
}
fn default_loop_pause() -> u64 {
    100
}
fn default_restart_cooldown() -> u64 {
    3
}
fn default_timeout_warning_threshold() -> u32 {
    5
}

impl TimingConfig {
    pub fn energy_tick(&self) -> Duration {
        Duration::from_secs(self.energy_tick_secs)
    }

    pub fn proactive_check(&self) -> Duration {
        Duration::from_secs(self.proactive_check_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn loop_pause(&self) -> Duration {
        Duration::from_millis(self.loop_pause_ms)
    }

    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_secs(self.restart_cooldown_secs)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            energy_tick_secs: default_energy_tick(),
            proactive_check_secs: default_proactive_check(),
            idle_poll_ms: default_idle_poll(),
            loop_pause_ms: default_loop_pause(),
            restart_cooldown_secs: default_restart_cooldown(),
            timeout_warning_threshold: default_timeout_warning_threshold(),
        }
    }
}

/// Legacy restriction on where proactive messages may fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProactiveScope {
    All,
    Private,
    Group,
}

impl std::str::FromStr for ProactiveScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(ProactiveScope::All),
            "private" => Ok(ProactiveScope::Private),
            "group" => Ok(ProactiveScope::Group),
            other => Err(ConfigError::ValidationError(format!(
                "proactive.scope must be one of all, private, group (got '{other}')"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveConfig {
    #[serde(default)]
    pub enabled: bool,

    /// `all`, `private` or `group`
    #[serde(default = "default_scope")]
    pub scope: String,

    #[serde(default = "default_true")]
    pub in_private: bool,

    #[serde(default = "default_true")]
    pub in_group: bool,

    /// Chat ids allowed to receive proactive messages; empty allows all
    #[serde(default)]
    pub enable_ids: Vec<String>,

    /// Mean silence before speaking first
    #[serde(default = "default_interval")]
    pub interval_secs: i64,

    /// Standard deviation of the silence target
    #[serde(default = "default_delta_sigma")]
    pub delta_sigma: i64,

    /// Prompt with a `{time}` placeholder; built-in text when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,

    /// Generator output meaning "decline to speak"
    #[serde(default = "default_silence_marker")]
    pub silence_marker: String,
}

fn default_scope() -> String {
    "all".into()
}
fn default_interval() -> i64 {
    1500
}
fn default_delta_sigma() -> i64 {
    120
}
fn default_silence_marker() -> String {
    "[silence]".into()
}

impl ProactiveConfig {
    pub fn scope(&self) -> Result<ProactiveScope, ConfigError> {
        self.scope.parse()
    }

    /// Whether a chat id passes the allow-list.
    pub fn allows_chat(&self, chat_id: &str) -> bool {
        self.enable_ids.is_empty() || self.enable_ids.iter().any(|id| id == chat_id)
    }
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scope: default_scope(),
            in_private: true,
            in_group: true,
            enable_ids: vec![],
            interval_secs: default_interval(),
            delta_sigma: default_delta_sigma(),
            prompt_template: None,
            silence_marker: default_silence_marker(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.chatloop/config.toml).
    ///
    /// Environment variables override file values:
    /// - `CHATLOOP_FOCUS_VALUE`
    /// - `CHATLOOP_THINKING_TIMEOUT` (seconds)
    /// - `CHATLOOP_PROACTIVE` (`true` / `false`)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("CHATLOOP_FOCUS_VALUE") {
            self.chat.focus_value = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!("CHATLOOP_FOCUS_VALUE is not a number: {raw}"))
            })?;
        }

        if let Some(raw) = lookup("CHATLOOP_THINKING_TIMEOUT") {
            self.chat.thinking_timeout_secs = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "CHATLOOP_THINKING_TIMEOUT is not a whole number of seconds: {raw}"
                ))
            })?;
        }

        if let Some(raw) = lookup("CHATLOOP_PROACTIVE") {
            self.proactive.enabled = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::ValidationError(format!(
                        "CHATLOOP_PROACTIVE must be true or false: {raw}"
                    )));
                }
            };
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chatloop")
    }

    /// Get the default configuration file path.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chat.focus_value < 0.0 || self.chat.focus_value.is_nan() {
            return Err(ConfigError::ValidationError(
                "chat.focus_value must be >= 0".into(),
            ));
        }

        if self.chat.thinking_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "chat.thinking_timeout_secs must be > 0".into(),
            ));
        }

        if self.energy.floor > self.energy.ceiling {
            return Err(ConfigError::ValidationError(
                "energy.floor must not exceed energy.ceiling".into(),
            ));
        }

        self.proactive.scope()?;
        Ok(())
    }

    /// Generate a default config TOML string (for `config show`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
