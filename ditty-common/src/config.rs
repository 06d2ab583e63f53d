//! Configuration loading
//!
//! Bootstrap configuration is read once at startup:
//! 1. Explicit path (command line)
//! 2. `DITTY_CONFIG` environment variable
//! 3. Platform config directory (`<config_dir>/ditty/config.toml`)
//! 4. Built-in defaults (a missing file is a warning, not an error)
//!
//! Selected values may then be overridden from the environment, using the
//! same variable formats the station has always accepted (volumes in
//! percent, flair multipliers as `flair=factor;flair2=factor`).

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "DITTY_CONFIG";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Voice channel the station streams into
    #[serde(default)]
    pub channel_id: u64,

    /// Sink target handed to the encoder process (file path or URL)
    #[serde(default)]
    pub output: Option<String>,

    /// Directory relative song paths are resolved against
    #[serde(default)]
    pub audio_cache_dir: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Mixing, supervision and selection settings
    #[serde(default)]
    pub station: StationConfig,

    /// Text-to-speech command settings
    #[serde(default)]
    pub tts: TtsConfig,

    /// Speech recognizer settings
    #[serde(default)]
    pub recognizer: RecognizerConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            channel_id: 0,
            output: None,
            audio_cache_dir: None,
            logging: LoggingConfig::default(),
            station: StationConfig::default(),
            tts: TtsConfig::default(),
            recognizer: RecognizerConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Station settings passed into the channel session and selection policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Music track gain (1.0 = unity)
    pub music_volume: f32,
    /// Announcement track gain (1.0 = unity)
    pub announcement_volume: f32,
    /// Bytes per frame written to the sink
    pub frame_bytes: usize,
    /// Sleep when the mix produced nothing
    pub idle_delay_ms: u64,
    /// Listener membership polling interval
    pub supervision_interval_ms: u64,
    /// Delay before a crashed channel session is restarted
    pub restart_delay_ms: u64,
    /// Start voice assistant sessions for listeners
    pub voice_commands_enabled: bool,
    /// Role a listener must hold to use voice commands
    pub voice_command_role: Option<u64>,
    /// Static per-flair selection multipliers
    pub flair_multipliers: HashMap<String, f64>,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            music_volume: 0.30,
            announcement_volume: 2.0,
            frame_bytes: 3840,
            idle_delay_ms: 50,
            supervision_interval_ms: 1000,
            restart_delay_ms: 5000,
            voice_commands_enabled: true,
            voice_command_role: None,
            flair_multipliers: HashMap::new(),
        }
    }
}

impl StationConfig {
    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn supervision_interval(&self) -> Duration {
        Duration::from_millis(self.supervision_interval_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// Text-to-speech command settings
///
/// `arg_template` placeholders `{{FILENAME}}` and `{{TEXT}}` are replaced with
/// the quoted output WAV path and the quoted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub executable: String,
    pub working_dir: Option<PathBuf>,
    pub arg_template: String,
    /// Where synthesized WAV files are written (cleared at startup)
    pub scratch_dir: PathBuf,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            executable: "wine".to_string(),
            working_dir: Some(PathBuf::from("/app/dectalk")),
            arg_template: "/app/dectalk/say.exe -pre \"[:phoneme on]\" -w {{FILENAME}} {{TEXT}}"
                .to_string(),
            scratch_dir: PathBuf::from("audio/tmp"),
        }
    }
}

/// Speech recognizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    pub endpoint: String,
    pub api_token: Option<String>,
    pub api_version: String,
    /// Bound on one recognition request
    pub timeout_ms: u64,
    /// Longest utterance captured after a trigger
    pub max_utterance_ms: u64,
    /// Quiet period that ends an utterance once speech has started
    pub silence_gap_ms: u64,
    /// Audio replayed from before the trigger was detected
    pub trigger_rewind_ms: u64,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.wit.ai/".to_string(),
            api_token: None,
            api_version: "20200916".to_string(),
            timeout_ms: 10_000,
            max_utterance_ms: 10_000,
            silence_gap_ms: 500,
            trigger_rewind_ms: 50,
        }
    }
}

impl RecognizerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn max_utterance(&self) -> Duration {
        Duration::from_millis(self.max_utterance_ms)
    }

    pub fn silence_gap(&self) -> Duration {
        Duration::from_millis(self.silence_gap_ms)
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("metadata.db")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolve the configuration file path
///
/// Returns None when no candidate exists; callers fall back to defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    // Priority 3: Platform config directory
    dirs::config_dir()
        .map(|dir| dir.join("ditty").join("config.toml"))
        .filter(|path| path.exists())
}

/// Parse a TOML configuration string
pub fn parse_config(content: &str) -> Result<TomlConfig> {
    let config: TomlConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from file (or defaults) and apply environment overrides
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    let mut config = match resolve_config_path(cli_arg) {
        Some(path) if path.exists() => {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(&path)?;
            parse_config(&content)?
        }
        Some(path) => {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            TomlConfig::default()
        }
        None => {
            warn!("No config file found, using built-in defaults");
            TomlConfig::default()
        }
    };

    config.apply_overrides(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

impl TomlConfig {
    /// Apply environment-style overrides from the given lookup
    ///
    /// Volumes are given in percent (`30` = 0.30).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("DITTY_MUSIC_VOLUME") {
            self.station.music_volume = parse_percent("DITTY_MUSIC_VOLUME", &value)?;
        }
        if let Some(value) = lookup("DITTY_ANNOUNCEMENT_VOLUME") {
            self.station.announcement_volume =
                parse_percent("DITTY_ANNOUNCEMENT_VOLUME", &value)?;
        }
        if let Some(value) = lookup("DITTY_VOICE_COMMANDS") {
            self.station.voice_commands_enabled = value.trim() == "true";
        }
        if let Some(value) = lookup("DITTY_VOICE_COMMAND_ROLE") {
            let role = value.trim().parse::<u64>().map_err(|e| {
                Error::InvalidInput(format!("DITTY_VOICE_COMMAND_ROLE '{}': {}", value, e))
            })?;
            self.station.voice_command_role = Some(role);
        }
        if let Some(value) = lookup("DITTY_FLAIR_MULTIPLIERS") {
            self.station.flair_multipliers = parse_flair_multipliers(&value)?;
        }
        if let Some(value) = lookup("DITTY_RECOGNIZER_TOKEN") {
            self.recognizer.api_token = Some(value);
        }
        if let Some(value) = lookup("DITTY_CHANNEL_ID") {
            self.channel_id = value.trim().parse::<u64>().map_err(|e| {
                Error::InvalidInput(format!("DITTY_CHANNEL_ID '{}': {}", value, e))
            })?;
        }
        Ok(())
    }

    /// Reject values the station cannot run with
    pub fn validate(&self) -> Result<()> {
        let station = &self.station;
        if station.frame_bytes == 0 || station.frame_bytes % 4 != 0 {
            return Err(Error::Config(format!(
                "station.frame_bytes must be a positive multiple of 4, got {}",
                station.frame_bytes
            )));
        }
        if !station.music_volume.is_finite() || station.music_volume < 0.0 {
            return Err(Error::Config(format!(
                "station.music_volume must be non-negative, got {}",
                station.music_volume
            )));
        }
        if !station.announcement_volume.is_finite() || station.announcement_volume < 0.0 {
            return Err(Error::Config(format!(
                "station.announcement_volume must be non-negative, got {}",
                station.announcement_volume
            )));
        }
        if station.supervision_interval_ms == 0 {
            return Err(Error::Config(
                "station.supervision_interval_ms must be positive".to_string(),
            ));
        }
        if let Some((flair, factor)) = station
            .flair_multipliers
            .iter()
            .find(|(_, factor)| !factor.is_finite() || **factor < 0.0)
        {
            return Err(Error::Config(format!(
                "flair multiplier for '{}' must be non-negative, got {}",
                flair, factor
            )));
        }
        Ok(())
    }
}

fn parse_percent(name: &str, value: &str) -> Result<f32> {
    let percent = value
        .trim()
        .parse::<f32>()
        .map_err(|e| Error::InvalidInput(format!("{} '{}': {}", name, value, e)))?;
    Ok(percent / 100.0)
}

/// Parse `flair=factor;other flair=factor` into a multiplier map
///
/// A `\;` inside a flair name is a literal semicolon. Each segment is split
/// at its last `=`; segments without one are ignored.
pub fn parse_flair_multipliers(value: &str) -> Result<HashMap<String, f64>> {
    let mut multipliers = HashMap::new();

    for segment in split_unescaped(value, ';') {
        let Some(eq_index) = segment.rfind('=') else {
            continue;
        };
        let flair = segment[..eq_index].to_string();
        let factor_text = segment[eq_index + 1..].trim();
        let factor = factor_text.parse::<f64>().map_err(|e| {
            Error::InvalidInput(format!(
                "flair multiplier for '{}' is not a number ('{}'): {}",
                flair, factor_text, e
            ))
        })?;
        multipliers.insert(flair, factor);
    }

    Ok(multipliers)
}

fn split_unescaped(value: &str, separator: char) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&separator) {
            current.push(separator);
            chars.next();
        } else if c == separator {
            segments.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    segments.push(current);

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flair_multipliers_basic() {
        let map = parse_flair_multipliers("meme=0.5;Classic=2").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["meme"], 0.5);
        assert_eq!(map["Classic"], 2.0);
    }

    #[test]
    fn test_parse_flair_multipliers_escaped_separator() {
        let map = parse_flair_multipliers(r"rock\;roll=3;x=1").unwrap();
        assert_eq!(map["rock;roll"], 3.0);
        assert_eq!(map["x"], 1.0);
    }

    #[test]
    fn test_parse_flair_multipliers_splits_on_last_equals() {
        let map = parse_flair_multipliers("a=b=0.25").unwrap();
        assert_eq!(map["a=b"], 0.25);
    }

    #[test]
    fn test_parse_flair_multipliers_ignores_empty_segments() {
        assert!(parse_flair_multipliers("").unwrap().is_empty());
        let map = parse_flair_multipliers("noequals;;x=4;").unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["x"], 4.0);
    }

    #[test]
    fn test_parse_flair_multipliers_rejects_bad_number() {
        assert!(matches!(
            parse_flair_multipliers("x=lots"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_overrides_use_percent_volumes() {
        let mut config = TomlConfig::default();
        let env: HashMap<&str, &str> = [
            ("DITTY_MUSIC_VOLUME", "30"),
            ("DITTY_ANNOUNCEMENT_VOLUME", "200"),
            ("DITTY_VOICE_COMMANDS", "false"),
            ("DITTY_VOICE_COMMAND_ROLE", "1234"),
        ]
        .into_iter()
        .collect();

        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert!((config.station.music_volume - 0.30).abs() < 1e-6);
        assert!((config.station.announcement_volume - 2.0).abs() < 1e-6);
        assert!(!config.station.voice_commands_enabled);
        assert_eq!(config.station.voice_command_role, Some(1234));
    }

    #[test]
    fn test_validate_rejects_odd_frame_size() {
        let mut config = TomlConfig::default();
        config.station.frame_bytes = 3841;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_negative_multiplier() {
        let mut config = TomlConfig::default();
        config
            .station
            .flair_multipliers
            .insert("meme".to_string(), -1.0);
        assert!(config.validate().is_err());
    }
}
