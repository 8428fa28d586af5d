// Configuration loading and parsing (config/auction.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to write default config: {message}")]
    DefaultWriteError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub auction: AuctionSettings,
    pub ws_port: u16,
    pub db_path: String,
}

// ---------------------------------------------------------------------------
// auction.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire auction.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    auction: AuctionSettings,
    websocket: WebsocketSection,
    database: DatabaseSection,
}

/// The `[auction]` table: event rules that govern every round.
#[derive(Debug, Clone, Deserialize)]
pub struct AuctionSettings {
    /// Points each team starts the event with.
    pub initial_budget: u32,
    /// Total roster slots per team.
    pub roster_capacity: u32,
    /// Minimum points a team must keep uncommitted per still-open slot.
    pub reserve_per_slot: u32,
    /// Base price applied to players registered without one.
    pub default_base_price: u32,
    /// Full countdown duration when a round starts, in seconds.
    pub timer_secs: u32,
    /// Floor applied to the countdown when a bid is accepted: the remaining
    /// time becomes at least this many seconds, never less than it already is.
    pub bid_floor_secs: u32,
    /// How many no-bid rounds a player gets before becoming permanently unsold.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct WebsocketSection {
    port: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

impl Default for AuctionSettings {
    fn default() -> Self {
        AuctionSettings {
            initial_budget: 110,
            roster_capacity: 11,
            reserve_per_slot: 5,
            default_base_price: 5,
            timer_secs: 20,
            bid_floor_secs: 10,
            max_attempts: 2,
        }
    }
}

/// Contents written to config/auction.toml when the file is missing.
const DEFAULT_CONFIG: &str = r#"[auction]
initial_budget = 110
roster_capacity = 11
reserve_per_slot = 5
default_base_price = 5
timer_secs = 20
bid_floor_secs = 10
max_attempts = 2

[websocket]
port = 9001

[database]
path = "auction.db"
"#;

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load configuration from `config/auction.toml` relative to the current
/// working directory, writing the built-in defaults first if the file does
/// not exist yet.
pub fn load_config() -> Result<Config, ConfigError> {
    let base_dir = std::env::current_dir().map_err(|e| ConfigError::DefaultWriteError {
        message: format!("failed to resolve working directory: {e}"),
    })?;
    ensure_config_file(&base_dir)?;
    load_config_from(&base_dir)
}

/// Load and validate configuration from `config/auction.toml` relative to
/// the given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-write
/// defaults. Prefer `load_config()` which handles default initialization.
pub(crate) fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_path = base_dir.join("config").join("auction.toml");
    let text = read_file(&config_path)?;
    let file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: config_path.clone(),
        source: e,
    })?;

    let config = Config {
        auction: file.auction,
        ws_port: file.websocket.port,
        db_path: file.database.path,
    };

    validate(&config)?;

    Ok(config)
}

/// Write the default auction.toml if no config file exists yet. Returns
/// `true` if a file was written.
pub fn ensure_config_file(base_dir: &Path) -> Result<bool, ConfigError> {
    let config_dir = base_dir.join("config");
    let config_path = config_dir.join("auction.toml");

    if config_path.exists() {
        return Ok(false);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultWriteError {
        message: format!("failed to create config directory: {e}"),
    })?;
    std::fs::write(&config_path, DEFAULT_CONFIG).map_err(|e| ConfigError::DefaultWriteError {
        message: format!("failed to write {}: {e}", config_path.display()),
    })?;

    Ok(true)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let a = &config.auction;

    if a.initial_budget == 0 {
        return Err(validation_error("auction.initial_budget", "must be at least 1"));
    }
    if a.roster_capacity == 0 {
        return Err(validation_error("auction.roster_capacity", "must be at least 1"));
    }
    if a.default_base_price == 0 {
        return Err(validation_error(
            "auction.default_base_price",
            "must be at least 1",
        ));
    }
    if a.timer_secs == 0 {
        return Err(validation_error("auction.timer_secs", "must be at least 1"));
    }
    if a.bid_floor_secs == 0 {
        return Err(validation_error("auction.bid_floor_secs", "must be at least 1"));
    }
    if a.bid_floor_secs > a.timer_secs {
        return Err(validation_error(
            "auction.bid_floor_secs",
            "must not exceed auction.timer_secs",
        ));
    }
    if a.max_attempts == 0 {
        return Err(validation_error("auction.max_attempts", "must be at least 1"));
    }

    Ok(())
}

fn validation_error(field: &str, message: &str) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Config, ConfigError> {
        let file: ConfigFile = toml::from_str(text).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("inline"),
            source: e,
        })?;
        let config = Config {
            auction: file.auction,
            ws_port: file.websocket.port,
            db_path: file.database.path,
        };
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn default_config_parses_and_validates() {
        let config = parse(DEFAULT_CONFIG).expect("default config should be valid");
        assert_eq!(config.auction.initial_budget, 110);
        assert_eq!(config.auction.roster_capacity, 11);
        assert_eq!(config.auction.reserve_per_slot, 5);
        assert_eq!(config.auction.timer_secs, 20);
        assert_eq!(config.auction.bid_floor_secs, 10);
        assert_eq!(config.auction.max_attempts, 2);
        assert_eq!(config.ws_port, 9001);
        assert_eq!(config.db_path, "auction.db");
    }

    #[test]
    fn floor_above_duration_rejected() {
        let text = DEFAULT_CONFIG.replace("bid_floor_secs = 10", "bid_floor_secs = 30");
        let err = parse(&text).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { field, .. }
            if field == "auction.bid_floor_secs"));
    }

    #[test]
    fn zero_capacity_rejected() {
        let text = DEFAULT_CONFIG.replace("roster_capacity = 11", "roster_capacity = 0");
        let err = parse(&text).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { field, .. }
            if field == "auction.roster_capacity"));
    }

    #[test]
    fn zero_reserve_is_allowed() {
        let text = DEFAULT_CONFIG.replace("reserve_per_slot = 5", "reserve_per_slot = 0");
        let config = parse(&text).expect("zero reserve is a valid policy");
        assert_eq!(config.auction.reserve_per_slot, 0);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config_from(Path::new("/nonexistent-base-dir")).unwrap_err();
        match err {
            ConfigError::FileNotFound { path } => {
                assert!(path.ends_with("config/auction.toml"));
            }
            other => panic!("expected FileNotFound, got {other:?}"),
        }
    }

    #[test]
    fn ensure_config_file_writes_defaults_once() {
        let base = std::env::temp_dir().join(format!("auction_cfg_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&base);

        assert!(ensure_config_file(&base).unwrap());
        assert!(!ensure_config_file(&base).unwrap());

        let config = load_config_from(&base).expect("written defaults should load");
        assert_eq!(config.auction.timer_secs, 20);

        let _ = std::fs::remove_dir_all(&base);
    }
}
