//! Quiz Controller configuration.
//!
//! Configuration is loaded from environment variables. Round timings are
//! expressed in ticks so tests and deployments can shrink or stretch the
//! whole game clock by changing a single interval.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default number of questions selected for a new room.
pub const DEFAULT_QUESTIONS_PER_GAME: usize = 10;

/// Default countdown start before the first question.
pub const DEFAULT_COUNTDOWN_FROM: u32 = 3;

/// Default tick length in milliseconds.
pub const DEFAULT_TICK_MILLIS: u64 = 1000;

/// Default per-question time limit, in ticks.
pub const DEFAULT_QUESTION_TIME_LIMIT_TICKS: u32 = 15;

/// Default pause after a reveal before the next question, in ticks.
pub const DEFAULT_REVEAL_SETTLE_TICKS: u32 = 4;

/// Default retention of a finished room, in ticks.
pub const DEFAULT_FINISHED_GRACE_TICKS: u32 = 60;

/// Default outbound queue depth per connection.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Default instance ID prefix.
pub const DEFAULT_QC_ID_PREFIX: &str = "qc";

/// Timing parameters for a session's round lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    /// Length of one tick.
    pub tick: Duration,
    /// Countdown start value broadcast before the first question.
    pub countdown_from: u32,
    /// Answer time limit per question, in ticks.
    pub question_time_limit: u32,
    /// Pause after each reveal, in ticks.
    pub reveal_settle: u32,
    /// Retention of a finished session, in ticks.
    pub finished_grace: u32,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(DEFAULT_TICK_MILLIS),
            countdown_from: DEFAULT_COUNTDOWN_FROM,
            question_time_limit: DEFAULT_QUESTION_TIME_LIMIT_TICKS,
            reveal_settle: DEFAULT_REVEAL_SETTLE_TICKS,
            finished_grace: DEFAULT_FINISHED_GRACE_TICKS,
        }
    }
}

impl SessionTimings {
    /// Duration of `count` ticks.
    #[must_use]
    pub fn ticks(&self, count: u32) -> Duration {
        self.tick.saturating_mul(count)
    }
}

/// Quiz Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this instance.
    pub qc_id: String,

    /// Path to the JSON question bank, if any.
    pub question_bank_path: Option<String>,

    /// Number of questions selected for each new room.
    pub questions_per_game: usize,

    /// Outbound queue depth per connection. A full queue is treated as a
    /// transport fault.
    pub outbound_buffer: usize,

    /// Round lifecycle timings.
    pub timings: SessionTimings,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("QC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("QC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let question_bank_path = vars
            .get("QC_QUESTION_BANK_PATH")
            .filter(|p| !p.trim().is_empty())
            .cloned();

        let questions_per_game = parse_or(vars, "QC_QUESTIONS_PER_GAME", DEFAULT_QUESTIONS_PER_GAME);
        let outbound_buffer = parse_or(vars, "QC_OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER);

        let tick_millis = parse_or(vars, "QC_TICK_MILLIS", DEFAULT_TICK_MILLIS);
        if tick_millis == 0 {
            return Err(ConfigError::InvalidValue(
                "QC_TICK_MILLIS must be greater than zero".to_string(),
            ));
        }

        let question_time_limit = parse_or(
            vars,
            "QC_QUESTION_TIME_LIMIT_TICKS",
            DEFAULT_QUESTION_TIME_LIMIT_TICKS,
        );
        if question_time_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "QC_QUESTION_TIME_LIMIT_TICKS must be greater than zero".to_string(),
            ));
        }

        if outbound_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "QC_OUTBOUND_BUFFER must be greater than zero".to_string(),
            ));
        }

        let timings = SessionTimings {
            tick: Duration::from_millis(tick_millis),
            countdown_from: parse_or(vars, "QC_COUNTDOWN_FROM", DEFAULT_COUNTDOWN_FROM),
            question_time_limit,
            reveal_settle: parse_or(vars, "QC_REVEAL_SETTLE_TICKS", DEFAULT_REVEAL_SETTLE_TICKS),
            finished_grace: parse_or(
                vars,
                "QC_FINISHED_GRACE_TICKS",
                DEFAULT_FINISHED_GRACE_TICKS,
            ),
        };

        // Generate instance ID
        let qc_id = vars.get("QC_ID").cloned().unwrap_or_else(|| {
            let hostname = env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_QC_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            health_bind_address,
            qc_id,
            question_bank_path,
            questions_per_game,
            outbound_buffer,
            timings,
        })
    }
}

/// Parse a numeric variable, falling back to `default` when absent or malformed.
fn parse_or<T: std::str::FromStr>(vars: &HashMap<String, String>, key: &str, default: T) -> T {
    vars.get(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let vars = HashMap::new();

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert!(config.question_bank_path.is_none());
        assert_eq!(config.questions_per_game, DEFAULT_QUESTIONS_PER_GAME);
        assert_eq!(config.outbound_buffer, DEFAULT_OUTBOUND_BUFFER);
        assert_eq!(config.timings, SessionTimings::default());
        // Instance ID should be auto-generated
        assert!(config.qc_id.starts_with("qc-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let vars = HashMap::from([
            ("QC_BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string()),
            (
                "QC_HEALTH_BIND_ADDRESS".to_string(),
                "127.0.0.1:9001".to_string(),
            ),
            (
                "QC_QUESTION_BANK_PATH".to_string(),
                "/srv/questions.json".to_string(),
            ),
            ("QC_QUESTIONS_PER_GAME".to_string(), "5".to_string()),
            ("QC_TICK_MILLIS".to_string(), "250".to_string()),
            ("QC_COUNTDOWN_FROM".to_string(), "5".to_string()),
            ("QC_QUESTION_TIME_LIMIT_TICKS".to_string(), "20".to_string()),
            ("QC_REVEAL_SETTLE_TICKS".to_string(), "2".to_string()),
            ("QC_FINISHED_GRACE_TICKS".to_string(), "30".to_string()),
            ("QC_ID".to_string(), "qc-custom-001".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.health_bind_address, "127.0.0.1:9001");
        assert_eq!(
            config.question_bank_path.as_deref(),
            Some("/srv/questions.json")
        );
        assert_eq!(config.questions_per_game, 5);
        assert_eq!(config.qc_id, "qc-custom-001");
        assert_eq!(config.timings.tick, Duration::from_millis(250));
        assert_eq!(config.timings.countdown_from, 5);
        assert_eq!(config.timings.question_time_limit, 20);
        assert_eq!(config.timings.reveal_settle, 2);
        assert_eq!(config.timings.finished_grace, 30);
    }

    #[test]
    fn test_malformed_numbers_fall_back_to_defaults() {
        let vars = HashMap::from([
            ("QC_QUESTIONS_PER_GAME".to_string(), "lots".to_string()),
            ("QC_REVEAL_SETTLE_TICKS".to_string(), "-1".to_string()),
        ]);

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.questions_per_game, DEFAULT_QUESTIONS_PER_GAME);
        assert_eq!(config.timings.reveal_settle, DEFAULT_REVEAL_SETTLE_TICKS);
    }

    #[test]
    fn test_zero_tick_is_rejected() {
        let vars = HashMap::from([("QC_TICK_MILLIS".to_string(), "0".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_zero_time_limit_is_rejected() {
        let vars = HashMap::from([(
            "QC_QUESTION_TIME_LIMIT_TICKS".to_string(),
            "0".to_string(),
        )]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_blank_question_bank_path_is_ignored() {
        let vars = HashMap::from([("QC_QUESTION_BANK_PATH".to_string(), "  ".to_string())]);

        let config = Config::from_vars(&vars).unwrap();
        assert!(config.question_bank_path.is_none());
    }

    #[test]
    fn test_timings_ticks() {
        let timings = SessionTimings {
            tick: Duration::from_millis(500),
            ..SessionTimings::default()
        };
        assert_eq!(timings.ticks(4), Duration::from_secs(2));
        assert_eq!(timings.ticks(0), Duration::ZERO);
    }
}
