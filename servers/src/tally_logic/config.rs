use chrono::{DateTime, Utc};
use clap::Parser;
use lib_tally::election::calendar::{DEFAULT_FEED_URL, DEFAULT_STABLE_WAIT_MINUTES};
use lib_tally::election::ElectionCalendar;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "server_tally.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Live election results relay", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "TALLY_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "TALLY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "TALLY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "TALLY_LOG_LEVEL", help = "Logging level (debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "TALLY_FEED_URL", help = "Upstream simplified-results JSON feed.")]
    pub feed_url: Option<String>,

    #[clap(long, env = "TALLY_POLL_OPEN", help = "Polls open, RFC 3339.")]
    pub poll_open: Option<String>,

    #[clap(long, env = "TALLY_POLL_CLOSE", help = "Polls close, RFC 3339.")]
    pub poll_close: Option<String>,

    #[clap(long, env = "TALLY_STABLE_WAIT_MINUTES", help = "Minutes after close before live figures drive projections.")]
    pub stable_wait_minutes: Option<i64>,

    #[clap(long, env = "TALLY_PHASE_TICK_MS", help = "Phase monitor tick in milliseconds.")]
    pub phase_tick_ms: Option<u64>,

    #[clap(long, env = "TALLY_FETCH_RETRIES", help = "Retries for transient feed fetch failures.")]
    pub fetch_retries: Option<u32>,

    #[clap(long, env = "TALLY_API_DOC_PATH", help = "Text file served at /api.txt.")]
    pub api_doc_path: Option<PathBuf>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            feed_url: other.feed_url.or(self.feed_url),
            poll_open: other.poll_open.or(self.poll_open),
            poll_close: other.poll_close.or(self.poll_close),
            stable_wait_minutes: other.stable_wait_minutes.or(self.stable_wait_minutes),
            phase_tick_ms: other.phase_tick_ms.or(self.phase_tick_ms),
            fetch_retries: other.fetch_retries.or(self.fetch_retries),
            api_doc_path: other.api_doc_path.or(self.api_doc_path),
        }
    }

    fn defaults() -> Config {
        let calendar = ElectionCalendar::default();
        Config {
            port: Some(9000),
            config_path: Some(PathBuf::from(DEFAULT_CONFIG_FILE)),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            feed_url: Some(DEFAULT_FEED_URL.to_string()),
            poll_open: Some(calendar.poll_open.to_rfc3339()),
            poll_close: Some(calendar.poll_close.to_rfc3339()),
            stable_wait_minutes: Some(DEFAULT_STABLE_WAIT_MINUTES),
            phase_tick_ms: Some(1000),
            fetch_retries: Some(0),
            api_doc_path: Some(PathBuf::from("./docs/api.txt")),
        }
    }

    /// Fills every unset option from the defaults and parses the window
    /// boundaries.
    pub fn resolve(self) -> Settings {
        let defaults = ElectionCalendar::default();
        let config = Config::defaults().merge(self);

        let poll_open = parse_instant("poll_open", config.poll_open.as_deref(), defaults.poll_open);
        let poll_close = parse_instant("poll_close", config.poll_close.as_deref(), defaults.poll_close);
        let calendar = if poll_open <= poll_close {
            ElectionCalendar::new(poll_open, poll_close)
        } else {
            log::warn!("poll_open is after poll_close, using the default window");
            defaults
        };

        Settings {
            port: config.port.unwrap_or(9000),
            log_dir: config.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: config.log_level.unwrap_or_else(|| "info".to_string()),
            feed_url: config.feed_url.unwrap_or_else(|| DEFAULT_FEED_URL.to_string()),
            calendar,
            stable_wait_minutes: check_stable_wait(config.stable_wait_minutes),
            phase_tick: Duration::from_millis(config.phase_tick_ms.unwrap_or(1000).max(1)),
            fetch_retries: config.fetch_retries.unwrap_or(0),
            api_doc_path: config.api_doc_path.unwrap_or_else(|| PathBuf::from("./docs/api.txt")),
        }
    }
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub feed_url: String,
    pub calendar: ElectionCalendar,
    pub stable_wait_minutes: i64,
    pub phase_tick: Duration,
    pub fetch_retries: u32,
    pub api_doc_path: PathBuf,
}

/// Grace periods longer than a week are treated as configuration mistakes.
const MAX_STABLE_WAIT_MINUTES: i64 = 7 * 24 * 60;

fn check_stable_wait(value: Option<i64>) -> i64 {
    match value {
        Some(minutes) if (0..=MAX_STABLE_WAIT_MINUTES).contains(&minutes) => minutes,
        Some(minutes) => {
            log::warn!(
                "stable_wait_minutes {} is outside 0..={}, using {}",
                minutes,
                MAX_STABLE_WAIT_MINUTES,
                DEFAULT_STABLE_WAIT_MINUTES
            );
            DEFAULT_STABLE_WAIT_MINUTES
        }
        None => DEFAULT_STABLE_WAIT_MINUTES,
    }
}

fn parse_instant(name: &str, value: Option<&str>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    match value.map(DateTime::parse_from_rfc3339) {
        Some(Ok(instant)) => instant.with_timezone(&Utc),
        Some(Err(e)) => {
            log::warn!("invalid {} ({}), using {}", name, e, fallback.to_rfc3339());
            fallback
        }
        None => fallback,
    }
}

fn load_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }

    match fs::read_to_string(path) {
        Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
            Ok(file_config) => Some(file_config),
            Err(e) => {
                log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
                None
            }
        },
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Layers defaults, the JSON config file and `cli` (which already carries
/// environment variables), later layers winning.
pub fn load_config_with(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();
    if let Some(file_config) = load_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }

    current_config.merge(cli)
}

pub fn load_config() -> Config {
    load_config_with(Config::parse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_resolve_to_the_run_off() {
        let settings = Config::default().resolve();
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.calendar, ElectionCalendar::default());
        assert_eq!(settings.stable_wait_minutes, 10);
        assert_eq!(settings.phase_tick, Duration::from_secs(1));
        assert_eq!(settings.fetch_retries, 0);
        assert_eq!(settings.feed_url, DEFAULT_FEED_URL);
    }

    #[test]
    fn later_layers_win() {
        let file = Config {
            port: Some(8000),
            log_level: Some("debug".into()),
            ..Default::default()
        };
        let cli = Config {
            port: Some(7000),
            ..Default::default()
        };

        let merged = Config::defaults().merge(file).merge(cli);
        assert_eq!(merged.port, Some(7000));
        assert_eq!(merged.log_level.as_deref(), Some("debug"));
        assert_eq!(merged.phase_tick_ms, Some(1000));
    }

    #[test]
    fn reads_the_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"port": 8123, "pollClose": "2022-10-30T21:00:00Z", "fetchRetries": 2}}"#).unwrap();

        let cli = Config {
            config_path: Some(file.path().to_path_buf()),
            fetch_retries: Some(5),
            ..Default::default()
        };
        let settings = load_config_with(cli).resolve();

        assert_eq!(settings.port, 8123);
        assert_eq!(settings.fetch_retries, 5);
        assert_eq!(settings.calendar.poll_close.to_rfc3339(), "2022-10-30T21:00:00+00:00");
    }

    #[test]
    fn unreadable_file_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let cli = Config {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert_eq!(load_config_with(cli.clone()), Config::defaults().merge(cli));
    }

    #[test]
    fn malformed_instants_fall_back() {
        let settings = Config {
            poll_open: Some("yesterday".into()),
            ..Default::default()
        }
        .resolve();
        assert_eq!(settings.calendar.poll_open, ElectionCalendar::default().poll_open);

        let inverted = Config {
            poll_open: Some("2022-10-31T00:00:00Z".into()),
            ..Default::default()
        }
        .resolve();
        assert_eq!(inverted.calendar, ElectionCalendar::default());
    }

    #[test]
    fn out_of_range_stable_wait_falls_back() {
        for minutes in [-1, MAX_STABLE_WAIT_MINUTES + 1, 200_000_000_000, i64::MAX] {
            let settings = Config {
                stable_wait_minutes: Some(minutes),
                ..Default::default()
            }
            .resolve();
            assert_eq!(settings.stable_wait_minutes, DEFAULT_STABLE_WAIT_MINUTES);
        }

        let settings = Config {
            stable_wait_minutes: Some(0),
            ..Default::default()
        }
        .resolve();
        assert_eq!(settings.stable_wait_minutes, 0);
    }

    #[test]
    fn offsets_are_normalized_to_utc() {
        let settings = Config {
            poll_open: Some("2022-10-30T08:00:00-03:00".into()),
            ..Default::default()
        }
        .resolve();
        assert_eq!(settings.calendar.poll_open, ElectionCalendar::default().poll_open);
    }
}
