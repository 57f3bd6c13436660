use clap::{Parser, ValueEnum};
use shared::{COUNTDOWN_TICKS, RACE_TICKS};
use std::path::PathBuf;
use std::time::Duration;

/// What a restart leads into
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RestartMode {
    /// Run the countdown again before the race
    Countdown,
    /// Start the race clock straight away
    Immediate,
}

/// Timing and rule knobs for the session engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub countdown_ticks: u32,
    pub race_ticks: u32,
    pub tick_interval: Duration,
    pub restart_mode: RestartMode,
    pub max_nickname_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            countdown_ticks: COUNTDOWN_TICKS,
            race_ticks: RACE_TICKS,
            tick_interval: Duration::from_secs(1),
            restart_mode: RestartMode::Countdown,
            max_nickname_len: 24,
        }
    }
}

/// Transport settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub max_clients: usize,
    pub client_timeout: Duration,
}

/// Command line arguments, with environment fallbacks for deployment
#[derive(Parser, Debug)]
#[clap(author, version, about = "Multiplayer typing race server")]
pub struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,
    /// Server port to listen on
    #[clap(short, long, env = "PORT", default_value = "3000")]
    pub port: u16,
    /// Directory for persisted games; in-memory when unset
    #[clap(long, env = "DATABASE")]
    pub database: Option<PathBuf>,
    /// File with one race sentence per line
    #[clap(long)]
    pub sentences: Option<PathBuf>,
    /// Countdown length in ticks
    #[clap(long, default_value_t = COUNTDOWN_TICKS)]
    pub countdown_ticks: u32,
    /// Race length in ticks
    #[clap(long, default_value_t = RACE_TICKS)]
    pub race_ticks: u32,
    /// Milliseconds between clock ticks
    #[clap(long, default_value = "1000")]
    pub tick_ms: u64,
    /// Maximum concurrent connections
    #[clap(long, default_value = "256")]
    pub max_clients: usize,
    /// Seconds of silence before a connection is dropped
    #[clap(long, default_value = "5")]
    pub client_timeout_secs: u64,
    /// What a restart leads into
    #[clap(long, value_enum, default_value = "countdown")]
    pub restart_mode: RestartMode,
}

impl Args {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            countdown_ticks: self.countdown_ticks.max(1),
            race_ticks: self.race_ticks.max(1),
            tick_interval: Duration::from_millis(self.tick_ms.max(1)),
            restart_mode: self.restart_mode,
            ..EngineConfig::default()
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            address: format!("{}:{}", self.host, self.port),
            max_clients: self.max_clients,
            client_timeout: Duration::from_secs(self.client_timeout_secs),
        }
    }
}
