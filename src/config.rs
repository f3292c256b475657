use std::time::Duration;

/// Runtime configuration. Timeouts are wire-visible behavior and keep their
/// baseline values unless a test overrides them; only the listening port is
/// read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Ring timeout: an `initiated` call nobody accepts is torn down.
    pub no_answer_timeout: Duration,
    /// An offer that has seen no answer for this long marks the call stalled.
    pub offer_stall_timeout: Duration,
    /// Buffered ICE candidates older than this are trimmed by the sweeper.
    pub candidate_ttl: Duration,
    pub sweep_interval: Duration,
}

pub const DEFAULT_PORT: u16 = 8083;

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            no_answer_timeout: Duration::from_secs(60),
            offer_stall_timeout: Duration::from_secs(10),
            candidate_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        Self {
            port,
            ..Self::default()
        }
    }
}
