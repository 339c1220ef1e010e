//! Scheduler configuration.

use std::env;
use std::str::FromStr;

use log::warn;

const DEFAULT_EVENTS_CAPACITY: usize = 1024;
const DEFAULT_BLOCKING_LOG_CAPACITY: usize = 64;

/// Tunables for a [`Scheduler`](crate::Scheduler).
///
/// `Config::default()` is what [`Scheduler::new`](crate::Scheduler::new) uses.
/// [`Config::from_env`] starts from the defaults and overrides them with the
/// `YOT_FIBER_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Capacity of the `mio::Events` buffer handed to every poll.
    pub events_capacity: usize,
    /// If set, a Prometheus exporter listens on `127.0.0.1:<port>`.
    pub metrics_port: Option<u16>,
    /// Number of finished blocking regions kept for inspection.
    pub blocking_log_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            metrics_port: None,
            blocking_log_capacity: DEFAULT_BLOCKING_LOG_CAPACITY,
        }
    }
}

impl Config {
    /// Reads `YOT_FIBER_EVENTS`, `YOT_FIBER_METRICS_PORT` and
    /// `YOT_FIBER_BLOCKING_LOG`. Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(events) = parse_var::<usize>("YOT_FIBER_EVENTS") {
            config.events_capacity = events.max(1);
        }
        if let Some(port) = parse_var::<u16>("YOT_FIBER_METRICS_PORT") {
            config.metrics_port = Some(port);
        }
        if let Some(capacity) = parse_var::<usize>("YOT_FIBER_BLOCKING_LOG") {
            config.blocking_log_capacity = capacity;
        }
        config
    }

    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = capacity.max(1);
        self
    }

    pub fn metrics_port(mut self, port: u16) -> Self {
        self.metrics_port = Some(port);
        self
    }

    pub fn blocking_log_capacity(mut self, capacity: usize) -> Self {
        self.blocking_log_capacity = capacity;
        self
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring {name}={raw:?}: not a valid value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = Config::default()
            .events_capacity(0)
            .metrics_port(9000)
            .blocking_log_capacity(8);

        assert_eq!(config.events_capacity, 1);
        assert_eq!(config.metrics_port, Some(9000));
        assert_eq!(config.blocking_log_capacity, 8);
    }

    #[test]
    fn defaults_match_reactor_buffer() {
        let config = Config::default();
        assert_eq!(config.events_capacity, 1024);
        assert_eq!(config.metrics_port, None);
    }
}
