use crate::{defaults, source::Source};
use std::{net::SocketAddr, time::Duration};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("NUM_HOSTS must be a positive number of hosts")]
    NoHosts,
    #[error("NUM_HOSTS={0} is too large, the matrices would not fit in memory")]
    TooManyHosts(usize),
    #[error("The handler prefix cannot be empty")]
    EmptyHandlerPrefix,
}

/// Configuration of the estimator.
///
/// Only the number of hosts and the [`Source`] are required, every other
/// setting comes with a default from [`defaults`].
///
/// ```
/// # use tmatrix_core::{EstimatorConfig, Source};
/// let config = EstimatorConfig::new(4, Source::select("ADU")).unwrap();
/// assert_eq!(config.num_hosts(), 4);
/// assert_eq!(config.source(), Source::Telemetry);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimatorConfig {
    num_hosts: usize,
    source: Source,
    telemetry_addr: SocketAddr,
    handler_prefix: String,
    cycle_interval: Duration,
    diagnostic_period: u32,
}

/// `N * N` cells in three matrices plus four handler tables, keep it
/// well below what would exhaust the memory of the controller.
const MAX_HOSTS: usize = 4_096;

impl EstimatorConfig {
    pub fn new(num_hosts: usize, source: Source) -> Result<Self, ConfigError> {
        if num_hosts == 0 {
            return Err(ConfigError::NoHosts);
        }
        if num_hosts > MAX_HOSTS {
            return Err(ConfigError::TooManyHosts(num_hosts));
        }

        Ok(Self {
            num_hosts,
            source,
            telemetry_addr: defaults::DEFAULT_TELEMETRY_ADDR,
            handler_prefix: defaults::DEFAULT_HANDLER_PREFIX.to_owned(),
            cycle_interval: defaults::DEFAULT_CYCLE_INTERVAL,
            diagnostic_period: defaults::DEFAULT_DIAGNOSTIC_PERIOD,
        })
    }

    pub fn set_telemetry_addr(mut self, addr: SocketAddr) -> Self {
        self.telemetry_addr = addr;
        self
    }

    pub fn set_handler_prefix(mut self, prefix: impl Into<String>) -> Result<Self, ConfigError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(ConfigError::EmptyHandlerPrefix);
        }
        self.handler_prefix = prefix;
        Ok(self)
    }

    pub fn set_cycle_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval = interval;
        self
    }

    pub fn set_diagnostic_period(mut self, period: u32) -> Self {
        self.diagnostic_period = period;
        self
    }

    pub fn num_hosts(&self) -> usize {
        self.num_hosts
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn telemetry_addr(&self) -> SocketAddr {
        self.telemetry_addr
    }

    pub fn handler_prefix(&self) -> &str {
        &self.handler_prefix
    }

    pub fn cycle_interval(&self) -> Duration {
        self.cycle_interval
    }

    pub fn diagnostic_period(&self) -> u32 {
        self.diagnostic_period
    }
}
