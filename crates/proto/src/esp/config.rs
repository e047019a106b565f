//! ESP session configuration
//!
//! Provides the configuration structure and builder for [`EspSession`]
//! and [`EspClient`], covering probe scheduling, buffer sizing and the
//! optional keepalive intervals.
//!
//! [`EspSession`]: super::session::EspSession
//! [`EspClient`]: super::client::EspClient

use std::time::Duration;

use super::packet::MAX_TRAILER;
use super::{Error, Result};

/// Default probe attempt period
pub const DEFAULT_ATTEMPT_PERIOD: Duration = Duration::from_secs(30);

/// Default negotiated MTU when the control channel supplied none
pub const DEFAULT_MTU: usize = 1500;

/// Default spare capacity behind the payload in receive buffers
pub const DEFAULT_TRAILER_MARGIN: usize = 32;

/// ESP transport configuration
#[derive(Clone, Debug)]
pub struct EspConfig {
    /// Interval between probe attempts while the transport sleeps
    pub attempt_period: Duration,

    /// Optional interval that replaces the DPD interval when set;
    /// tighter values make a dead fast path fall back to the control
    /// channel sooner
    pub fallback_interval: Option<Duration>,

    /// Negotiated tunnel MTU
    pub mtu: usize,

    /// Spare capacity reserved behind the payload of each receive buffer
    pub trailer_margin: usize,

    /// Reject replayed and ancient sequence numbers on inbound contexts
    pub replay_protection: bool,

    /// Keepalive interval; the action itself stays unimplemented
    pub keepalive_interval: Option<Duration>,

    /// Rekey interval; the action itself stays unimplemented
    pub rekey_interval: Option<Duration>,
}

impl EspConfig {
    /// Create builder for ESP configuration
    pub fn builder() -> EspConfigBuilder {
        EspConfigBuilder::new()
    }

    /// DPD interval derived from the probe settings
    ///
    /// The fallback interval overrides the attempt period when configured.
    pub fn dpd_interval(&self) -> Duration {
        self.fallback_interval.unwrap_or(self.attempt_period)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.mtu == 0 {
            return Err(Error::InvalidParameter("mtu cannot be zero".into()));
        }
        if self.trailer_margin < MAX_TRAILER {
            return Err(Error::InvalidParameter(format!(
                "trailer_margin must be at least {} bytes",
                MAX_TRAILER
            )));
        }
        Ok(())
    }
}

impl Default for EspConfig {
    fn default() -> Self {
        Self {
            attempt_period: DEFAULT_ATTEMPT_PERIOD,
            fallback_interval: None,
            mtu: DEFAULT_MTU,
            trailer_margin: DEFAULT_TRAILER_MARGIN,
            replay_protection: true,
            keepalive_interval: None,
            rekey_interval: None,
        }
    }
}

/// Builder for EspConfig
#[derive(Default)]
pub struct EspConfigBuilder {
    attempt_period: Option<Duration>,
    fallback_interval: Option<Duration>,
    mtu: Option<usize>,
    trailer_margin: Option<usize>,
    replay_protection: Option<bool>,
    keepalive_interval: Option<Duration>,
    rekey_interval: Option<Duration>,
}

impl EspConfigBuilder {
    /// Create new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the probe attempt period
    pub fn with_attempt_period(mut self, period: Duration) -> Self {
        self.attempt_period = Some(period);
        self
    }

    /// Set the fallback interval used in place of the DPD default
    pub fn with_fallback_interval(mut self, interval: Duration) -> Self {
        self.fallback_interval = Some(interval);
        self
    }

    /// Set the negotiated MTU
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = Some(mtu);
        self
    }

    /// Set the receive-buffer trailer margin
    pub fn with_trailer_margin(mut self, margin: usize) -> Self {
        self.trailer_margin = Some(margin);
        self
    }

    /// Enable or disable inbound replay protection
    pub fn with_replay_protection(mut self, enabled: bool) -> Self {
        self.replay_protection = Some(enabled);
        self
    }

    /// Set the keepalive interval
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    /// Set the rekey interval
    pub fn with_rekey_interval(mut self, interval: Duration) -> Self {
        self.rekey_interval = Some(interval);
        self
    }

    /// Build EspConfig with validation
    pub fn build(self) -> Result<EspConfig> {
        let config = EspConfig {
            attempt_period: self.attempt_period.unwrap_or(DEFAULT_ATTEMPT_PERIOD),
            fallback_interval: self.fallback_interval,
            mtu: self.mtu.unwrap_or(DEFAULT_MTU),
            trailer_margin: self.trailer_margin.unwrap_or(DEFAULT_TRAILER_MARGIN),
            replay_protection: self.replay_protection.unwrap_or(true),
            keepalive_interval: self.keepalive_interval,
            rekey_interval: self.rekey_interval,
        };

        config.validate()?;
        Ok(config)
    }
}
