//! Orchestrator configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::types::DEFAULT_SAMPLE_RATE;

/// Tunables for the conversation orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Conversations with no inbound activity for this long are ended with
    /// reason `timeout`. `0` disables the idle sweep.
    pub idle_timeout_secs: u64,

    /// How often the idle sweep runs
    pub sweep_interval_secs: u64,

    /// Upper bound on any single provider call
    pub adapter_timeout_secs: u64,

    /// Sample rate assumed when a request does not carry one
    pub default_sample_rate: u32,

    /// Frames buffered per call on the media return path
    pub media_buffer_frames: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            sweep_interval_secs: 30,
            adapter_timeout_secs: 10,
            default_sample_rate: DEFAULT_SAMPLE_RATE,
            media_buffer_frames: 256,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.adapter_timeout_secs == 0 {
            return Err(OrchestratorError::config("adapter_timeout_secs must be greater than 0"));
        }
        if self.idle_timeout_secs > 0 && self.sweep_interval_secs == 0 {
            return Err(OrchestratorError::config(
                "sweep_interval_secs must be greater than 0 when the idle sweep is enabled",
            ));
        }
        if !matches!(self.default_sample_rate, 8000 | 16000 | 22050 | 24000 | 44100 | 48000) {
            return Err(OrchestratorError::config(format!(
                "unsupported default_sample_rate {}",
                self.default_sample_rate
            )));
        }
        if self.media_buffer_frames == 0 {
            return Err(OrchestratorError::config("media_buffer_frames must be greater than 0"));
        }
        Ok(())
    }

    /// `None` when the idle sweep is disabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }
}
