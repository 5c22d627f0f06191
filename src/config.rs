//! Reactor tuning knobs.

use std::time::Duration;

use crate::error::{Error, Result};

/// Buffer sizes, watermarks, timeouts and limits shared by every connection of a reactor.
#[derive(Debug, Clone)]
pub struct Config {
    pub recv_buffer_size: usize,
    /// Reading pauses while more than this many bytes wait in the recv buffer.
    pub recv_high_watermark: usize,
    pub send_buffer_size: usize,
    /// Write interest is armed once more than this many bytes wait in the send buffer.
    pub send_low_watermark: usize,
    /// Maximum number of undelivered bus messages.
    pub bus_capacity: usize,
    /// Readiness events fetched per poll.
    pub events_capacity: usize,
    /// How long the peer has to acknowledge our SETTINGS.
    pub settings_timeout: Duration,
    pub stream_recv_timeout: Duration,
    pub stream_send_timeout: Duration,
    pub max_concurrent_streams: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recv_buffer_size: 4096,
            recv_high_watermark: 4096,
            send_buffer_size: 4096,
            send_low_watermark: 0,
            bus_capacity: 65_536,
            events_capacity: 1024,
            settings_timeout: Duration::from_secs(10),
            stream_recv_timeout: Duration::from_secs(30),
            stream_send_timeout: Duration::from_secs(30),
            max_concurrent_streams: 100,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.recv_buffer_size == 0 || self.send_buffer_size == 0 {
            return Err(Error::Config("buffer sizes must be non-zero".to_string()));
        }
        if self.recv_high_watermark > self.recv_buffer_size {
            return Err(Error::Config(format!(
                "recv high watermark {} exceeds buffer size {}",
                self.recv_high_watermark, self.recv_buffer_size
            )));
        }
        if self.send_low_watermark >= self.send_buffer_size {
            return Err(Error::Config(format!(
                "send low watermark {} must be below buffer size {}",
                self.send_low_watermark, self.send_buffer_size
            )));
        }
        if self.bus_capacity == 0 || self.events_capacity == 0 {
            return Err(Error::Config("bus and event capacities must be non-zero".to_string()));
        }
        let timeouts = [self.settings_timeout, self.stream_recv_timeout, self.stream_send_timeout];
        if timeouts.iter().any(Duration::is_zero) {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }
        if self.max_concurrent_streams == 0 {
            return Err(Error::Config("max_concurrent_streams must be non-zero".to_string()));
        }
        Ok(())
    }
}
