use crate::error::ChannelError;
use crate::COMMAND_ALIGN;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Sizing of one command channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Bytes of the command arena. Rounded down to the record granularity.
    pub command_buffer_size: usize,
    /// Slots in each of the send and reply queues.
    pub queue_count: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 64 * 1024,
            queue_count: 32,
        }
    }
}

impl ChannelConfig {
    pub fn new(command_buffer_size: usize, queue_count: usize) -> Self {
        Self { command_buffer_size, queue_count }
    }

    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.command_buffer_size < COMMAND_ALIGN {
            return Err(ChannelError::InvalidConfig(format!(
                "command_buffer_size {} is smaller than one record ({} bytes)",
                self.command_buffer_size, COMMAND_ALIGN
            )));
        }
        if self.queue_count == 0 {
            return Err(ChannelError::InvalidConfig("queue_count must be at least 1".into()));
        }
        Ok(())
    }
}

/// Configuration of the voice pipeline: game thread -> audio thread and back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub voice_channel: ChannelConfig,
    pub reply_channel: ChannelConfig,
    pub max_voices: usize,
    pub max_stream_loaders: usize,
    pub frames_per_tick: u32,
    pub tick_interval_ms: u64,
    /// Fraction of the voice arena after which `update` flushes early.
    pub flush_watermark: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            voice_channel: ChannelConfig::default(),
            reply_channel: ChannelConfig::new(16 * 1024, 32),
            max_voices: 64,
            max_stream_loaders: 8,
            frames_per_tick: 256,
            tick_interval_ms: 5,
            flush_watermark: 0.75,
        }
    }
}

impl AudioConfig {
    pub fn from_json_str(content: &str) -> Result<Self, ChannelError> {
        let config: AudioConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ChannelError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), ChannelError> {
        self.voice_channel.validate()?;
        self.reply_channel.validate()?;
        if self.max_voices == 0 {
            return Err(ChannelError::InvalidConfig("max_voices must be at least 1".into()));
        }
        // Voice ids are u32 on the wire
        if self.max_voices > u32::MAX as usize {
            return Err(ChannelError::InvalidConfig(format!(
                "max_voices {} exceeds {}",
                self.max_voices,
                u32::MAX
            )));
        }
        if self.frames_per_tick == 0 {
            return Err(ChannelError::InvalidConfig("frames_per_tick must be at least 1".into()));
        }
        if !(self.flush_watermark > 0.0 && self.flush_watermark <= 1.0) {
            return Err(ChannelError::InvalidConfig(format!(
                "flush_watermark {} must be in (0, 1]",
                self.flush_watermark
            )));
        }
        Ok(())
    }
}
