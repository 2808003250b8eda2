pub mod command_buffer;
pub mod command;
pub mod command_manager;
pub mod commands;
pub mod loader;
pub mod voice;
pub mod audio_thread;
pub mod context; // AudioContext lives here

// Re-exports
pub use atk_shared::{AudioConfig, ChannelConfig, ChannelError, CommandTag, INVALID_COMMAND};
pub use audio_thread::{AudioThread, AudioThreadHandle};
pub use command::{Command, CommandList, CommandSlot, CommandView};
pub use command_buffer::CommandBuffer;
pub use command_manager::{CommandManager, CommandProcessor, ManagerState, ProcessCommandList};
pub use commands::{VoiceCommand, VoiceEvent, VoiceId};
pub use context::AudioContext;
pub use voice::VoiceRenderer;

#[cfg(test)]
mod tests_channel;
