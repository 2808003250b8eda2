use crate::command::{Command, CommandList};
use crate::command_manager::{CommandManager, CommandProcessor, ProcessCommandList};
use crate::commands::{VoiceAlloc, VoiceEvent, VoiceFree, VoiceId, VoiceParam, VoicePause, VoicePlay, VoiceReply, VoiceStop};
use crate::voice::VoiceRenderer;
use atk_shared::{AudioConfig, ChannelError, CommandTag};
use tracing::{debug, warn};

/// Collects voice replies on the game thread.
#[derive(Default)]
pub struct ReplyCollector {
    events: Vec<(VoiceId, VoiceEvent, u32)>,
}

impl ProcessCommandList for ReplyCollector {
    fn process_command_list(&mut self, list: CommandList<'_>) {
        for view in list {
            match view.downcast::<VoiceReply>().and_then(|r| r.event().map(|e| (r.voice, e, r.generation))) {
                Some(event) => self.events.push(event),
                None => warn!("[ReplyCollector] Unexpected reply kind {:#x}", view.kind()),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct GameVoice {
    allocated: bool,
    playing: bool,
    /// Bumped on every alloc and play; survives free so late replies stay stale.
    generation: u32,
}

/// Game-thread owner of the voice pipeline.
///
/// Holds the producer half of the low-level voice channel and the consumer
/// half of the voice reply channel. The matching halves live on the audio
/// thread inside the [`VoiceRenderer`].
pub struct AudioContext {
    voice_commands: CommandManager,
    replies: CommandProcessor<ReplyCollector>,
    voices: Vec<GameVoice>,
    free_voices: Vec<VoiceId>,
    flush_watermark: usize,
}

impl AudioContext {
    /// Build both channels. The returned processor belongs to the audio thread.
    pub fn new(config: &AudioConfig) -> Result<(AudioContext, CommandProcessor<VoiceRenderer>), ChannelError> {
        config.validate()?;

        let (reply_manager, replies) =
            CommandManager::initialize("VoiceReply", &config.reply_channel, ReplyCollector::default())?;
        let renderer = VoiceRenderer::new(config.max_voices, config.max_stream_loaders, reply_manager);
        let (voice_commands, voice_processor) =
            CommandManager::initialize("LowLevelVoice", &config.voice_channel, renderer)?;

        let flush_watermark =
            (voice_commands.command_buffer_capacity() as f32 * config.flush_watermark) as usize;
        let context = AudioContext {
            voice_commands,
            replies,
            voices: vec![GameVoice::default(); config.max_voices],
            free_voices: (0..config.max_voices as VoiceId).rev().collect(),
            flush_watermark,
        };
        Ok((context, voice_processor))
    }

    pub fn set_request_process_command_func(&mut self, func: impl Fn() + Send + 'static) {
        self.voice_commands.set_request_process_command_func(func);
    }

    fn send<T: Command>(&mut self, command: T) -> Option<CommandTag> {
        let tag = self.voice_commands.push_value(command, true);
        if tag.is_none() {
            debug!("[AudioContext] Out of command memory, skipped {}", T::NAME);
        }
        tag
    }

    fn is_allocated(&self, voice: VoiceId) -> bool {
        self.voices.get(voice as usize).is_some_and(|v| v.allocated)
    }

    /// Reserve a voice. `None` when every voice is taken or the command did not fit.
    pub fn alloc_voice(&mut self, priority: u32) -> Option<VoiceId> {
        let voice = self.free_voices.pop()?;
        if self.send(VoiceAlloc { voice, priority }).is_none() {
            self.free_voices.push(voice);
            return None;
        }
        let state = &mut self.voices[voice as usize];
        *state = GameVoice { allocated: true, playing: false, generation: state.generation.wrapping_add(1) };
        Some(voice)
    }

    pub fn free_voice(&mut self, voice: VoiceId) -> Option<CommandTag> {
        if !self.is_allocated(voice) {
            return None;
        }
        let tag = self.send(VoiceFree { voice })?;
        let state = &mut self.voices[voice as usize];
        *state = GameVoice { generation: state.generation, ..GameVoice::default() };
        self.free_voices.push(voice);
        Some(tag)
    }

    pub fn play(&mut self, voice: VoiceId, length_frames: u32, stream_blocks: u32) -> Option<CommandTag> {
        if !self.is_allocated(voice) {
            return None;
        }
        let generation = self.voices[voice as usize].generation.wrapping_add(1);
        let tag = self.send(VoicePlay { voice, length_frames, stream_blocks, generation })?;
        self.voices[voice as usize] = GameVoice { allocated: true, playing: true, generation };
        Some(tag)
    }

    pub fn stop(&mut self, voice: VoiceId) -> Option<CommandTag> {
        if !self.is_allocated(voice) {
            return None;
        }
        let tag = self.send(VoiceStop { voice })?;
        self.voices[voice as usize].playing = false;
        Some(tag)
    }

    pub fn pause(&mut self, voice: VoiceId, paused: bool) -> Option<CommandTag> {
        if !self.is_allocated(voice) {
            return None;
        }
        self.send(VoicePause { voice, paused: paused as u32 })
    }

    pub fn set_param(&mut self, voice: VoiceId, volume: f32, pitch: f32, pan: f32) -> Option<CommandTag> {
        if !self.is_allocated(voice) {
            return None;
        }
        self.send(VoiceParam { voice, volume, pitch, pan })
    }

    /// Per-frame housekeeping on the game thread.
    ///
    /// Applies voice replies, picks up command completions and flushes early
    /// when the command arena is filling up. Returns the replies about each
    /// voice's current play; replies about earlier plays are dropped.
    pub fn update(&mut self) -> Result<Vec<(VoiceId, VoiceEvent)>, ChannelError> {
        self.replies.process_command();
        let mut events = Vec::new();
        for (voice, event, generation) in self.replies.handler_mut().events.drain(..) {
            let Some(state) = self.voices.get_mut(voice as usize) else {
                continue;
            };
            if state.generation != generation {
                debug!("[AudioContext] Stale {:?} for voice {} (generation {})", event, voice, generation);
                continue;
            }
            state.playing = false;
            debug!("[AudioContext] Voice {} {:?}", voice, event);
            events.push((voice, event));
        }

        self.voice_commands.recv_command_reply();
        if self.voice_commands.allocated_command_buffer_size() >= self.flush_watermark {
            self.voice_commands.flush_command(false, true)?;
        }
        Ok(events)
    }

    /// Hand everything pushed so far to the audio thread.
    pub fn flush(&mut self) -> Result<CommandTag, ChannelError> {
        self.voice_commands.flush_command(false, false)
    }

    pub fn wait(&mut self, tag: CommandTag) -> Result<(), ChannelError> {
        self.voice_commands.wait_command_reply(tag)
    }

    pub fn is_finished(&mut self, tag: CommandTag) -> bool {
        self.voice_commands.recv_command_reply();
        self.voice_commands.is_finish_command(tag)
    }

    /// Game-side view: true from `play` until a reply or `stop` says otherwise.
    pub fn is_playing(&self, voice: VoiceId) -> bool {
        self.voices.get(voice as usize).is_some_and(|v| v.playing)
    }

    pub fn free_voice_count(&self) -> usize {
        self.free_voices.len()
    }

    pub fn voice_commands(&self) -> &CommandManager {
        &self.voice_commands
    }

    pub fn finalize(self) {
        self.voice_commands.finalize();
    }
}
