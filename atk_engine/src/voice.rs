use crate::command::CommandList;
use crate::command_manager::{CommandManager, ProcessCommandList};
use crate::commands::{VoiceCommand, VoiceEvent, VoiceId, VoicePlay, VoiceReply};
use crate::loader::{LoaderId, LoaderManager, StreamLoader};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceState {
    pub allocated: bool,
    pub priority: u32,
    pub playing: bool,
    pub paused: bool,
    /// False while a stream loader is still prefetching.
    pub prepared: bool,
    pub position: f64,
    pub length_frames: u32,
    pub volume: f32,
    pub pitch: f32,
    pub pan: f32,
    pub loader: Option<LoaderId>,
    /// Generation of the current play, echoed in its replies.
    pub generation: u32,
}

impl Default for VoiceState {
    fn default() -> Self {
        Self {
            allocated: false,
            priority: 0,
            playing: false,
            paused: false,
            prepared: false,
            position: 0.0,
            length_frames: 0,
            volume: 1.0,
            pitch: 1.0,
            pan: 0.0,
            loader: None,
            generation: 0,
        }
    }
}

/// Audio-thread side of the voice pipeline.
///
/// Applies low-level voice commands to a fixed voice table, advances playing
/// voices once per tick and reports finished or dropped voices through its
/// own reply channel. Never blocks: replies that do not fit are dropped.
pub struct VoiceRenderer {
    voices: Vec<VoiceState>,
    loaders: LoaderManager<StreamLoader>,
    reply: CommandManager,
    rendered_frames: u64,
    dropped_replies: u64,
}

impl VoiceRenderer {
    pub fn new(max_voices: usize, max_stream_loaders: usize, reply: CommandManager) -> Self {
        Self {
            voices: vec![VoiceState::default(); max_voices],
            loaders: LoaderManager::new(max_stream_loaders),
            reply,
            rendered_frames: 0,
            dropped_replies: 0,
        }
    }

    pub fn voice(&self, voice: VoiceId) -> Option<&VoiceState> {
        self.voices.get(voice as usize)
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|v| v.playing).count()
    }

    pub fn rendered_frames(&self) -> u64 {
        self.rendered_frames
    }

    pub fn dropped_replies(&self) -> u64 {
        self.dropped_replies
    }

    pub fn loaders(&self) -> &LoaderManager<StreamLoader> {
        &self.loaders
    }

    pub fn apply(&mut self, command: VoiceCommand) {
        let id = command.voice();
        let Some(voice) = self.voices.get_mut(id as usize) else {
            warn!("[VoiceRenderer] Ignoring {:?}: voice {} out of range", command, id);
            return;
        };

        match command {
            VoiceCommand::Alloc(c) => {
                if let Some(loader) = voice.loader.take() {
                    self.loaders.release(loader);
                }
                *voice = VoiceState { allocated: true, priority: c.priority, ..VoiceState::default() };
            }
            VoiceCommand::Free(_) => {
                if let Some(loader) = voice.loader.take() {
                    self.loaders.release(loader);
                }
                *voice = VoiceState::default();
            }
            VoiceCommand::Play(c) => self.start_voice(c),
            VoiceCommand::Stop(_) => {
                voice.playing = false;
                if let Some(loader) = voice.loader.take() {
                    self.loaders.release(loader);
                }
            }
            VoiceCommand::Pause(c) => voice.paused = c.paused != 0,
            VoiceCommand::Param(c) => {
                voice.volume = c.volume.max(0.0);
                voice.pitch = c.pitch.max(0.0);
                voice.pan = c.pan.clamp(-1.0, 1.0);
            }
        }
    }

    fn start_voice(&mut self, play: VoicePlay) {
        let index = play.voice as usize;
        if !self.voices[index].allocated {
            warn!("[VoiceRenderer] Play on unallocated voice {}", play.voice);
            return;
        }
        if let Some(loader) = self.voices[index].loader.take() {
            self.loaders.release(loader);
        }

        let loader = if play.stream_blocks > 0 {
            let Some(id) = self.loaders.acquire() else {
                debug!("[VoiceRenderer] No stream loader for voice {}", play.voice);
                self.voices[index].playing = false;
                self.post_reply(play.voice, VoiceEvent::Dropped, play.generation);
                return;
            };
            if let Some(stream) = self.loaders.get_mut(id) {
                stream.start(play.voice, play.stream_blocks);
            }
            Some(id)
        } else {
            None
        };

        let voice = &mut self.voices[index];
        voice.playing = true;
        voice.paused = false;
        voice.position = 0.0;
        voice.length_frames = play.length_frames;
        voice.prepared = loader.is_none();
        voice.loader = loader;
        voice.generation = play.generation;
    }

    /// Advance the stream loaders and every audible voice by `frames`, then flush replies.
    ///
    /// Returns how many voices finished during this tick.
    pub fn render(&mut self, frames: u32) -> usize {
        let voices = &mut self.voices;
        self.loaders.update(|_, stream| {
            if let Some(voice) = voices.get_mut(stream.voice as usize) {
                voice.loader = None;
                voice.prepared = true;
            }
        });

        let mut finished = Vec::new();
        for (id, voice) in self.voices.iter_mut().enumerate() {
            if !voice.playing || voice.paused || !voice.prepared {
                continue;
            }
            voice.position += frames as f64 * voice.pitch as f64;
            if voice.position >= voice.length_frames as f64 {
                voice.playing = false;
                finished.push((id as VoiceId, voice.generation));
            }
        }
        self.rendered_frames += frames as u64;

        for &(id, generation) in &finished {
            self.post_reply(id, VoiceEvent::Finished, generation);
        }
        self.flush_replies();
        finished.len()
    }

    fn post_reply(&mut self, voice: VoiceId, event: VoiceEvent, generation: u32) {
        if self.reply.push_value(VoiceReply::new(voice, event, generation), false).is_none() {
            self.dropped_replies += 1;
            warn!("[VoiceRenderer] Reply buffer full, dropped {:?} for voice {}", event, voice);
        }
    }

    /// Send pending replies unless the game side is behind on draining them.
    pub fn flush_replies(&mut self) {
        self.reply.recv_command_reply();
        if self.reply.pending_command_count() == 0 || self.reply.is_send_queue_full() {
            return;
        }
        if let Err(e) = self.reply.flush_command(false, false) {
            debug!("[VoiceRenderer] Reply flush failed: {}", e);
        }
    }
}

impl ProcessCommandList for VoiceRenderer {
    fn process_command_list(&mut self, list: CommandList<'_>) {
        for view in list {
            match VoiceCommand::decode(&view) {
                Some(command) => self.apply(command),
                None => warn!("[VoiceRenderer] Unknown command kind {:#x}", view.kind()),
            }
        }
    }
}
