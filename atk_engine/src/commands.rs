use crate::command::{Command, CommandView};
use bytemuck::{Pod, Zeroable};

pub type VoiceId = u32;

// Game thread -> audio thread

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VoiceAlloc {
    pub voice: VoiceId,
    pub priority: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VoiceFree {
    pub voice: VoiceId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VoicePlay {
    pub voice: VoiceId,
    pub length_frames: u32,
    /// Blocks to prefetch before the voice becomes audible. 0 plays immediately.
    pub stream_blocks: u32,
    /// Echoed back in every reply about this play.
    pub generation: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VoiceStop {
    pub voice: VoiceId,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VoicePause {
    pub voice: VoiceId,
    pub paused: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VoiceParam {
    pub voice: VoiceId,
    pub volume: f32,
    pub pitch: f32,
    pub pan: f32,
}

impl Command for VoiceAlloc {
    const KIND: u32 = 0x0101;
    const NAME: &'static str = "VoiceAlloc";
}

impl Command for VoiceFree {
    const KIND: u32 = 0x0102;
    const NAME: &'static str = "VoiceFree";
}

impl Command for VoicePlay {
    const KIND: u32 = 0x0103;
    const NAME: &'static str = "VoicePlay";
}

impl Command for VoiceStop {
    const KIND: u32 = 0x0104;
    const NAME: &'static str = "VoiceStop";
}

impl Command for VoicePause {
    const KIND: u32 = 0x0105;
    const NAME: &'static str = "VoicePause";
}

impl Command for VoiceParam {
    const KIND: u32 = 0x0106;
    const NAME: &'static str = "VoiceParam";
}

/// Decoded low-level voice command, as the audio thread applies it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VoiceCommand {
    Alloc(VoiceAlloc),
    Free(VoiceFree),
    Play(VoicePlay),
    Stop(VoiceStop),
    Pause(VoicePause),
    Param(VoiceParam),
}

impl VoiceCommand {
    pub fn decode(view: &CommandView<'_>) -> Option<Self> {
        if let Some(c) = view.downcast::<VoiceAlloc>() {
            Some(Self::Alloc(*c))
        } else if let Some(c) = view.downcast::<VoiceFree>() {
            Some(Self::Free(*c))
        } else if let Some(c) = view.downcast::<VoicePlay>() {
            Some(Self::Play(*c))
        } else if let Some(c) = view.downcast::<VoiceStop>() {
            Some(Self::Stop(*c))
        } else if let Some(c) = view.downcast::<VoicePause>() {
            Some(Self::Pause(*c))
        } else {
            view.downcast::<VoiceParam>().map(|c| Self::Param(*c))
        }
    }

    pub fn voice(&self) -> VoiceId {
        match self {
            Self::Alloc(c) => c.voice,
            Self::Free(c) => c.voice,
            Self::Play(c) => c.voice,
            Self::Stop(c) => c.voice,
            Self::Pause(c) => c.voice,
            Self::Param(c) => c.voice,
        }
    }
}

// Audio thread -> game thread

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum VoiceEvent {
    /// Reached the end of its data.
    Finished = 1,
    /// Could not start, e.g. no stream loader left.
    Dropped = 2,
}

impl VoiceEvent {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Finished),
            2 => Some(Self::Dropped),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VoiceReply {
    pub voice: VoiceId,
    pub event: u32,
    /// `VoicePlay::generation` of the play this reply is about.
    pub generation: u32,
}

impl VoiceReply {
    pub fn new(voice: VoiceId, event: VoiceEvent, generation: u32) -> Self {
        Self { voice, event: event as u32, generation }
    }

    pub fn event(&self) -> Option<VoiceEvent> {
        VoiceEvent::from_raw(self.event)
    }
}

impl Command for VoiceReply {
    const KIND: u32 = 0x0201;
    const NAME: &'static str = "VoiceReply";
}
