use crate::command_buffer::{CommandBuffer, CommandHeader, CommandOffset, HEADER_SIZE, NO_COMMAND};
use crate::command_manager::CommandManager;
use atk_shared::{align_up, CommandTag, COMMAND_ALIGN};
use bytemuck::Pod;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

/// A record that can travel through a command channel.
///
/// Records are plain data: they are zero-initialized on allocation and are
/// never dropped, the arena just forgets them in bulk.
pub trait Command: Pod + Send + 'static {
    /// Discriminates record types inside one channel. Must be unique per channel.
    const KIND: u32;
    const NAME: &'static str;
}

/// Bytes a `T` record occupies in the arena, header included.
pub fn record_size<T: Command>() -> usize {
    const { assert!(std::mem::align_of::<T>() <= COMMAND_ALIGN, "command alignment exceeds arena alignment") };
    align_up(HEADER_SIZE + std::mem::size_of::<T>())
}

pub(crate) fn header_for<T: Command>() -> CommandHeader {
    CommandHeader {
        next: NO_COMMAND,
        record_size: record_size::<T>() as u32,
        kind: T::KIND,
        payload_size: std::mem::size_of::<T>() as u32,
    }
}

/// A freshly allocated, zeroed record that has not been pushed yet.
///
/// Fill in the fields through `DerefMut`, then call [`push`](Self::push).
/// Dropping a slot without pushing gives the bytes back when it is still the
/// newest allocation; otherwise they are reclaimed with the next list.
pub struct CommandSlot<'a, T: Command> {
    manager: &'a mut CommandManager,
    offset: CommandOffset,
    pushed: bool,
    _marker: PhantomData<T>,
}

impl<'a, T: Command> CommandSlot<'a, T> {
    pub(crate) fn new(manager: &'a mut CommandManager, offset: CommandOffset) -> Self {
        Self { manager, offset, pushed: false, _marker: PhantomData }
    }

    pub fn offset(&self) -> CommandOffset {
        self.offset
    }

    /// Append the record to the pending list. Returns the tag the list will be flushed with.
    pub fn push(mut self) -> CommandTag {
        self.pushed = true;
        self.manager.push_command(self.offset)
    }
}

impl<T: Command> Deref for CommandSlot<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the record is allocated and unflushed, only this producer sees it.
        let bytes = unsafe {
            self.manager
                .buffer()
                .bytes(self.offset as usize + HEADER_SIZE, std::mem::size_of::<T>())
        };
        bytemuck::from_bytes(bytes)
    }
}

impl<T: Command> DerefMut for CommandSlot<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above, and `&mut self` makes this the only view.
        let bytes = unsafe {
            self.manager
                .buffer()
                .bytes_mut(self.offset as usize + HEADER_SIZE, std::mem::size_of::<T>())
        };
        bytemuck::from_bytes_mut(bytes)
    }
}

impl<T: Command> Drop for CommandSlot<'_, T> {
    fn drop(&mut self) {
        if !self.pushed && !self.manager.buffer().release_tail(self.offset, record_size::<T>()) {
            tracing::debug!("[CommandSlot] {} dropped unpushed at offset {}", T::NAME, self.offset);
        }
    }
}

/// One record of a flushed list, seen from the consumer.
#[derive(Clone, Copy)]
pub struct CommandView<'a> {
    offset: CommandOffset,
    header: CommandHeader,
    payload: &'a [u8],
}

impl<'a> CommandView<'a> {
    pub fn kind(&self) -> u32 {
        self.header.kind
    }

    pub fn offset(&self) -> CommandOffset {
        self.offset
    }

    pub fn record_size(&self) -> usize {
        self.header.record_size as usize
    }

    pub fn is<T: Command>(&self) -> bool {
        self.header.kind == T::KIND && self.payload.len() == std::mem::size_of::<T>()
    }

    /// Typed access to the payload if this record is a `T`.
    pub fn downcast<T: Command>(&self) -> Option<&'a T> {
        if !self.is::<T>() {
            return None;
        }
        bytemuck::try_from_bytes(self.payload).ok()
    }
}

impl std::fmt::Debug for CommandView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandView")
            .field("offset", &self.offset)
            .field("kind", &self.header.kind)
            .field("record_size", &self.header.record_size)
            .finish()
    }
}

/// A flushed command list, iterated in push order.
pub struct CommandList<'a> {
    buffer: &'a CommandBuffer,
    head: CommandOffset,
    next: CommandOffset,
    tag: CommandTag,
}

impl<'a> CommandList<'a> {
    /// # Safety
    /// `head` must start a list that was flushed to this consumer and has not been freed.
    pub(crate) unsafe fn new(buffer: &'a CommandBuffer, head: CommandOffset, tag: CommandTag) -> Self {
        Self { buffer, head, next: head, tag }
    }

    pub fn tag(&self) -> CommandTag {
        self.tag
    }

    pub fn is_empty(&self) -> bool {
        self.head == NO_COMMAND
    }
}

impl<'a> Iterator for CommandList<'a> {
    type Item = CommandView<'a>;

    fn next(&mut self) -> Option<CommandView<'a>> {
        if self.next == NO_COMMAND {
            return None;
        }
        let offset = self.next;
        // SAFETY: every record reachable from `head` belongs to the flushed list (see `new`).
        let (header, payload) = unsafe {
            let header = self.buffer.read_header(offset);
            let payload = self.buffer.bytes(offset as usize + HEADER_SIZE, header.payload_size as usize);
            (header, payload)
        };
        self.next = header.next;
        Some(CommandView { offset, header, payload })
    }
}
