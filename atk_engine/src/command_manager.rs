use crate::command::{header_for, record_size, Command, CommandList, CommandSlot};
use crate::command_buffer::{CommandBuffer, CommandOffset, NO_COMMAND};
use atk_shared::{is_tag_reached, next_tag, ChannelConfig, ChannelError, CommandTag, INVALID_COMMAND};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Consumer-side callback run over every flushed list, in flush order.
pub trait ProcessCommandList: Send {
    fn process_command_list(&mut self, list: CommandList<'_>);
}

impl<F> ProcessCommandList for F
where
    F: FnMut(CommandList<'_>) + Send,
{
    fn process_command_list(&mut self, list: CommandList<'_>) {
        self(list)
    }
}

/// Hook the producer calls to ask the consumer to process right away.
pub type RequestProcessCommandFunc = Box<dyn Fn() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Nothing pending, every flushed list has been confirmed.
    Idle,
    /// Commands pushed but not flushed yet.
    Accumulating,
    /// Flushed lists not yet confirmed by a reply.
    AwaitingReply,
}

#[derive(Debug, Clone, Copy)]
struct CommandPacket {
    head: CommandOffset,
    tag: CommandTag,
}

struct Shared {
    buffer: CommandBuffer,
    // Pushed but not yet flushed
    list_count: AtomicU32,
}

/// Producer half of a command channel.
pub struct CommandManager {
    name: &'static str,
    shared: Arc<Shared>,
    list_head: CommandOffset,
    list_tail: CommandOffset,
    command_tag: CommandTag,
    last_flushed_tag: CommandTag,
    finish_command_tag: CommandTag,
    send_queue: Sender<CommandPacket>,
    recv_queue: Receiver<CommandTag>,
    request_process: Option<RequestProcessCommandFunc>,
}

/// Consumer half of a command channel. Owns the list-processing callback.
pub struct CommandProcessor<H> {
    name: &'static str,
    shared: Arc<Shared>,
    send_queue: Receiver<CommandPacket>,
    recv_queue: Sender<CommandTag>,
    // Used to drop the oldest reply when the reply queue is full
    stale_replies: Receiver<CommandTag>,
    handler: H,
}

impl CommandManager {
    /// Build a channel with its arena and both queues and register `handler` as the list processor.
    pub fn initialize<H: ProcessCommandList>(
        name: &'static str,
        config: &ChannelConfig,
        handler: H,
    ) -> Result<(CommandManager, CommandProcessor<H>), ChannelError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            buffer: CommandBuffer::new(config.command_buffer_size),
            list_count: AtomicU32::new(0),
        });
        let (send_tx, send_rx) = bounded(config.queue_count);
        let (recv_tx, recv_rx) = bounded(config.queue_count);

        debug!(
            "[{}] Initialized: {} byte arena, {} queue slots",
            name,
            shared.buffer.capacity(),
            config.queue_count
        );

        let manager = CommandManager {
            name,
            shared: shared.clone(),
            list_head: NO_COMMAND,
            list_tail: NO_COMMAND,
            command_tag: 0,
            last_flushed_tag: INVALID_COMMAND,
            finish_command_tag: INVALID_COMMAND,
            send_queue: send_tx,
            recv_queue: recv_rx.clone(),
            request_process: None,
        };
        let processor = CommandProcessor {
            name,
            shared,
            send_queue: send_rx,
            recv_queue: recv_tx,
            stale_replies: recv_rx,
            handler,
        };
        Ok((manager, processor))
    }

    /// Tear down the producer half. Outstanding work is not drained.
    pub fn finalize(self) {
        let pending = self.pending_command_count();
        if pending > 0 || self.state() != ManagerState::Idle {
            warn!(
                "[{}] Finalized with {} unflushed commands, last flushed tag {}, finished tag {}",
                self.name, pending, self.last_flushed_tag, self.finish_command_tag
            );
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn buffer(&self) -> &CommandBuffer {
        &self.shared.buffer
    }

    pub fn set_request_process_command_func(&mut self, func: impl Fn() + Send + 'static) {
        self.request_process = Some(Box::new(func));
    }

    /// Allocate a zeroed `T` record.
    ///
    /// When the arena is full and `force_process` is set, flushes, waits for
    /// the consumer to catch up and retries once. This blocks until the
    /// consumer runs. `None` means out of command memory.
    pub fn alloc_command<T: Command>(&mut self, force_process: bool) -> Option<CommandSlot<'_, T>> {
        let offset = self.alloc_memory(record_size::<T>(), force_process)?;
        // SAFETY: freshly allocated and not linked anywhere yet.
        unsafe {
            let bytes = self.shared.buffer.bytes_mut(offset as usize, record_size::<T>());
            bytes.fill(0);
            self.shared.buffer.write_header(offset, &header_for::<T>());
        }
        Some(CommandSlot::new(self, offset))
    }

    /// Allocate, fill and push in one go.
    pub fn push_value<T: Command>(&mut self, value: T, force_process: bool) -> Option<CommandTag> {
        let mut slot = self.alloc_command::<T>(force_process)?;
        *slot = value;
        Some(slot.push())
    }

    fn alloc_memory(&mut self, size: usize, force_process: bool) -> Option<CommandOffset> {
        if let Some(offset) = self.shared.buffer.alloc_memory(size) {
            return Some(offset);
        }
        if !force_process {
            return None;
        }

        debug!("[{}] Command buffer full, forcing a flush", self.name);
        let reclaimed = self
            .flush_command(true, true)
            .and_then(|tag| self.wait_command_reply(tag));
        if let Err(e) = reclaimed {
            warn!("[{}] Forced flush failed: {}", self.name, e);
            return None;
        }
        self.shared.buffer.alloc_memory(size)
    }

    pub(crate) fn push_command(&mut self, offset: CommandOffset) -> CommandTag {
        if self.list_tail == NO_COMMAND {
            self.list_head = offset;
        } else {
            // SAFETY: the tail is part of the unflushed list, which only the producer touches.
            unsafe {
                let mut tail = self.shared.buffer.read_header(self.list_tail);
                tail.next = offset;
                self.shared.buffer.write_header(self.list_tail, &tail);
            }
        }
        self.list_tail = offset;
        self.shared.list_count.fetch_add(1, Ordering::Release);
        self.command_tag
    }

    /// Hand the pending list to the consumer.
    ///
    /// Returns the tag of the flushed list, or `INVALID_COMMAND` when nothing
    /// was pending and `force` is not set. A forced empty flush still mints a
    /// tag and acts as a barrier behind every earlier list. Blocks while the
    /// send queue is full.
    pub fn flush_command(&mut self, force: bool, force_process: bool) -> Result<CommandTag, ChannelError> {
        if self.list_head == NO_COMMAND && !force {
            return Ok(INVALID_COMMAND);
        }

        let tag = self.command_tag;
        let packet = CommandPacket { head: self.list_head, tag };
        self.send_queue.send(packet).map_err(|_| ChannelError::Disconnected)?;

        let count = self.shared.list_count.swap(0, Ordering::AcqRel);
        self.list_head = NO_COMMAND;
        self.list_tail = NO_COMMAND;
        self.last_flushed_tag = tag;
        self.command_tag = next_tag(tag);
        debug!("[{}] Flushed {} commands as tag {}", self.name, count, tag);

        if force_process {
            if let Some(request_process) = &self.request_process {
                request_process();
            }
        }
        Ok(tag)
    }

    /// Drain available replies without blocking. Returns whether any arrived.
    pub fn recv_command_reply(&mut self) -> bool {
        let mut received = false;
        while let Ok(tag) = self.recv_queue.try_recv() {
            self.finish_command_tag = tag;
            received = true;
        }
        received
    }

    /// Block for at least one reply, then drain the rest.
    pub fn recv_command_reply_sync(&mut self) -> Result<(), ChannelError> {
        let tag = self.recv_queue.recv().map_err(|_| ChannelError::Disconnected)?;
        self.finish_command_tag = tag;
        self.recv_command_reply();
        Ok(())
    }

    /// Block until the list flushed as `tag` (and so every earlier one) has been processed.
    pub fn wait_command_reply(&mut self, tag: CommandTag) -> Result<(), ChannelError> {
        self.recv_command_reply();
        while !self.is_finish_command(tag) {
            self.recv_command_reply_sync()?;
        }
        Ok(())
    }

    /// Whether `tag` is known to be processed, as of the last received reply.
    pub fn is_finish_command(&self, tag: CommandTag) -> bool {
        is_tag_reached(self.finish_command_tag, tag)
    }

    pub fn state(&self) -> ManagerState {
        if self.list_head != NO_COMMAND {
            ManagerState::Accumulating
        } else if !self.is_finish_command(self.last_flushed_tag) {
            ManagerState::AwaitingReply
        } else {
            ManagerState::Idle
        }
    }

    /// Tag the pending list will get when flushed.
    pub fn command_tag(&self) -> CommandTag {
        self.command_tag
    }

    /// Highest tag the consumer has confirmed, `INVALID_COMMAND` before the first reply.
    pub fn finish_command_tag(&self) -> CommandTag {
        self.finish_command_tag
    }

    pub fn pending_command_count(&self) -> u32 {
        self.shared.list_count.load(Ordering::Acquire)
    }

    pub fn allocatable_command_size(&self) -> usize {
        self.shared.buffer.allocatable_size()
    }

    pub fn allocated_command_buffer_size(&self) -> usize {
        self.shared.buffer.allocated_size()
    }

    pub fn command_buffer_capacity(&self) -> usize {
        self.shared.buffer.capacity()
    }

    /// Whether a flush right now would block on a full send queue.
    pub fn is_send_queue_full(&self) -> bool {
        self.send_queue.is_full()
    }
}

impl<H: ProcessCommandList> CommandProcessor<H> {
    /// Run every list waiting in the send queue. Never blocks.
    ///
    /// Returns whether any list was processed.
    pub fn process_command(&mut self) -> bool {
        let mut processed = false;
        while let Ok(packet) = self.send_queue.try_recv() {
            // SAFETY: the packet came through the send queue, so the list is
            // complete and stays allocated until `finalize_command_list`.
            let list = unsafe { CommandList::new(&self.shared.buffer, packet.head, packet.tag) };
            self.handler.process_command_list(list);
            self.finalize_command_list(packet);
            processed = true;
        }
        processed
    }

    fn finalize_command_list(&mut self, packet: CommandPacket) {
        let mut tail = NO_COMMAND;
        let mut next = packet.head;
        let mut count = 0usize;
        while next != NO_COMMAND {
            tail = next;
            // SAFETY: still inside the processed list, nothing freed yet.
            next = unsafe { self.shared.buffer.read_header(next).next };
            count += 1;
        }
        if tail != NO_COMMAND {
            self.shared.buffer.free_memory(tail);
        }
        debug!("[{}] Processed {} commands of tag {}", self.name, count, packet.tag);
        self.send_reply(packet.tag);
    }

    fn send_reply(&mut self, mut tag: CommandTag) {
        loop {
            match self.recv_queue.try_send(tag) {
                Ok(()) => return,
                Err(TrySendError::Full(t)) => {
                    // A newer tag implies the older ones, so the oldest can go
                    let _ = self.stale_replies.try_recv();
                    tag = t;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Lists flushed but not yet processed.
    pub fn queued_list_count(&self) -> usize {
        self.send_queue.len()
    }

    /// True while the producer half is alive or lists are still queued.
    pub fn is_connected(&self) -> bool {
        !self.send_queue.is_empty() || Arc::strong_count(&self.shared) > 1
    }
}
