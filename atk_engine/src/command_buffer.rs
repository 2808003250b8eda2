use atk_shared::{align_up, COMMAND_ALIGN};
use bytemuck::{Pod, Zeroable};
use std::cell::UnsafeCell;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Byte offset of a record inside a [`CommandBuffer`].
pub type CommandOffset = u32;

/// End-of-list marker for the `next` link of a record.
pub const NO_COMMAND: CommandOffset = u32::MAX;

#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct Block([u8; COMMAND_ALIGN]);

const _: () = assert!(std::mem::align_of::<Block>() == COMMAND_ALIGN);

/// Fixed prefix of every record in the arena.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub(crate) struct CommandHeader {
    pub next: CommandOffset,
    pub record_size: u32,
    pub kind: u32,
    pub payload_size: u32,
}

pub(crate) const HEADER_BYTES: usize = std::mem::size_of::<CommandHeader>();
pub(crate) const HEADER_SIZE: usize = align_up(HEADER_BYTES);

const MAX_CAPACITY: usize = (u32::MAX as usize) & !(COMMAND_ALIGN - 1);

#[derive(Debug, Clone, Copy)]
struct Cursor {
    begin: usize,
    end: usize,
    // begin == end is ambiguous without it
    empty: bool,
}

/// Bump arena for command records.
///
/// The occupied region `[begin, end)` is always contiguous. Allocation only
/// grows `end` and fails instead of wrapping; release only moves `begin`
/// forward, through the end of the last record of a processed list. Once the
/// region drains completely the cursor restarts at offset 0.
pub struct CommandBuffer {
    storage: Box<[UnsafeCell<Block>]>,
    capacity: usize,
    cursor: Mutex<Cursor>,
}

// SAFETY: record bytes are only touched through the unsafe accessors below.
// Their callers guarantee that the producer writes only records it has not
// flushed yet, and the consumer reads only records it has received and not
// yet freed, so no byte is accessed from two threads at once. The cursor is
// behind a mutex.
unsafe impl Sync for CommandBuffer {}

impl CommandBuffer {
    /// Create an empty arena of `size` bytes, rounded down to the record granularity.
    pub fn new(size: usize) -> Self {
        let capacity = size.min(MAX_CAPACITY) & !(COMMAND_ALIGN - 1);
        let storage = (0..capacity / COMMAND_ALIGN)
            .map(|_| UnsafeCell::new(Block([0; COMMAND_ALIGN])))
            .collect();
        Self {
            storage,
            capacity,
            cursor: Mutex::new(Cursor { begin: 0, end: 0, empty: true }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn cursor(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve `size` bytes right after the occupied region.
    ///
    /// Returns `None` when the space between the cursor and the physical end
    /// of the buffer is too small, even if bytes before `begin` are free.
    pub fn alloc_memory(&self, size: usize) -> Option<CommandOffset> {
        let size = align_up(size.max(1));
        let mut cursor = self.cursor();
        if cursor.empty {
            cursor.begin = 0;
            cursor.end = 0;
        }
        if self.capacity - cursor.end < size {
            return None;
        }
        let offset = cursor.end;
        cursor.end += size;
        cursor.empty = false;
        Some(offset as CommandOffset)
    }

    /// Release everything from `begin` through the end of the record at `last`.
    ///
    /// Lists must be released in the order they were allocated.
    pub fn free_memory(&self, last: CommandOffset) {
        // SAFETY: `last` belongs to a list the caller has finished processing.
        let header = unsafe { self.read_header(last) };
        let release_end = last as usize + header.record_size as usize;
        let mut cursor = self.cursor();
        debug_assert!(!cursor.empty && release_end <= cursor.end, "out-of-order free");
        cursor.begin = release_end.min(cursor.end);
        if cursor.begin == cursor.end {
            cursor.empty = true;
        }
    }

    /// Give back the most recent allocation if nothing was allocated after it.
    pub(crate) fn release_tail(&self, offset: CommandOffset, size: usize) -> bool {
        let mut cursor = self.cursor();
        if cursor.empty || cursor.end != offset as usize + size {
            return false;
        }
        cursor.end = offset as usize;
        if cursor.begin == cursor.end {
            cursor.empty = true;
        }
        true
    }

    /// Free bytes in total, wherever they are.
    pub fn allocatable_size(&self) -> usize {
        self.capacity - self.allocated_size()
    }

    /// Bytes between `begin` and `end`.
    pub fn allocated_size(&self) -> usize {
        let cursor = self.cursor();
        if cursor.empty { 0 } else { cursor.end - cursor.begin }
    }

    /// Largest request `alloc_memory` can satisfy right now.
    pub fn contiguous_free_size(&self) -> usize {
        let cursor = self.cursor();
        if cursor.empty { self.capacity } else { self.capacity - cursor.end }
    }

    pub fn is_empty(&self) -> bool {
        self.cursor().empty
    }

    fn base_ptr(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.storage.as_ptr()) as *mut u8
    }

    /// # Safety
    /// The range must lie inside an allocation owned exclusively by the caller's side.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn bytes_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        assert!(offset + len <= self.capacity);
        unsafe { std::slice::from_raw_parts_mut(self.base_ptr().add(offset), len) }
    }

    /// # Safety
    /// The range must not be written by the other side while the slice lives.
    pub(crate) unsafe fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        assert!(offset + len <= self.capacity);
        unsafe { std::slice::from_raw_parts(self.base_ptr().add(offset), len) }
    }

    /// # Safety
    /// Same contract as [`bytes`](Self::bytes); `offset` must start a record.
    pub(crate) unsafe fn read_header(&self, offset: CommandOffset) -> CommandHeader {
        let bytes = unsafe { self.bytes(offset as usize, HEADER_BYTES) };
        bytemuck::pod_read_unaligned(bytes)
    }

    /// # Safety
    /// Same contract as [`bytes_mut`](Self::bytes_mut); `offset` must start a record.
    pub(crate) unsafe fn write_header(&self, offset: CommandOffset, header: &CommandHeader) {
        let bytes = unsafe { self.bytes_mut(offset as usize, HEADER_BYTES) };
        bytes.copy_from_slice(bytemuck::bytes_of(header));
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cursor = *self.cursor();
        f.debug_struct("CommandBuffer")
            .field("capacity", &self.capacity)
            .field("begin", &cursor.begin)
            .field("end", &cursor.end)
            .field("empty", &cursor.empty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc_record(buffer: &CommandBuffer, size: usize) -> Option<CommandOffset> {
        let offset = buffer.alloc_memory(size)?;
        let header = CommandHeader {
            next: NO_COMMAND,
            record_size: align_up(size) as u32,
            kind: 0,
            payload_size: 0,
        };
        unsafe { buffer.write_header(offset, &header) };
        Some(offset)
    }

    #[test]
    fn test_capacity_rounds_down() {
        assert_eq!(CommandBuffer::new(1000).capacity(), 992);
        assert_eq!(CommandBuffer::new(1024).capacity(), 1024);
    }

    #[test]
    fn test_fail_forward_never_wraps() {
        let buffer = CommandBuffer::new(256);
        let first = alloc_record(&buffer, 64).unwrap();
        let _second = alloc_record(&buffer, 64).unwrap();
        let third = alloc_record(&buffer, 64).unwrap();
        assert_eq!(buffer.contiguous_free_size(), 64);

        // Free the first two: 128 bytes free in total, only 64 of them forward
        let second_offset = first + 64;
        buffer.free_memory(second_offset);
        assert_eq!(buffer.allocatable_size(), 192);
        assert_eq!(buffer.contiguous_free_size(), 64);
        assert!(buffer.alloc_memory(128).is_none());

        // Draining the rest resets the cursor
        let fourth = alloc_record(&buffer, 64).unwrap();
        assert_eq!(fourth, 192);
        buffer.free_memory(fourth);
        assert!(buffer.is_empty());
        assert_eq!(buffer.allocated_size(), 0);
        assert_eq!(alloc_record(&buffer, 256), Some(0));
        let _ = third;
    }

    #[test]
    fn test_release_tail_only_for_last_allocation() {
        let buffer = CommandBuffer::new(128);
        let a = buffer.alloc_memory(32).unwrap();
        let b = buffer.alloc_memory(32).unwrap();
        assert!(!buffer.release_tail(a, 32));
        assert!(buffer.release_tail(b, 32));
        assert!(buffer.release_tail(a, 32));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_sizes_round_to_records() {
        let buffer = CommandBuffer::new(64);
        assert_eq!(buffer.alloc_memory(1), Some(0));
        assert_eq!(buffer.alloc_memory(0), Some(COMMAND_ALIGN as CommandOffset));
        assert_eq!(buffer.allocated_size(), 2 * COMMAND_ALIGN);
    }
}
