pub mod config;
pub mod error;

pub use config::{AudioConfig, ChannelConfig};
pub use error::ChannelError;

/// Identifies a flushed command list. Minted by the producer, echoed back by the consumer.
pub type CommandTag = u32;

/// Returned when there was nothing to flush. Never minted as a real tag.
pub const INVALID_COMMAND: CommandTag = 0xFFFF_FFFF;

/// Alignment (and size granularity) of every record in a command buffer.
pub const COMMAND_ALIGN: usize = 16;

/// Tag that follows `tag`, skipping the sentinel on wraparound.
pub fn next_tag(tag: CommandTag) -> CommandTag {
    let next = tag.wrapping_add(1);
    if next == INVALID_COMMAND { 0 } else { next }
}

/// True if `tag` is at or before `finished` in serial-number order.
///
/// `INVALID_COMMAND` always counts as reached so callers can wait on the
/// result of an empty flush without hanging.
pub fn is_tag_reached(finished: CommandTag, tag: CommandTag) -> bool {
    if tag == INVALID_COMMAND {
        return true;
    }
    finished.wrapping_sub(tag) < 0x8000_0000
}

/// Round `size` up to the record granularity.
pub const fn align_up(size: usize) -> usize {
    (size + COMMAND_ALIGN - 1) & !(COMMAND_ALIGN - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_tag_skips_sentinel() {
        assert_eq!(next_tag(0), 1);
        assert_eq!(next_tag(INVALID_COMMAND - 1), 0);
    }

    #[test]
    fn test_tag_reached() {
        // Nothing finished yet: the initial finish tag sits just before 0
        assert!(!is_tag_reached(INVALID_COMMAND, 0));
        assert!(is_tag_reached(0, 0));
        assert!(is_tag_reached(5, 3));
        assert!(!is_tag_reached(5, 6));
        assert!(is_tag_reached(0, INVALID_COMMAND));

        // Across the wrap
        assert!(is_tag_reached(2, INVALID_COMMAND - 3));
        assert!(!is_tag_reached(INVALID_COMMAND - 3, 2));
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), COMMAND_ALIGN);
        assert_eq!(align_up(COMMAND_ALIGN), COMMAND_ALIGN);
        assert_eq!(align_up(COMMAND_ALIGN + 1), COMMAND_ALIGN * 2);
    }
}
