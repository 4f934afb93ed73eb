#![forbid(unsafe_code)]

use std::ops::Range;

/// The fixed-size window of a chunked stream that covers one cursor position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkWindow {
    pub index: u64,
    pub start: u64,
    pub end: u64,
    /// Position of the cursor relative to `start`.
    pub offset: u64,
}

impl ChunkWindow {
    /// Resolves `tell` against a stream of `size` bytes split every `buffer_size` bytes.
    ///
    /// The last window is shorter when `size` is not a multiple of `buffer_size`.
    pub fn locate(tell: u64, buffer_size: u64, size: u64) -> Self {
        let buffer_size = buffer_size.max(1);
        let index = tell / buffer_size;
        let start = index * buffer_size;
        let end = start.saturating_add(buffer_size).min(size);
        Self {
            index,
            start,
            end,
            offset: tell - start,
        }
    }

    pub fn range(&self) -> Range<u64> {
        self.start..self.end
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_position_falls_inside_its_window() {
        for buffer_size in [1u64, 3, 10, 4096] {
            for size in [1u64, 9, 10, 11, 25, 8193] {
                for tell in 0..size {
                    let window = ChunkWindow::locate(tell, buffer_size, size);
                    assert!(window.start <= tell, "start {window:?} tell {tell}");
                    assert!(tell < window.end, "end {window:?} tell {tell}");
                    assert!(window.len() <= buffer_size);
                    assert_eq!(window.start + window.offset, tell);
                }
            }
        }
    }

    #[test]
    fn last_window_is_clamped_to_size() {
        let window = ChunkWindow::locate(21, 10, 25);
        assert_eq!(window.index, 2);
        assert_eq!(window.range(), 20..25);
        assert_eq!(window.offset, 1);
    }

    #[test]
    fn cursor_at_end_of_aligned_stream_has_empty_window() {
        let window = ChunkWindow::locate(20, 10, 20);
        assert_eq!(window.index, 2);
        assert!(window.is_empty());
    }
}
