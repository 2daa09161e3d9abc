use std::collections::VecDeque;

pub const DEFAULT_LOG_CAPACITY: usize = 500;

/// Bounded in-memory tail of remote build/runtime output. Oldest lines are
/// evicted first; `base` counts evictions so tailing readers can resume from
/// a sequence number instead of diffing whole line vectors.
#[derive(Debug)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    capacity: usize,
    base: u64,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity: capacity.max(1),
            base: 0,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
            self.base += 1;
        }
        self.lines.push_back(line.into());
    }

    pub fn extend<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for line in lines {
            self.push(line);
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sequence number just past the newest retained line.
    pub fn end_seq(&self) -> u64 {
        self.base + self.lines.len() as u64
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// Lines at or after `from`, plus the sequence to resume from on the
    /// next call. A reader that fell behind the eviction window skips ahead
    /// to the oldest retained line; a cursor from before a `clear` (it can
    /// only be larger than `end_seq` in that case) restarts from the oldest.
    pub fn lines_since(&self, from: u64) -> (Vec<String>, u64) {
        let start = if from > self.end_seq() {
            self.base
        } else {
            from.max(self.base)
        };
        let offset = (start - self.base) as usize;
        let collected = self.lines.iter().skip(offset).cloned().collect();
        (collected, self.end_seq())
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.base = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_evicts_oldest_first() {
        let mut buffer = LogBuffer::new(3);
        buffer.extend(["a", "b", "c", "d"]);
        assert_eq!(buffer.lines(), vec!["b", "c", "d"]);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.end_seq(), 4);
    }

    #[test]
    fn lines_since_resumes_from_sequence() {
        let mut buffer = LogBuffer::new(10);
        buffer.extend(["a", "b"]);
        let (first, seq) = buffer.lines_since(0);
        assert_eq!(first, vec!["a", "b"]);
        assert_eq!(seq, 2);

        buffer.push("c");
        let (rest, seq) = buffer.lines_since(seq);
        assert_eq!(rest, vec!["c"]);
        assert_eq!(seq, 3);

        let (empty, seq) = buffer.lines_since(seq);
        assert!(empty.is_empty());
        assert_eq!(seq, 3);
    }

    #[test]
    fn lines_since_skips_ahead_after_eviction() {
        let mut buffer = LogBuffer::new(2);
        buffer.extend(["a", "b", "c", "d"]);
        // Reader last saw sequence 1, but "b" was already evicted.
        let (lines, seq) = buffer.lines_since(1);
        assert_eq!(lines, vec!["c", "d"]);
        assert_eq!(seq, 4);
    }

    #[test]
    fn clear_resets_sequence() {
        let mut buffer = LogBuffer::new(2);
        buffer.extend(["a", "b", "c"]);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.end_seq(), 0);
        let (lines, seq) = buffer.lines_since(99);
        assert!(lines.is_empty());
        assert_eq!(seq, 0);
    }

    #[test]
    fn stale_cursor_restarts_after_clear() {
        let mut buffer = LogBuffer::new(10);
        buffer.extend(["a", "b", "c"]);
        let (_, seq) = buffer.lines_since(0);
        assert_eq!(seq, 3);

        buffer.clear();
        buffer.extend(["x", "y"]);
        // The old cursor outlived the buffer it came from.
        let (lines, seq) = buffer.lines_since(seq);
        assert_eq!(lines, vec!["x", "y"]);
        assert_eq!(seq, 2);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut buffer = LogBuffer::new(0);
        buffer.push("only");
        assert_eq!(buffer.lines(), vec!["only"]);
    }
}
