//! # Line framing
//!
//! Splits a byte stream into newline terminated records. Partial records are kept across reads, so
//! a record split over two TCP segments (or over a read timeout) is reassembled. Records longer
//! than the configured limit are discarded up to their terminating newline.

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct LineFramer {
    buffer: Vec<u8>,
    max_len: usize,
    discarding: bool,
    num_overlong: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LineFramer {
    /// Create a new framer which accepts records of up to `max_len` bytes, not counting the
    /// newline.
    pub fn new(max_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_len.min(4096)),
            max_len,
            discarding: false,
            num_overlong: 0,
        }
    }

    /// Add bytes read from the stream, returning any records they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut records = Vec::new();

        for &b in bytes {
            if b == b'\n' {
                if self.discarding {
                    self.discarding = false;
                } else {
                    records.push(std::mem::take(&mut self.buffer));
                }
                self.buffer.clear();
            } else if !self.discarding {
                if self.buffer.len() >= self.max_len {
                    self.buffer.clear();
                    self.discarding = true;
                    self.num_overlong += 1;
                } else {
                    self.buffer.push(b);
                }
            }
        }

        records
    }

    /// Drop any partial record, used when the stream is closed.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    /// Number of bytes of the current partial record.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Number of records discarded for exceeding the length limit.
    pub fn num_overlong(&self) -> u64 {
        self.num_overlong
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_split_records() {
        let mut f = LineFramer::new(64);

        assert_eq!(f.push(b"45,80,0,0,1\n90,0,0,0,0\n"), vec![
            b"45,80,0,0,1".to_vec(),
            b"90,0,0,0,0".to_vec()
        ]);
        assert_eq!(f.pending(), 0);
    }

    #[test]
    fn test_partial_records() {
        let mut f = LineFramer::new(64);

        assert!(f.push(b"45,8").is_empty());
        assert_eq!(f.pending(), 4);
        assert!(f.push(b"0,0,").is_empty());
        assert_eq!(f.push(b"0,1\n46"), vec![b"45,80,0,0,1".to_vec()]);
        assert_eq!(f.pending(), 2);

        f.reset();
        assert_eq!(f.push(b",0,0,0,0\n"), vec![b",0,0,0,0".to_vec()]);
    }

    #[test]
    fn test_overlong_records() {
        let mut f = LineFramer::new(4);

        assert_eq!(f.push(b"123456789\n12\n"), vec![b"12".to_vec()]);
        assert_eq!(f.num_overlong(), 1);

        // Exactly at the limit is accepted
        assert_eq!(f.push(b"1234\n"), vec![b"1234".to_vec()]);
        assert_eq!(f.num_overlong(), 1);
    }
}
