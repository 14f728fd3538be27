//! Fixed-capacity ring buffer with a capacity + pending + headroom
//! contract (Design Notes §9): contiguous read/write regions, no
//! memmove-style compaction.

pub struct RingBuffer {
    data: Vec<u8>,
    head: usize,
    len: usize,
}

impl RingBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn pending(&self) -> usize {
        self.len
    }

    pub fn headroom(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn tail(&self) -> usize {
        let cap = self.capacity();
        if cap == 0 {
            0
        } else {
            (self.head + self.len) % cap
        }
    }

    /// The longest contiguous writable run starting at the tail — the
    /// natural size for a single non-blocking `read()` into this buffer.
    /// Callers `commit()` however many bytes they actually wrote into it.
    pub fn spare_run(&mut self) -> &mut [u8] {
        let cap = self.capacity();
        if cap == 0 || self.headroom() == 0 {
            return &mut [];
        }
        let tail = self.tail();
        let run = if tail >= self.head {
            // Free space wraps around the end, or buffer is empty — the
            // contiguous run is from tail to the physical end.
            cap - tail
        } else {
            self.head - tail
        };
        &mut self.data[tail..tail + run]
    }

    /// Marks `n` bytes (previously written into `spare_run()`) as pending.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.headroom());
        self.len += n;
    }

    /// Appends `bytes` verbatim, splitting across the wrap boundary as
    /// needed. Caller must ensure `bytes.len() <= headroom()`.
    pub fn push_slice(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= self.headroom(), "ring buffer overflow");
        let cap = self.capacity();
        let mut tail = self.tail();
        let mut rest = bytes;
        while !rest.is_empty() {
            let run = (cap - tail).min(rest.len());
            self.data[tail..tail + run].copy_from_slice(&rest[..run]);
            rest = &rest[run..];
            tail = (tail + run) % cap;
            self.len += run;
        }
    }

    /// Up to two contiguous readable slices, in order — pass both to
    /// `writev` for a single-syscall flush, or take the first for a
    /// plain `write`.
    pub fn slices(&self) -> (&[u8], &[u8]) {
        if self.len == 0 {
            return (&[], &[]);
        }
        let cap = self.capacity();
        let end = self.head + self.len;
        if end <= cap {
            (&self.data[self.head..end], &[])
        } else {
            (&self.data[self.head..cap], &self.data[..end - cap])
        }
    }

    /// Drops `n` bytes from the front (already written out).
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len);
        let cap = self.capacity();
        self.head = if cap == 0 { 0 } else { (self.head + n) % cap };
        self.len -= n;
    }

    /// Discards all pending bytes — used when a sink closes and its
    /// remaining buffered data has nowhere left to go.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_slices_round_trip() {
        let mut rb = RingBuffer::with_capacity(8);
        rb.push_slice(b"hello");
        assert_eq!(rb.pending(), 5);
        assert_eq!(rb.headroom(), 3);
        let (a, b) = rb.slices();
        assert_eq!([a, b].concat(), b"hello");
    }

    #[test]
    fn wraparound_splits_into_two_slices() {
        let mut rb = RingBuffer::with_capacity(8);
        rb.push_slice(b"abcdef"); // len 6
        rb.consume(4); // head now at 4, len 2 ("ef")
        rb.push_slice(b"ghij"); // wraps: len 6, data = e f g h i j (wrapped)
        let (a, b) = rb.slices();
        assert_eq!([a, b].concat(), b"efghij");
    }

    #[test]
    fn commit_via_spare_run() {
        let mut rb = RingBuffer::with_capacity(4);
        {
            let run = rb.spare_run();
            assert_eq!(run.len(), 4);
            run[..3].copy_from_slice(b"xyz");
        }
        rb.commit(3);
        assert_eq!(rb.pending(), 3);
        let (a, b) = rb.slices();
        assert_eq!([a, b].concat(), b"xyz");
    }

    #[test]
    fn headroom_never_negative_and_capacity_respected() {
        let mut rb = RingBuffer::with_capacity(4);
        rb.push_slice(b"abcd");
        assert_eq!(rb.headroom(), 0);
        rb.consume(2);
        assert_eq!(rb.headroom(), 2);
        rb.push_slice(b"ef");
        assert_eq!(rb.headroom(), 0);
        let (a, b) = rb.slices();
        assert_eq!([a, b].concat(), b"cdef");
    }

    #[test]
    fn clear_discards_pending() {
        let mut rb = RingBuffer::with_capacity(4);
        rb.push_slice(b"ab");
        rb.clear();
        assert!(rb.is_empty());
        assert_eq!(rb.headroom(), 4);
    }
}
