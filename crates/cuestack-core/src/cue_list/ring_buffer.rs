//! Fixed-capacity sample FIFO, one per output channel.

/// Default ring capacity in samples.
pub const DEFAULT_CAPACITY: usize = 32_768;

/// Single-channel sample ring.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    buffer: Vec<f32>,
    read_pos: usize,
    len: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity.max(1)],
            read_pos: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Samples waiting to be read.
    pub fn available(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Space left for writing.
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    /// Append samples. Whatever does not fit is dropped; returns the count written.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let to_write = samples.len().min(self.free());
        let capacity = self.capacity();
        let mut write_pos = (self.read_pos + self.len) % capacity;
        for &sample in &samples[..to_write] {
            self.buffer[write_pos] = sample;
            write_pos = (write_pos + 1) % capacity;
        }
        self.len += to_write;
        if to_write < samples.len() {
            log::trace!("Ring buffer full, dropped {} samples", samples.len() - to_write);
        }
        to_write
    }

    /// Remove up to `output.len()` samples into `output`; returns the count read.
    pub fn read(&mut self, output: &mut [f32]) -> usize {
        let to_read = output.len().min(self.len);
        let capacity = self.capacity();
        for slot in &mut output[..to_read] {
            *slot = self.buffer[self.read_pos];
            self.read_pos = (self.read_pos + 1) % capacity;
        }
        self.len -= to_read;
        to_read
    }

    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.len = 0;
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_across_wrap() {
        let mut ring = RingBuffer::new(4);
        assert_eq!(ring.write(&[1.0, 2.0, 3.0]), 3);
        let mut out = [0.0; 2];
        assert_eq!(ring.read(&mut out), 2);
        assert_eq!(out, [1.0, 2.0]);
        assert_eq!(ring.write(&[4.0, 5.0, 6.0]), 3);
        let mut out = [0.0; 4];
        assert_eq!(ring.read(&mut out), 4);
        assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_overflow_is_dropped() {
        let mut ring = RingBuffer::new(3);
        assert_eq!(ring.write(&[1.0, 2.0, 3.0, 4.0]), 3);
        assert_eq!(ring.free(), 0);
        let mut out = [9.0; 5];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(out, [1.0, 2.0, 3.0, 9.0, 9.0]);
    }
}
