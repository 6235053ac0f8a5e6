//! Fixed-capacity circular buffer.

/// Overwrites the oldest slot once full.
#[derive(Debug)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    write_idx: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// `capacity` must be non-zero.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            write_idx: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn push(&mut self, value: T) {
        let capacity = self.capacity();
        self.slots[self.write_idx] = Some(value);
        self.write_idx = (self.write_idx + 1) % capacity;
        if self.len < capacity {
            self.len += 1;
        }
    }

    /// Iterate newest first, walking backward from the last write.
    pub fn iter_recent(&self) -> impl Iterator<Item = &T> + '_ {
        let capacity = self.capacity();
        (0..self.len).filter_map(move |i| {
            let idx = (self.write_idx + capacity - 1 - i) % capacity;
            self.slots[idx].as_ref()
        })
    }
}
