use crate::prelude::StageError;

/// Bounded scratch pool that prevents unbounded allocations in hot loops.
pub struct BufferPool<T> {
    buffers: Vec<Vec<T>>,
    outstanding: usize,
    max_capacity: usize,
}

impl<T: Clone + Default> BufferPool<T> {
    pub fn with_capacity(max_capacity: usize) -> Self {
        Self {
            buffers: Vec::with_capacity(max_capacity),
            outstanding: 0,
            max_capacity,
        }
    }

    /// Hands out a zeroed buffer of `length`, reusing a released one if any.
    pub fn checkout(&mut self, length: usize) -> Result<Vec<T>, StageError> {
        if let Some(mut buffer) = self.buffers.pop() {
            buffer.resize(length, T::default());
            self.outstanding += 1;
            Ok(buffer)
        } else if self.outstanding < self.max_capacity {
            self.outstanding += 1;
            Ok(vec![T::default(); length])
        } else {
            Err(StageError::BufferExhaustion(format!(
                "all {} scratch buffers in use",
                self.max_capacity
            )))
        }
    }

    /// Returns a buffer to the pool for reuse.
    pub fn release(&mut self, mut buffer: Vec<T>) {
        buffer.clear();
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.buffers.len() < self.max_capacity {
            self.buffers.push(buffer);
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn reset(&mut self) {
        self.buffers.clear();
        self.outstanding = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_refuses_checkout_past_capacity() {
        let mut pool = BufferPool::<f32>::with_capacity(1);
        let buffer = pool.checkout(4).unwrap();
        assert!(matches!(
            pool.checkout(4),
            Err(StageError::BufferExhaustion(_))
        ));

        pool.release(buffer);
        let reused = pool.checkout(2).unwrap();
        assert_eq!(reused, vec![0.0, 0.0]);
    }
}
