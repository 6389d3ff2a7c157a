/// Indexed double buffer: exactly one of the two entries is "current" (read).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingPong<T> {
    buffers: [T; 2],
    current: usize,
}

impl<T> PingPong<T> {
    pub fn new(a: T, b: T) -> Self {
        Self {
            buffers: [a, b],
            current: 0,
        }
    }

    pub fn current(&self) -> &T {
        &self.buffers[self.current]
    }

    /// Flip after a stage wrote into the write half of [`Self::read_write`].
    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    /// Start-of-frame state: the first buffer is current.
    pub fn reset(&mut self) {
        self.current = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buffers.iter()
    }
}

impl<T: Copy> PingPong<T> {
    /// `(read, write)` pair for the next stage; always distinct entries.
    pub fn read_write(&self) -> (T, T) {
        (self.buffers[self.current], self.buffers[1 - self.current])
    }
}
