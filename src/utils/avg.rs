/// Sliding-window average over the most recent `capacity` samples.
///
/// The mean is undefined until the window has been completely filled; callers
/// treat `None` as "keep measuring".
#[derive(Debug, Clone)]
pub struct SlidingAvg {
    buf: Vec<f64>,
    capacity: usize,
    next: usize,
    filled: bool,
}

impl SlidingAvg {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "window capacity must be positive");
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            next: 0,
            filled: false,
        }
    }

    pub fn push(&mut self, sample: f64) {
        if self.buf.len() < self.capacity {
            self.buf.push(sample);
            self.filled = self.buf.len() == self.capacity;
        } else {
            self.buf[self.next] = sample;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    /// Mean of the window, or `None` while it is not yet full.
    pub fn mean(&self) -> Option<f64> {
        if !self.filled {
            return None;
        }
        Some(self.buf.iter().sum::<f64>() / self.buf.len() as f64)
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.next = 0;
        self.filled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::SlidingAvg;

    #[test]
    fn undefined_until_full() {
        let mut avg = SlidingAvg::new(3);
        avg.push(1.0);
        avg.push(2.0);
        assert_eq!(avg.mean(), None);
        avg.push(3.0);
        assert_eq!(avg.mean(), Some(2.0));
    }

    #[test]
    fn slides_over_old_samples() {
        let mut avg = SlidingAvg::new(2);
        avg.push(1.0);
        avg.push(3.0);
        avg.push(5.0);
        assert_eq!(avg.mean(), Some(4.0));
        avg.reset();
        assert_eq!(avg.mean(), None);
    }
}
