use std::collections::VecDeque;

const BLOCKS: &[char] = &['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Fixed-capacity buffer backing the dashboard queries-per-second sparkline.
pub struct SparklineBuffer {
    data: VecDeque<i64>,
    capacity: usize,
}

impl SparklineBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: i64) {
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(value);
    }

    pub fn replace(&mut self, values: &[i64]) {
        self.data.clear();
        for &value in values.iter().rev().take(self.capacity) {
            self.data.push_front(value);
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn render(&self, width: usize) -> String {
        if self.data.is_empty() {
            return String::new();
        }

        let start = self.data.len().saturating_sub(width);
        let samples: Vec<i64> = self.data.iter().skip(start).copied().collect();

        let min = *samples.iter().min().unwrap();
        let max = *samples.iter().max().unwrap();
        let range = max - min;

        samples
            .iter()
            .map(|&v| {
                if range == 0 {
                    BLOCKS[BLOCKS.len() / 2]
                } else {
                    let idx = ((v - min) as f64 / range as f64 * (BLOCKS.len() - 1) as f64).round()
                        as usize;
                    BLOCKS[idx.min(BLOCKS.len() - 1)]
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_capacity_is_bounded() {
        let mut buffer = SparklineBuffer::new(3);
        for value in 0..10 {
            buffer.push(value);
        }
        assert_eq!(buffer.render(10).chars().count(), 3);
    }

    #[test]
    fn test_flat_series_renders_mid_block() {
        let mut buffer = SparklineBuffer::new(4);
        buffer.push(5);
        buffer.push(5);
        assert_eq!(buffer.render(4), "▅▅");
    }

    #[test]
    fn test_replace_keeps_most_recent() {
        let mut buffer = SparklineBuffer::new(2);
        buffer.replace(&[1, 2, 3, 4]);
        assert_eq!(buffer.render(2), buffer.render(4));
        assert_eq!(buffer.render(2).chars().count(), 2);
    }
}
