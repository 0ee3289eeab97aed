use std::fmt::Display;

/// Distribution of small non-negative integers, such as leaf depths or leaf sizes.
/// Keeps a full histogram, `histogram[v]` is the number of samples equal to `v`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Distribution {
    histogram: Vec<usize>,
    count: usize,
}

impl Distribution {
    pub fn add(&mut self, value: usize) {
        if value >= self.histogram.len() {
            self.histogram.resize(value + 1, 0);
        }
        self.histogram[value] += 1;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of samples equal to `value`.
    pub fn frequency(&self, value: usize) -> usize {
        self.histogram.get(value).copied().unwrap_or(0)
    }

    /// Share of samples equal to `value`, zero for an empty distribution.
    pub fn fraction(&self, value: usize) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            self.frequency(value) as f32 / self.count as f32
        }
    }

    pub fn min(&self) -> Option<usize> {
        self.histogram.iter().position(|&n| n > 0)
    }

    pub fn max(&self) -> Option<usize> {
        self.histogram.iter().rposition(|&n| n > 0)
    }

    pub fn mean(&self) -> Option<f32> {
        if self.count == 0 {
            return None;
        }
        let sum: usize = self.histogram.iter().enumerate().map(|(v, n)| v * n).sum();
        Some(sum as f32 / self.count as f32)
    }

    /// Smallest value that at least `quantile` of the samples don't exceed.
    pub fn quantile(&self, quantile: f32) -> Option<usize> {
        if self.count == 0 {
            return None;
        }
        let target = ((quantile.clamp(0.0, 1.0) * self.count as f32).ceil() as usize).max(1);
        let mut seen = 0;
        self.histogram.iter().position(|&n| {
            seen += n;
            seen >= target
        })
    }
}

impl Extend<usize> for Distribution {
    fn extend<T: IntoIterator<Item = usize>>(&mut self, iter: T) {
        for value in iter {
            self.add(value);
        }
    }
}

impl FromIterator<usize> for Distribution {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        let mut distribution = Distribution::default();
        distribution.extend(iter);
        distribution
    }
}

impl Display for Distribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.min(), self.max(), self.mean(), self.quantile(0.5)) {
            (Some(min), Some(max), Some(mean), Some(median)) => write!(
                f,
                "{min} - {max}; avg {mean:.1}; median {median}; {} samples",
                self.count
            ),
            _ => write!(f, "no samples"),
        }
    }
}
