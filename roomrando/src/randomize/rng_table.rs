use rand::rngs::StdRng;
use rand::Rng;

/// Weighted pick table. Entries with zero weight are dropped; the last
/// entry absorbs any floating point remainder of the total.
pub struct ProbabilityTable<T> {
    entries: Vec<(T, f64)>,
    total: f64,
}

impl<T: Copy> ProbabilityTable<T> {
    pub fn new() -> Self {
        ProbabilityTable {
            entries: Vec::new(),
            total: 0.0,
        }
    }

    pub fn add(&mut self, value: T, probability: f64) {
        if probability == 0.0 {
            return;
        }
        self.entries.push((value, probability));
        self.total += probability;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Picks an entry weighted by probability. Panics if the table is
    /// empty; callers check `is_empty` first.
    pub fn next(&self, rng: &mut StdRng) -> T {
        assert!(!self.entries.is_empty(), "no probability entries added");
        if self.entries.len() > 1 {
            let roll = rng.gen::<f64>() * self.total;
            let mut cumulative = 0.0;
            for &(value, probability) in &self.entries[..self.entries.len() - 1] {
                cumulative += probability;
                if roll < cumulative {
                    return value;
                }
            }
        }
        self.entries[self.entries.len() - 1].0
    }
}

impl<T: Copy> Default for ProbabilityTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
