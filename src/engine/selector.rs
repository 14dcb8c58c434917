#![forbid(unsafe_code)]

// Weighted random choice over a static action table

use rand::Rng;

/// Picks entries with probability proportional to their weight.
///
/// Zero weights are allowed and make the entry unreachable.
#[derive(Debug, Clone)]
pub struct WeightedSelector<T> {
    entries: Vec<(T, f64)>,
    total: f64,
}

impl<T: Copy> WeightedSelector<T> {
    /// Negative and non-finite weights are treated as zero.
    pub fn new(entries: impl IntoIterator<Item = (T, f64)>) -> Self {
        let entries: Vec<(T, f64)> = entries
            .into_iter()
            .map(|(item, weight)| (item, if weight.is_finite() { weight.max(0.0) } else { 0.0 }))
            .collect();
        let total = entries.iter().map(|(_, weight)| weight).sum();
        Self { entries, total }
    }

    pub fn total_weight(&self) -> f64 {
        self.total
    }

    /// Returns `None` only when every weight is zero.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<T> {
        if self.total <= 0.0 {
            return None;
        }
        let draw = rng.gen::<f64>() * self.total;

        let mut cumulative = 0.0;
        for (item, weight) in &self.entries {
            cumulative += weight;
            if draw < cumulative {
                return Some(*item);
            }
        }

        // Float rounding can leave the draw at the very top of the range
        self.entries
            .iter()
            .rev()
            .find(|(_, weight)| *weight > 0.0)
            .map(|(item, _)| *item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Action, DEFAULT_WEIGHTS};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    #[test]
    fn test_frequencies_converge_to_weights() {
        let selector = WeightedSelector::new([("a", 1.0), ("b", 3.0), ("c", 6.0)]);
        let mut rng = StdRng::seed_from_u64(7);
        let draws = 100_000;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for _ in 0..draws {
            *counts.entry(selector.select(&mut rng).unwrap()).or_default() += 1;
        }
        for (name, weight) in [("a", 0.1), ("b", 0.3), ("c", 0.6)] {
            let freq = counts[name] as f64 / draws as f64;
            assert!((freq - weight).abs() < 0.01, "{name}: {freq}");
        }
    }

    #[test]
    fn test_zero_weight_never_selected() {
        let selector = WeightedSelector::new([("off", 0.0), ("on", 1.0), ("also_off", 0.0)]);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..10_000 {
            assert_eq!(selector.select(&mut rng), Some("on"));
        }
    }

    #[test]
    fn test_all_zero_selects_nothing() {
        let selector = WeightedSelector::new([("x", 0.0)]);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(selector.select(&mut rng), None);
        let empty: WeightedSelector<&str> = WeightedSelector::new([]);
        assert_eq!(empty.select(&mut rng), None);
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let selector = WeightedSelector::new(DEFAULT_WEIGHTS);
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        let first: Vec<Action> = (0..50).filter_map(|_| selector.select(&mut a)).collect();
        let second: Vec<Action> = (0..50).filter_map(|_| selector.select(&mut b)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_default_table_favors_cursor_moves() {
        let selector = WeightedSelector::new(DEFAULT_WEIGHTS);
        assert!((selector.total_weight() - 100.03).abs() < 1e-9);
        let mut rng = StdRng::seed_from_u64(3);
        let moves = (0..20_000)
            .filter(|_| selector.select(&mut rng) == Some(Action::CursorMove))
            .count();
        let freq = moves as f64 / 20_000.0;
        assert!((freq - 40.0 / 100.03).abs() < 0.02, "{freq}");
    }
}
