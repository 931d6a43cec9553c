//! Table for drawing negative samples.
//!
//! The table is a flat array of word indices; drawing a uniformly random
//! slot draws word `w` with probability close to
//! `count[w]^alpha / sum(count^alpha)`.

use std::iter;

use rand::Rng;

use crate::random::stochastic_round;
use crate::{count, real};

#[derive(Debug, Clone)]
pub struct UnigramTable {
    max_size: usize,
    /// Normalization constant: the sum of all weights seen so far.
    weight_sum: f64,
    /// Grows until it holds `max_size` entries, then stays full.
    table: Vec<u32>,
}

impl UnigramTable {
    pub fn new(max_size: usize) -> Self {
        UnigramTable {
            max_size,
            weight_sum: 0.0,
            table: Vec::new(),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of populated slots.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn weight_sum(&self) -> f64 {
        self.weight_sum
    }

    /// Draw a word index. Panics if nothing has been added to the table yet.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        assert!(!self.table.is_empty(), "sampling from an empty unigram table");
        self.table[rng.gen_range(0..self.table.len())] as usize
    }

    /// Rebuild the table exactly from `counts`. Each word gets
    /// `max_size * count^alpha / z` slots, rounded stochastically; if rounding
    /// overshoots `max_size`, random words give slots back until it fits.
    pub fn build<R: Rng + ?Sized>(&mut self, counts: &[count], alpha: real, rng: &mut R) {
        let alpha = alpha as f64;
        let z: f64 = counts.iter().map(|&c| (c as f64).powf(alpha)).sum();
        self.weight_sum = z;
        self.table.clear();
        if z <= 0.0 {
            return;
        }

        let max_size = self.max_size as f64;
        let mut nums: Vec<usize> = counts
            .iter()
            .map(|&c| stochastic_round(rng, max_size * (c as f64).powf(alpha) / z))
            .collect();
        let mut sum: usize = nums.iter().sum();
        while sum > self.max_size {
            let w = rng.gen_range(0..nums.len());
            if nums[w] > 0 {
                nums[w] -= 1;
                sum -= 1;
            }
        }

        for (w, &n) in nums.iter().enumerate() {
            self.table.extend(iter::repeat(w as u32).take(n));
        }
    }

    /// Account for `weight` more mass on `word`.
    ///
    /// While the table is filling, this appends about `weight` copies of
    /// `word`. Once full, it overwrites about `weight / weight_sum * max_size`
    /// random slots instead. Either way the cost is proportional to the
    /// weight, not to the vocabulary; the result drifts from the exact
    /// distribution until the next [`build`](Self::build).
    pub fn update<R: Rng + ?Sized>(&mut self, word: usize, weight: real, rng: &mut R) {
        debug_assert!(weight >= 0.0);
        let weight = weight as f64;
        self.weight_sum += weight;
        if self.table.len() < self.max_size {
            let n = stochastic_round(rng, weight).min(self.max_size - self.table.len());
            self.table.extend(iter::repeat(word as u32).take(n));
        } else {
            let n = stochastic_round(rng, weight / self.weight_sum * self.max_size as f64);
            for _ in 0..n {
                let slot = rng.gen_range(0..self.max_size);
                self.table[slot] = word as u32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn frequencies(table: &UnigramTable, n: usize, draws: usize, rng: &mut StdRng) -> Vec<f64> {
        let mut hits = vec![0usize; n];
        for _ in 0..draws {
            hits[table.sample(rng)] += 1;
        }
        hits.into_iter().map(|h| h as f64 / draws as f64).collect()
    }

    fn expected(counts: &[count], alpha: f64) -> Vec<f64> {
        let z: f64 = counts.iter().map(|&c| (c as f64).powf(alpha)).sum();
        counts.iter().map(|&c| (c as f64).powf(alpha) / z).collect()
    }

    fn check_build(alpha: real) {
        let mut rng = StdRng::seed_from_u64(0);
        let counts = [2, 3, 5];
        let mut table = UnigramTable::new(100_000);
        table.build(&counts, alpha, &mut rng);
        assert!(table.len() <= 100_000);
        assert!(table.len() >= 99_990);

        let observed = frequencies(&table, 3, 100_000, &mut rng);
        for (o, e) in observed.iter().zip(expected(&counts, alpha as f64)) {
            assert!((o - e).abs() < 0.01, "alpha={alpha}: observed {o}, expected {e}");
        }
    }

    #[test]
    fn build_matches_distribution() {
        check_build(1.0);
        check_build(0.75);
    }

    #[test]
    fn build_never_overfills() {
        let mut rng = StdRng::seed_from_u64(3);
        let counts: Vec<count> = (1..=50).collect();
        for _ in 0..20 {
            let mut table = UnigramTable::new(97);
            table.build(&counts, 0.75, &mut rng);
            assert!(table.len() <= 97);
        }
    }

    #[test]
    fn build_with_no_counts_is_empty() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut table = UnigramTable::new(10);
        table.build(&[0, 0, 0], 0.75, &mut rng);
        assert!(table.is_empty());
    }

    fn check_update(alpha: real) {
        let mut rng = StdRng::seed_from_u64(0);
        let mut table = UnigramTable::new(100_000);
        let mut counts: Vec<count> = vec![0; 3];
        for _ in 0..200_000 {
            let w = match rng.gen_range(0..10) {
                0..=1 => 0,
                2..=4 => 1,
                _ => 2,
            };
            counts[w] += 1;
            let c = counts[w] as real;
            table.update(w, c.powf(alpha) - (c - 1.0).powf(alpha), &mut rng);
        }

        let observed = frequencies(&table, 3, 100_000, &mut rng);
        for (o, e) in observed.iter().zip(expected(&counts, alpha as f64)) {
            assert!((o - e).abs() < 0.03, "alpha={alpha}: observed {o}, expected {e}");
        }
    }

    #[test]
    fn incremental_updates_approximate_distribution() {
        check_update(1.0);
        check_update(0.75);
    }

    #[test]
    fn full_table_overwrites_in_place() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut table = UnigramTable::new(1000);
        table.update(0, 1000.0, &mut rng);
        assert_eq!(table.len(), 1000);
        // 900 random overwrites cover about 1 - e^-0.9 = 59% of the slots.
        table.update(1, 9000.0, &mut rng);
        assert_eq!(table.len(), 1000);
        let ones = (0..1000).filter(|_| table.sample(&mut rng) == 1).count();
        assert!(ones > 450 && ones < 750, "got {ones}/1000 draws of word 1");
    }
}
