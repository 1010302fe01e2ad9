//! Sampling gate for extension batches
//!
//! Before touching every file of an extension, draw a uniform random sample
//! with reservoir sampling (the candidate sequence is lazy and its length is
//! unknown up front) and check it without mutating anything.
//!
//! Decision rule: if none of the sampled files carries the override, the
//! whole extension is skipped. This is a heuristic. A clean sample does not
//! prove a clean population, and that false-negative risk is accepted in
//! exchange for skipping full passes over large, overwhelmingly clean
//! extension groups. When the population is smaller than the sample size the
//! whole population is checked and the verdict is exact.

use crate::error::AttrResult;
use crate::walker::FileTask;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use tracing::debug;

/// Default number of files checked per extension
pub const DEFAULT_SAMPLE_SIZE: usize = 50;

/// Verdict for one extension batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleResult {
    /// Extension that was sampled
    pub extension: String,

    /// Files seen while drawing the sample
    pub population: usize,

    /// Files actually checked
    pub sampled: usize,

    /// Checked files carrying the override
    pub with_override: usize,

    /// Checks that failed (counted as "no override")
    pub errors: usize,

    /// Whether a full pass is worthwhile
    pub worth_processing: bool,

    /// The sample covered the whole population, so the verdict is exact
    pub exhaustive: bool,
}

impl SampleResult {
    /// Verdict used when sampling is disabled
    fn unsampled(extension: &str) -> Self {
        Self {
            extension: extension.to_string(),
            population: 0,
            sampled: 0,
            with_override: 0,
            errors: 0,
            worth_processing: true,
            exhaustive: false,
        }
    }
}

/// Draws bounded random samples and decides whether an extension is worth
/// a full pass
#[derive(Debug)]
pub struct Sampler<R = StdRng> {
    rng: R,
    sample_size: usize,
}

impl Sampler<StdRng> {
    /// Sampler seeded from the OS, or from `seed` for reproducible runs
    pub fn new(sample_size: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(sample_size, rng)
    }
}

impl<R: Rng> Sampler<R> {
    pub fn with_rng(sample_size: usize, rng: R) -> Self {
        Self { rng, sample_size }
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Reservoir-sample `candidates` and check each chosen file with `check`.
    ///
    /// A sample size of zero disables the gate: the extension is always
    /// worth processing and nothing is checked.
    pub fn sample<I, F>(&mut self, extension: &str, candidates: I, check: F) -> SampleResult
    where
        I: IntoIterator<Item = FileTask>,
        F: Fn(&Path) -> AttrResult<bool>,
    {
        if self.sample_size == 0 {
            return SampleResult::unsampled(extension);
        }

        let (reservoir, population) = self.reservoir(candidates);

        let mut with_override = 0;
        let mut errors = 0;
        for task in &reservoir {
            match check(&task.path) {
                Ok(true) => with_override += 1,
                Ok(false) => {}
                Err(e) => {
                    debug!(error = %e, "Sample check failed");
                    errors += 1;
                }
            }
        }

        let result = SampleResult {
            extension: extension.to_string(),
            population,
            sampled: reservoir.len(),
            with_override,
            errors,
            worth_processing: with_override > 0,
            exhaustive: population <= self.sample_size,
        };

        debug!(
            extension = %extension,
            population = result.population,
            sampled = result.sampled,
            with_override = result.with_override,
            worth = result.worth_processing,
            "Sample drawn"
        );

        result
    }

    /// Algorithm R: keep the first `k` items, then replace a random slot
    /// with item `i` with probability `k / (i + 1)`.
    fn reservoir<I>(&mut self, candidates: I) -> (Vec<FileTask>, usize)
    where
        I: IntoIterator<Item = FileTask>,
    {
        let k = self.sample_size;
        let mut reservoir: Vec<FileTask> = Vec::with_capacity(k.min(1024));
        let mut seen = 0usize;

        for task in candidates {
            if seen < k {
                reservoir.push(task);
            } else {
                let j = self.rng.gen_range(0..=seen);
                if j < k {
                    reservoir[j] = task;
                }
            }
            seen += 1;
        }

        (reservoir, seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn population(n: usize) -> Vec<FileTask> {
        (0..n)
            .map(|i| FileTask::new(format!("/tree/f{}.log", i), "log"))
            .collect()
    }

    #[test]
    fn test_small_population_is_sampled_exhaustively() {
        let mut sampler = Sampler::new(10, Some(7));
        let checked = Cell::new(0);
        let result = sampler.sample("md", population(3), |_| {
            checked.set(checked.get() + 1);
            Ok(false)
        });

        assert_eq!(checked.get(), 3);
        assert_eq!(result.sampled, 3);
        assert_eq!(result.population, 3);
        assert!(result.exhaustive);
    }

    #[test]
    fn test_large_population_is_bounded() {
        let mut sampler = Sampler::new(50, Some(1));
        let checked = Cell::new(0);
        let result = sampler.sample("log", population(200), |_| {
            checked.set(checked.get() + 1);
            Ok(false)
        });

        assert_eq!(checked.get(), 50);
        assert_eq!(result.sampled, 50);
        assert_eq!(result.population, 200);
        assert!(!result.exhaustive);
        assert!(!result.worth_processing);
    }

    #[test]
    fn test_clean_population_always_skipped() {
        for seed in 0..20 {
            let mut sampler = Sampler::new(5, Some(seed));
            let result = sampler.sample("txt", population(40), |_| Ok(false));
            assert!(!result.worth_processing);
        }
    }

    #[test]
    fn test_any_hit_marks_worth_processing() {
        let mut sampler = Sampler::new(10, Some(3));
        let hit = PathBuf::from("/tree/f1.log");
        let result = sampler.sample("log", population(4), |p| Ok(p == hit));
        assert_eq!(result.with_override, 1);
        assert!(result.worth_processing);
    }

    #[test]
    fn test_sample_is_distinct_and_from_population() {
        let mut sampler = Sampler::new(25, Some(42));
        let (reservoir, seen) = sampler.reservoir(population(1000));
        assert_eq!(seen, 1000);
        let unique: HashSet<_> = reservoir.iter().map(|t| t.path.clone()).collect();
        assert_eq!(unique.len(), 25);
    }

    #[test]
    fn test_errors_count_as_clean() {
        let mut sampler = Sampler::new(10, Some(0));
        let result = sampler.sample("md", population(2), |p| {
            Err(crate::error::AttrError::NotFound {
                path: p.display().to_string(),
            })
        });
        assert_eq!(result.errors, 2);
        assert!(!result.worth_processing);
    }

    #[test]
    fn test_zero_sample_size_disables_gate() {
        let mut sampler = Sampler::new(0, None);
        let result = sampler.sample("md", population(5), |_| panic!("must not check"));
        assert!(result.worth_processing);
        assert_eq!(result.sampled, 0);
    }

    #[test]
    fn test_empty_population() {
        let mut sampler = Sampler::new(10, Some(0));
        let result = sampler.sample("md", Vec::new(), |_| Ok(true));
        assert_eq!(result.sampled, 0);
        assert!(result.exhaustive);
        assert!(!result.worth_processing);
    }
}
