//! Gold-value validation of a finished run.
//!
//! Every element of an array holds the same value after any kernel sequence,
//! so the expected results are obtained by replaying the sequence on three
//! scalars in the run's precision.

use serde::Serialize;

use gpustream_core::scalar::StreamScalar;
use gpustream_core::stream::Kernel;

use crate::bench::{BenchConfig, BenchReport};

/// Errors of a run relative to the gold values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolutionCheck {
    /// Mean relative error of A, B and C.
    pub array_errors: [f64; 3],
    /// Bound the array errors are checked against.
    pub array_limit: f64,
    /// Relative error of the dot result, if dot was run.
    pub dot_error: Option<f64>,
    /// Bound the dot error is checked against.
    pub dot_limit: f64,
}

impl SolutionCheck {
    /// Whether every error is within its bound.
    pub fn passed(&self) -> bool {
        self.failures().is_empty()
    }

    /// Human-readable description of each failed check.
    pub fn failures(&self) -> Vec<String> {
        let mut failures = Vec::new();
        for (name, err) in ["a", "b", "c"].iter().zip(self.array_errors) {
            if err.is_nan() || err > self.array_limit {
                failures.push(format!(
                    "Validation failed on {}[]. Average error {:e}",
                    name, err
                ));
            }
        }
        if let Some(err) = self.dot_error {
            if err.is_nan() || err > self.dot_limit {
                failures.push(format!("Validation failed on sum. Error {:e}", err));
            }
        }
        failures
    }
}

/// Scalar replay of a run's kernel sequence.
struct GoldReplay<T> {
    a: T,
    b: T,
    c: T,
}

impl<T: StreamScalar> GoldReplay<T> {
    fn new(config: &BenchConfig) -> Self {
        let (a0, b0, c0) = config.init;
        Self {
            a: T::from_f64(a0),
            b: T::from_f64(b0),
            c: T::from_f64(c0),
        }
    }

    fn iterate(&mut self, kernels: &[Kernel]) {
        let scalar = T::SCALAR;
        for kernel in kernels {
            match kernel {
                Kernel::Copy => self.c = self.a,
                Kernel::Mul => self.b = scalar * self.c,
                Kernel::Add => self.c = self.a + self.b,
                Kernel::Triad => self.a = self.b + scalar * self.c,
                Kernel::Nstream => self.a += self.b + scalar * self.c,
                Kernel::Dot => {}
            }
        }
    }

    fn sum(&self, array_size: usize) -> T {
        T::from_f64(self.a.to_f64() * self.b.to_f64() * array_size as f64)
    }
}

/// Expected A, B and C values and dot result after `config` has run.
pub fn gold_values<T: StreamScalar>(config: &BenchConfig, array_size: usize) -> (T, T, T, T) {
    let kernels = config.mode.kernels();
    let mut replay = GoldReplay::<T>::new(config);
    for _ in 0..config.num_times {
        replay.iterate(kernels);
    }
    let sum = replay.sum(array_size);
    (replay.a, replay.b, replay.c, sum)
}

/// Largest iteration count, up to `config.num_times`, whose gold values stay
/// finite in `T`.
///
/// The dot result only counts when the mode runs the dot kernel.
pub fn finite_iterations<T: StreamScalar>(config: &BenchConfig, array_size: usize) -> usize {
    let kernels = config.mode.kernels();
    let checks_dot = kernels.contains(&Kernel::Dot);
    let mut replay = GoldReplay::<T>::new(config);

    for done in 0..config.num_times {
        replay.iterate(kernels);
        let finite = [replay.a, replay.b, replay.c]
            .iter()
            .all(|v| v.to_f64().is_finite())
            && (!checks_dot || replay.sum(array_size).to_f64().is_finite());
        if !finite {
            return done;
        }
    }
    config.num_times
}

/// Compare the final arrays and dot result of `report` with the gold values.
pub fn check_solution<T: StreamScalar>(
    report: &BenchReport<T>,
    config: &BenchConfig,
) -> SolutionCheck {
    let (gold_a, gold_b, gold_c, gold_sum) = gold_values::<T>(config, report.array_size);

    let array_errors = [
        mean_relative_error(&report.a, gold_a),
        mean_relative_error(&report.b, gold_b),
        mean_relative_error(&report.c, gold_c),
    ];

    let dot_error = report.dot.map(|sum| {
        let gold = gold_sum.to_f64();
        let diff = (sum.to_f64() - gold).abs();
        if gold != 0.0 {
            diff / gold.abs()
        } else {
            diff
        }
    });

    SolutionCheck {
        array_errors,
        array_limit: 100.0 * T::EPSILON.to_f64(),
        dot_error,
        dot_limit: T::DOT_TOLERANCE,
    }
}

/// Mean absolute error divided by the gold magnitude (absolute when gold is 0).
fn mean_relative_error<T: StreamScalar>(values: &[T], gold: T) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let gold = gold.to_f64();
    let total: f64 = values.iter().map(|v| (v.to_f64() - gold).abs()).sum();
    let mean = total / values.len() as f64;
    if gold != 0.0 {
        mean / gold.abs()
    } else {
        mean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::BenchMode;
    use gpustream_core::device::DeviceInfo;
    use gpustream_core::residency::Residency;

    fn report(a: f64, b: f64, c: f64, dot: Option<f64>, n: usize) -> BenchReport<f64> {
        BenchReport {
            device: DeviceInfo {
                index: 0,
                name: "test".to_string(),
                compute_units: 1,
                total_memory: 1 << 30,
            },
            precision: f64::PRECISION,
            array_size: n,
            residency: Residency::DeviceOnly,
            num_times: 2,
            mode: BenchMode::All,
            stats: Vec::new(),
            a: vec![a; n],
            b: vec![b; n],
            c: vec![c; n],
            dot,
        }
    }

    #[test]
    fn test_gold_values_classic() {
        // One iteration from (0.1, 0.2, 0.0): c=0.1, b=0.3, c=0.4, a=1.5.
        let config = BenchConfig {
            num_times: 1,
            ..BenchConfig::default()
        };
        let (a, b, c, sum) = gold_values::<f64>(&config, 10);
        assert!((a - 1.5).abs() < 1e-12);
        assert!((b - 0.3).abs() < 1e-12);
        assert!((c - 0.4).abs() < 1e-12);
        assert!((sum - 4.5).abs() < 1e-12);
    }

    #[test]
    fn test_gold_values_nstream() {
        let config = BenchConfig {
            num_times: 3,
            mode: BenchMode::NstreamOnly,
            init: (1.0, 2.0, 0.5),
        };
        let (a, b, c, _) = gold_values::<f64>(&config, 1);
        assert_eq!(a, 1.0 + 3.0 * 3.5);
        assert_eq!(b, 2.0);
        assert_eq!(c, 0.5);
    }

    #[test]
    fn test_check_accepts_exact_run() {
        let config = BenchConfig {
            num_times: 2,
            ..BenchConfig::default()
        };
        let (a, b, c, sum) = gold_values::<f64>(&config, 64);
        let check = check_solution(&report(a, b, c, Some(sum), 64), &config);
        assert!(check.passed(), "{:?}", check.failures());
    }

    #[test]
    fn test_check_flags_corrupted_array() {
        let config = BenchConfig {
            num_times: 2,
            ..BenchConfig::default()
        };
        let (a, b, c, sum) = gold_values::<f64>(&config, 64);
        let mut run = report(a, b, c, Some(sum), 64);
        run.b[17] = b * 2.0;

        let check = check_solution(&run, &config);
        assert!(!check.passed());
        let failures = check.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("b[]"));
    }

    #[test]
    fn test_check_flags_wrong_dot() {
        let config = BenchConfig {
            num_times: 2,
            ..BenchConfig::default()
        };
        let (a, b, c, sum) = gold_values::<f64>(&config, 64);
        let check = check_solution(&report(a, b, c, Some(sum * 1.001), 64), &config);
        assert!(check.dot_error.unwrap() > check.dot_limit);
        assert!(!check.passed());
    }

    #[test]
    fn test_finite_iterations_single_precision() {
        let config = BenchConfig {
            num_times: 40,
            ..BenchConfig::default()
        };
        // The dot result overflows at 16 iterations, A itself only near 33.
        assert_eq!(finite_iterations::<f32>(&config, 4096), 15);
        let (a, b, c, sum) = gold_values::<f32>(
            &BenchConfig {
                num_times: 15,
                ..config.clone()
            },
            4096,
        );
        assert!([a, b, c, sum].iter().all(|v| v.is_finite()));
        assert_eq!(finite_iterations::<f64>(&config, 4096), 40);
    }

    #[test]
    fn test_finite_iterations_ignores_dot_outside_all_mode() {
        let config = BenchConfig {
            num_times: 1000,
            mode: BenchMode::TriadOnly,
            ..BenchConfig::default()
        };
        assert_eq!(finite_iterations::<f32>(&config, 1 << 25), 1000);
        let config = BenchConfig {
            mode: BenchMode::NstreamOnly,
            ..config
        };
        assert_eq!(finite_iterations::<f32>(&config, 1 << 25), 1000);
    }

    #[test]
    fn test_zero_gold_uses_absolute_error() {
        assert_eq!(mean_relative_error(&[0.0f32; 4], 0.0), 0.0);
        assert_eq!(mean_relative_error(&[0.5f64, 0.0], 0.0), 0.25);
    }
}
