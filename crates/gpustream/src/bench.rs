//! Benchmark runner and timing statistics.
//!
//! The runner only drives the [`Stream`] hooks: initialize once, run the
//! selected kernels `num_times` times while timing every call, then read the
//! arrays back for validation.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use gpustream_core::device::DeviceInfo;
use gpustream_core::error::{Result, StreamError};
use gpustream_core::residency::Residency;
use gpustream_core::scalar::{Precision, StreamScalar};
use gpustream_core::stream::{Kernel, Stream};

use crate::validation;

/// Which kernels a run times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BenchMode {
    /// Copy, Mul, Add, Triad and Dot in sequence.
    #[default]
    All,
    /// Only Triad.
    TriadOnly,
    /// Only Nstream.
    NstreamOnly,
}

impl BenchMode {
    /// Kernels run per iteration, in order.
    pub fn kernels(&self) -> &'static [Kernel] {
        match self {
            BenchMode::All => &Kernel::CLASSIC,
            BenchMode::TriadOnly => &[Kernel::Triad],
            BenchMode::NstreamOnly => &[Kernel::Nstream],
        }
    }
}

/// Unit bandwidth is reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandwidthUnit {
    /// 10^6 bytes per second.
    #[default]
    Megabytes,
    /// 2^20 bytes per second.
    Mebibytes,
}

impl BandwidthUnit {
    /// Bytes per unit.
    pub fn bytes(&self) -> f64 {
        match self {
            BandwidthUnit::Megabytes => 1.0e6,
            BandwidthUnit::Mebibytes => (1u64 << 20) as f64,
        }
    }

    /// Column label.
    pub fn label(&self) -> &'static str {
        match self {
            BandwidthUnit::Megabytes => "MBytes/sec",
            BandwidthUnit::Mebibytes => "MiBytes/sec",
        }
    }
}

/// Parameters of a benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Iterations of the kernel sequence.
    pub num_times: usize,
    /// Kernels to time.
    pub mode: BenchMode,
    /// Initial values of A, B and C.
    pub init: (f64, f64, f64),
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            num_times: 10,
            mode: BenchMode::All,
            init: (0.1, 0.2, 0.0),
        }
    }
}

impl BenchConfig {
    /// Reject runs that would produce no timings.
    pub fn validate(&self) -> Result<()> {
        if self.num_times == 0 {
            return Err(StreamError::InvalidConfig(
                "number of iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// [`validate`](Self::validate), then reject iteration counts whose
    /// expected values overflow `T` for arrays of `array_size` elements.
    pub fn validate_for<T: StreamScalar>(&self, array_size: usize) -> Result<()> {
        self.validate()?;
        let safe = validation::finite_iterations::<T>(self, array_size);
        if safe < self.num_times {
            return Err(StreamError::InvalidConfig(format!(
                "{} iterations overflow {} values; at most {} are supported",
                self.num_times,
                T::PRECISION,
                safe
            )));
        }
        Ok(())
    }
}

/// Timing summary of one kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelStats {
    /// Kernel timed.
    pub kernel: Kernel,
    /// Bytes moved by one call.
    pub bytes: u64,
    /// Floating-point operations of one call.
    pub flops: u64,
    /// Fastest call in seconds.
    pub min_secs: f64,
    /// Slowest call in seconds.
    pub max_secs: f64,
    /// Mean call time in seconds.
    pub avg_secs: f64,
    /// Calls the statistics cover.
    pub samples: usize,
}

impl KernelStats {
    /// Summarize `timings`, dropping the first (warm-up) call when there is
    /// more than one.
    pub fn from_timings(kernel: Kernel, bytes: u64, flops: u64, timings: &[f64]) -> Self {
        let measured = if timings.len() > 1 {
            &timings[1..]
        } else {
            timings
        };

        let min_secs = measured.iter().copied().fold(f64::INFINITY, f64::min);
        let max_secs = measured.iter().copied().fold(0.0, f64::max);
        let avg_secs = if measured.is_empty() {
            0.0
        } else {
            measured.iter().sum::<f64>() / measured.len() as f64
        };

        Self {
            kernel,
            bytes,
            flops,
            min_secs: if measured.is_empty() { 0.0 } else { min_secs },
            max_secs,
            avg_secs,
            samples: measured.len(),
        }
    }

    /// Peak bandwidth (from the fastest call) in `unit` per second.
    pub fn bandwidth(&self, unit: BandwidthUnit) -> f64 {
        if self.min_secs > 0.0 {
            self.bytes as f64 / unit.bytes() / self.min_secs
        } else {
            0.0
        }
    }

    /// Peak throughput in GFLOP/s.
    pub fn gflops(&self) -> f64 {
        if self.min_secs > 0.0 {
            self.flops as f64 * 1.0e-9 / self.min_secs
        } else {
            0.0
        }
    }
}

/// Outcome of a benchmark run.
#[derive(Debug, Clone)]
pub struct BenchReport<T: StreamScalar> {
    /// Device the run used.
    pub device: DeviceInfo,
    /// Element precision.
    pub precision: Precision,
    /// Elements per array.
    pub array_size: usize,
    /// Residency of the arrays.
    pub residency: Residency,
    /// Iterations run.
    pub num_times: usize,
    /// Kernels timed.
    pub mode: BenchMode,
    /// One entry per timed kernel, in execution order.
    pub stats: Vec<KernelStats>,
    /// Final contents of A.
    pub a: Vec<T>,
    /// Final contents of B.
    pub b: Vec<T>,
    /// Final contents of C.
    pub c: Vec<T>,
    /// Result of the last dot call, if dot was timed.
    pub dot: Option<T>,
}

impl<T: StreamScalar> BenchReport<T> {
    /// Statistics of `kernel`, if it was timed.
    pub fn stats_for(&self, kernel: Kernel) -> Option<&KernelStats> {
        self.stats.iter().find(|s| s.kernel == kernel)
    }

    /// Bytes used by one array.
    pub fn array_bytes(&self) -> u64 {
        self.array_size as u64 * T::size_bytes() as u64
    }
}

/// Run the benchmark described by `config` on `stream`.
pub fn run_benchmark<T: StreamScalar>(
    stream: &mut dyn Stream<T>,
    config: &BenchConfig,
) -> Result<BenchReport<T>> {
    run_benchmark_with(stream, config, |_| {})
}

/// Like [`run_benchmark`], calling `on_iteration` after each completed iteration.
pub fn run_benchmark_with<T, F>(
    stream: &mut dyn Stream<T>,
    config: &BenchConfig,
    mut on_iteration: F,
) -> Result<BenchReport<T>>
where
    T: StreamScalar,
    F: FnMut(usize),
{
    let array_size = stream.array_size();
    config.validate_for::<T>(array_size)?;

    let (a0, b0, c0) = config.init;
    stream.init_arrays(T::from_f64(a0), T::from_f64(b0), T::from_f64(c0))?;

    let kernels = config.mode.kernels();
    let mut timings = vec![Vec::with_capacity(config.num_times); kernels.len()];
    let mut dot = None;

    info!(
        "Running {} kernel(s) {} times on {} elements",
        kernels.len(),
        config.num_times,
        array_size
    );

    for iteration in 0..config.num_times {
        for (slot, &kernel) in kernels.iter().enumerate() {
            let start = Instant::now();
            let result = stream.run_kernel(kernel)?;
            timings[slot].push(start.elapsed().as_secs_f64());
            if result.is_some() {
                dot = result;
            }
        }
        on_iteration(iteration);
    }

    let mut a = vec![T::ZERO; array_size];
    let mut b = vec![T::ZERO; array_size];
    let mut c = vec![T::ZERO; array_size];
    stream.read_arrays(&mut a, &mut b, &mut c)?;

    let stats: Vec<KernelStats> = kernels
        .iter()
        .zip(&timings)
        .map(|(&kernel, times)| {
            KernelStats::from_timings(
                kernel,
                kernel.bytes_moved(array_size, T::size_bytes()),
                kernel.flops(array_size),
                times,
            )
        })
        .collect();

    for s in &stats {
        debug!(
            "{}: min={:.6}s max={:.6}s avg={:.6}s",
            s.kernel, s.min_secs, s.max_secs, s.avg_secs
        );
    }

    Ok(BenchReport {
        device: stream.device_info().clone(),
        precision: T::PRECISION,
        array_size,
        residency: stream.residency(),
        num_times: config.num_times,
        mode: config.mode,
        stats,
        a,
        b,
        c,
        dot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_skip_first_iteration() {
        let stats = KernelStats::from_timings(Kernel::Copy, 1_000_000, 0, &[10.0, 0.5, 0.25, 1.0]);
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.min_secs, 0.25);
        assert_eq!(stats.max_secs, 1.0);
        assert!((stats.avg_secs - 1.75 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_stats_single_iteration_kept() {
        let stats = KernelStats::from_timings(Kernel::Dot, 8, 2, &[0.5]);
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.min_secs, 0.5);
        assert_eq!(stats.avg_secs, 0.5);
    }

    #[test]
    fn test_bandwidth_units() {
        let stats = KernelStats::from_timings(Kernel::Copy, 2 << 20, 0, &[1.0, 0.5]);
        assert_eq!(stats.bandwidth(BandwidthUnit::Mebibytes), 4.0);
        assert!((stats.bandwidth(BandwidthUnit::Megabytes) - 4.194304).abs() < 1e-9);
    }

    #[test]
    fn test_mode_kernels() {
        assert_eq!(BenchMode::All.kernels().len(), 5);
        assert_eq!(BenchMode::TriadOnly.kernels(), &[Kernel::Triad]);
        assert_eq!(BenchMode::NstreamOnly.kernels(), &[Kernel::Nstream]);
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let config = BenchConfig {
            num_times: 0,
            ..BenchConfig::default()
        };
        assert!(matches!(config.validate(), Err(StreamError::InvalidConfig(_))));
    }

    #[test]
    fn test_overflowing_iterations_rejected() {
        let config = BenchConfig {
            num_times: 40,
            ..BenchConfig::default()
        };
        match config.validate_for::<f32>(4096) {
            Err(StreamError::InvalidConfig(msg)) => {
                assert!(msg.contains("at most 15"), "{}", msg);
                assert!(msg.contains("float"), "{}", msg);
            }
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
        assert!(config.validate_for::<f64>(4096).is_ok());

        let zero = BenchConfig {
            num_times: 0,
            ..config
        };
        assert!(zero.validate_for::<f64>(4096).is_err());
    }
}
