//! gpustream CLI - sustained memory bandwidth of an accelerator.
//!
//! Times copy, mul, add, triad and dot (or triad / nstream alone) over three
//! device arrays and prints achieved bandwidth per kernel.
//!
//! # Examples
//!
//! ```bash
//! # List devices of the auto-selected backend
//! gpustream --list
//!
//! # Single precision, managed memory, 2^26 elements
//! gpustream --float --residency managed -s 67108864
//!
//! # Triad only, CSV output
//! gpustream --triad-only -n 100 --csv
//! ```

use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

mod error;
mod output;

use error::{CliError, CliResult};
use gpustream::prelude::*;
use output::OutputFormat;

/// gpustream - accelerator memory bandwidth benchmark
#[derive(Parser, Debug)]
#[command(name = "gpustream")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// List available devices and exit
    #[arg(long)]
    list: bool,

    /// Select device at index
    #[arg(long, default_value_t = 0)]
    device: usize,

    /// Number of elements per array
    #[arg(short = 's', long = "arraysize", default_value_t = DEFAULT_ARRAY_SIZE)]
    array_size: usize,

    /// Run the test this many times (at least 2)
    #[arg(short = 'n', long = "numtimes", default_value_t = 10,
          value_parser = clap::value_parser!(u32).range(2..))]
    num_times: u32,

    /// Use single precision floats
    #[arg(long)]
    float: bool,

    /// Only run triad
    #[arg(long, conflicts_with = "nstream_only")]
    triad_only: bool,

    /// Only run nstream
    #[arg(long)]
    nstream_only: bool,

    /// Array residency: device, managed or pagefault
    #[arg(long, default_value = "device")]
    residency: Residency,

    /// Backend: cpu, cuda or auto
    #[arg(long, default_value = "auto")]
    backend: Backend,

    /// Output results as CSV
    #[arg(long, conflicts_with = "json")]
    csv: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Use MiB/s (2^20 bytes) instead of MB/s
    #[arg(long)]
    mibibytes: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors and results
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn format(&self) -> OutputFormat {
        if self.csv {
            OutputFormat::Csv
        } else if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }

    fn unit(&self) -> BandwidthUnit {
        if self.mibibytes {
            BandwidthUnit::Mebibytes
        } else {
            BandwidthUnit::Megabytes
        }
    }

    fn bench_config(&self) -> BenchConfig {
        let mode = if self.triad_only {
            BenchMode::TriadOnly
        } else if self.nstream_only {
            BenchMode::NstreamOnly
        } else {
            BenchMode::All
        };
        BenchConfig {
            num_times: self.num_times as usize,
            mode,
            ..BenchConfig::default()
        }
    }
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn print_banner(cli: &Cli, backend: Backend) {
    println!(
        "{} {}",
        "gpustream".bright_cyan().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("Implementation: {}", backend.as_str().to_uppercase());
    println!("Running kernels {} times", cli.num_times);
    println!(
        "Precision: {}",
        if cli.float { "float" } else { "double" }
    );
}

fn list(backend: Backend) -> CliResult<()> {
    let devices = gpustream::list_devices(backend)?;
    output::print_devices(&devices);
    Ok(())
}

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} iterations")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░  "),
    );
    pb
}

fn run<T: DeviceScalar>(cli: &Cli, backend: Backend) -> CliResult<()> {
    let format = cli.format();
    let config = cli.bench_config();
    config.validate_for::<T>(cli.array_size)?;

    if format.is_text() && !cli.quiet {
        output::print_sizes(cli.array_size, T::size_bytes(), cli.unit());
    }

    let mut stream = StreamBuilder::new()
        .backend(backend)
        .array_size(cli.array_size)
        .device(cli.device)
        .residency(cli.residency)
        .build::<T>()?;

    let pb = progress_bar(config.num_times, format.is_text() && !cli.quiet);
    let report = run_benchmark_with(stream.as_mut(), &config, |_| pb.inc(1))?;
    pb.finish_and_clear();

    let check = check_solution(&report, &config);
    output::print_report(&report, cli.unit(), format, backend, &check)?;

    let failures = check.failures();
    if failures.is_empty() {
        Ok(())
    } else {
        for failure in &failures {
            eprintln!("{}", failure.yellow());
        }
        Err(CliError::Validation(format!(
            "{} check(s) outside tolerance",
            failures.len()
        )))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let backend = cli.backend.resolve();

    let result = if cli.list {
        list(backend)
    } else {
        if cli.format().is_text() && !cli.quiet {
            print_banner(&cli, backend);
        }
        if cli.float {
            run::<f32>(&cli, backend)
        } else {
            run::<f64>(&cli, backend)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["gpustream"]).unwrap();
        assert_eq!(cli.array_size, 33_554_432);
        assert_eq!(cli.num_times, 10);
        assert_eq!(cli.residency, Residency::DeviceOnly);
        assert_eq!(cli.backend, Backend::Auto);
        assert_eq!(cli.format(), OutputFormat::Text);
        assert_eq!(cli.bench_config().mode, BenchMode::All);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "gpustream",
            "--float",
            "-s",
            "1024",
            "-n",
            "3",
            "--residency",
            "managed",
            "--backend",
            "cpu",
            "--triad-only",
            "--csv",
            "--mibibytes",
        ])
        .unwrap();
        assert!(cli.float);
        assert_eq!(cli.array_size, 1024);
        assert_eq!(cli.residency, Residency::Managed);
        assert_eq!(cli.backend, Backend::Cpu);
        assert_eq!(cli.format(), OutputFormat::Csv);
        assert_eq!(cli.unit(), BandwidthUnit::Mebibytes);
        let config = cli.bench_config();
        assert_eq!(config.num_times, 3);
        assert_eq!(config.mode, BenchMode::TriadOnly);
    }

    #[test]
    fn test_rejects_single_iteration() {
        assert!(Cli::try_parse_from(["gpustream", "-n", "1"]).is_err());
    }

    #[test]
    fn test_float_iterations_bounded_by_overflow() {
        let cli = Cli::try_parse_from(["gpustream", "--float", "-n", "40"]).unwrap();
        let err = cli
            .bench_config()
            .validate_for::<f32>(cli.array_size)
            .unwrap_err();
        assert!(matches!(err, StreamError::InvalidConfig(_)));

        let cli = Cli::try_parse_from(["gpustream", "--float"]).unwrap();
        assert!(cli.bench_config().validate_for::<f32>(cli.array_size).is_ok());
        let cli = Cli::try_parse_from(["gpustream", "-n", "40"]).unwrap();
        assert!(cli.bench_config().validate_for::<f64>(cli.array_size).is_ok());
    }

    #[test]
    fn test_rejects_unknown_residency() {
        assert!(Cli::try_parse_from(["gpustream", "--residency", "texture"]).is_err());
    }

    #[test]
    fn test_conflicting_modes() {
        assert!(Cli::try_parse_from(["gpustream", "--triad-only", "--nstream-only"]).is_err());
        assert!(Cli::try_parse_from(["gpustream", "--csv", "--json"]).is_err());
    }

    #[test]
    fn test_small_cpu_run() {
        let cli = Cli::try_parse_from([
            "gpustream", "--backend", "cpu", "-s", "4096", "-n", "2", "--json", "-q",
        ])
        .unwrap();
        assert!(run::<f64>(&cli, Backend::Cpu).is_ok());
    }
}
