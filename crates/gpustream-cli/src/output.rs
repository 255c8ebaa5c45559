//! Result tables: aligned text, CSV and JSON.

use colored::Colorize;
use serde::Serialize;

use gpustream::bench::{BandwidthUnit, BenchReport, KernelStats};
use gpustream::validation::SolutionCheck;
use gpustream::{Backend, DeviceInfo, Precision, Residency, StreamScalar};

use crate::error::CliResult;

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned table for terminals.
    Text,
    /// Comma-separated values.
    Csv,
    /// One JSON document.
    Json,
}

impl OutputFormat {
    /// Whether banners and progress may be printed around the results.
    pub fn is_text(&self) -> bool {
        matches!(self, OutputFormat::Text)
    }
}

/// Array and total size lines printed before a text run.
pub fn print_sizes(array_size: usize, element_size: usize, unit: BandwidthUnit) {
    let array_bytes = array_size as f64 * element_size as f64;
    let (small, large, labels) = match unit {
        BandwidthUnit::Megabytes => (1.0e6, 1.0e9, ("MB", "GB")),
        BandwidthUnit::Mebibytes => ((1u64 << 20) as f64, (1u64 << 30) as f64, ("MiB", "GiB")),
    };
    println!(
        "Array size: {:.1} {} (={:.1} {})",
        array_bytes / small,
        labels.0,
        array_bytes / large,
        labels.1
    );
    println!(
        "Total size: {:.1} {} (={:.1} {})",
        3.0 * array_bytes / small,
        labels.0,
        3.0 * array_bytes / large,
        labels.1
    );
}

/// Print the timing table of `report`.
pub fn print_report<T: StreamScalar>(
    report: &BenchReport<T>,
    unit: BandwidthUnit,
    format: OutputFormat,
    backend: Backend,
    check: &SolutionCheck,
) -> CliResult<()> {
    match format {
        OutputFormat::Text => print_text(&report.stats, unit),
        OutputFormat::Csv => print_csv(report, unit),
        OutputFormat::Json => print_json(report, unit, backend, check)?,
    }
    Ok(())
}

fn print_text(stats: &[KernelStats], unit: BandwidthUnit) {
    println!(
        "{}",
        format!(
            "{:<12}{:<12}{:<12}{:<12}{:<12}",
            "Function",
            unit.label(),
            "Min (sec)",
            "Max",
            "Average"
        )
        .bold()
    );
    for s in stats {
        println!(
            "{:<12}{:<12.3}{:<12.5}{:<12.5}{:<12.5}",
            s.kernel.name(),
            s.bandwidth(unit),
            s.min_secs,
            s.max_secs,
            s.avg_secs
        );
    }
}

fn print_csv<T: StreamScalar>(report: &BenchReport<T>, unit: BandwidthUnit) {
    let column = match unit {
        BandwidthUnit::Megabytes => "max_mbytes_per_sec",
        BandwidthUnit::Mebibytes => "max_mibytes_per_sec",
    };
    println!(
        "function,num_times,n_elements,sizeof,{},min_runtime,max_runtime,avg_runtime",
        column
    );
    for s in &report.stats {
        println!(
            "{},{},{},{},{},{},{},{}",
            s.kernel.name(),
            report.num_times,
            report.array_size,
            T::size_bytes(),
            s.bandwidth(unit),
            s.min_secs,
            s.max_secs,
            s.avg_secs
        );
    }
}

#[derive(Serialize)]
struct JsonKernel<'a> {
    #[serde(flatten)]
    stats: &'a KernelStats,
    bandwidth: f64,
    gflops: f64,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    backend: Backend,
    device: &'a DeviceInfo,
    precision: Precision,
    residency: Residency,
    array_size: usize,
    num_times: usize,
    unit: BandwidthUnit,
    kernels: Vec<JsonKernel<'a>>,
    validation: &'a SolutionCheck,
}

fn print_json<T: StreamScalar>(
    report: &BenchReport<T>,
    unit: BandwidthUnit,
    backend: Backend,
    check: &SolutionCheck,
) -> CliResult<()> {
    let doc = JsonReport {
        backend,
        device: &report.device,
        precision: report.precision,
        residency: report.residency,
        array_size: report.array_size,
        num_times: report.num_times,
        unit,
        kernels: report
            .stats
            .iter()
            .map(|stats| JsonKernel {
                stats,
                bandwidth: stats.bandwidth(unit),
                gflops: stats.gflops(),
            })
            .collect(),
        validation: check,
    };
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

/// Device listing for `--list`.
pub fn print_devices(devices: &[DeviceInfo]) {
    if devices.is_empty() {
        println!("{}", "No devices found.".yellow());
        return;
    }
    println!("Devices:");
    println!();
    for device in devices {
        println!(
            "{}: {} {}",
            device.index,
            device.name.bright_white(),
            format!(
                "({} compute units, {:.1} GiB)",
                device.compute_units,
                device.total_memory as f64 / (1u64 << 30) as f64
            )
            .dimmed()
        );
    }
    println!();
}
