//! Result formatting.

use crate::orchestrator::{CompileReport, RunReport};
use crate::OutputFormat;
use anyhow::Result;
use std::io::Write;

/// Write a compiled program listing.
pub fn write_compile(report: &CompileReport, format: OutputFormat, out: &mut impl Write) -> Result<()> {
    match format {
        OutputFormat::Text => {
            writeln!(out, "Sequence: {}", report.sequence.kind())?;
            writeln!(out, "=================")?;
            writeln!(out, "{:>5} {:>12} {:>10}  {:<8} trigger", "#", "start", "cycles", "pins")?;
            for row in &report.instructions {
                writeln!(
                    out,
                    "{:>5} {:>12} {:>10}  {:<8} {}",
                    row.index,
                    row.start_cycle,
                    row.duration,
                    row.pins,
                    if row.trigger { "yes" } else { "" }
                )?;
            }
            writeln!(out)?;
            writeln!(out, "Total:   {} cycles ({:.3} ms)", report.total_cycles, report.duration_ms)?;
            writeln!(out, "Samples: {}", report.total_samples)?;
        }
        OutputFormat::Json => {
            writeln!(out, "{}", serde_json::to_string_pretty(report)?)?;
        }
        OutputFormat::Csv => {
            writeln!(out, "index,start_cycle,duration,pins,trigger")?;
            for row in &report.instructions {
                writeln!(
                    out,
                    "{},{},{},{},{}",
                    row.index, row.start_cycle, row.duration, row.pins, row.trigger
                )?;
            }
        }
    }
    Ok(())
}

/// Write measurement results. CSV output is the magnitude spectrum.
pub fn write_run(report: &RunReport, format: OutputFormat, out: &mut impl Write) -> Result<()> {
    match format {
        OutputFormat::Text => {
            writeln!(out, "Measurement: {}", report.sequence.kind())?;
            writeln!(out, "=================")?;
            writeln!(out, "Samples:     {} in {} segment(s)", report.samples, report.segments)?;
            writeln!(out, "Sample rate: {:.0} Hz", report.sample_rate_hz)?;
            writeln!(out, "Resolution:  {:.2} Hz/bin", report.spectrum.bin_width.0)?;

            match &report.peak {
                Some(peak) => {
                    writeln!(out, "Peak:        {:.2} Hz (bin {})", peak.frequency.0, peak.bin)?;
                    writeln!(out, "Magnitude:   {:.3}", peak.magnitude)?;
                }
                None => writeln!(out, "Peak:        none")?,
            }

            if let Some(fit) = &report.relaxation {
                writeln!(out)?;
                writeln!(out, "Relaxation:")?;
                writeln!(out, "  T2:       {:.3} ms", fit.t2.as_ms())?;
                writeln!(out, "  A0:       {:.3}", fit.a0)?;
                writeln!(out, "  Echoes:   {}", fit.echoes.len())?;
                writeln!(out, "  Residual: {:.5}", fit.residual)?;
                if !fit.converged {
                    writeln!(out, "  Warning:  fit did not converge")?;
                }
            }
            if let Some(err) = &report.relaxation_error {
                writeln!(out)?;
                writeln!(out, "Relaxation fit failed: {}", err)?;
            }
        }
        OutputFormat::Json => {
            writeln!(out, "{}", serde_json::to_string_pretty(report)?)?;
        }
        OutputFormat::Csv => {
            writeln!(out, "frequency_hz,magnitude")?;
            for bin in &report.spectrum.bins {
                writeln!(out, "{},{}", bin.frequency.0, bin.magnitude)?;
            }
        }
    }
    Ok(())
}
