//! CSV export for per-tick summaries.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::sim::types::TickSummary;

/// Column header for CSV telemetry export.
const HEADER: &str = "tick,mode,production_kw,consumption_kw,net_kw,planned_net_kw,\
                       discharge_kw,charge_kw,import_kw,export_kw,unmet_kw,wasted_kw,\
                       negotiations,soc_kwh,queue_len,replanned";

/// Exports tick summaries to a CSV file at the given path.
///
/// Writes a header row followed by one data row per tick. Produces
/// deterministic output for identical inputs.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(summaries: &[TickSummary], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(summaries, buf)
}

/// Writes tick summaries as CSV to any writer.
///
/// A tick without a consumed plan slice leaves `planned_net_kw` empty.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(summaries: &[TickSummary], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(HEADER.split(',').map(str::trim))?;

    for s in summaries {
        wtr.write_record(&[
            s.tick.to_string(),
            s.mode.as_str().to_string(),
            format!("{:.4}", s.production_kw),
            format!("{:.4}", s.consumption_kw),
            format!("{:.4}", s.net_kw),
            s.planned_net_kw.map(|v| format!("{v:.4}")).unwrap_or_default(),
            format!("{:.4}", s.discharge_kw),
            format!("{:.4}", s.charge_kw),
            format!("{:.4}", s.import_kw),
            format!("{:.4}", s.export_kw),
            format!("{:.4}", s.unmet_kw),
            format!("{:.4}", s.wasted_kw),
            s.negotiations.to_string(),
            format!("{:.4}", s.soc_kwh),
            s.queue_len.to_string(),
            s.replanned.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
