//! CSV export of a connection's samples

use super::{csv_header, Progress};
use crate::connection::ConnectionCore;
use crate::error::{Result, ResultExt};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Rows fetched from the store per batch
const EXPORT_BATCH: usize = 8192;

/// Write every sample in `[0, sample_count)` to `path`.
///
/// The sample count is read once at the start, so a connection that is
/// still acquiring exports a consistent prefix.
pub fn export_csv(core: &ConnectionCore, path: &Path, progress: &Progress) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let store = core.store();
    let count = store.sample_count();
    let columns = store.column_count();

    let header = csv_header(core.layout(), core.sample_rate());
    writeln!(writer, "{}", header)?;
    progress.add(header.len() as u64 + 1);

    let mut values: Vec<Vec<f64>> = vec![Vec::with_capacity(EXPORT_BATCH); columns];
    let mut row = String::new();
    let mut first = 0;
    while first < count {
        let last = (first + EXPORT_BATCH).min(count) - 1;
        let timestamps = store.timestamps(first, last);
        for (column, buf) in values.iter_mut().enumerate() {
            buf.clear();
            store.samples_into(column, first, last, buf);
        }
        for (i, ts) in timestamps.iter().enumerate() {
            use std::fmt::Write as FmtWrite;
            row.clear();
            let _ = write!(row, "{},{}", first + i, ts);
            for buf in &values {
                let _ = write!(row, ",{}", buf[i]);
            }
            row.push('\n');
            writer.write_all(row.as_bytes())?;
            progress.add(row.len() as u64);
        }
        first = last + 1;
    }
    writer.flush()?;
    tracing::info!(
        "[{}] Exported {} samples to {}",
        core.name(),
        count,
        path.display()
    );
    Ok(())
}
