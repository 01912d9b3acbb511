use std::fmt::Display;
use std::io::Write;
use std::path::Path;

use bibstack_core::{CacheRecord, CacheStats, Partition, RecordKind};
use owo_colors::OwoColorize;
use serde::Serialize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Print row counts for every table.
pub fn print_stats(
    w: &mut dyn Write,
    path: &Path,
    stats: &CacheStats,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{} {}", "Cache:".bold(), path.display())?;
    } else {
        writeln!(w, "Cache: {}", path.display())?;
    }
    for kind in RecordKind::ALL {
        writeln!(w, "  {:<12} {:>8}", kind.table(), stats.get(kind))?;
    }
    writeln!(w, "  {:<12} {:>8}", "total", stats.total())?;
    Ok(())
}

/// Print the cached records (one JSON object per line) and the keys still
/// to be searched.
pub fn print_partition<R>(
    w: &mut dyn Write,
    partition: &Partition<R>,
    color: ColorMode,
) -> std::io::Result<()>
where
    R: CacheRecord + Serialize,
    R::Key: Display,
{
    for record in &partition.incache {
        let json = serde_json::to_string(record).map_err(std::io::Error::other)?;
        if color.enabled() {
            writeln!(w, "{} {}", "CACHED".green(), json)?;
        } else {
            writeln!(w, "CACHED {}", json)?;
        }
    }
    for key in &partition.tosearch {
        if color.enabled() {
            writeln!(w, "{} {}", "SEARCH".yellow(), key)?;
        } else {
            writeln!(w, "SEARCH {}", key)?;
        }
    }

    let summary = format!(
        "{} cached, {} to search",
        partition.incache.len(),
        partition.tosearch.len()
    );
    if color.enabled() {
        writeln!(w, "{}", summary.dimmed())?;
    } else {
        writeln!(w, "{}", summary)?;
    }
    Ok(())
}

/// Print how many rows an import added.
pub fn print_import_summary(
    w: &mut dyn Write,
    kind: RecordKind,
    read: usize,
    written: usize,
    color: ColorMode,
) -> std::io::Result<()> {
    let skipped = read - written;
    writeln!(w, "Imported {} of {} {} records", written, read, kind)?;
    if skipped > 0 {
        let note = format!("({} already cached, left unchanged)", skipped);
        if color.enabled() {
            writeln!(w, "{}", note.dimmed())?;
        } else {
            writeln!(w, "{}", note)?;
        }
    }
    Ok(())
}

/// Print how many rows were removed.
pub fn print_invalidated(
    w: &mut dyn Write,
    kind: RecordKind,
    requested: usize,
    removed: usize,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() && removed > 0 {
        writeln!(
            w,
            "{} {} of {} {} keys",
            "Removed".red(),
            removed,
            requested,
            kind
        )
    } else {
        writeln!(w, "Removed {} of {} {} keys", removed, requested, kind)
    }
}
