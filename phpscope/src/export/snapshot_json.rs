use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use crate::aggregation::EngineSnapshot;
use crate::domain::{ExportError, Pid};

/// Run-level facts written alongside the aggregates
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExportMetadata {
    pub tool: &'static str,
    pub version: &'static str,
    /// Wall-clock run time in milliseconds
    pub duration_ms: u64,
    /// Target process, absent when tracing every process
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    /// Events the probes could not reserve ring buffer space for
    pub lost_events: u64,
}

impl ExportMetadata {
    #[must_use]
    pub fn new(duration: Duration, pid: Option<Pid>, lost_events: u64) -> Self {
        Self {
            tool: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            pid: pid.map(|p| p.0),
            lost_events,
        }
    }
}

/// Top-level JSON document
#[derive(Debug, Serialize)]
pub struct SnapshotDocument<'a> {
    pub metadata: ExportMetadata,
    #[serde(flatten)]
    pub snapshot: &'a EngineSnapshot,
}

/// JSON exporter for [`EngineSnapshot`]s
pub struct SnapshotExporter {
    metadata: ExportMetadata,
}

impl SnapshotExporter {
    #[must_use]
    pub fn new(metadata: ExportMetadata) -> Self {
        Self { metadata }
    }

    #[must_use]
    pub fn document<'a>(&self, snapshot: &'a EngineSnapshot) -> SnapshotDocument<'a> {
        SnapshotDocument { metadata: self.metadata.clone(), snapshot }
    }

    /// Serialize to any writer
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails
    pub fn write_to<W: Write>(&self, snapshot: &EngineSnapshot, mut writer: W) -> Result<(), ExportError> {
        serde_json::to_writer_pretty(&mut writer, &self.document(snapshot))?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Write to `path`, replacing any existing file
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written
    pub fn export_to_file(&self, snapshot: &EngineSnapshot, path: &Path) -> Result<(), ExportError> {
        let file = File::create(path)
            .map_err(|e| ExportError::WriteFailed(format!("{}: {e}", path.display())))?;
        self.write_to(snapshot, BufWriter::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{Aggregates, Dispatcher, Event, KeyNormalizer, PathKey};
    use std::sync::Arc;

    #[test]
    fn test_document_has_metadata_and_tables() {
        let dispatcher = Dispatcher::new(Arc::new(Aggregates::default()), KeyNormalizer::Directory);
        dispatcher.dispatch(&Event::FileCompile { path: PathKey::from_bytes(b"/srv/app/index.php") });

        let exporter =
            SnapshotExporter::new(ExportMetadata::new(Duration::from_millis(1500), Some(Pid(7)), 3));
        let mut out = Vec::new();
        exporter.write_to(&dispatcher.snapshot(), &mut out).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["metadata"]["tool"], "phpscope");
        assert_eq!(json["metadata"]["duration_ms"], 1500);
        assert_eq!(json["metadata"]["pid"], 7);
        assert_eq!(json["metadata"]["lost_events"], 3);
        assert_eq!(json["compiled_files"][0]["key"], "/srv/app/");
        assert_eq!(json["compiled_files"][0]["count"], 1);
    }

    #[test]
    fn test_pid_omitted_when_tracing_all() {
        let meta = ExportMetadata::new(Duration::ZERO, None, 0);
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("pid").is_none());
    }
}
