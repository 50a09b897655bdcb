//! Snapshot export
//!
//! Writes the final engine snapshot as pretty-printed JSON so runs can be
//! diffed or post-processed with `jq`.

pub mod snapshot_json;

pub use snapshot_json::{ExportMetadata, SnapshotDocument, SnapshotExporter};
