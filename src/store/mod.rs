//! Snapshot row store.
//!
//! Rows are keyed by `(snapshot_batch_id, cell)`; inserting an existing key
//! overwrites it, so re-running a snapshot with a deterministic batch id is
//! idempotent.

pub mod memory;
pub mod postgrest;

use crate::color::Color;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::InMemorySnapshotStore;
pub use postgrest::{PostgrestClient, PostgrestSnapshotStore};

pub const SNAPSHOT_TABLE: &str = "cell_color_snapshots";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub snapshot_batch_id: String,
    pub spreadsheet_id: String,
    pub gid: Option<i64>,
    pub cell: String,
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    /// Always serialized: bulk inserts need every object to carry the same keys.
    #[serde(default)]
    pub sheet_url: Option<String>,
}

impl SnapshotRow {
    pub fn color(&self) -> Color {
        Color {
            red: self.red,
            green: self.green,
            blue: self.blue,
        }
    }
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Upsert on `(snapshot_batch_id, cell)`.
    async fn insert_snapshot_rows(&self, rows: &[SnapshotRow]) -> Result<()>;

    /// All rows of a batch, optionally narrowed to `cells`. Cells in the
    /// filter that the batch does not hold are simply absent from the result.
    async fn fetch_snapshot_rows(
        &self,
        batch_id: &str,
        cells: Option<&[String]>,
    ) -> Result<Vec<SnapshotRow>>;
}

/// Stable id for a snapshot of one range, so repeated snapshots of the same
/// range land on the same rows. A missing gid is keyed as `None`.
pub fn deterministic_batch_id(spreadsheet_id: &str, gid: Option<i64>, range: &str) -> String {
    let gid = gid.map_or_else(|| "None".to_string(), |g| g.to_string());
    let name = format!("{spreadsheet_id}:{gid}:{range}");
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

pub fn random_batch_id() -> String {
    Uuid::new_v4().to_string()
}
