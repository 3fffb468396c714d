use super::{SnapshotRow, SnapshotStore};
use crate::error::{ManglerError, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;

/// Process-local snapshot store with the same upsert semantics as the
/// PostgREST table. Used for tests and for running without a row store.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    rows: RwLock<IndexMap<(String, String), SnapshotRow>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    pub fn batch_len(&self, batch_id: &str) -> usize {
        self.rows
            .read()
            .keys()
            .filter(|(batch, _)| batch == batch_id)
            .count()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn insert_snapshot_rows(&self, rows: &[SnapshotRow]) -> Result<()> {
        if rows.is_empty() {
            return Err(ManglerError::invalid_input("no rows to persist"));
        }
        let mut table = self.rows.write();
        for row in rows {
            table.insert(
                (row.snapshot_batch_id.clone(), row.cell.clone()),
                row.clone(),
            );
        }
        Ok(())
    }

    async fn fetch_snapshot_rows(
        &self,
        batch_id: &str,
        cells: Option<&[String]>,
    ) -> Result<Vec<SnapshotRow>> {
        let table = self.rows.read();
        Ok(table
            .values()
            .filter(|row| row.snapshot_batch_id == batch_id)
            .filter(|row| cells.is_none_or(|wanted| wanted.contains(&row.cell)))
            .cloned()
            .collect())
    }
}
