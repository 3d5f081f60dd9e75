mod google;
mod memory;

pub use google::GoogleSheetsClient;
pub use memory::MemorySheetStore;

use anyhow::{Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

/// Backend behind the spreadsheet-backed record store.
#[derive(Clone)]
pub enum SheetStore {
    GoogleSheets(GoogleSheetsClient),
    Memory(MemorySheetStore),
}

impl SheetStore {
    pub fn backend_name(&self) -> &'static str {
        match self {
            SheetStore::GoogleSheets(_) => "google-sheets",
            SheetStore::Memory(_) => "memory",
        }
    }

    /// All rows of a worksheet, header included.
    pub async fn read_rows(&self, worksheet: &str) -> Result<Vec<Vec<String>>> {
        match self {
            SheetStore::GoogleSheets(client) => client.read_rows(worksheet).await,
            SheetStore::Memory(store) => store.read_rows(worksheet).await,
        }
    }

    pub async fn append_row(&self, worksheet: &str, row: Vec<String>) -> Result<()> {
        match self {
            SheetStore::GoogleSheets(client) => client.append_row(worksheet, row).await,
            SheetStore::Memory(store) => store.append_row(worksheet, row).await,
        }
    }

    /// Overwrites a 1-based sheet row.
    pub async fn update_row(&self, worksheet: &str, row_number: usize, row: Vec<String>) -> Result<()> {
        match self {
            SheetStore::GoogleSheets(client) => client.update_row(worksheet, row_number, row).await,
            SheetStore::Memory(store) => store.update_row(worksheet, row_number, row).await,
        }
    }

    /// Writes the header row into an empty worksheet. Existing headers are left alone.
    pub async fn ensure_header(&self, worksheet: &str, header: &[&str]) -> Result<()> {
        let rows = self.read_rows(worksheet).await?;
        let has_header = rows
            .first()
            .is_some_and(|row| row.iter().any(|cell| !cell.trim().is_empty()));
        if has_header {
            return Ok(());
        }

        let header_row = header.iter().map(|title| title.to_string()).collect();
        if rows.is_empty() {
            self.append_row(worksheet, header_row).await?;
        } else {
            self.update_row(worksheet, 1, header_row).await?;
        }
        info!(worksheet, "wrote worksheet header");
        Ok(())
    }
}

/// A record persisted as one spreadsheet row.
pub trait SheetRecord: Sized {
    const HEADER: &'static [&'static str];

    fn submission_id(&self) -> Uuid;
    fn to_row(&self) -> Vec<String>;
    fn from_row(row: &[String]) -> Result<Self>;
}

pub struct StoredRecord<R> {
    pub row_number: usize,
    pub record: R,
}

pub struct LoadedRecords<R> {
    pub records: Vec<StoredRecord<R>>,
    pub skipped: usize,
}

pub async fn append_record<R: SheetRecord>(store: &SheetStore, worksheet: &str, record: &R) -> Result<()> {
    store
        .append_row(worksheet, record.to_row())
        .await
        .with_context(|| format!("failed to append record {}", record.submission_id()))
}

/// Reads every data row below the header. Rows that do not parse are skipped
/// and counted so reviewers can see the sheet needs attention.
pub async fn read_records<R: SheetRecord>(store: &SheetStore, worksheet: &str) -> Result<LoadedRecords<R>> {
    let rows = store.read_rows(worksheet).await?;
    let mut records = Vec::new();
    let mut skipped = 0;

    for (idx, row) in rows.iter().enumerate().skip(1) {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        match R::from_row(row) {
            Ok(record) => records.push(StoredRecord {
                row_number: idx + 1,
                record,
            }),
            Err(err) => {
                warn!(worksheet, row = idx + 1, ?err, "skipping unreadable row");
                skipped += 1;
            }
        }
    }

    Ok(LoadedRecords { records, skipped })
}

/// Rewrites the row holding `submission_id` with the result of `edit`.
/// Returns the stored record, or `None` when no row carries that id.
pub async fn replace_record<R, F>(
    store: &SheetStore,
    worksheet: &str,
    submission_id: Uuid,
    edit: F,
) -> Result<Option<R>>
where
    R: SheetRecord,
    F: FnOnce(&R) -> R,
{
    let loaded = read_records::<R>(store, worksheet).await?;
    let Some(existing) = loaded
        .records
        .iter()
        .find(|stored| stored.record.submission_id() == submission_id)
    else {
        return Ok(None);
    };

    let updated = edit(&existing.record);
    store
        .update_row(worksheet, existing.row_number, updated.to_row())
        .await
        .with_context(|| format!("failed to update record {submission_id}"))?;
    Ok(Some(updated))
}
