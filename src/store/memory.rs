use std::{collections::HashMap, sync::Arc};

use anyhow::{Result, bail};
use tokio::sync::RwLock;

/// Worksheets held in process memory. Used for local runs without a
/// configured spreadsheet and as the backend for tests.
#[derive(Clone, Default)]
pub struct MemorySheetStore {
    sheets: Arc<RwLock<HashMap<String, Vec<Vec<String>>>>>,
}

impl MemorySheetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read_rows(&self, worksheet: &str) -> Result<Vec<Vec<String>>> {
        let guard = self.sheets.read().await;
        Ok(guard.get(worksheet).cloned().unwrap_or_default())
    }

    pub async fn append_row(&self, worksheet: &str, row: Vec<String>) -> Result<()> {
        let mut guard = self.sheets.write().await;
        guard.entry(worksheet.to_string()).or_default().push(row);
        Ok(())
    }

    pub async fn update_row(&self, worksheet: &str, row_number: usize, row: Vec<String>) -> Result<()> {
        let mut guard = self.sheets.write().await;
        let rows = guard.entry(worksheet.to_string()).or_default();
        if row_number == 0 {
            bail!("sheet rows are numbered from 1");
        }
        if rows.len() < row_number {
            rows.resize_with(row_number, Vec::new);
        }
        rows[row_number - 1] = row;
        Ok(())
    }
}
