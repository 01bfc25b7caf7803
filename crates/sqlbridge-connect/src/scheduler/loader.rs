use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

use super::Job;
use crate::mapper::RuntimeValueMapper;
use crate::platform::PlatformSession;
use crate::session::SessionSlot;

/// Page cursor of a bulk load
///
/// Starts at page 1 and only moves forward after a page that returned
/// rows. An empty page is retried on the next firing, so rows appended to
/// the tail are picked up. A table that shrinks below the cursor is never
/// detected; the loader keeps reading the same out-of-range page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderState {
    page: u64,
}

impl Default for LoaderState {
    fn default() -> Self {
        Self { page: 1 }
    }
}

impl LoaderState {
    /// Page read by the next firing
    pub fn page(&self) -> u64 {
        self.page
    }

    /// Record how many rows the last firing returned
    pub fn record(&mut self, rows: usize) {
        if rows > 0 {
            self.page += 1;
        }
    }
}

/// Exports a table page by page, one page per firing
pub struct BulkLoader {
    table: String,
    page_size: u64,
    mapper: RuntimeValueMapper,
    state: LoaderState,
    sessions: Arc<SessionSlot>,
    platform: Arc<dyn PlatformSession>,
}

impl BulkLoader {
    pub fn new(
        table: impl Into<String>,
        page_size: u64,
        mapper: RuntimeValueMapper,
        sessions: Arc<SessionSlot>,
        platform: Arc<dyn PlatformSession>,
    ) -> Self {
        Self {
            table: table.into(),
            page_size,
            mapper,
            state: LoaderState::default(),
            sessions,
            platform,
        }
    }

    /// Current cursor
    pub fn state(&self) -> LoaderState {
        self.state
    }
}

#[async_trait]
impl Job for BulkLoader {
    fn name(&self) -> &'static str {
        "bulk-load"
    }

    async fn fire(&mut self) {
        let Some(session) = self.sessions.snapshot() else {
            debug!(table = %self.table, "No database session, skipping bulk load");
            return;
        };

        let page = self.state.page();
        let records = match session
            .executor()
            .load_page(&self.table, page, self.page_size, &self.mapper)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, table = %self.table, page, "Bulk load failed");
                return;
            }
        };

        debug!(table = %self.table, page, rows = records.len(), "Bulk load page read");
        for record in &records {
            if let Err(e) = self.platform.notify(record.to_json()).await {
                error!(error = %e, "Failed to send bulk load notification");
            }
        }
        self.state.record(records.len());
    }
}
