use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

use super::Job;
use crate::document::Record;
use crate::platform::PlatformSession;
use crate::session::SessionSlot;

/// Runs a fixed query and pushes every row as a notification
pub struct PollingJob {
    query: String,
    sessions: Arc<SessionSlot>,
    platform: Arc<dyn PlatformSession>,
}

impl PollingJob {
    pub fn new(
        query: impl Into<String>,
        sessions: Arc<SessionSlot>,
        platform: Arc<dyn PlatformSession>,
    ) -> Self {
        Self {
            query: query.into(),
            sessions,
            platform,
        }
    }
}

#[async_trait]
impl Job for PollingJob {
    fn name(&self) -> &'static str {
        "poll"
    }

    async fn fire(&mut self) {
        // Skipped while a reconfiguration has no session installed.
        let Some(session) = self.sessions.snapshot() else {
            debug!("No database session, skipping poll");
            return;
        };

        let rows = match session.executor().execute_query(&self.query).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, query = %self.query, "Polling query failed");
                return;
            }
        };

        for row in rows {
            if let Err(e) = self.platform.notify(Record::Document(row).to_json()).await {
                error!(error = %e, "Failed to send poll notification");
            }
        }
    }
}
