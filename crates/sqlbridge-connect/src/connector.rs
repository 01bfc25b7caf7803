//! Session lifecycle and request dispatch
//!
//! The [`Connector`] owns the platform session, the current database
//! session and at most one scheduled task, and moves between
//! [`ConnectorState`]s as lifecycle events arrive:
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Connected ──▶ Reconfiguring ──▶ Connected
//!       ▲                             │                │
//!       └──────── Close event ────────┘                └──▶ Disconnected (rejected)
//!
//! Reconnect failure / shutdown ──▶ Closed
//! ```
//!
//! Lifecycle events are handled in arrival order on the run loop. Query and
//! publish requests are spawned so a slow statement never holds up the
//! loop.

use parking_lot::Mutex;
use sqlbridge_rdbc::connection::ConnectionFactory;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bundler::{bundle, effective_bundle_size, ReplyStatus};
use crate::config::{BridgeConfig, DatabaseSettings, ScheduleSpec, SourceConfig};
use crate::document::Record;
use crate::error::{ConnectorError, Result};
use crate::mapper::RuntimeValueMapper;
use crate::platform::{
    ErrorReply, InboundEvent, PlatformSession, PublishCommand, PublishRequest, QueryCommand,
    QueryReply, QueryRequest,
};
use crate::retry::RetryPolicy;
use crate::scheduler::{BulkLoader, PollingJob, ScheduledTask};
use crate::session::{DatabaseSession, SessionSlot};

/// Lifecycle state of the connector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// No platform session
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Platform session established
    Connected,
    /// Applying a new source configuration
    Reconfiguring,
    /// Shut down; terminal
    Closed,
}

/// Timing settings for the connector
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    /// Handshake timeout per attempt
    pub connect_timeout: Duration,
    /// Timeout for a platform-requested reconnect
    pub reconnect_timeout: Duration,
    /// Connect loop policy
    pub retry: RetryPolicy,
    /// Pool settings for every database session
    pub database: DatabaseSettings,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            database: DatabaseSettings::default(),
        }
    }
}

impl From<&BridgeConfig> for ConnectorSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            connect_timeout: config.platform.connect_timeout(),
            reconnect_timeout: config.platform.reconnect_timeout(),
            retry: config.platform.retry_policy(),
            database: config.database.clone(),
        }
    }
}

/// The bridge engine
pub struct Connector {
    platform: Arc<dyn PlatformSession>,
    factory: Arc<dyn ConnectionFactory>,
    settings: ConnectorSettings,
    sessions: Arc<SessionSlot>,
    task: Mutex<Option<ScheduledTask>>,
    state: Mutex<ConnectorState>,
    shutdown: CancellationToken,
}

impl Connector {
    /// Create a connector; nothing connects until [`run`](Self::run) or
    /// [`connect`](Self::connect)
    pub fn new(
        platform: Arc<dyn PlatformSession>,
        factory: Arc<dyn ConnectionFactory>,
        settings: ConnectorSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            platform,
            factory,
            settings,
            sessions: Arc::new(SessionSlot::new()),
            task: Mutex::new(None),
            state: Mutex::new(ConnectorState::Disconnected),
            shutdown: CancellationToken::new(),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectorState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectorState) {
        let mut current = self.state.lock();
        if *current != ConnectorState::Closed {
            debug!(from = ?*current, to = ?state, "Connector state change");
            *current = state;
        }
    }

    /// The guarded current database session
    pub fn sessions(&self) -> &Arc<SessionSlot> {
        &self.sessions
    }

    /// Name of the running scheduled task, if any
    pub fn active_task(&self) -> Option<&'static str> {
        self.task
            .lock()
            .as_ref()
            .filter(|t| !t.is_cancelled())
            .map(ScheduledTask::name)
    }

    /// Token cancelled when the connector shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn cancel_task(&self) {
        if let Some(task) = self.task.lock().take() {
            debug!(task = task.name(), "Cancelling scheduled task");
            task.cancel();
        }
    }

    fn log_connect_failure(&self, timed_out: bool, timeout: Duration) {
        if !self.platform.is_open() {
            error!("Failed to connect: platform session is not open");
        } else if !self.platform.is_authed() {
            error!(
                timeout_secs = timeout.as_secs(),
                "Failed to authenticate with the platform"
            );
        } else if timed_out {
            error!(timeout_secs = timeout.as_secs(), "Failed to connect within timeout");
        } else {
            error!("Source registration was refused");
        }
    }

    async fn attempt(&self, reconnect: bool, timeout: Duration) -> Result<()> {
        let handshake = async {
            if reconnect {
                self.platform.reconnect().await
            } else {
                self.platform.connect().await
            }
        };
        match tokio::time::timeout(timeout, handshake).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(error = %e, "Platform handshake failed");
                self.log_connect_failure(false, timeout);
                Err(ConnectorError::ConnectionLifecycle(e.to_string()))
            }
            Err(_) => {
                self.log_connect_failure(true, timeout);
                Err(ConnectorError::ConnectionLifecycle(format!(
                    "handshake timed out after {}s",
                    timeout.as_secs()
                )))
            }
        }
    }

    /// Connect to the platform, retrying per the retry policy
    ///
    /// Returns once connected, when the retry policy gives up, or when the
    /// connector shuts down.
    pub async fn connect(&self) -> Result<()> {
        self.set_state(ConnectorState::Connecting);
        let policy = self.settings.retry;
        let mut attempts = 0u32;

        loop {
            if self.shutdown.is_cancelled() {
                return Err(ConnectorError::ConnectionLifecycle("shutting down".into()));
            }

            attempts += 1;
            info!(attempt = attempts, "Connecting to platform");
            match self.attempt(false, self.settings.connect_timeout).await {
                Ok(()) => {
                    info!(attempts, "Connected to platform");
                    self.set_state(ConnectorState::Connected);
                    return Ok(());
                }
                Err(e) if !policy.should_retry(attempts) => {
                    self.set_state(ConnectorState::Disconnected);
                    return Err(ConnectorError::ConnectionLifecycle(format!(
                        "giving up after {attempts} attempts: {e}"
                    )));
                }
                Err(_) => {}
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => {}
                _ = tokio::time::sleep(policy.interval()) => {}
            }
        }
    }

    /// Apply a source configuration document
    ///
    /// A rejected document tears everything down: the scheduled task is
    /// cancelled, the database session closed and the platform session
    /// closed so the platform re-delivers configuration on reconnect.
    pub async fn configure(&self, document: &serde_json::Value) -> Result<()> {
        self.set_state(ConnectorState::Reconfiguring);
        self.cancel_task();

        let source = match SourceConfig::from_document(document) {
            Ok(source) => source,
            Err(e) => {
                error!(error = %e, "Configuration rejected");
                self.teardown().await;
                return Err(e);
            }
        };

        if let Some(previous) = self.sessions.take() {
            previous.close_in_background();
        }

        let session =
            match DatabaseSession::open(&source, &self.settings.database, self.factory.clone())
                .await
            {
                Ok(session) => session,
                Err(e) => {
                    error!(error = %e, "Failed to open database session");
                    self.teardown().await;
                    return Err(e);
                }
            };

        if let Some(stale) = self.sessions.replace(session) {
            stale.close_in_background();
        }

        let task = source.schedule().map(|spec| self.start_task(spec));
        if let Some(task) = task {
            info!(task = task.name(), "Scheduled task started");
            if let Some(old) = self.task.lock().replace(task) {
                old.cancel();
            }
        }

        self.set_state(ConnectorState::Connected);
        info!("Source configured");
        Ok(())
    }

    fn start_task(&self, spec: ScheduleSpec) -> ScheduledTask {
        match spec {
            ScheduleSpec::Poll { query, interval } => ScheduledTask::start(
                PollingJob::new(query, self.sessions.clone(), self.platform.clone()),
                interval,
            ),
            ScheduleSpec::Load {
                table,
                interval,
                page_size,
                camel_case,
            } => ScheduledTask::start(
                BulkLoader::new(
                    table,
                    page_size,
                    RuntimeValueMapper::new(camel_case),
                    self.sessions.clone(),
                    self.platform.clone(),
                ),
                interval,
            ),
        }
    }

    async fn teardown(&self) {
        self.cancel_task();
        if let Some(session) = self.sessions.take() {
            session.close().await;
        }
        if let Err(e) = self.platform.close().await {
            warn!(error = %e, "Error closing platform session");
        }
        self.set_state(ConnectorState::Disconnected);
    }

    /// Handle a platform-initiated close: reconnect with the same settings
    pub async fn on_close(&self) -> Result<()> {
        info!("Platform session closed, reconnecting");
        self.cancel_task();
        self.set_state(ConnectorState::Disconnected);
        self.connect().await
    }

    /// Handle a platform reconnect request; failure shuts the connector down
    pub async fn on_reconnect(&self) -> Result<()> {
        info!("Reconnect requested");
        self.cancel_task();
        match self.attempt(true, self.settings.reconnect_timeout).await {
            Ok(()) => {
                self.set_state(ConnectorState::Connected);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Reconnect failed, shutting down");
                self.shutdown().await;
                Err(e)
            }
        }
    }

    /// Close everything; calling it again does nothing
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if *state == ConnectorState::Closed {
                return;
            }
            *state = ConnectorState::Closed;
        }
        info!("Shutting down connector");
        self.shutdown.cancel();

        if let Some(session) = self.sessions.take() {
            session.close().await;
        }
        self.cancel_task();
        if let Err(e) = self.platform.close().await {
            warn!(error = %e, "Error closing platform session");
        }
    }

    async fn run_query(&self, request: &QueryRequest) -> Result<()> {
        let session = self.sessions.snapshot().ok_or(ConnectorError::SessionClosed)?;

        match QueryCommand::parse(&request.body)? {
            QueryCommand::Insert { table, data } => {
                let affected = session.executor().execute_insert(&table, &data).await?;
                self.platform
                    .send_reply(QueryReply {
                        reply_to: request.reply_to.clone(),
                        status: ReplyStatus::Complete,
                        body: serde_json::json!({ "rowsAffected": affected }),
                    })
                    .await
            }
            QueryCommand::Select { sql, bundle_size } => {
                let rows = session.executor().execute_query(&sql).await?;
                let rows = rows
                    .into_iter()
                    .map(|doc| Record::Document(doc).to_json())
                    .collect();
                for chunk in bundle(rows, effective_bundle_size(bundle_size)) {
                    self.platform
                        .send_reply(QueryReply {
                            reply_to: request.reply_to.clone(),
                            status: chunk.status,
                            body: chunk.body,
                        })
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// Answer a query request with replies or one error reply
    pub async fn handle_query(&self, request: QueryRequest) {
        if let Err(e) = self.run_query(&request).await {
            error!(error = %e, code = e.code(), "Query failed");
            debug!(request = %request.body, "Failed query request");
            let reply = ErrorReply::from_error(request.reply_to.clone(), &e, &request.body);
            if let Err(send_err) = self.platform.send_error(reply).await {
                error!(error = %send_err, "Failed to send query error");
            }
        }
    }

    async fn run_publish(&self, request: &PublishRequest) -> Result<serde_json::Value> {
        let session = self.sessions.snapshot().ok_or(ConnectorError::SessionClosed)?;
        let executor = session.executor();

        let affected = match PublishCommand::parse(&request.body)? {
            PublishCommand::Insert { table, data } => {
                serde_json::json!(executor.execute_insert(&table, &data).await?)
            }
            PublishCommand::Update(sql) => serde_json::json!(executor.execute_publish(&sql).await?),
            PublishCommand::Batch(statements) => {
                serde_json::json!(executor.execute_batch(&statements).await?)
            }
        };
        Ok(serde_json::json!({ "rowsAffected": affected }))
    }

    /// Execute a publish request, replying when it carries a reply address
    pub async fn handle_publish(&self, request: PublishRequest) {
        let outcome = self.run_publish(&request).await;

        let Some(reply_to) = request.reply_to.clone() else {
            match outcome {
                Ok(result) => debug!(%result, "Publish executed"),
                Err(e) => {
                    error!(error = %e, code = e.code(), "Publish failed");
                    debug!(request = %request.body, "Failed publish request");
                }
            }
            return;
        };

        let sent = match outcome {
            Ok(body) => {
                self.platform
                    .send_reply(QueryReply {
                        reply_to,
                        status: ReplyStatus::Complete,
                        body,
                    })
                    .await
            }
            Err(e) => {
                error!(error = %e, code = e.code(), "Publish failed");
                self.platform
                    .send_error(ErrorReply::from_error(reply_to, &e, &request.body))
                    .await
            }
        };
        if let Err(e) = sent {
            error!(error = %e, "Failed to send publish reply");
        }
    }

    /// Handle one inbound event
    ///
    /// Queries and publishes run on their own tasks; lifecycle events
    /// complete before this returns.
    pub async fn handle_event(self: &Arc<Self>, event: InboundEvent) {
        match event {
            InboundEvent::Configure(document) => {
                let _ = self.configure(&document).await;
            }
            InboundEvent::Query(request) => {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.handle_query(request).await });
            }
            InboundEvent::Publish(request) => {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.handle_publish(request).await });
            }
            InboundEvent::Reconnect => {
                let _ = self.on_reconnect().await;
            }
            InboundEvent::Close => {
                if let Err(e) = self.on_close().await {
                    error!(error = %e, "Could not reconnect after close, shutting down");
                    self.shutdown().await;
                }
            }
        }
    }

    /// Connect, then process events until shutdown or the event stream ends
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<InboundEvent>) -> Result<()> {
        if let Err(e) = self.connect().await {
            self.shutdown().await;
            return Err(e);
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        info!("Platform event stream ended");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }
}
