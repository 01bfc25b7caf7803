//! JSON-lines TCP transport to the orchestration platform
//!
//! One JSON object per line, tagged by `op`:
//!
//! | op              | direction | payload                                   |
//! |-----------------|-----------|-------------------------------------------|
//! | `connect`       | out       | `token`, `source`                         |
//! | `connected`     | in        |                                           |
//! | `connectFailed` | in        | `reason`, `authed`                        |
//! | `configure`     | in        | `config`                                  |
//! | `query`         | in        | `replyTo`, `body`                         |
//! | `publish`       | in        | `replyTo` (optional), `body`              |
//! | `reconnect`     | in        |                                           |
//! | `close`         | in        |                                           |
//! | `queryResponse` | out       | `replyTo`, `status`, `body`               |
//! | `queryError`    | out       | `replyTo`, `code`, `message`, `request`   |
//! | `notification`  | out       | `body`                                    |
//!
//! An established stream ending is reported to the engine as
//! [`InboundEvent::Close`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bundler::ReplyStatus;
use crate::config::PlatformConfig;
use crate::error::{ConnectorError, Result};
use crate::platform::{ErrorReply, InboundEvent, PlatformSession, PublishRequest, QueryReply, QueryRequest};
use crate::types::SensitiveString;

/// One line on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Frame {
    Connect {
        token: String,
        source: String,
    },
    Connected,
    ConnectFailed {
        reason: String,
        #[serde(default)]
        authed: bool,
    },
    Configure {
        config: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    Query {
        reply_to: String,
        #[serde(default)]
        body: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    Publish {
        #[serde(default)]
        reply_to: Option<String>,
        #[serde(default)]
        body: serde_json::Value,
    },
    Reconnect,
    Close,
    #[serde(rename_all = "camelCase")]
    QueryResponse {
        reply_to: String,
        status: ReplyStatus,
        body: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    QueryError {
        reply_to: String,
        code: String,
        message: String,
        #[serde(default)]
        request: serde_json::Value,
    },
    Notification {
        body: serde_json::Value,
    },
}

impl Frame {
    /// The engine event for an inbound frame, `None` for handshake and
    /// outbound-only frames
    pub fn into_event(self) -> Option<InboundEvent> {
        match self {
            Self::Configure { config } => Some(InboundEvent::Configure(config)),
            Self::Query { reply_to, body } => {
                Some(InboundEvent::Query(QueryRequest { reply_to, body }))
            }
            Self::Publish { reply_to, body } => {
                Some(InboundEvent::Publish(PublishRequest { reply_to, body }))
            }
            Self::Reconnect => Some(InboundEvent::Reconnect),
            Self::Close => Some(InboundEvent::Close),
            _ => None,
        }
    }
}

type Handshake = oneshot::Sender<std::result::Result<(), (String, bool)>>;

struct Shared {
    events: mpsc::Sender<InboundEvent>,
    pending: parking_lot::Mutex<Option<Handshake>>,
    open: AtomicBool,
    authed: AtomicBool,
}

impl Shared {
    fn finish_handshake(&self, outcome: std::result::Result<(), (String, bool)>) {
        if let Some(tx) = self.pending.lock().take() {
            let _ = tx.send(outcome);
        }
    }

    async fn read_loop(self: Arc<Self>, reader: OwnedReadHalf) {
        let mut lines = BufReader::new(reader).lines();
        let mut established = false;
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Platform read failed");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let frame: Frame = match serde_json::from_str(&line) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed platform frame");
                    continue;
                }
            };

            match frame {
                Frame::Connected => {
                    established = true;
                    self.authed.store(true, Ordering::Release);
                    self.finish_handshake(Ok(()));
                }
                Frame::ConnectFailed { reason, authed } => {
                    self.authed.store(authed, Ordering::Release);
                    self.finish_handshake(Err((reason, authed)));
                }
                other => match other.into_event() {
                    Some(event) => {
                        if self.events.send(event).await.is_err() {
                            debug!("Event receiver dropped, stopping platform reader");
                            return;
                        }
                    }
                    None => warn!("Ignoring outbound-only frame from platform"),
                },
            }
        }

        self.open.store(false, Ordering::Release);
        self.authed.store(false, Ordering::Release);
        self.finish_handshake(Err(("platform closed the connection".into(), false)));

        // Only a connection that completed its handshake reports Close.
        if established {
            info!("Platform connection closed");
            let _ = self.events.send(InboundEvent::Close).await;
        } else {
            debug!("Unregistered platform connection closed");
        }
    }
}

/// [`PlatformSession`] over a TCP stream of JSON lines
pub struct TcpPlatform {
    addr: String,
    token: SensitiveString,
    source: String,
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl TcpPlatform {
    /// Create an unconnected transport and the receiver its events arrive on
    pub fn new(config: &PlatformConfig, capacity: usize) -> (Arc<Self>, mpsc::Receiver<InboundEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let platform = Arc::new(Self {
            addr: config.url.clone(),
            token: config.token.clone(),
            source: config.source.clone(),
            shared: Arc::new(Shared {
                events: tx,
                pending: parking_lot::Mutex::new(None),
                open: AtomicBool::new(false),
                authed: AtomicBool::new(false),
            }),
            writer: tokio::sync::Mutex::new(None),
            reader: parking_lot::Mutex::new(None),
        });
        (platform, rx)
    }

    async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let mut line = serde_json::to_string(frame)
            .map_err(|e| ConnectorError::Transport(format!("failed to encode frame: {e}")))?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        let stream = writer
            .as_mut()
            .ok_or_else(|| ConnectorError::Transport("not connected".into()))?;
        stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ConnectorError::Transport(e.to_string()))
    }

    async fn register(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        *self.shared.pending.lock() = Some(tx);

        self.send_frame(&Frame::Connect {
            token: self.token.expose_secret().to_string(),
            source: self.source.clone(),
        })
        .await?;

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err((reason, _))) => Err(ConnectorError::ConnectionLifecycle(reason)),
            Err(_) => Err(ConnectorError::ConnectionLifecycle(
                "handshake abandoned".into(),
            )),
        }
    }
}

#[async_trait]
impl PlatformSession for TcpPlatform {
    async fn connect(&self) -> Result<()> {
        if let Some(old) = self.reader.lock().take() {
            old.abort();
        }
        self.shared.authed.store(false, Ordering::Release);

        let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            self.shared.open.store(false, Ordering::Release);
            ConnectorError::ConnectionLifecycle(format!("cannot reach {}: {e}", self.addr))
        })?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        *self.writer.lock().await = Some(write_half);
        self.shared.open.store(true, Ordering::Release);
        let handle = tokio::spawn(self.shared.clone().read_loop(read_half));
        *self.reader.lock() = Some(handle);

        debug!(addr = %self.addr, source = %self.source, "Registering source");
        self.register().await
    }

    async fn reconnect(&self) -> Result<()> {
        if !self.is_open() {
            return self.connect().await;
        }
        self.register().await
    }

    async fn send_reply(&self, reply: QueryReply) -> Result<()> {
        self.send_frame(&Frame::QueryResponse {
            reply_to: reply.reply_to,
            status: reply.status,
            body: reply.body,
        })
        .await
    }

    async fn send_error(&self, reply: ErrorReply) -> Result<()> {
        self.send_frame(&Frame::QueryError {
            reply_to: reply.reply_to,
            code: reply.code,
            message: reply.message,
            request: reply.request,
        })
        .await
    }

    async fn notify(&self, payload: serde_json::Value) -> Result<()> {
        self.send_frame(&Frame::Notification { body: payload }).await
    }

    async fn close(&self) -> Result<()> {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer
                .shutdown()
                .await
                .map_err(|e| ConnectorError::Transport(e.to_string()))?;
        }
        self.shared.authed.store(false, Ordering::Release);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    fn is_authed(&self) -> bool {
        self.shared.authed.load(Ordering::Acquire)
    }
}
