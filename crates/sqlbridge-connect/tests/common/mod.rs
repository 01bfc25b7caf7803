//! Shared fixtures for sqlbridge-connect integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use sqlbridge_connect::error::{ConnectorError, Result};
use sqlbridge_connect::platform::{ErrorReply, PlatformSession, QueryReply};
use sqlbridge_rdbc::types::{ColumnDescriptor, ResultSet, Row, SqlType, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// How a scripted handshake attempt ends
#[derive(Debug, Clone)]
pub enum Handshake {
    Succeed,
    Fail(&'static str),
    Hang,
}

/// Platform session that records everything sent to it
#[derive(Default)]
pub struct RecordingPlatform {
    connects: Mutex<VecDeque<Handshake>>,
    reconnects: Mutex<VecDeque<Handshake>>,
    pub connect_calls: AtomicUsize,
    pub reconnect_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    open: AtomicBool,
    authed: AtomicBool,
    replies: Mutex<Vec<QueryReply>>,
    errors: Mutex<Vec<ErrorReply>>,
    notifications: Mutex<Vec<serde_json::Value>>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcomes of successive connect attempts; once the script
    /// runs out every attempt succeeds
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = Handshake>) {
        self.connects.lock().extend(outcomes);
    }

    pub fn script_reconnects(&self, outcomes: impl IntoIterator<Item = Handshake>) {
        self.reconnects.lock().extend(outcomes);
    }

    pub fn replies(&self) -> Vec<QueryReply> {
        self.replies.lock().clone()
    }

    pub fn errors(&self) -> Vec<ErrorReply> {
        self.errors.lock().clone()
    }

    pub fn notifications(&self) -> Vec<serde_json::Value> {
        self.notifications.lock().clone()
    }

    pub fn connects(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    async fn handshake(&self, outcome: Option<Handshake>) -> Result<()> {
        match outcome.unwrap_or(Handshake::Succeed) {
            Handshake::Succeed => {
                self.open.store(true, Ordering::SeqCst);
                self.authed.store(true, Ordering::SeqCst);
                Ok(())
            }
            Handshake::Fail(reason) => {
                self.open.store(true, Ordering::SeqCst);
                self.authed.store(false, Ordering::SeqCst);
                Err(ConnectorError::ConnectionLifecycle(reason.into()))
            }
            Handshake::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl PlatformSession for RecordingPlatform {
    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.connects.lock().pop_front();
        self.handshake(outcome).await
    }

    async fn reconnect(&self) -> Result<()> {
        self.reconnect_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.reconnects.lock().pop_front();
        self.handshake(outcome).await
    }

    async fn send_reply(&self, reply: QueryReply) -> Result<()> {
        self.replies.lock().push(reply);
        Ok(())
    }

    async fn send_error(&self, reply: ErrorReply) -> Result<()> {
        self.errors.lock().push(reply);
        Ok(())
    }

    async fn notify(&self, payload: serde_json::Value) -> Result<()> {
        self.notifications.lock().push(payload);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        self.authed.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn is_authed(&self) -> bool {
        self.authed.load(Ordering::SeqCst)
    }
}

/// A valid source configuration document for the in-memory backend
pub fn source_document() -> serde_json::Value {
    json!({
        "config": {
            "jdbcConfig": {
                "username": "bridge",
                "password": "secret",
                "dbURL": "memory:orders",
                "poolSize": 2
            }
        }
    })
}

/// Add fields to the inner configuration of [`source_document`]
pub fn source_document_with(extra: serde_json::Value) -> serde_json::Value {
    let mut doc = source_document();
    let inner = doc["config"]["jdbcConfig"].as_object_mut().unwrap();
    for (k, v) in extra.as_object().unwrap() {
        inner.insert(k.clone(), v.clone());
    }
    doc
}

/// `events(id INTEGER, name VARCHAR)` with ids `1..=n`
pub fn events_table(n: i32) -> ResultSet {
    ResultSet::new(
        vec![
            ColumnDescriptor::new("id", SqlType::Integer),
            ColumnDescriptor::new("name", SqlType::Varchar),
        ],
        (1..=n)
            .map(|i| Row::new(vec![Value::Int32(i), Value::String(format!("event-{i}"))]))
            .collect(),
    )
}

/// Poll `check` until it holds or a second of (possibly paused) time passes
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
