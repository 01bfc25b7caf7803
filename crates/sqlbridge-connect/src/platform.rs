//! Orchestration platform interface
//!
//! The engine talks to the platform only through [`PlatformSession`] and
//! receives work as [`InboundEvent`]s. How those are framed on the wire is
//! up to the transport; see [`crate::transport`] for the JSON-lines one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bundler::ReplyStatus;
use crate::error::{ConnectorError, Result};

/// Outbound side of the platform session
#[async_trait]
pub trait PlatformSession: Send + Sync {
    /// Perform the full handshake: open, authenticate, register the source
    async fn connect(&self) -> Result<()>;

    /// Re-register the source on the existing session
    async fn reconnect(&self) -> Result<()>;

    /// Send one query reply
    async fn send_reply(&self, reply: QueryReply) -> Result<()>;

    /// Send a query error reply
    async fn send_error(&self, reply: ErrorReply) -> Result<()>;

    /// Push an uncorrelated notification
    async fn notify(&self, payload: serde_json::Value) -> Result<()>;

    /// Close the session
    async fn close(&self) -> Result<()>;

    /// Whether the underlying transport is open
    fn is_open(&self) -> bool;

    /// Whether the handshake got past authentication
    fn is_authed(&self) -> bool;
}

/// Work delivered by the platform
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// New source configuration document
    Configure(serde_json::Value),
    /// Query expecting replies
    Query(QueryRequest),
    /// Write, optionally expecting a reply
    Publish(PublishRequest),
    /// The platform asks the source to re-register
    Reconnect,
    /// The platform session closed
    Close,
}

/// A query request and where to reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub reply_to: String,
    #[serde(default)]
    pub body: serde_json::Value,
}

/// A publish request, with an optional reply address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub body: serde_json::Value,
}

/// One reply message for a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryReply {
    pub reply_to: String,
    pub status: ReplyStatus,
    pub body: serde_json::Value,
}

/// Error reply for a failed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReply {
    pub reply_to: String,
    pub code: String,
    pub message: String,
    /// The request text that failed
    #[serde(default)]
    pub request: serde_json::Value,
}

impl ErrorReply {
    /// Build an error reply for a failed request
    pub fn from_error(reply_to: impl Into<String>, err: &ConnectorError, body: &serde_json::Value) -> Self {
        Self {
            reply_to: reply_to.into(),
            code: err.code().to_string(),
            message: err.to_string(),
            request: body.get("query").cloned().unwrap_or_else(|| body.clone()),
        }
    }
}

fn insert_parts(
    body: &serde_json::Value,
) -> Result<Option<(String, serde_json::Map<String, serde_json::Value>)>> {
    let (Some(table), Some(data)) = (body.get("table"), body.get("data")) else {
        return Ok(None);
    };
    let table = table
        .as_str()
        .ok_or_else(|| ConnectorError::invalid_request("table must be a string"))?;
    let data = data
        .as_object()
        .ok_or_else(|| ConnectorError::invalid_request("data must be an object"))?;
    Ok(Some((table.to_string(), data.clone())))
}

/// What a query request asks for
#[derive(Debug, Clone, PartialEq)]
pub enum QueryCommand {
    /// Run a query and stream its rows back
    Select {
        sql: String,
        bundle_size: Option<i64>,
    },
    /// Insert one document
    Insert {
        table: String,
        data: serde_json::Map<String, serde_json::Value>,
    },
}

impl QueryCommand {
    /// Interpret a query request body
    ///
    /// `bundleFactor` is accepted as an alias for `bundleSize`.
    pub fn parse(body: &serde_json::Value) -> Result<Self> {
        if let Some((table, data)) = insert_parts(body)? {
            return Ok(Self::Insert { table, data });
        }
        let sql = body
            .get("query")
            .and_then(serde_json::Value::as_str)
            .ok_or(ConnectorError::QueryNotString)?;
        let bundle_size = body
            .get("bundleSize")
            .or_else(|| body.get("bundleFactor"))
            .and_then(serde_json::Value::as_i64);
        Ok(Self::Select {
            sql: sql.to_string(),
            bundle_size,
        })
    }
}

/// What a publish request asks for
#[derive(Debug, Clone, PartialEq)]
pub enum PublishCommand {
    /// Insert one document
    Insert {
        table: String,
        data: serde_json::Map<String, serde_json::Value>,
    },
    /// Run one update statement
    Update(String),
    /// Run a batch; elements are checked when it executes
    Batch(Vec<serde_json::Value>),
}

impl PublishCommand {
    /// Interpret a publish request body
    pub fn parse(body: &serde_json::Value) -> Result<Self> {
        if let Some((table, data)) = insert_parts(body)? {
            return Ok(Self::Insert { table, data });
        }
        match body.get("query") {
            Some(serde_json::Value::String(sql)) => Ok(Self::Update(sql.clone())),
            Some(serde_json::Value::Array(items)) => Ok(Self::Batch(items.clone())),
            _ => Err(ConnectorError::invalid_request(
                "publish needs a query string, a list of statements, or table and data",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_command_parse() {
        assert_eq!(
            QueryCommand::parse(&json!({"query": "SELECT 1", "bundleFactor": 2})).unwrap(),
            QueryCommand::Select {
                sql: "SELECT 1".into(),
                bundle_size: Some(2)
            }
        );
        assert!(matches!(
            QueryCommand::parse(&json!({"query": ["SELECT 1"]})),
            Err(ConnectorError::QueryNotString)
        ));
        assert!(matches!(
            QueryCommand::parse(&json!({"table": "t", "data": {"a": 1}})).unwrap(),
            QueryCommand::Insert { .. }
        ));
    }

    #[test]
    fn test_publish_command_parse() {
        assert_eq!(
            PublishCommand::parse(&json!({"query": "DELETE FROM t"})).unwrap(),
            PublishCommand::Update("DELETE FROM t".into())
        );
        assert_eq!(
            PublishCommand::parse(&json!({"query": ["A", 1]})).unwrap(),
            PublishCommand::Batch(vec![json!("A"), json!(1)])
        );
        assert!(PublishCommand::parse(&json!({"query": 5})).is_err());
        assert!(PublishCommand::parse(&json!({"table": 5, "data": {}})).is_err());
    }

    #[test]
    fn test_error_reply_carries_request_text() {
        let err = ConnectorError::SessionClosed;
        let reply = ErrorReply::from_error("r1", &err, &json!({"query": "SELECT 1"}));
        assert_eq!(reply.code, "sqlbridge.closed");
        assert_eq!(reply.request, json!("SELECT 1"));
    }
}
