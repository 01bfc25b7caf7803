//! Chunked delivery of query results
//!
//! A result collection goes back to the requester as one or more replies.
//! Every reply but the last carries [`ReplyStatus::Partial`]; the last one
//! carries [`ReplyStatus::Complete`]. An empty collection is a single
//! [`ReplyStatus::NoContent`] reply with an empty document.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Rows per reply when the requester does not say
pub const DEFAULT_BUNDLE_SIZE: usize = 500;

/// Status code attached to each reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum ReplyStatus {
    /// More replies follow
    Partial,
    /// Last reply for this request
    Complete,
    /// The query matched no rows
    NoContent,
}

impl ReplyStatus {
    /// Numeric wire code
    pub const fn code(self) -> u16 {
        match self {
            Self::Partial => 100,
            Self::Complete => 200,
            Self::NoContent => 204,
        }
    }

    /// Whether this is the last reply for its request
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Partial)
    }
}

impl From<ReplyStatus> for u16 {
    fn from(status: ReplyStatus) -> Self {
        status.code()
    }
}

impl TryFrom<u16> for ReplyStatus {
    type Error = String;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            100 => Ok(Self::Partial),
            200 => Ok(Self::Complete),
            204 => Ok(Self::NoContent),
            other => Err(format!("unknown reply status {other}")),
        }
    }
}

/// One reply's worth of rows
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub status: ReplyStatus,
    pub body: serde_json::Value,
}

/// Resolve a requested bundle size
///
/// Absent and negative sizes use [`DEFAULT_BUNDLE_SIZE`]; `0` means
/// everything in one reply.
pub fn effective_bundle_size(requested: Option<i64>) -> usize {
    match requested {
        None => DEFAULT_BUNDLE_SIZE,
        Some(n) if n < 0 => {
            warn!(requested = n, "Negative bundle size, using default");
            DEFAULT_BUNDLE_SIZE
        }
        Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
    }
}

/// Split rows into replies
pub fn bundle(rows: Vec<serde_json::Value>, bundle_size: usize) -> Vec<Bundle> {
    if rows.is_empty() {
        return vec![Bundle {
            status: ReplyStatus::NoContent,
            body: serde_json::Value::Object(serde_json::Map::new()),
        }];
    }

    if bundle_size == 0 || rows.len() <= bundle_size {
        return vec![Bundle {
            status: ReplyStatus::Complete,
            body: serde_json::Value::Array(rows),
        }];
    }

    let chunk_count = rows.len().div_ceil(bundle_size);
    let mut bundles = Vec::with_capacity(chunk_count);
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        let chunk: Vec<_> = rows.by_ref().take(bundle_size).collect();
        let status = if rows.peek().is_some() {
            ReplyStatus::Partial
        } else {
            ReplyStatus::Complete
        };
        bundles.push(Bundle {
            status,
            body: serde_json::Value::Array(chunk),
        });
    }
    bundles
}
