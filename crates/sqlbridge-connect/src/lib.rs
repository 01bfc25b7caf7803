//! sqlbridge-connect - bridge between an orchestration platform and a
//! relational database
//!
//! The platform sends queries, writes and configuration; the bridge runs
//! them against a pooled database session and answers with chunked
//! replies. A configured source can also poll a query or export a table
//! page by page, pushing every row as a notification.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  events   ┌─────────────────────────────────────────┐
//! │   Platform   │──────────▶│ Connector (lifecycle + dispatch)        │
//! │  (transport) │◀──────────│  ├── SessionSlot ─▶ DatabaseSession     │
//! └──────────────┘  replies  │  │                   └── QueryExecutor  │
//!                  notifies  │  └── ScheduledTask (poll | bulk load)   │
//!                            └─────────────────────────────────────────┘
//!                                              │
//!                                              ▼
//!                                        sqlbridge-rdbc
//! ```
//!
//! # CLI Usage (Binary)
//!
//! ```bash
//! # Run the bridge
//! sqlbridge-connect -c sqlbridge.yaml
//!
//! # Validate configuration
//! sqlbridge-connect -c sqlbridge.yaml validate
//! ```

// Common types (SensitiveString)
pub mod types;

// Error types
pub mod error;

// Configuration
pub mod config;

// Engine
pub mod bundler;
pub mod connector;
pub mod document;
pub mod executor;
pub mod mapper;
pub mod retry;
pub mod scheduler;
pub mod session;

// Platform side
pub mod platform;
pub mod transport;

pub use connector::{Connector, ConnectorSettings, ConnectorState};
pub use error::{ConnectorError, Result};
pub use platform::{InboundEvent, PlatformSession};
