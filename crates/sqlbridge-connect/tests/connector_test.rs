//! Tests for the connector lifecycle and request handling

mod common;

use common::{
    events_table, eventually, source_document, source_document_with, Handshake, RecordingPlatform,
};
use serde_json::json;
use sqlbridge_connect::bundler::ReplyStatus;
use sqlbridge_connect::config::DatabaseSettings;
use sqlbridge_connect::error::ConnectorError;
use sqlbridge_connect::platform::{InboundEvent, PublishRequest, QueryRequest};
use sqlbridge_connect::retry::RetryPolicy;
use sqlbridge_connect::{Connector, ConnectorSettings, ConnectorState};
use sqlbridge_rdbc::testing::MemoryDatabase;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn settings() -> ConnectorSettings {
    ConnectorSettings {
        connect_timeout: Duration::from_secs(10),
        reconnect_timeout: Duration::from_secs(10),
        retry: RetryPolicy::fixed(Duration::from_secs(5)),
        database: DatabaseSettings::default(),
    }
}

fn connector(db: &MemoryDatabase) -> (Arc<Connector>, Arc<RecordingPlatform>) {
    connector_with(db, settings())
}

fn connector_with(
    db: &MemoryDatabase,
    settings: ConnectorSettings,
) -> (Arc<Connector>, Arc<RecordingPlatform>) {
    let platform = Arc::new(RecordingPlatform::new());
    let connector = Connector::new(platform.clone(), db.factory(), settings);
    (connector, platform)
}

fn query(reply_to: &str, body: serde_json::Value) -> QueryRequest {
    QueryRequest {
        reply_to: reply_to.into(),
        body,
    }
}

#[tokio::test(start_paused = true)]
async fn test_connect_retries_at_fixed_interval() {
    let db = MemoryDatabase::new();
    let (connector, platform) = connector(&db);
    platform.script_connects([Handshake::Fail("refused"), Handshake::Fail("refused")]);

    let started = tokio::time::Instant::now();
    connector.connect().await.unwrap();

    assert_eq!(platform.connects(), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(10));
    assert_eq!(connector.state(), ConnectorState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_times_out_hung_handshake() {
    let db = MemoryDatabase::new();
    let (connector, platform) = connector(&db);
    platform.script_connects([Handshake::Hang]);

    let started = tokio::time::Instant::now();
    connector.connect().await.unwrap();

    assert_eq!(platform.connects(), 2);
    assert_eq!(started.elapsed(), Duration::from_secs(15));
}

#[tokio::test(start_paused = true)]
async fn test_connect_gives_up_after_max_attempts() {
    let db = MemoryDatabase::new();
    let mut settings = settings();
    settings.retry = RetryPolicy::fixed(Duration::from_millis(100)).with_max_attempts(2);
    let (connector, platform) = connector_with(&db, settings);
    platform.script_connects([Handshake::Fail("bad token"), Handshake::Fail("bad token")]);

    let err = connector.connect().await.unwrap_err();

    assert!(matches!(err, ConnectorError::ConnectionLifecycle(_)));
    assert_eq!(platform.connects(), 2);
    assert_eq!(connector.state(), ConnectorState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_stops_on_shutdown() {
    let db = MemoryDatabase::new();
    let (connector, platform) = connector(&db);
    platform.script_connects(std::iter::repeat_n(Handshake::Fail("down"), 100));

    let token = connector.shutdown_token();
    let handle = tokio::spawn({
        let connector = connector.clone();
        async move { connector.connect().await }
    });
    tokio::time::sleep(Duration::from_secs(12)).await;
    token.cancel();

    assert!(handle.await.unwrap().is_err());
    assert_eq!(platform.connects(), 3);
}

#[tokio::test]
async fn test_configure_installs_session() {
    let db = MemoryDatabase::new();
    let (connector, _platform) = connector(&db);
    connector.connect().await.unwrap();

    connector.configure(&source_document()).await.unwrap();

    let session = connector.sessions().snapshot().unwrap();
    assert_eq!(session.max_connections(), 2);
    assert_eq!(connector.active_task(), None);
    assert_eq!(connector.state(), ConnectorState::Connected);
}

#[tokio::test]
async fn test_configure_starts_exactly_one_scheduler() {
    let db = MemoryDatabase::new();
    db.set_result("SELECT * FROM alerts", events_table(1));
    db.set_table("events", events_table(4));
    let (connector, _platform) = connector(&db);

    connector
        .configure(&source_document_with(json!({
            "pollQuery": "SELECT * FROM alerts",
            "loadTable": "events"
        })))
        .await
        .unwrap();
    assert_eq!(connector.active_task(), Some("poll"));

    connector
        .configure(&source_document_with(json!({ "loadTable": "events" })))
        .await
        .unwrap();
    assert_eq!(connector.active_task(), Some("bulk-load"));

    connector.configure(&source_document()).await.unwrap();
    assert_eq!(connector.active_task(), None);

    connector.shutdown().await;
}

#[tokio::test]
async fn test_reconfigure_replaces_and_closes_previous_session() {
    let db = MemoryDatabase::new();
    let (connector, _platform) = connector(&db);

    connector.configure(&source_document()).await.unwrap();
    let first = connector.sessions().snapshot().unwrap();

    connector.configure(&source_document()).await.unwrap();
    let second = connector.sessions().snapshot().unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(eventually(|| first.is_closed()).await);
    assert!(!second.is_closed());
}

#[tokio::test]
async fn test_invalid_configuration_tears_everything_down() {
    let db = MemoryDatabase::new();
    db.set_result("SELECT * FROM alerts", events_table(1));
    let (connector, platform) = connector(&db);
    connector.connect().await.unwrap();

    connector
        .configure(&source_document_with(json!({ "pollQuery": "SELECT * FROM alerts" })))
        .await
        .unwrap();
    let previous = connector.sessions().snapshot().unwrap();
    assert_eq!(connector.active_task(), Some("poll"));

    let mut invalid = source_document();
    invalid["config"]["jdbcConfig"]
        .as_object_mut()
        .unwrap()
        .remove("password");
    let err = connector.configure(&invalid).await.unwrap_err();

    assert!(matches!(err, ConnectorError::Config(_)));
    assert!(connector.sessions().snapshot().is_none());
    assert_eq!(connector.active_task(), None);
    assert!(previous.is_closed());
    assert!(eventually(|| db.open_connections() == 0).await);
    assert_eq!(platform.closes(), 1);
    assert_eq!(connector.state(), ConnectorState::Disconnected);
}

#[tokio::test]
async fn test_unreachable_database_rejects_configuration() {
    let db = MemoryDatabase::new();
    db.fail_connections(Some("connection refused"));
    let (connector, _platform) = connector(&db);

    let err = connector.configure(&source_document()).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Sql { .. }));
    assert!(connector.sessions().snapshot().is_none());
}

#[tokio::test]
async fn test_query_replies_are_bundled_in_order() {
    let db = MemoryDatabase::new();
    db.set_result("SELECT * FROM events", events_table(5));
    let (connector, platform) = connector(&db);
    connector.configure(&source_document()).await.unwrap();

    connector
        .handle_query(query(
            "r-1",
            json!({"query": "SELECT * FROM events", "bundleSize": 2}),
        ))
        .await;

    let replies = platform.replies();
    let statuses: Vec<_> = replies.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![ReplyStatus::Partial, ReplyStatus::Partial, ReplyStatus::Complete]
    );
    let ids: Vec<i64> = replies
        .iter()
        .flat_map(|r| r.body.as_array().unwrap().clone())
        .map(|row| row["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert!(replies.iter().all(|r| r.reply_to == "r-1"));
}

#[tokio::test]
async fn test_bundle_factor_alias_and_default() {
    let db = MemoryDatabase::new();
    db.set_result("SELECT * FROM events", events_table(3));
    let (connector, platform) = connector(&db);
    connector.configure(&source_document()).await.unwrap();

    connector
        .handle_query(query(
            "a",
            json!({"query": "SELECT * FROM events", "bundleFactor": 1}),
        ))
        .await;
    connector
        .handle_query(query(
            "b",
            json!({"query": "SELECT * FROM events", "bundleSize": -4}),
        ))
        .await;

    let replies = platform.replies();
    assert_eq!(replies.iter().filter(|r| r.reply_to == "a").count(), 3);
    assert_eq!(replies.iter().filter(|r| r.reply_to == "b").count(), 1);
}

#[tokio::test]
async fn test_empty_query_result_is_no_content() {
    let db = MemoryDatabase::new();
    db.set_result("SELECT * FROM events WHERE false", events_table(0));
    let (connector, platform) = connector(&db);
    connector.configure(&source_document()).await.unwrap();

    connector
        .handle_query(query("r", json!({"query": "SELECT * FROM events WHERE false"})))
        .await;

    let replies = platform.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].status, ReplyStatus::NoContent);
    assert_eq!(replies[0].body, json!({}));
}

#[tokio::test]
async fn test_query_errors_become_error_replies() {
    let db = MemoryDatabase::new();
    db.fail_on("SELECT boom", "division by zero", Some("22012"), None);
    let (connector, platform) = connector(&db);

    connector
        .handle_query(query("early", json!({"query": "SELECT 1"})))
        .await;

    connector.configure(&source_document()).await.unwrap();
    connector
        .handle_query(query("typed", json!({"query": 17})))
        .await;
    connector
        .handle_query(query("sql", json!({"query": "SELECT boom"})))
        .await;

    let errors = platform.errors();
    assert_eq!(errors.len(), 3);
    assert_eq!(errors[0].code, "sqlbridge.closed");
    assert_eq!(errors[1].code, "sqlbridge.queryNotString");
    assert_eq!(errors[2].code, "sqlbridge.sqlError");
    assert!(errors[2].message.contains("22012"));
    assert_eq!(errors[2].request, json!("SELECT boom"));
    assert!(platform.replies().is_empty());
}

#[tokio::test]
async fn test_query_insert_replies_with_row_count() {
    let db = MemoryDatabase::new();
    let (connector, platform) = connector(&db);
    connector.configure(&source_document()).await.unwrap();

    connector
        .handle_query(query(
            "ins",
            json!({"table": "orders", "data": {"id": 1, "total": 9.5}}),
        ))
        .await;

    let replies = platform.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].status, ReplyStatus::Complete);
    assert_eq!(replies[0].body, json!({"rowsAffected": 1}));
}

#[tokio::test]
async fn test_publish_variants() {
    let db = MemoryDatabase::new();
    db.set_update_count("UPDATE t SET x = 1", 4);
    let (connector, platform) = connector(&db);
    connector.configure(&source_document()).await.unwrap();

    connector
        .handle_publish(PublishRequest {
            reply_to: Some("u".into()),
            body: json!({"query": "UPDATE t SET x = 1"}),
        })
        .await;
    connector
        .handle_publish(PublishRequest {
            reply_to: Some("b".into()),
            body: json!({"query": ["UPDATE t SET x = 1", "DELETE FROM t"]}),
        })
        .await;
    connector
        .handle_publish(PublishRequest {
            reply_to: Some("bad".into()),
            body: json!({"query": ["UPDATE t SET x = 1", {"not": "sql"}]}),
        })
        .await;
    connector
        .handle_publish(PublishRequest {
            reply_to: None,
            body: json!({"table": "t", "data": {"x": 2}}),
        })
        .await;

    let replies = platform.replies();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].body, json!({"rowsAffected": 4}));
    assert_eq!(replies[1].body, json!({"rowsAffected": [4, 0]}));

    let errors = platform.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].reply_to, "bad");
    assert_eq!(errors[0].code, "sqlbridge.batchTypeError");

    assert!(db
        .executed_sql()
        .iter()
        .any(|sql| sql.starts_with("INSERT INTO \"t\"")));
}

#[tokio::test(start_paused = true)]
async fn test_close_event_cancels_scheduler_and_reconnects() {
    let db = MemoryDatabase::new();
    db.set_result("SELECT * FROM alerts", events_table(1));
    let (connector, platform) = connector(&db);
    connector.connect().await.unwrap();
    connector
        .configure(&source_document_with(json!({ "pollQuery": "SELECT * FROM alerts" })))
        .await
        .unwrap();

    platform.script_connects([Handshake::Fail("still down")]);
    connector.on_close().await.unwrap();

    assert_eq!(connector.active_task(), None);
    assert_eq!(platform.connects(), 3);
    assert!(connector.sessions().snapshot().is_some());
    assert_eq!(connector.state(), ConnectorState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconnect_shuts_down() {
    let db = MemoryDatabase::new();
    let (connector, platform) = connector(&db);
    connector.connect().await.unwrap();
    connector.configure(&source_document()).await.unwrap();

    platform.script_reconnects([Handshake::Hang]);
    let err = connector.on_reconnect().await.unwrap_err();

    assert!(matches!(err, ConnectorError::ConnectionLifecycle(_)));
    assert_eq!(connector.state(), ConnectorState::Closed);
    assert!(connector.sessions().snapshot().is_none());
    assert_eq!(platform.closes(), 1);
    assert!(connector.shutdown_token().is_cancelled());
}

#[tokio::test]
async fn test_successful_reconnect_keeps_session() {
    let db = MemoryDatabase::new();
    let (connector, _platform) = connector(&db);
    connector.connect().await.unwrap();
    connector.configure(&source_document()).await.unwrap();

    connector.on_reconnect().await.unwrap();
    assert_eq!(connector.state(), ConnectorState::Connected);
    assert!(connector.sessions().snapshot().is_some());
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let db = MemoryDatabase::new();
    let (connector, platform) = connector(&db);
    connector.configure(&source_document()).await.unwrap();

    connector.shutdown().await;
    connector.shutdown().await;

    assert_eq!(platform.closes(), 1);
    assert_eq!(connector.state(), ConnectorState::Closed);
    assert_eq!(db.open_connections(), 0);
}

#[tokio::test]
async fn test_in_flight_query_finishes_after_reconfiguration() {
    let db = MemoryDatabase::new();
    db.set_result("SELECT * FROM events", events_table(2));
    let (connector, platform) = connector(&db);
    connector.configure(&source_document()).await.unwrap();

    db.set_latency(Some(Duration::from_millis(200)));
    let in_flight = tokio::spawn({
        let connector = connector.clone();
        async move {
            connector
                .handle_query(query("slow", json!({"query": "SELECT * FROM events"})))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    connector.configure(&source_document()).await.unwrap();
    in_flight.await.unwrap();

    let replies = platform.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].status, ReplyStatus::Complete);
    assert!(platform.errors().is_empty());
}

#[tokio::test]
async fn test_run_loop_dispatches_events_until_stream_ends() {
    let db = MemoryDatabase::new();
    db.set_result("SELECT * FROM events", events_table(2));
    let (connector, platform) = connector(&db);
    let (tx, rx) = mpsc::channel(8);

    let run = tokio::spawn(connector.clone().run(rx));

    tx.send(InboundEvent::Configure(source_document()))
        .await
        .unwrap();
    tx.send(InboundEvent::Query(query(
        "r",
        json!({"query": "SELECT * FROM events"}),
    )))
    .await
    .unwrap();
    assert!(eventually(|| !platform.replies().is_empty()).await);

    drop(tx);
    run.await.unwrap().unwrap();

    assert_eq!(connector.state(), ConnectorState::Closed);
    assert_eq!(platform.replies()[0].status, ReplyStatus::Complete);
    assert_eq!(platform.closes(), 1);
}
