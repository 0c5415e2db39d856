//! Integration tests against a live PostgreSQL server.
//!
//! Run with `cargo test -p table-sync-postgresql -- --ignored` after pointing
//! `PG_TEST_HOST`, `PG_TEST_PORT`, `PG_TEST_DB`, `PG_TEST_USER` and
//! `PG_TEST_PASSWORD` at a scratch database.

use chrono::{TimeZone, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use sync_core::{
    ConnectionConfig, LoadRequest, ReadRequest, Row, RowStream, SourceConnector, SyncError,
    TargetConnector, Value, WatermarkFilter, WriteMode,
};
use table_sync_postgresql::{client, PostgresSource, PostgresTarget};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .try_init();
}

fn test_config() -> ConnectionConfig {
    let var = |name: &str, default: &str| std::env::var(name).unwrap_or(default.to_string());
    let port = var("PG_TEST_PORT", "5432").parse().ok();
    ConnectionConfig::new("postgresql", var("PG_TEST_DB", "postgres"))
        .with_host(var("PG_TEST_HOST", "localhost"), port)
        .with_login(
            var("PG_TEST_USER", "postgres"),
            var("PG_TEST_PASSWORD", "postgres"),
        )
}

async fn setup(table: &str) -> tokio_postgres::Client {
    let client = client::connect(&test_config()).await.unwrap();
    client
        .batch_execute(&format!(
            "DROP TABLE IF EXISTS {table};
             CREATE TABLE {table} (
                 event_id INTEGER PRIMARY KEY,
                 payload JSONB,
                 amount NUMERIC(12, 2),
                 updated_at TIMESTAMP
             )"
        ))
        .await
        .unwrap();
    client
}

fn event(id: i64, minute: u32) -> Row {
    let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, minute, 0).unwrap();
    Row::from_pairs([
        ("event_id", Value::Int(id)),
        ("payload", Value::Text(format!(r#"{{"n": {id}}}"#))),
        ("amount", Value::Decimal("3.50".into())),
        ("updated_at", Value::TimestampTz(ts)),
    ])
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_portal_read_with_timestamp_filter() {
    init_logging();
    let client = setup("it_events_src").await;
    client
        .batch_execute(
            "INSERT INTO it_events_src VALUES
             (1, '{}', 1.00, '2025-01-01 00:01:00'),
             (2, '{}', 2.00, '2025-01-01 00:02:00'),
             (3, '{}', 3.00, '2025-01-01 00:02:00'),
             (4, '{}', 4.00, '2025-01-01 00:03:00')",
        )
        .await
        .unwrap();

    let mut source = PostgresSource.connect(&test_config()).await.unwrap();
    let mut request = ReadRequest::full("it_events_src", 1);
    request.filter = Some(WatermarkFilter {
        column: "updated_at".into(),
        value: Value::TimestampTz(Utc.with_ymd_and_hms(2025, 1, 1, 0, 1, 0).unwrap()),
    });
    request.order_by = vec!["updated_at".into()];

    let rows: Vec<Row> = source
        .read_rows(&request)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let ids: Vec<&Value> = rows.iter().map(|r| r.get("event_id").unwrap()).collect();
    // Equal timestamps are ordered by the primary key
    assert_eq!(ids, vec![&Value::Int(2), &Value::Int(3), &Value::Int(4)]);
    assert_eq!(rows[0].get("amount"), Some(&Value::Decimal("2.00".into())));
    source.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_replace_and_append_coerce_values() {
    init_logging();
    let client = setup("it_events_dst").await;
    client
        .batch_execute("INSERT INTO it_events_dst (event_id) VALUES (99)")
        .await
        .unwrap();

    let mut target = PostgresTarget.connect(&test_config()).await.unwrap();
    let replace = LoadRequest {
        table: "it_events_dst".into(),
        mode: WriteMode::Replace,
        batch_size: 2,
    };
    let rows: RowStream<'_> = stream::iter((1..=3).map(|i| Ok(event(i, i as u32)))).boxed();
    assert_eq!(target.load_rows(&replace, rows).await.unwrap(), 3);

    let append = LoadRequest {
        mode: WriteMode::Append,
        ..replace.clone()
    };
    let rows: RowStream<'_> = stream::iter(vec![Ok(event(10, 30))]).boxed();
    assert_eq!(target.load_rows(&append, rows).await.unwrap(), 1);

    let failing: RowStream<'_> = stream::iter(vec![
        Ok(event(20, 40)),
        Err(SyncError::extraction("it_events_src", "reset by peer")),
    ])
    .boxed();
    assert!(target.load_rows(&replace, failing).await.is_err());
    target.close().await.unwrap();

    let ids: Vec<i32> = client
        .query("SELECT event_id FROM it_events_dst ORDER BY event_id", &[])
        .await
        .unwrap()
        .iter()
        .map(|r| r.get(0))
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 10]);
}
