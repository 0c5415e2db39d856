//! Integration tests against a live MySQL server.
//!
//! Run with `cargo test -p table-sync-mysql -- --ignored` after pointing
//! `MYSQL_TEST_HOST`, `MYSQL_TEST_PORT`, `MYSQL_TEST_DB`, `MYSQL_TEST_USER`
//! and `MYSQL_TEST_PASSWORD` at a scratch database.

use futures::{stream, StreamExt, TryStreamExt};
use mysql_async::prelude::*;
use sync_core::{
    ConnectionConfig, LoadRequest, ReadRequest, Row, RowStream, SourceConnector, TargetConnector,
    Value, WatermarkFilter, WriteMode,
};
use table_sync_mysql::{client, MySqlSource, MySqlTarget};

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
    let port = var("MYSQL_TEST_PORT", "3306").parse().ok();
    ConnectionConfig::new("mysql", var("MYSQL_TEST_DB", "testdb"))
        .with_host(var("MYSQL_TEST_HOST", "127.0.0.1"), port)
        .with_login(
            var("MYSQL_TEST_USER", "root"),
            var("MYSQL_TEST_PASSWORD", "root"),
        )
}

async fn setup(conn: &mut mysql_async::Conn, table: &str) {
    conn.query_drop(format!("DROP TABLE IF EXISTS `{table}`"))
        .await
        .unwrap();
    conn.query_drop(format!(
        "CREATE TABLE `{table}` (
            order_id BIGINT PRIMARY KEY,
            customer VARCHAR(64),
            total DECIMAL(10, 2),
            updated_at TIMESTAMP(6) NULL
        )"
    ))
    .await
    .unwrap();
}

fn order(id: i64, customer: &str) -> Row {
    Row::from_pairs([
        ("order_id", Value::Int(id)),
        ("customer", Value::from(customer)),
        ("total", Value::Decimal("10.50".into())),
        ("updated_at", Value::Null),
    ])
}

#[tokio::test]
#[ignore = "requires a running MySQL server"]
async fn test_filtered_read_is_ordered() {
    init_logging();
    let config = test_config();
    let (pool, mut conn) = client::connect(&config).await.unwrap();
    setup(&mut conn, "it_orders_src").await;
    conn.query_drop(
        "INSERT INTO it_orders_src (order_id, customer, total) VALUES
         (103, 'c', 3.00), (101, 'a', 1.00), (105, 'e', 5.00), (102, 'b', 2.00)",
    )
    .await
    .unwrap();
    client::disconnect(pool, conn).await.unwrap();

    let mut source = MySqlSource.connect(&config).await.unwrap();
    let mut request = ReadRequest::full("it_orders_src", 2);
    request.filter = Some(WatermarkFilter {
        column: "order_id".into(),
        value: Value::Int(101),
    });
    request.order_by = vec!["order_id".into()];

    let rows: Vec<Row> = source
        .read_rows(&request)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let ids: Vec<&Value> = rows.iter().map(|r| r.get("order_id").unwrap()).collect();
    assert_eq!(ids, vec![&Value::Int(102), &Value::Int(103), &Value::Int(105)]);
    assert_eq!(rows[0].get("total"), Some(&Value::Decimal("2.00".into())));
    source.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running MySQL server"]
async fn test_replace_then_append() {
    init_logging();
    let config = test_config();
    let (pool, mut conn) = client::connect(&config).await.unwrap();
    setup(&mut conn, "it_orders_dst").await;
    conn.query_drop("INSERT INTO it_orders_dst (order_id, customer) VALUES (1, 'old')")
        .await
        .unwrap();

    let mut target = MySqlTarget.connect(&config).await.unwrap();
    let replace = LoadRequest {
        table: "it_orders_dst".into(),
        mode: WriteMode::Replace,
        batch_size: 2,
    };
    let rows: RowStream<'_> = stream::iter((10..15).map(|i| Ok(order(i, "new")))).boxed();
    assert_eq!(target.load_rows(&replace, rows).await.unwrap(), 5);

    let append = LoadRequest {
        mode: WriteMode::Append,
        ..replace.clone()
    };
    let rows: RowStream<'_> = stream::iter(vec![Ok(order(20, "later"))]).boxed();
    assert_eq!(target.load_rows(&append, rows).await.unwrap(), 1);
    target.close().await.unwrap();

    let ids: Vec<i64> = conn
        .query("SELECT order_id FROM it_orders_dst ORDER BY order_id")
        .await
        .unwrap();
    assert_eq!(ids, vec![10, 11, 12, 13, 14, 20]);

    let leftovers: Vec<String> = conn
        .query("SHOW TABLES LIKE 'it_orders_dst\\_\\_%'")
        .await
        .unwrap();
    assert!(leftovers.is_empty());
    client::disconnect(pool, conn).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running MySQL server"]
async fn test_failed_replace_keeps_old_contents() {
    init_logging();
    let config = test_config();
    let (pool, mut conn) = client::connect(&config).await.unwrap();
    setup(&mut conn, "it_orders_keep").await;
    conn.query_drop("INSERT INTO it_orders_keep (order_id, customer) VALUES (1, 'old')")
        .await
        .unwrap();

    let mut target = MySqlTarget.connect(&config).await.unwrap();
    let request = LoadRequest {
        table: "it_orders_keep".into(),
        mode: WriteMode::Replace,
        batch_size: 1,
    };
    let rows: RowStream<'_> = stream::iter(vec![
        Ok(order(2, "new")),
        Err(sync_core::SyncError::extraction("it_orders_keep", "source went away")),
    ])
    .boxed();
    let err = target.load_rows(&request, rows).await.unwrap_err();
    assert!(matches!(err, sync_core::SyncError::Extraction { .. }));
    target.close().await.unwrap();

    let ids: Vec<i64> = conn
        .query("SELECT order_id FROM it_orders_keep")
        .await
        .unwrap();
    assert_eq!(ids, vec![1]);
    client::disconnect(pool, conn).await.unwrap();
}
