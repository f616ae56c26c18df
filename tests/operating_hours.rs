use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use opshours::auth::Credentials;
use opshours::engine::Engine;
use opshours::permission::{Grant, GrantTable};
use opshours::wire;

const PASSWORD: &str = "opshours";
const HOUR: i64 = 3_600_000;
/// 2030-03-17T16:53:20Z, well inside the valid timestamp range.
const BASE: i64 = 1_900_000_000_000;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("opshours_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let grants = GrantTable::new(vec![Grant::admin("manager")]);
    let engine = Arc::new(Engine::new(dir.join("operating_hours.wal"), Arc::new(grants)).unwrap());

    let engine2 = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, Credentials::shared(PASSWORD), None)
                    .await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr, user: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .user(user)
        .password(PASSWORD);

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

/// `(id, start, end)` rows of a simple query.
async fn hours_rows(client: &Client, sql: &str) -> Vec<(String, i64, i64)> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some((
                row.get(0).unwrap().to_string(),
                row.get(1).unwrap().parse().unwrap(),
                row.get(2).unwrap().parse().unwrap(),
            )),
            _ => None,
        })
        .collect()
}

async fn insert(client: &Client, start: i64, end: i64) -> String {
    let rows = hours_rows(
        client,
        &format!(r#"INSERT INTO operating_hours (start, "end") VALUES ({start}, {end}) RETURNING *"#),
    )
    .await;
    assert_eq!(rows.len(), 1);
    assert_eq!((rows[0].1, rows[0].2), (start, end));
    rows[0].0.clone()
}

async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.unwrap_err();
    err.code().map(|c| c.code().to_string()).unwrap_or_default()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn create_then_list_and_get() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr, "manager").await;

    let a = insert(&client, BASE, BASE + 8 * HOUR).await;
    let b = insert(&client, BASE + 24 * HOUR, BASE + 32 * HOUR).await;
    assert_eq!(engine.len().await, 2);

    let rows = hours_rows(
        &client,
        &format!(
            r#"SELECT * FROM operating_hours WHERE "end" >= {} AND start <= {}"#,
            BASE - HOUR,
            BASE + 48 * HOUR
        ),
    )
    .await;
    let ids: Vec<_> = rows.iter().map(|r| r.0.clone()).collect();
    assert_eq!(ids, vec![a.clone(), b]);

    // a window straddling the range boundary still intersects it
    let rows = hours_rows(
        &client,
        &format!(
            r#"SELECT * FROM operating_hours WHERE "end" >= {} AND start <= {}"#,
            BASE + 4 * HOUR,
            BASE + 12 * HOUR
        ),
    )
    .await;
    assert_eq!(rows, vec![(a.clone(), BASE, BASE + 8 * HOUR)]);

    let rows = hours_rows(&client, &format!("SELECT * FROM operating_hours WHERE id = '{a}'")).await;
    assert_eq!(rows, vec![(a, BASE, BASE + 8 * HOUR)]);
}

#[tokio::test]
async fn overlapping_insert_is_rejected() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr, "manager").await;

    insert(&client, BASE, BASE + 8 * HOUR).await;
    let code = sqlstate(
        &client,
        &format!(
            r#"INSERT INTO operating_hours (start, "end") VALUES ({}, {})"#,
            BASE + 8 * HOUR,
            BASE + 10 * HOUR
        ),
    )
    .await;
    assert_eq!(code, "23P01");
    assert_eq!(engine.len().await, 1);
}

#[tokio::test]
async fn empty_range_is_rejected() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "manager").await;

    let code = sqlstate(
        &client,
        &format!(r#"INSERT INTO operating_hours (start, "end") VALUES ({BASE}, {BASE})"#),
    )
    .await;
    assert_eq!(code, "22023");
}

#[tokio::test]
async fn mutations_without_grant_are_forbidden() {
    let (addr, engine) = start_test_server().await;
    let manager = connect(addr, "manager").await;
    let guest = connect(addr, "guest").await;

    let id = insert(&manager, BASE, BASE + HOUR).await;

    let insert_sql = format!(
        r#"INSERT INTO operating_hours (start, "end") VALUES ({}, {})"#,
        BASE + 2 * HOUR,
        BASE + 3 * HOUR
    );
    assert_eq!(sqlstate(&guest, &insert_sql).await, "42501");
    assert_eq!(
        sqlstate(&guest, &format!("DELETE FROM operating_hours WHERE id = '{id}'")).await,
        "42501"
    );
    assert_eq!(engine.len().await, 1);

    // reads need no grant
    let rows = hours_rows(&guest, &format!("SELECT * FROM operating_hours WHERE id = '{id}'")).await;
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn update_and_delete() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr, "manager").await;

    let id = insert(&client, BASE, BASE + HOUR).await;
    let rows = hours_rows(
        &client,
        &format!(
            r#"UPDATE operating_hours SET start = {}, "end" = {} WHERE id = '{id}' RETURNING *"#,
            BASE + 2 * HOUR,
            BASE + 4 * HOUR
        ),
    )
    .await;
    assert_eq!(rows, vec![(id.clone(), BASE + 2 * HOUR, BASE + 4 * HOUR)]);

    client
        .batch_execute(&format!("DELETE FROM operating_hours WHERE id = '{id}'"))
        .await
        .unwrap();
    assert!(engine.is_empty().await);

    assert_eq!(
        sqlstate(&client, &format!("DELETE FROM operating_hours WHERE id = '{id}'")).await,
        "P0002"
    );
    assert_eq!(
        sqlstate(&client, &format!("SELECT * FROM operating_hours WHERE id = '{id}'")).await,
        "P0002"
    );
}

#[tokio::test]
async fn page_and_count() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "manager").await;

    for day in 0..5 {
        let start = BASE + day * 24 * HOUR;
        insert(&client, start, start + 8 * HOUR).await;
    }
    let pivot = BASE + 2 * 24 * HOUR;

    let rows = hours_rows(
        &client,
        &format!("SELECT * FROM operating_hours_page WHERE start_date = {pivot} AND page = 0 AND page_size = 2"),
    )
    .await;
    let starts: Vec<_> = rows.iter().map(|r| r.1).collect();
    assert_eq!(starts, vec![pivot, pivot + 24 * HOUR]);

    let rows = hours_rows(
        &client,
        &format!("SELECT * FROM operating_hours_page WHERE start_date = {pivot} AND page = 0 AND future = false"),
    )
    .await;
    let starts: Vec<_> = rows.iter().map(|r| r.1).collect();
    assert_eq!(starts, vec![BASE, BASE + 24 * HOUR]);

    let messages = client
        .simple_query(&format!(
            "SELECT * FROM operating_hours_count WHERE start_date = {pivot} AND future = true"
        ))
        .await
        .unwrap();
    let count = messages.iter().find_map(|m| match m {
        SimpleQueryMessage::Row(row) => row.get(0).map(str::to_string),
        _ => None,
    });
    assert_eq!(count.as_deref(), Some("3"));
}

#[tokio::test]
async fn extended_protocol_parameters() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "manager").await;

    let start = BASE.to_string();
    let end = (BASE + HOUR).to_string();
    let inserted = client
        .execute(
            r#"INSERT INTO operating_hours (start, "end") VALUES ($1, $2)"#,
            &[&start.as_str(), &end.as_str()],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let rows = client
        .query(
            "SELECT * FROM operating_hours_count WHERE start_date = $1 AND future = $2",
            &[&"0", &"true"],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<_, i64>(0), 1);
}

#[tokio::test]
async fn malformed_sql_is_a_syntax_error() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "manager").await;

    assert_eq!(sqlstate(&client, "SELECT * FROM bookings").await, "42601");
    assert_eq!(
        sqlstate(&client, "DELETE FROM operating_hours WHERE id = 'not-a-ulid'").await,
        "42601"
    );
}
