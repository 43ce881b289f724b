use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use hoteldb::engine::Engine;
use hoteldb::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("hoteldb_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("hoteldb.wal")).unwrap());

    let server_engine = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = server_engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "hoteldb".to_string(), None).await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("hotel")
        .user("frontdesk")
        .password("hoteldb");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn sqlstate(client: &Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.err().unwrap();
    err.as_db_error()
        .map(|db| db.code().code().to_string())
        .unwrap_or_else(|| panic!("expected a database error, got {err}"))
}

async fn seed(client: &Client) -> (Ulid, Ulid) {
    let room = Ulid::new();
    let guest = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, number, room_type, capacity, price) \
             VALUES ('{room}', '101', 'double', 2, 100.00)"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO guests (id, full_name, email) \
             VALUES ('{guest}', 'Ada Lovelace', 'ada-{guest}@example.com')"
        ))
        .await
        .unwrap();
    (room, guest)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_flow_over_sql() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (room, guest) = seed(&client).await;

    let booking = Ulid::new();
    let created = rows(
        &client,
        &format!(
            "INSERT INTO bookings (id, room_id, guest_id, check_in, check_out) \
             VALUES ('{booking}', '{room}', '{guest}', '2024-06-01', '2024-06-04') RETURNING *"
        ),
    )
    .await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].get("status"), Some("reserved"));
    assert_eq!(created[0].get("total_price"), Some("300.00"));
    let room_detail: serde_json::Value =
        serde_json::from_str(created[0].get("room_detail").unwrap()).unwrap();
    assert_eq!(room_detail["number"], "101");

    // Overlap: same room, intersecting nights.
    let clash = Ulid::new();
    let code = sqlstate(
        &client,
        &format!(
            "INSERT INTO bookings (id, room_id, guest_id, check_in, check_out) \
             VALUES ('{clash}', '{room}', '{guest}', '2024-06-03', '2024-06-05')"
        ),
    )
    .await;
    assert_eq!(code, "23P01");

    // Same-day turnover is fine.
    let next = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, room_id, guest_id, check_in, check_out) \
             VALUES ('{next}', '{room}', '{guest}', '2024-06-04', '2024-06-05')"
        ))
        .await
        .unwrap();

    let checked_in = rows(
        &client,
        &format!("UPDATE bookings SET status = 'checked_in' WHERE id = '{booking}' RETURNING *"),
    )
    .await;
    assert_eq!(checked_in[0].get("status"), Some("checked_in"));
    let room_row = rows(&client, &format!("SELECT * FROM rooms WHERE id = '{room}'")).await;
    assert_eq!(room_row[0].get("status"), Some("occupied"));

    client
        .batch_execute(&format!(
            "UPDATE bookings SET status = 'completed' WHERE id = '{booking}'"
        ))
        .await
        .unwrap();
    let room_row = rows(&client, &format!("SELECT * FROM rooms WHERE id = '{room}'")).await;
    assert_eq!(room_row[0].get("status"), Some("available"));

    let code = sqlstate(
        &client,
        &format!("UPDATE bookings SET status = 'cancelled' WHERE id = '{booking}'"),
    )
    .await;
    assert_eq!(code, "55000");

    let listed = rows(&client, &format!("SELECT * FROM bookings WHERE room_id = '{room}'")).await;
    assert_eq!(listed.len(), 2);
    // Newest check-in first.
    assert_eq!(listed[0].get("id"), Some(next.to_string().as_str()));
}

#[tokio::test]
async fn available_rooms_and_free_ranges() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (room, guest) = seed(&client).await;
    let other = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms VALUES ('{other}', '102', 'single', 1, 80, 'maintenance', '')"
        ))
        .await
        .unwrap();

    client
        .batch_execute(&format!(
            "INSERT INTO bookings VALUES ('{}', '{room}', '{guest}', '2024-07-10', '2024-07-12')",
            Ulid::new()
        ))
        .await
        .unwrap();

    let free = rows(
        &client,
        r#"SELECT * FROM available_rooms WHERE start >= '2024-07-11' AND "end" <= '2024-07-13'"#,
    )
    .await;
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].get("number"), Some("102"));

    let free = rows(
        &client,
        r#"SELECT * FROM available_rooms WHERE start >= '2024-07-12' AND "end" <= '2024-07-13' AND status = 'available'"#,
    )
    .await;
    assert_eq!(free.len(), 1);
    assert_eq!(free[0].get("number"), Some("101"));

    let code = sqlstate(
        &client,
        r#"SELECT * FROM available_rooms WHERE start >= '2024-07-12' AND "end" <= '2024-07-12'"#,
    )
    .await;
    assert_eq!(code, "22023");

    let ranges = rows(
        &client,
        &format!(
            r#"SELECT * FROM availability WHERE room_id = '{room}' AND start >= '2024-07-01' AND "end" <= '2024-07-31'"#
        ),
    )
    .await;
    let ranges: Vec<(&str, &str)> = ranges
        .iter()
        .map(|r| (r.get("start").unwrap(), r.get("end").unwrap()))
        .collect();
    assert_eq!(
        ranges,
        vec![("2024-07-01", "2024-07-10"), ("2024-07-12", "2024-07-31")]
    );
}

#[tokio::test]
async fn errors_carry_sqlstates() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (room, guest) = seed(&client).await;

    let code = sqlstate(
        &client,
        &format!(
            "INSERT INTO rooms (id, number, room_type, price) VALUES ('{}', '101', 'suite', 10)",
            Ulid::new()
        ),
    )
    .await;
    assert_eq!(code, "23505");

    let code = sqlstate(
        &client,
        &format!(
            "INSERT INTO bookings VALUES ('{}', '{room}', '{guest}', '2024-08-05', '2024-08-05')",
            Ulid::new()
        ),
    )
    .await;
    assert_eq!(code, "22023");

    let code = sqlstate(&client, &format!("DELETE FROM bookings WHERE id = '{}'", Ulid::new())).await;
    assert_eq!(code, "02000");

    assert_eq!(sqlstate(&client, "SELEKT 1").await, "42601");
    assert_eq!(sqlstate(&client, "SELECT * FROM invoices").await, "42P01");
}

#[tokio::test]
async fn deleting_a_guest_removes_their_bookings() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (room, guest) = seed(&client).await;
    client
        .batch_execute(&format!(
            "INSERT INTO bookings VALUES ('{}', '{room}', '{guest}', '2024-09-01', '2024-09-03')",
            Ulid::new()
        ))
        .await
        .unwrap();

    client
        .batch_execute(&format!("DELETE FROM guests WHERE id = '{guest}'"))
        .await
        .unwrap();

    assert!(rows(&client, "SELECT * FROM bookings").await.is_empty());
    assert!(rows(&client, &format!("SELECT * FROM guests WHERE id = '{guest}'")).await.is_empty());
    assert_eq!(rows(&client, "SELECT * FROM rooms").await.len(), 1);
}

#[tokio::test]
async fn extended_protocol_binds_parameters() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let (room, guest) = seed(&client).await;

    let booking = Ulid::new().to_string();
    let room = room.to_string();
    let guest = guest.to_string();
    let inserted = client
        .execute(
            "INSERT INTO bookings (id, room_id, guest_id, check_in, check_out, notes) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[&booking, &room, &guest, &"2024-10-01", &"2024-10-02", &"O'Hara party, deposit $4 paid"],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let found = client
        .query("SELECT * FROM bookings WHERE id = $1", &[&booking])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    let status: String = found[0].get("status");
    let notes: String = found[0].get("notes");
    assert_eq!(status, "reserved");
    assert_eq!(notes, "O'Hara party, deposit $4 paid");
}

#[tokio::test]
async fn concurrent_clients_cannot_double_book() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;
    let (room, guest) = seed(&client).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        handles.push(tokio::spawn(async move {
            let client = connect(addr).await;
            client
                .batch_execute(&format!(
                    "INSERT INTO bookings VALUES ('{}', '{room}', '{guest}', '2024-12-24', '2024-12-27')",
                    Ulid::new()
                ))
                .await
                .is_ok()
        }));
    }
    let mut wins = 0;
    for h in handles {
        if h.await.unwrap() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(
        engine
            .list_bookings(hoteldb::engine::BookingFilter::default())
            .await
            .len(),
        1
    );
}
