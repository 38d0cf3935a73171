use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use roomledger::engine::Engine;
use roomledger::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("roomledger_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("hotel.wal")).unwrap());

    let server_engine = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = server_engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "roomledger".to_string(), None).await;
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
        .password("roomledger");

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
    let err = client.simple_query(sql).await.unwrap_err();
    err.code()
        .map(|c| c.code().to_string())
        .unwrap_or_else(|| panic!("no SQLSTATE in {err}"))
}

fn col<'a>(row: &'a SimpleQueryRow, name: &str) -> &'a str {
    row.get(name).unwrap_or_else(|| panic!("{name} is NULL"))
}

async fn provision(client: &Client, number: &str, floor: i32) -> Ulid {
    let id = Ulid::new();
    client
        .simple_query(&format!(
            "INSERT INTO rooms (id, room_number, room_type, floor, rate) VALUES ('{id}', '{number}', 'deluxe', {floor}, 199.00)"
        ))
        .await
        .unwrap();
    id
}

async fn book(client: &Client, room: Ulid, check_in: &str, check_out: &str, email: &str) -> SimpleQueryRow {
    let mut found = rows(
        client,
        &format!(
            "INSERT INTO reservations (room_id, check_in, check_out, total_amount, guest_name, guest_email, guest_phone) \
             VALUES ('{room}', '{check_in}', '{check_out}', 398.00, 'Ada Lovelace', '{email}', '+44 20 7946 0000')"
        ),
    )
    .await;
    assert_eq!(found.len(), 1);
    found.remove(0)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn wrong_password_rejected() {
    let (addr, _engine) = start_test_server().await;
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .user("frontdesk")
        .password("letmein");
    assert!(config.connect(NoTls).await.is_err());
}

#[tokio::test]
async fn guest_stay_end_to_end() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr).await;

    let room = provision(&client, "204", 2).await;
    let listed = rows(&client, "SELECT * FROM rooms").await;
    assert_eq!(listed.len(), 1);
    assert_eq!(col(&listed[0], "room_number"), "204");
    assert_eq!(col(&listed[0], "room_type"), "deluxe");
    assert_eq!(col(&listed[0], "floor"), "2");
    assert_eq!(col(&listed[0], "status"), "vacant");
    assert_eq!(listed[0].get("current_guest"), None);

    let booked = book(&client, room, "2024-01-10", "2024-01-12", "ada@example.com").await;
    let reservation_id = col(&booked, "id").to_string();
    let confirmation = col(&booked, "confirmation_number").to_string();
    assert!(confirmation.starts_with("HTL"));
    assert_eq!(col(&booked, "status"), "confirmed");
    assert_eq!(col(&booked, "nights"), "2");
    assert_eq!(col(&booked, "room_number"), "204");

    let checked_in = rows(
        &client,
        &format!("INSERT INTO check_ins (reservation_id) VALUES ('{reservation_id}')"),
    )
    .await;
    assert_eq!(col(&checked_in[0], "status"), "checked_in");
    let listed = rows(&client, "SELECT * FROM rooms").await;
    assert_eq!(col(&listed[0], "status"), "occupied");
    assert_eq!(col(&listed[0], "current_guest"), "Ada Lovelace");

    let stats = rows(&client, "SELECT * FROM stats WHERE as_of = '2024-01-10'").await;
    assert_eq!(col(&stats[0], "occupied_rooms"), "1");
    assert_eq!(col(&stats[0], "occupancy_rate"), "100.00");
    assert_eq!(col(&stats[0], "revenue_today"), "398.00");

    let checked_out = rows(
        &client,
        &format!("INSERT INTO check_outs VALUES ('{reservation_id}')"),
    )
    .await;
    assert_eq!(col(&checked_out[0], "status"), "checked_out");
    assert_eq!(col(&checked_out[0], "total_amount"), "398.00");

    let hits = rows(
        &client,
        &format!("SELECT * FROM directory WHERE q = '{}'", confirmation.to_lowercase()),
    )
    .await;
    assert_eq!(col(&hits[0], "kind"), "reservation");
    assert_eq!(col(&hits[0], "status"), "checked_out");

    assert_eq!(engine.guest_count(), 1);
}

#[tokio::test]
async fn overlap_and_bad_input_map_to_sqlstate() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let room = provision(&client, "101", 1).await;

    book(&client, room, "2024-01-10", "2024-01-15", "a@example.com").await;
    let overlap = format!(
        "INSERT INTO reservations VALUES ('{room}', '2024-01-12', '2024-01-20', 100, 'B', 'b@example.com')"
    );
    assert_eq!(sqlstate(&client, &overlap).await, "23P01");

    // Back-to-back is fine.
    book(&client, room, "2024-01-15", "2024-01-20", "b@example.com").await;

    let inverted = format!(
        "INSERT INTO reservations VALUES ('{room}', '2024-02-10', '2024-02-01', 100, 'C', 'c@example.com')"
    );
    assert_eq!(sqlstate(&client, &inverted).await, "22023");

    let unknown_room = format!(
        "INSERT INTO reservations VALUES ('{}', '2024-02-01', '2024-02-03', 100, 'C', 'c@example.com')",
        Ulid::new()
    );
    assert_eq!(sqlstate(&client, &unknown_room).await, "P0002");

    let early_checkout = format!("INSERT INTO check_outs VALUES ('{}')", Ulid::new());
    assert_eq!(sqlstate(&client, &early_checkout).await, "P0002");

    let fake_occupied = format!("INSERT INTO room_status VALUES ('{room}', 'occupied')");
    assert_eq!(sqlstate(&client, &fake_occupied).await, "55000");

    assert_eq!(sqlstate(&client, "SELECT * FROM minibar").await, "42601");
    assert_eq!(rows(&client, "SELECT * FROM reservations").await.len(), 2);
}

#[tokio::test]
async fn available_rooms_over_extended_protocol() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let busy = provision(&client, "301", 3).await;
    provision(&client, "302", 3).await;
    provision(&client, "101", 1).await;
    book(&client, busy, "2024-06-01", "2024-06-05", "x@example.com").await;

    let free = client
        .query(
            "SELECT * FROM available_rooms WHERE check_in = $1 AND check_out = $2",
            &[&"2024-06-03", &"2024-06-04"],
        )
        .await
        .unwrap();
    let numbers: Vec<String> = free.iter().map(|r| r.get("room_number")).collect();
    assert_eq!(numbers, vec!["101", "302"]);
}

#[tokio::test]
async fn guest_search_dedups_by_email() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr).await;
    let a = provision(&client, "401", 4).await;
    let b = provision(&client, "402", 4).await;

    book(&client, a, "2024-03-01", "2024-03-02", "ada@example.com").await;
    book(&client, b, "2024-03-01", "2024-03-02", "ADA@Example.com").await;

    let guests = rows(&client, "SELECT * FROM guests WHERE q = 'lovelace'").await;
    assert_eq!(guests.len(), 1);
    assert_eq!(col(&guests[0], "email"), "ada@example.com");
    assert_eq!(col(&guests[0], "phone"), "+44 20 7946 0000");
    assert_eq!(guests[0].get("id_number"), None);

    let hits = rows(&client, "SELECT * FROM directory WHERE q = 'ada@'").await;
    assert_eq!(hits.len(), 1);
    assert_eq!(col(&hits[0], "kind"), "guest");
    assert!(col(&hits[0], "confirmation_number").starts_with("HTL"));
}
