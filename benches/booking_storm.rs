use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const ROOMS: usize = 40;
const CLIENTS: usize = 32;
const BOOKINGS_PER_CLIENT: usize = 50;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("hotel")
        .user("bench")
        .password(std::env::var("ROOMLEDGER_PASSWORD").unwrap_or_else(|_| "roomledger".into()));

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

async fn setup(client: &tokio_postgres::Client) -> Vec<Ulid> {
    let mut rooms = Vec::with_capacity(ROOMS);
    for n in 0..ROOMS {
        let id = Ulid::new();
        // Unique per run so the bench can be repeated against one server.
        let number = format!("B{n:02}-{}", &Ulid::new().to_string()[20..]);
        client
            .batch_execute(&format!(
                "INSERT INTO rooms (id, room_number, room_type, floor, rate) VALUES ('{id}', '{number}', 'standard', {}, 125.00)",
                n / 10 + 1
            ))
            .await
            .unwrap();
        rooms.push(id);
    }
    println!("  provisioned {} rooms", rooms.len());
    rooms
}

/// Every client hammers the same rooms with random short stays, so most
/// attempts race for a night someone else already holds.
async fn contended_storm(host: &str, port: u16, rooms: Arc<Vec<Ulid>>, base: NaiveDate) {
    println!("\n== contended bookings: {CLIENTS} clients x {BOOKINGS_PER_CLIENT} attempts ==");
    let confirmed = Arc::new(AtomicU64::new(0));
    let unavailable = Arc::new(AtomicU64::new(0));
    let started = Instant::now();

    let mut handles = Vec::new();
    for c in 0..CLIENTS {
        let client = connect(host, port).await;
        let rooms = rooms.clone();
        let confirmed = confirmed.clone();
        let unavailable = unavailable.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(BOOKINGS_PER_CLIENT);
            for i in 0..BOOKINGS_PER_CLIENT {
                let entropy = Ulid::new().random();
                let room = rooms[(entropy % rooms.len() as u128) as usize];
                let offset = ((entropy >> 8) % 60) as u64;
                let nights = ((entropy >> 16) % 4 + 1) as u64;
                let check_in = base + Days::new(offset);
                let check_out = check_in + Days::new(nights);
                let sql = format!(
                    "INSERT INTO reservations VALUES ('{room}', '{check_in}', '{check_out}', {}, 'Bench Guest', 'guest{c}-{i}@bench.test')",
                    125 * nights
                );
                let t = Instant::now();
                match client.simple_query(&sql).await {
                    Ok(_) => {
                        confirmed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) if e.code().is_some_and(|s| s.code() == "23P01") => {
                        unavailable.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => eprintln!("booking failed: {e}"),
                }
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut latencies = Vec::new();
    for h in handles {
        latencies.extend(h.await.unwrap());
    }
    let elapsed = started.elapsed();
    let total = latencies.len();
    println!(
        "  {total} attempts in {:.2}s ({:.0}/s): {} confirmed, {} unavailable",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64(),
        confirmed.load(Ordering::Relaxed),
        unavailable.load(Ordering::Relaxed),
    );
    print_latency("create_reservation", &mut latencies);
}

async fn read_mix(client: &tokio_postgres::Client, base: NaiveDate) {
    println!("\n== reads ==");
    let mut availability = Vec::new();
    let mut stats = Vec::new();
    for n in 0..200u64 {
        let check_in = base + Days::new(n % 60);
        let check_out = check_in + Days::new(2);
        let t = Instant::now();
        client
            .simple_query(&format!(
                "SELECT * FROM available_rooms WHERE check_in = '{check_in}' AND check_out = '{check_out}'"
            ))
            .await
            .unwrap();
        availability.push(t.elapsed());

        let t = Instant::now();
        client
            .simple_query(&format!("SELECT * FROM stats WHERE as_of = '{check_in}'"))
            .await
            .unwrap();
        stats.push(t.elapsed());
    }
    print_latency("available_rooms", &mut availability);
    print_latency("stats", &mut stats);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("ROOMLEDGER_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("ROOMLEDGER_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5433);

    println!("booking storm against {host}:{port}");
    let client = connect(&host, port).await;
    let rooms = Arc::new(setup(&client).await);
    let base = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap_or_default();

    contended_storm(&host, port, rooms, base).await;
    read_mix(&client, base).await;
}
