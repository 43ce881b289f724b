use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Client, Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("hotel")
        .user("bench")
        .password(std::env::var("HOTELDB_PASSWORD").unwrap_or_else(|_| "hoteldb".into()));

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

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).expect("valid date")
}

fn night(offset: u64) -> NaiveDate {
    base_date() + Days::new(offset)
}

async fn add_room(client: &Client, number: &str) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, number, room_type, price) VALUES ('{id}', '{number}', 'bench', 120.00)"
        ))
        .await
        .unwrap();
    id
}

async fn add_guest(client: &Client) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO guests (id, full_name, email) VALUES ('{id}', 'Bench Guest', 'bench-{id}@example.com')"
        ))
        .await
        .unwrap();
    id
}

fn booking_sql(room: Ulid, guest: Ulid, check_in: NaiveDate, check_out: NaiveDate) -> String {
    format!(
        "INSERT INTO bookings (id, room_id, guest_id, check_in, check_out) \
         VALUES ('{}', '{room}', '{guest}', '{check_in}', '{check_out}')",
        Ulid::new()
    )
}

/// One client books consecutive single nights on one room.
async fn phase1_sequential(host: &str, port: u16, run: &str) {
    let client = connect(host, port).await;
    let room = add_room(&client, &format!("{run}s")).await;
    let guest = add_guest(&client).await;

    let n = 300;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n as u64 {
        let t = Instant::now();
        client
            .batch_execute(&booking_sql(room, guest, night(i), night(i + 1)))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    println!(
        "  {n} bookings in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
    print_latency("write latency", &mut latencies);
}

/// Every task asks for the same room and nights each round. Exactly one
/// booking per round may succeed.
async fn phase2_contention(host: &str, port: u16, run: &str) {
    let setup = connect(host, port).await;
    let room = add_room(&setup, &format!("{run}h")).await;
    let guest = add_guest(&setup).await;
    drop(setup);

    let n_tasks = 16;
    let rounds = 100u64;
    let wins = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let wins = wins.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(rounds as usize);
            for r in 0..rounds {
                let check_in = night(1000 + r * 3);
                let t = Instant::now();
                match client
                    .batch_execute(&booking_sql(room, guest, check_in, check_in + Days::new(2)))
                    .await
                {
                    Ok(()) => {
                        wins.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        let code = e.as_db_error().map(|db| db.code().code().to_string());
                        if matches!(code.as_deref(), Some("23P01") | Some("40001")) {
                            conflicts.fetch_add(1, Ordering::Relaxed);
                        } else {
                            eprintln!("unexpected error: {e}");
                        }
                    }
                }
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }
    let elapsed = start.elapsed();
    let wins = wins.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {rounds} rounds in {:.2}s: {wins} booked, {} refused",
        elapsed.as_secs_f64(),
        conflicts.load(Ordering::Relaxed)
    );
    if wins != rounds as usize {
        println!("  !! expected exactly {rounds} winning bookings, got {wins}");
    }
    print_latency("contended write latency", &mut all);
}

/// Availability reads on one room while writers fill other rooms.
async fn phase3_read_under_load(host: &str, port: u16, run: &str) {
    let setup = connect(host, port).await;
    let room = add_room(&setup, &format!("{run}r")).await;
    let guest = add_guest(&setup).await;
    for i in 0..50u64 {
        setup
            .batch_execute(&booking_sql(room, guest, night(i * 4), night(i * 4 + 2)))
            .await
            .unwrap();
    }
    drop(setup);

    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writers = Vec::new();
    for w in 0..4 {
        let host = host.to_string();
        let stop = stop.clone();
        let run = run.to_string();
        writers.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let room = add_room(&client, &format!("{run}w{w}")).await;
            let guest = add_guest(&client).await;
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) && i < 3000 {
                let _ = client
                    .batch_execute(&booking_sql(room, guest, night(i), night(i + 1)))
                    .await;
                i += 1;
            }
        }));
    }

    let window_end = night(400);
    let mut readers = Vec::new();
    for _ in 0..8 {
        let host = host.to_string();
        readers.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(300);
            for _ in 0..300 {
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        r#"SELECT * FROM availability WHERE room_id = '{room}' AND start >= '{}' AND "end" <= '{window_end}'"#,
                        base_date()
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("availability query", &mut all);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("HOTELDB_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("HOTELDB_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid HOTELDB_PORT");
    // Room numbers are unique, so each run tags its rooms.
    let run = Ulid::new().to_string()[20..].to_string();

    println!("=== hoteldb contention benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential bookings");
    phase1_sequential(&host, port, &run).await;

    println!("\n[phase 2] conflicting bookings on one room");
    phase2_contention(&host, port, &run).await;

    println!("\n[phase 3] availability reads under write load");
    phase3_read_under_load(&host, port, &run).await;

    println!("\n=== benchmark complete ===");
}
