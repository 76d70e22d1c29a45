use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::SendRequest;
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use ulid::Ulid;

use studyspot::clock::format_timestamp;

const HOUR: i64 = 3_600_000; // 1 hour in ms
const DAY: i64 = 24 * HOUR;
/// 2030-01-01T00:00:00Z
const BASE_DAY: i64 = 1_893_456_000_000;
/// One-hour slots inside 08:00-22:00.
const SLOTS_PER_DAY: i64 = 14;

struct Client {
    sender: SendRequest<Full<Bytes>>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect failed");
        let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .expect("handshake failed");
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                eprintln!("connection error: {e}");
            }
        });
        Self { sender }
    }

    async fn send(&mut self, method: Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = body.map_or_else(Bytes::new, |v| Bytes::from(v.to_string()));
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(hyper::header::HOST, "localhost")
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Full::new(body))
            .expect("valid request");
        self.sender.ready().await.expect("connection closed");
        let response = self.sender.send_request(request).await.expect("request failed");
        let status = response.status();
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn create_room(&mut self, label: &str) -> String {
        let name = format!("bench {label} {}", Ulid::new());
        let (status, body) = self.send(Method::POST, "/rooms", Some(json!({ "name": name }))).await;
        assert_eq!(status, StatusCode::OK, "create room: {body}");
        body["id"].as_str().expect("room id").to_string()
    }

    async fn book_slot(&mut self, room_id: &str, slot: i64) -> StatusCode {
        let start = BASE_DAY + (slot / SLOTS_PER_DAY) * DAY + (8 + slot % SLOTS_PER_DAY) * HOUR;
        let body = json!({
            "room_id": room_id,
            "user_name": "bench",
            "start_time": format_timestamp(start),
            "end_time": format_timestamp(start + HOUR),
        });
        self.send(Method::POST, "/bookings", Some(body)).await.0
    }
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

async fn phase1_sequential(addr: SocketAddr) {
    let mut client = Client::connect(addr).await;
    let room = client.create_room("sequential").await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for slot in 0..n as i64 {
        let t = Instant::now();
        let status = client.book_slot(&room, slot).await;
        assert_eq!(status, StatusCode::OK);
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(addr: SocketAddr) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for i in 0..n_tasks {
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            let room = client.create_room(&format!("concurrent {i}")).await;
            for slot in 0..n_per_task {
                client.book_slot(&room, slot).await;
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

/// Many clients racing for the same slots of one room.
async fn phase3_contention(addr: SocketAddr) {
    let n_tasks = 20;
    let n_slots = 100;

    let room = Client::connect(addr).await.create_room("contended").await;
    let room = Arc::new(room);
    let won = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let room = room.clone();
        let won = won.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            for slot in 0..n_slots {
                if client.book_slot(&room, slot).await == StatusCode::OK {
                    won.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let won = won.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} clients x {n_slots} slots: {won} won (expected {n_slots}) in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(won, n_slots as usize, "double booking detected");
}

async fn phase4_read_under_load(addr: SocketAddr) {
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            let room = client.create_room(&format!("writer {w}")).await;
            let mut slot = 0;
            while !stop.load(Ordering::Relaxed) {
                client.book_slot(&room, slot).await;
                slot += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 200;
    let mut reader_handles = Vec::new();

    for r in 0..n_readers {
        reader_handles.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            let room = client.create_room(&format!("reader {r}")).await;
            for slot in 0..50 {
                client.book_slot(&room, slot).await;
            }

            let mut latencies = Vec::with_capacity(reads_per_reader * 2);
            for i in 0..reads_per_reader {
                let t = Instant::now();
                client.send(Method::GET, &format!("/bookings?room_id={room}"), None).await;
                latencies.push(t.elapsed());

                let date = format_timestamp(BASE_DAY + (i as i64 % 4) * DAY);
                let t = Instant::now();
                client
                    .send(Method::GET, &format!("/rooms/{room}/availability?date={}", &date[..10]), None)
                    .await;
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("listing + availability", &mut all_latencies);
}

async fn phase5_connection_storm(addr: SocketAddr) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for c in 0..n_conns {
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            let room = client.create_room(&format!("storm {c}")).await;
            for slot in 0..ops_per_conn {
                client.book_slot(&room, slot).await;
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("STUDYSPOT_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port = std::env::var("STUDYSPOT_PORT").unwrap_or_else(|_| "5000".into());
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .expect("invalid STUDYSPOT_HOST/STUDYSPOT_PORT");

    println!("=== studyspot stress benchmark ===");
    println!("target: {addr}\n");

    // Every phase books into its own freshly named rooms.

    println!("[phase 1] sequential write throughput");
    phase1_sequential(addr).await;

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent(addr).await;

    println!("\n[phase 3] contended slots");
    phase3_contention(addr).await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load(addr).await;

    println!("\n[phase 5] connection storm");
    phase5_connection_storm(addr).await;

    println!("\n=== benchmark complete ===");
}
