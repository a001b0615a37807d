//! In-process end-to-end throughput benchmark for Parley.
//!
//! Pairs of users exchange messages through the chat service while each
//! recipient consumes its own event stream, exercising rooms, presence,
//! mailboxes and the streamer together.

use futures_util::StreamExt;
use parley_bench::{service, user_ids, NAMESPACE};
use parley_core::ChatConfig;
use parley_protocol::Frame;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;

const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_pairs: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         Parley In-Process Stream Throughput Benchmark        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_stream_benchmark(num_pairs).await;
}

async fn run_stream_benchmark(num_pairs: usize) {
    println!("📊 Stream Benchmark: {} sender/receiver pairs", num_pairs);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let chat = service(
        (num_pairs * 2) as i64,
        ChatConfig {
            max_backlog: Some(4096),
            ..ChatConfig::default()
        },
    );
    let users = user_ids((num_pairs * 2) as i64);

    let delivered = Arc::new(AtomicU64::new(0));
    let running = Arc::new(AtomicBool::new(true));
    let barrier = Arc::new(Barrier::new(num_pairs * 2 + 1));
    let mut handles = Vec::new();

    for pair in users.chunks(2) {
        let (sender, receiver) = (pair[0].clone(), pair[1].clone());
        let room = match chat
            .get_or_create_room(NAMESPACE, &sender, std::slice::from_ref(&receiver))
            .await
        {
            Ok(room) => room,
            Err(e) => {
                eprintln!("Failed to create room: {}", e);
                return;
            }
        };

        // Receiver: count message frames off the stream
        let consumer = {
            let chat = chat.clone();
            let delivered = Arc::clone(&delivered);
            let running = Arc::clone(&running);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                let stream = match chat.stream(NAMESPACE, &receiver).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        eprintln!("Stream for {} failed: {}", receiver, e);
                        barrier.wait().await;
                        return;
                    }
                };
                let mut stream = Box::pin(stream);
                barrier.wait().await;

                while running.load(Ordering::Relaxed) {
                    if let Some(Frame::Event(event)) = stream.next().await {
                        if event.as_message().is_some() {
                            delivered.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        };
        handles.push(consumer);

        // Sender: send as fast as the service accepts
        let producer = {
            let chat = chat.clone();
            let running = Arc::clone(&running);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                while running.load(Ordering::Relaxed) {
                    if let Err(e) = chat.send(NAMESPACE, &room.thread, &sender, "ping", None).await {
                        eprintln!("Send from {} failed: {}", sender, e);
                        break;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };
        handles.push(producer);
    }

    barrier.wait().await;
    println!("✓ All {} streams open", num_pairs);

    // Warmup phase
    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    // Reset counter and start measurement
    delivered.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total = delivered.load(Ordering::SeqCst);
    running.store(false, Ordering::SeqCst);

    let msgs_per_sec = total as f64 / elapsed.as_secs_f64();
    let stats = chat.registry().stats();

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Messages delivered:  {:>12}                           ║", total);
    println!("║  Throughput:          {:>12.0} msg/s                     ║", msgs_per_sec);
    println!("║  Per pair:            {:>12.0} msg/s                     ║", msgs_per_sec / num_pairs as f64);
    println!("║  Mailboxes:           {:>12}                           ║", stats.mailbox_count);
    println!("║  Backlog at end:      {:>12}                           ║", stats.total_backlog);
    println!("╚══════════════════════════════════════════════════════════════╝");

    // Streams only yield on events or heartbeats, so idle consumers are aborted.
    for handle in handles {
        handle.abort();
    }
}
