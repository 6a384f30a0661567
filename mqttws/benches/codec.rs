//! Codec benchmarks.
//!
//! Run with: cargo bench -p mqttws --bench codec

use std::hint::black_box;
use std::time::Instant;

use bytes::Bytes;
use mqttws::protocol::{codec, v4};
use mqttws::{ClientConfig, QoS};

const ITERATIONS: u32 = 100_000;

fn bench<F: FnMut()>(name: &str, mut f: F) {
    for _ in 0..1000 {
        f();
    }

    let start = Instant::now();
    for _ in 0..ITERATIONS {
        f();
    }
    let per_op = start.elapsed() / ITERATIONS;
    let ops_per_sec = match per_op.as_nanos() {
        0 => 0,
        nanos => 1_000_000_000 / nanos,
    };

    println!(
        "{:40} {:>10.2?} per op, {:>12} ops/sec",
        name,
        per_op,
        format_number(ops_per_sec as u64)
    );
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

fn bench_remaining_length() {
    println!("\n=== Remaining Length ===");

    for (value, label) in [(127, "1 byte"), (16_383, "2 bytes"), (268_435_455, "4 bytes")] {
        let encoded = codec::encode_remaining_length(value).unwrap_or_default();
        bench(&format!("encode {value} ({label})"), || {
            let _ = black_box(codec::encode_remaining_length(black_box(value)));
        });
        bench(&format!("decode {value} ({label})"), || {
            let _ = black_box(codec::decode_remaining_length(black_box(&encoded), 0));
        });
    }
}

fn bench_strings() {
    println!("\n=== Strings ===");

    let ascii = "sensors/building-1/floor-2/temperature";
    let mixed = "设备/温度/🔌/状态";
    for (label, s) in [("ascii", ascii), ("cjk + emoji", mixed)] {
        let units: Vec<u16> = s.encode_utf16().collect();
        let encoded = codec::encode_utf16(&units);
        bench(&format!("encode_utf16 {label}"), || {
            black_box(codec::encode_utf16(black_box(&units)));
        });
        bench(&format!("decode_string {label}"), || {
            let _ = black_box(codec::decode_string(black_box(&encoded)));
        });
    }
}

fn bench_packets() {
    println!("\n=== Packets ===");

    let config = ClientConfig::new("broker.emqx.io", "bench-client").with_credentials("user", "secret");
    bench("encode CONNECT", || {
        let _ = black_box(v4::encode_connect(black_box(&config)));
    });

    bench("encode SUBSCRIBE", || {
        let _ = black_box(v4::encode_subscribe(1, "sensors/+/temperature", QoS::AtMostOnce));
    });

    for size in [16usize, 1024, 65_536] {
        let payload = vec![0xA5u8; size];
        let frame = v4::encode_publish("sensors/t1", &payload, QoS::AtMostOnce).unwrap_or_default();
        bench(&format!("encode PUBLISH {size}B"), || {
            let _ = black_box(v4::encode_publish("sensors/t1", black_box(&payload), QoS::AtMostOnce));
        });
        bench(&format!("decode PUBLISH {size}B"), || {
            if let Ok(Some(raw)) = v4::decode(black_box(&frame)) {
                let _ = black_box(v4::Packet::parse(&raw));
            }
        });
    }
}

fn bench_throughput() {
    println!("\n=== Throughput ===");

    let frames: Vec<Bytes> = (0..1000)
        .map(|i| {
            v4::encode_publish(&format!("devices/{i}/state"), b"{\"on\":true}", QoS::AtMostOnce)
                .unwrap_or_default()
        })
        .collect();
    let bytes: usize = frames.iter().map(Bytes::len).sum();

    let start = Instant::now();
    for _ in 0..100 {
        for frame in &frames {
            if let Ok(Some(raw)) = v4::decode(frame) {
                let _ = black_box(v4::Packet::parse(&raw));
            }
        }
    }
    let elapsed = start.elapsed();
    let mb = (bytes * 100) as f64 / (1024.0 * 1024.0);
    println!(
        "decoded {} frames ({:.2} MiB) in {:.2?}: {:.2} MiB/s",
        frames.len() * 100,
        mb,
        elapsed,
        mb / elapsed.as_secs_f64()
    );
}

fn main() {
    println!("mqttws Codec Benchmark");
    println!("======================");
    println!("Iterations per benchmark: {ITERATIONS}");

    bench_remaining_length();
    bench_strings();
    bench_packets();
    bench_throughput();

    println!("\nBenchmark complete!");
}
