//! Benchmarks for flow tracking.

use criterion::{Criterion, criterion_group, criterion_main};
use pnet::packet::ip::IpNextHeaderProtocols;
use std::hint::black_box;
use std::net::{IpAddr, Ipv4Addr};

use pcap_scanner::session::{SessionKey, SessionTracker};

fn key(host: u16, port: u16) -> SessionKey {
    let [hi, lo] = host.to_be_bytes();
    SessionKey::new(
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100)),
        IpAddr::V4(Ipv4Addr::new(10, 0, hi, lo)),
        40000,
        port,
        IpNextHeaderProtocols::Tcp,
    )
}

fn bench_session_tracker(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_tracker");

    let tracker = SessionTracker::new();
    for host in 0..4096 {
        tracker.record(key(host, 443));
    }

    let reply = key(1234, 443).mirrored();
    group.bench_function("contains_hit", |b| {
        b.iter(|| tracker.contains(black_box(&reply.mirrored())));
    });

    let miss = key(1234, 80);
    group.bench_function("contains_miss", |b| {
        b.iter(|| tracker.contains(black_box(&miss)));
    });

    group.bench_function("record_existing", |b| {
        b.iter(|| tracker.record(black_box(key(42, 443))));
    });

    group.finish();
}

criterion_group!(benches, bench_session_tracker);
criterion_main!(benches);
