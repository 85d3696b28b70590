//! Channel benchmarks: runnel vs crossbeam vs std
//!
//! Bounded producer/consumer throughput and two-ready select latency, with
//! equivalent capacities where the baseline supports them.

use std::thread;

use criterion::{Criterion, criterion_group, criterion_main};
use runnel::{Chan, select};

const BUFFER_SIZE: usize = 1024;
const TOTAL_MESSAGES: usize = 100_000;

fn throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput");

    group.bench_function("runnel", |b| {
        b.iter(|| {
            let ch = Chan::new(BUFFER_SIZE);
            let tx = ch.clone();
            let producer = thread::spawn(move || {
                for i in 0..TOTAL_MESSAGES {
                    tx.send(i);
                }
                tx.close();
            });
            let mut n = 0;
            for _ in &ch {
                n += 1;
            }
            producer.join().unwrap();
            assert_eq!(n, TOTAL_MESSAGES);
        })
    });

    group.bench_function("crossbeam", |b| {
        b.iter(|| {
            let (tx, rx) = crossbeam_channel::bounded(BUFFER_SIZE);
            let producer = thread::spawn(move || {
                for i in 0..TOTAL_MESSAGES {
                    tx.send(i).unwrap();
                }
            });
            let mut n = 0;
            while rx.recv().is_ok() {
                n += 1;
            }
            producer.join().unwrap();
            assert_eq!(n, TOTAL_MESSAGES);
        })
    });

    group.bench_function("std", |b| {
        b.iter(|| {
            let (tx, rx) = std::sync::mpsc::sync_channel(BUFFER_SIZE);
            let producer = thread::spawn(move || {
                for i in 0..TOTAL_MESSAGES {
                    tx.send(i).unwrap();
                }
            });
            let mut n = 0;
            while rx.recv().is_ok() {
                n += 1;
            }
            producer.join().unwrap();
            assert_eq!(n, TOTAL_MESSAGES);
        })
    });

    group.finish();
}

fn rendezvous_ping(c: &mut Criterion) {
    let mut group = c.benchmark_group("rendezvous_ping");

    group.bench_function("runnel", |b| {
        let ping = Chan::new(0);
        let pong = Chan::new(0);
        let (prx, ptx) = (ping.clone(), pong.clone());
        let echo = thread::spawn(move || {
            for v in &prx {
                ptx.send(v);
            }
        });
        b.iter(|| {
            ping.send(1usize);
            pong.recv().unwrap();
        });
        ping.close();
        echo.join().unwrap();
    });

    group.bench_function("crossbeam", |b| {
        let (ping_tx, ping_rx) = crossbeam_channel::bounded(0);
        let (pong_tx, pong_rx) = crossbeam_channel::bounded(0);
        let echo = thread::spawn(move || {
            while let Ok(v) = ping_rx.recv() {
                pong_tx.send(v).unwrap();
            }
        });
        b.iter(|| {
            ping_tx.send(1usize).unwrap();
            pong_rx.recv().unwrap();
        });
        drop(ping_tx);
        echo.join().unwrap();
    });

    group.finish();
}

fn select_two_ready(c: &mut Criterion) {
    c.bench_function("select_two_ready", |b| {
        let c1 = Chan::new(1);
        let c2 = Chan::new(1);
        b.iter(|| {
            c1.send(1);
            c2.send(2);
            let mut v1 = None;
            let mut v2 = None;
            let i = select(&mut [c1.recv_case(&mut v1), c2.recv_case(&mut v2)]);
            // drain the loser so the next round starts level
            if i == 0 {
                c2.recv().unwrap()
            } else {
                c1.recv().unwrap()
            }
        })
    });
}

criterion_group!(benches, throughput, rendezvous_ping, select_two_ready);
criterion_main!(benches);
