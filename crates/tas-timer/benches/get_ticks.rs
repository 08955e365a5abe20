//! Benchmark for the hot path every intercepted time-returning call takes:
//! `DeterministicTimer::get_ticks`. This call happens on the order of
//! thousands of times per frame in some games (spec.md §9's anti-livelock
//! valve exists precisely because of how hot this path gets), so a
//! regression here is a regression in every game the agent runs under.
//!
//! Run with: cargo bench --package tas-timer --bench get_ticks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tas_protocol::call_kind::CallKind;
use tas_protocol::framerate::FrameRate;
use tas_protocol::movie_config::TimetrackConfig;
use tas_protocol::virtual_time::VirtualTime;
use tas_timer::DeterministicTimer;

fn benchmark_get_ticks_no_boundary(c: &mut Criterion) {
    let timer = DeterministicTimer::new(FrameRate::new(60, 1), VirtualTime::ZERO, TimetrackConfig::all_disabled());

    c.bench_function("get_ticks_main_thread_no_boundary", |b| {
        b.iter(|| black_box(timer.get_ticks(black_box(CallKind::ClockGettimeMonotonic), black_box(true))));
    });
}

fn benchmark_frame_boundary_cycle(c: &mut Criterion) {
    let timer = DeterministicTimer::new(FrameRate::new(60, 1), VirtualTime::ZERO, TimetrackConfig::all_disabled());

    c.bench_function("enter_then_exit_frame_boundary", |b| {
        b.iter(|| {
            black_box(timer.enter_frame_boundary());
            timer.exit_frame_boundary();
        });
    });
}

criterion_group!(benches, benchmark_get_ticks_no_boundary, benchmark_frame_boundary_cycle);
criterion_main!(benches);
