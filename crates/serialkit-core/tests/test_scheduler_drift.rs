use serialkit_core::Scheduler;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// Deterministic tick offsets around `base_ms`, jittered by up to +/-50%.
fn jittered_ticks(base_ms: u64, total: Duration, seed: u64) -> Vec<Duration> {
    let mut state = seed;
    let mut at = Duration::ZERO;
    let mut ticks = Vec::new();
    while at < total {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let jitter = (state >> 33) % (base_ms + 1);
        let step = base_ms / 2 + jitter;
        at += Duration::from_millis(step.max(1));
        ticks.push(at.min(total));
    }
    ticks
}

fn run(interval_ms: u64, total: Duration, seed: u64) -> usize {
    let scheduler = Scheduler::new();
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let start = Instant::now();
    scheduler.start("drift", Duration::from_millis(interval_ms), move || {
        c.fetch_add(1, Ordering::SeqCst);
    });

    for offset in jittered_ticks(16, total, seed) {
        scheduler.tick(start + offset);
    }
    count.load(Ordering::SeqCst)
}

#[tokio::test(start_paused = true)]
async fn test_long_run_frequency_within_two_percent() {
    for seed in [1, 7, 42] {
        let fired = run(50, Duration::from_secs(30), seed);
        assert!((588..=612).contains(&fired), "seed {}: fired {}", seed, fired);
    }
}

#[tokio::test(start_paused = true)]
async fn test_ten_second_run() {
    let fired = run(50, Duration::from_secs(10), 3);
    assert!((196..=204).contains(&fired), "fired {}", fired);
}

#[tokio::test(start_paused = true)]
async fn test_coarse_ticks_never_burst() {
    // Ticks slower than the interval fire at most once per tick.
    let scheduler = Scheduler::new();
    let start = Instant::now();
    scheduler.start("slow", Duration::from_millis(10), || {});

    for n in 1..=20u64 {
        let fired = scheduler.tick(start + Duration::from_millis(n * 35));
        assert!(fired <= 1);
    }
}
