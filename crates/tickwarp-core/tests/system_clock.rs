//! 真实时钟冒烟测试。
//!
//! 只使用毫秒级时长，并以“带截止时间的轮询”代替精确时序断言，避免 CI 抖动导致误报。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use tickwarp_core::prelude::*;

const PATIENCE: Duration = Duration::from_secs(5);

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// 在截止时间前轮询接收端，返回第一个值。
fn recv_within(receiver: &TimeReceiver, patience: Duration) -> Option<SystemTime> {
    let deadline = Instant::now() + patience;
    loop {
        if let Ok(value) = receiver.try_recv() {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(ms(1));
    }
}

#[test]
fn now_tracks_wall_clock() {
    let clock = SystemClock::new();
    let before = SystemTime::now();
    let observed = clock.now();
    assert!(observed >= before);
}

#[test]
fn sleep_blocks_at_least_the_duration() {
    let clock = SystemClock::new();
    let started = Instant::now();
    clock.sleep(ms(20));
    assert!(started.elapsed() >= ms(20));
}

#[test]
fn after_delivers_a_time_no_earlier_than_requested() {
    let clock = SystemClock::new();
    let requested = clock.now();
    let receiver = clock.after(ms(10));
    let fired = recv_within(&receiver, PATIENCE).expect("after fired");
    assert!(fired >= requested);
}

#[test]
fn timer_fires_and_then_stop_reports_inactive() {
    let clock = SystemClock::new();
    let timer = clock.new_timer(ms(10));
    let receiver = timer.receiver().expect("channel timer");
    assert!(recv_within(receiver, PATIENCE).is_some());
    assert!(!timer.stop());
}

#[test]
fn stopped_timer_never_delivers() {
    let clock = SystemClock::new();
    let timer = clock.new_timer(ms(50));
    assert!(timer.stop());
    thread::sleep(ms(100));
    assert!(timer.receiver().expect("channel").try_recv().is_err());
}

#[test]
fn reset_rearms_a_fired_timer() {
    let clock = SystemClock::new();
    let timer = clock.new_timer(ms(5));
    let receiver = timer.receiver().expect("channel timer").clone();
    assert!(recv_within(&receiver, PATIENCE).is_some());
    assert!(!timer.reset(ms(5)));
    assert!(recv_within(&receiver, PATIENCE).is_some());
}

#[test]
fn reset_of_active_timer_reports_true() {
    let clock = SystemClock::new();
    let timer = clock.new_timer(Duration::from_secs(3600));
    assert!(timer.reset(ms(5)));
    assert!(recv_within(timer.receiver().expect("channel"), PATIENCE).is_some());
}

#[test]
fn after_fn_runs_on_a_background_thread() {
    let clock = SystemClock::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let timer = clock.after_fn(
        ms(5),
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    assert!(timer.receiver().is_none());

    let deadline = Instant::now() + PATIENCE;
    while hits.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "callback never ran");
        thread::sleep(ms(1));
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn ticker_delivers_repeatedly_until_stopped() {
    let clock = SystemClock::new();
    let ticker = clock.new_ticker(ms(5));
    let first = recv_within(ticker.receiver(), PATIENCE).expect("first tick");
    let second = recv_within(ticker.receiver(), PATIENCE).expect("second tick");
    assert!(second >= first);

    ticker.stop();
    // 停止前可能已缓存一拍，先排空再确认不再有新节拍。
    thread::sleep(ms(20));
    while ticker.receiver().try_recv().is_ok() {}
    thread::sleep(ms(30));
    assert!(ticker.receiver().try_recv().is_err());
}
