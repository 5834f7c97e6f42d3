//! 真实时钟实现。
//!
//! # 设计动机（Why）
//! - 生产环境需要与 [`crate::VirtualClock`] 完全相同的能力面，以便组件只依赖 [`Clock`] trait；
//! - 标准库没有可停止/可重置的定时器原语，因此定时器与节拍器由后台线程配合 `parking_lot::Condvar`
//!   实现，避免强依赖任何异步运行时。
//!
//! # 契约说明（What）
//! - `now` 直接返回 [`SystemTime::now`]，`sleep` 直接委托 [`std::thread::sleep`]；
//! - 通道投递同样为非阻塞，消费者不读取不会阻塞后台线程；
//! - 每个激活中的定时器占用一个等待线程，高频场景应考虑自行注入更高效的实现。

mod ticker;
mod timer;

use std::time::{Duration, SystemTime};

use crate::clock::{Clock, TimeReceiver, Ticker, Timer, TimerCallback};
use crate::error::ClockError;

pub use self::ticker::SystemTicker;
pub use self::timer::SystemTimer;

/// 委托宿主时间设施的时钟。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn after(&self, duration: Duration) -> TimeReceiver {
        SystemTimer::detached(duration)
    }

    fn after_fn(&self, duration: Duration, callback: TimerCallback) -> Box<dyn Timer> {
        Box::new(SystemTimer::with_callback(duration, callback))
    }

    fn new_timer(&self, duration: Duration) -> Box<dyn Timer> {
        Box::new(SystemTimer::with_channel(duration))
    }

    fn new_ticker(&self, interval: Duration) -> Box<dyn Ticker> {
        if interval.is_zero() {
            panic!("{}", ClockError::NonPositiveInterval);
        }
        Box::new(SystemTicker::start(interval))
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_and_until_saturate_at_zero() {
        let clock = SystemClock::new();
        let future = clock.now() + Duration::from_secs(3600);
        assert_eq!(clock.since(future), Duration::ZERO);
        assert!(clock.until(future) > Duration::from_secs(3500));
    }

    #[test]
    #[should_panic(expected = "non-positive interval")]
    fn zero_interval_ticker_panics() {
        let _ = SystemClock::new().new_ticker(Duration::ZERO);
    }
}
