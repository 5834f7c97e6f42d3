//! 虚拟时间引擎。
//!
//! # 设计动机（Why）
//! - 定时器、节拍器与睡眠在 CI 中必须 100% 可复现，且测试不应真的等待；
//! - [`VirtualClock`] 维护独立的“当前时间”，只有测试驱动显式调用 `forward`/`set` 时才前进，
//!   并按触发时间升序执行所有到期的定时器与节拍器。
//!
//! # 行为概览（How）
//! - 引擎状态（当前时间 + 登记表）位于同一把 `parking_lot::Mutex` 之后；
//! - 排空循环每轮加锁取出最早到期项、完成其状态迁移后立即释放锁，再在锁外执行通道投递或用户回调，
//!   因而回调中可以安全地创建、重置、停止定时器，消费者阻塞也不会拖住引擎；
//! - 每轮都重新查看登记表，重新入表且仍未越过截止点的节拍器会在同一次推进中再次触发。
//!
//! # 契约说明（What）
//! - 同一次推进内触发顺序按触发时间非递减；相同时间按创建顺序；
//! - 多线程并发推进同一时钟不受支持（内存安全，但跨推进的顺序无保证）；
//! - 推进结束后可选地让出一次调度（[`VirtualClockConfig::yield_after_advance`]），仅为建议性质。

mod registry;
mod stats;
mod ticker;
mod timer;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_channel::TrySendError;
use parking_lot::Mutex;

use crate::clock::{Clock, TimeReceiver, Ticker, Timer, TimerCallback};
use crate::config::VirtualClockConfig;
use crate::error::{ClockError, Result};

use self::registry::{Delivery, Firing, Registry, SlotKind};
use self::stats::EngineCounters;
use self::timer::TimerDelivery;

pub use self::stats::EngineStats;
pub use self::ticker::VirtualTicker;
pub use self::timer::VirtualTimer;

pub(crate) struct Engine {
    pub(crate) state: Mutex<EngineState>,
    counters: EngineCounters,
    config: VirtualClockConfig,
}

pub(crate) struct EngineState {
    pub(crate) now: SystemTime,
    pub(crate) registry: Registry,
}

/// 手动推进的虚拟时钟。
///
/// `Clone` 得到的句柄共享同一引擎，可分发给被测组件与测试驱动。
///
/// # 使用指引（How）
/// ```
/// use std::time::{Duration, SystemTime};
/// use tickwarp_core::prelude::*;
///
/// let clock = VirtualClock::new();
/// let timer = clock.create_timer(Duration::from_secs(60));
/// clock.forward(Duration::from_secs(59));
/// assert!(timer.receiver().unwrap().try_recv().is_err());
/// clock.forward(Duration::from_secs(1));
/// let fired = timer.receiver().unwrap().try_recv().unwrap();
/// assert_eq!(fired, SystemTime::UNIX_EPOCH + Duration::from_secs(60));
/// ```
#[derive(Clone)]
pub struct VirtualClock {
    engine: Arc<Engine>,
}

impl VirtualClock {
    /// 从 Unix 纪元开始的虚拟时钟。
    pub fn new() -> Self {
        Self::with_config(VirtualClockConfig::default())
    }

    pub fn starting_at(start: SystemTime) -> Self {
        Self::with_config(VirtualClockConfig::default().with_start(start))
    }

    pub fn with_config(config: VirtualClockConfig) -> Self {
        let state = EngineState {
            now: config.start(),
            registry: Registry::default(),
        };
        Self {
            engine: Arc::new(Engine {
                state: Mutex::new(state),
                counters: EngineCounters::default(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &VirtualClockConfig {
        &self.engine.config
    }

    /// 当前虚拟时间。
    pub fn now(&self) -> SystemTime {
        self.engine.state.lock().now
    }

    /// 将时间推进 `delta` 并触发所有到期项。
    ///
    /// # Panics
    /// 推进结果超出 `SystemTime` 可表示范围时 panic；需要可恢复错误请使用 [`Self::try_forward`]。
    pub fn forward(&self, delta: Duration) {
        if let Err(err) = self.try_forward(delta) {
            panic!("{err}");
        }
    }

    /// [`Self::forward`] 的可失败版本，返回推进后的时间。
    pub fn try_forward(&self, delta: Duration) -> Result<SystemTime> {
        let (from, target) = {
            let mut state = self.engine.state.lock();
            let from = state.now;
            let target = from
                .checked_add(delta)
                .ok_or(ClockError::TimeOverflow { base: from, delta })?;
            state.now = target;
            (from, target)
        };
        let fired = self.drain(target);
        tracing::debug!(?from, to = ?target, fired, "virtual clock forwarded");
        self.yield_if_configured();
        Ok(target)
    }

    /// 将时间设为 `target` 并触发所有不晚于它的项。
    ///
    /// 回拨（`target` 早于当前时间）不会触发任何项；在册项的触发时间是绝对值，
    /// 时间再次越过它们时照常触发。
    ///
    /// # Panics
    /// 配置禁止回拨时传入更早的时间会 panic；需要可恢复错误请使用 [`Self::try_set`]。
    pub fn set(&self, target: SystemTime) {
        if let Err(err) = self.try_set(target) {
            panic!("{err}");
        }
    }

    pub fn try_set(&self, target: SystemTime) -> Result<()> {
        let from = {
            let mut state = self.engine.state.lock();
            let current = state.now;
            if target < current {
                if !self.engine.config.allow_backward_set {
                    return Err(ClockError::BackwardSet {
                        current,
                        requested: target,
                    });
                }
                tracing::warn!(?current, requested = ?target, "virtual clock moved backward");
            }
            state.now = target;
            current
        };
        let fired = self.drain(target);
        tracing::debug!(?from, to = ?target, fired, "virtual clock set");
        self.yield_if_configured();
        Ok(())
    }

    /// 直接跳到最晚一个在册单次定时器的触发时间，使所有 `after`/`after_fn` 类定时器完成。
    ///
    /// 节拍器不参与计算，但跳跃途中到期的节拍照常触发。没有在册定时器时只在当前时间排空一次；
    /// 时间不会因此回拨。返回推进后的时间。
    pub fn run_until_idle(&self) -> SystemTime {
        let (from, target) = {
            let mut state = self.engine.state.lock();
            let from = state.now;
            let target = state
                .registry
                .latest_timer_deadline()
                .map_or(from, |latest| latest.max(from));
            state.now = target;
            (from, target)
        };
        let fired = self.drain(target);
        tracing::debug!(?from, to = ?target, fired, "virtual clock ran until idle");
        self.yield_if_configured();
        target
    }

    /// 创建在 `now + duration` 触发、向通道投递的定时器。
    ///
    /// 触发时间超出 `SystemTime` 可表示范围（例如 `Duration::MAX`）时定时器永不触发，
    /// 但仍在册，`stop` 返回 `true`。
    pub fn create_timer(&self, duration: Duration) -> VirtualTimer {
        let (sender, receiver) = async_channel::bounded(1);
        VirtualTimer::register(
            &self.engine,
            duration,
            TimerDelivery::Channel(sender),
            Some(receiver),
        )
    }

    /// 创建在 `now + duration` 执行回调的定时器。
    ///
    /// 回调在推进时间的线程上、登记表锁之外执行；`reset` 后可再次被调用。
    ///
    /// # 注意事项（Gotchas）
    /// - 回调执行时 `now()` 已经是本次推进的目标时间，而不是该定时器自己的触发时间；
    ///   回调中以相对时长新建的定时器从目标时间起算，因此不会在同一次推进中触发；
    /// - 回调若捕获本时钟的克隆，会形成“引擎 → 槽位 → 回调 → 引擎”的引用环，
    ///   定时器既未触发也未被停止时引擎无法释放；需要长期存活的回调应捕获
    ///   [`std::sync::Weak`] 或在结束前显式 `stop`。
    pub fn create_timer_fn<F>(&self, duration: Duration, callback: F) -> VirtualTimer
    where
        F: FnMut() + Send + 'static,
    {
        let callback: TimerCallback = Box::new(callback);
        VirtualTimer::register(
            &self.engine,
            duration,
            TimerDelivery::Callback(Arc::new(Mutex::new(callback))),
            None,
        )
    }

    /// 创建首拍在 `now + interval` 的节拍器。
    ///
    /// # Panics
    /// `interval` 为零时 panic。
    pub fn create_ticker(&self, interval: Duration) -> VirtualTicker {
        match self.try_create_ticker(interval) {
            Ok(ticker) => ticker,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_create_ticker(&self, interval: Duration) -> Result<VirtualTicker> {
        if interval.is_zero() {
            return Err(ClockError::NonPositiveInterval);
        }
        Ok(VirtualTicker::register(&self.engine, interval))
    }

    /// 在册的定时器与节拍器数量。
    pub fn pending(&self) -> usize {
        self.engine.state.lock().registry.len()
    }

    pub fn stats(&self) -> EngineStats {
        let pending = self.pending();
        self.engine.counters.snapshot(pending)
    }

    /// 反复触发不晚于 `deadline` 的最早项，返回触发次数。
    fn drain(&self, deadline: SystemTime) -> usize {
        let mut fired = 0;
        while let Some(firing) = self.fire_next(deadline) {
            fired += 1;
            self.deliver(firing);
        }
        fired
    }

    fn fire_next(&self, deadline: SystemTime) -> Option<Firing> {
        let mut state = self.engine.state.lock();
        let id = state.registry.peek_due(deadline)?;
        let firing = state.registry.fire(id, deadline)?;
        tracing::trace!(
            entry = %id,
            kind = firing.kind.as_str(),
            due = ?firing.due,
            "executable fired"
        );
        Some(firing)
    }

    fn deliver(&self, firing: Firing) {
        let counters = &self.engine.counters;
        match firing.kind {
            SlotKind::Timer => counters.record_timer(),
            SlotKind::Ticker => counters.record_tick(),
        }
        match firing.delivery {
            Delivery::Channel { sender, value } => match sender.try_send(value) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    counters.record_dropped();
                    tracing::debug!(
                        kind = firing.kind.as_str(),
                        due = ?firing.due,
                        "delivery dropped: receiver still holds an unread value"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::trace!(kind = firing.kind.as_str(), "delivery skipped: receiver gone");
                }
            },
            Delivery::Callback(callback) => match callback.try_lock() {
                Some(mut callback) => {
                    counters.record_callback();
                    (*callback)();
                }
                None => {
                    tracing::warn!(due = ?firing.due, "timer callback re-entered itself; skipped");
                }
            },
        }
        if firing.kind == SlotKind::Ticker {
            self.yield_if_configured();
        }
    }

    fn yield_if_configured(&self) {
        if self.engine.config.yield_after_advance {
            std::thread::yield_now();
        }
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.engine.state.lock();
        f.debug_struct("VirtualClock")
            .field("now", &state.now)
            .field("pending", &state.registry.len())
            .finish()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> SystemTime {
        VirtualClock::now(self)
    }

    fn after(&self, duration: Duration) -> TimeReceiver {
        let (sender, receiver) = async_channel::bounded(1);
        // 句柄随即丢弃：槽位持有发送端，触发后槽位出表、通道关闭，但已投递的值仍可读取。
        let _timer = VirtualTimer::register(
            &self.engine,
            duration,
            TimerDelivery::Channel(sender),
            None,
        );
        receiver
    }

    fn after_fn(&self, duration: Duration, callback: TimerCallback) -> Box<dyn Timer> {
        Box::new(self.create_timer_fn(duration, callback))
    }

    fn new_timer(&self, duration: Duration) -> Box<dyn Timer> {
        Box::new(self.create_timer(duration))
    }

    fn new_ticker(&self, interval: Duration) -> Box<dyn Ticker> {
        Box::new(self.create_ticker(interval))
    }
}
