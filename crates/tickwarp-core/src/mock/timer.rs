//! 虚拟定时器：单次触发的状态机。
//!
//! # 教案式说明
//! - **意图 (Why)**：在虚拟时间下复刻标准定时器的 `stop`/`reset` 语义，包括“返回调用前是否激活”的约定；
//! - **逻辑 (How)**：激活与否完全由“是否在登记表中”决定。句柄只保存自己的 [`EntryId`] 与投递方式，
//!   `stop`/`reset`/触发全部在同一把登记表锁下完成，三者彼此线性化，不存在“已停止却仍在表中”的中间态；
//! - **契约 (What)**：
//!   - 触发时向通道非阻塞投递 `due` 时间点，或调用回调；二者择一；
//!   - 触发后自动出表，`stop` 返回 `false`，`reset` 返回 `false` 并重新入表；
//!   - 通道中仍有未读取的旧值时，新值被丢弃并计入统计；
//!   - 时长大到触发时间无法表示时视为“永不触发”：定时器仍在册、可停止，但任何推进都不会触发它。

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_channel::Sender;
use parking_lot::Mutex;

use crate::clock::{TimeReceiver, Timer, TimerCallback};

use super::Engine;
use super::registry::{Delivery, EntryId, Executable, Firing, Slot, SlotKind};

/// 定时器的投递方式。句柄与槽位各持一份，重新激活时由句柄复制回槽位。
#[derive(Clone)]
pub(crate) enum TimerDelivery {
    Channel(Sender<SystemTime>),
    Callback(Arc<Mutex<TimerCallback>>),
}

impl TimerDelivery {
    fn to_delivery(&self, due: SystemTime) -> Delivery {
        match self {
            Self::Channel(sender) => Delivery::Channel {
                sender: sender.clone(),
                value: due,
            },
            Self::Callback(callback) => Delivery::Callback(Arc::clone(callback)),
        }
    }
}

/// 登记表中的定时器槽位；`due` 为 `None` 表示永不触发。
pub(crate) struct TimerSlot {
    due: Option<SystemTime>,
    delivery: TimerDelivery,
}

impl TimerSlot {
    pub(crate) fn new(due: Option<SystemTime>, delivery: TimerDelivery) -> Self {
        Self { due, delivery }
    }

    #[cfg(test)]
    pub(crate) fn channel(due: SystemTime, sender: Sender<SystemTime>) -> Self {
        Self::new(Some(due), TimerDelivery::Channel(sender))
    }

    pub(crate) fn reschedule(&mut self, due: Option<SystemTime>) {
        self.due = due;
    }
}

impl Executable for TimerSlot {
    fn next_fire_time(&self) -> Option<SystemTime> {
        self.due
    }

    fn fire(&mut self, now: SystemTime) -> Firing {
        // 只有索引中的项会被触发，而索引只收录可表示的触发时间。
        let due = self.due.unwrap_or(now);
        Firing {
            kind: SlotKind::Timer,
            due,
            delivery: self.delivery.to_delivery(due),
            retain: false,
        }
    }
}

/// 由 [`crate::VirtualClock`] 创建的定时器句柄。
///
/// 句柄被丢弃时定时器仍保持在册（`after` 依赖这一点）；如需取消请显式调用 [`Timer::stop`]。
pub struct VirtualTimer {
    engine: Arc<Engine>,
    id: EntryId,
    delivery: TimerDelivery,
    receiver: Option<TimeReceiver>,
}

impl VirtualTimer {
    pub(crate) fn register(
        engine: &Arc<Engine>,
        duration: Duration,
        delivery: TimerDelivery,
        receiver: Option<TimeReceiver>,
    ) -> Self {
        let id = {
            let mut state = engine.state.lock();
            let due = state.now.checked_add(duration);
            let id = state.registry.allocate_id();
            state
                .registry
                .insert(id, Slot::Timer(TimerSlot::new(due, delivery.clone())));
            tracing::trace!(entry = %id, ?due, "timer registered");
            id
        };
        Self {
            engine: Arc::clone(engine),
            id,
            delivery,
            receiver,
        }
    }

    /// 定时器当前是否在册（尚未触发且未被停止）。
    pub fn is_active(&self) -> bool {
        self.engine.state.lock().registry.contains(self.id)
    }

    /// 在册且触发时间可表示时返回计划触发时间；已触发、已停止或永不触发时返回 `None`。
    pub fn due(&self) -> Option<SystemTime> {
        self.engine.state.lock().registry.next_fire_time_of(self.id)
    }
}

impl Timer for VirtualTimer {
    fn receiver(&self) -> Option<&TimeReceiver> {
        self.receiver.as_ref()
    }

    fn stop(&self) -> bool {
        let stopped = self.engine.state.lock().registry.remove(self.id).is_some();
        tracing::trace!(entry = %self.id, stopped, "timer stop");
        stopped
    }

    fn reset(&self, duration: Duration) -> bool {
        let mut state = self.engine.state.lock();
        let due = state.now.checked_add(duration);
        let rescheduled = state.registry.update(self.id, |slot| {
            if let Slot::Timer(timer) = slot {
                timer.reschedule(due);
            }
        });
        let was_active = rescheduled.is_some();
        if !was_active {
            state
                .registry
                .insert(self.id, Slot::Timer(TimerSlot::new(due, self.delivery.clone())));
        }
        tracing::trace!(entry = %self.id, ?due, was_active, "timer reset");
        was_active
    }
}

impl fmt::Debug for VirtualTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.delivery {
            TimerDelivery::Channel(_) => "channel",
            TimerDelivery::Callback(_) => "callback",
        };
        f.debug_struct("VirtualTimer")
            .field("id", &self.id)
            .field("delivery", &kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::VirtualClock;

    #[test]
    fn due_tracks_reset() {
        let clock = VirtualClock::new();
        let timer = clock.create_timer(Duration::from_secs(10));
        assert_eq!(
            timer.due(),
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(10))
        );
        clock.forward(Duration::from_secs(4));
        assert!(timer.reset(Duration::from_secs(10)));
        assert_eq!(
            timer.due(),
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(14))
        );
    }

    #[test]
    fn callback_timer_has_no_receiver_and_runs_once() {
        let clock = VirtualClock::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let timer = clock.create_timer_fn(
            Duration::from_secs(1),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(timer.receiver().is_none());
        clock.forward(Duration::from_secs(5));
        clock.forward(Duration::from_secs(5));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!timer.is_active());
    }

    #[test]
    fn debug_reports_delivery_kind() {
        let clock = VirtualClock::new();
        let timer = clock.create_timer(Duration::from_secs(1));
        assert!(format!("{timer:?}").contains("channel"));
    }

    #[test]
    fn unrepresentable_duration_means_never() {
        let clock = VirtualClock::new();
        let timer = clock.create_timer(Duration::MAX);
        assert!(timer.is_active());
        assert_eq!(timer.due(), None);
        clock.forward(Duration::from_secs(86_400 * 365));
        assert!(timer.is_active());
        assert!(timer.receiver().is_some_and(|rx| rx.try_recv().is_err()));
        assert!(timer.reset(Duration::from_secs(1)));
        assert_eq!(
            timer.due(),
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(86_400 * 365 + 1))
        );
    }
}
