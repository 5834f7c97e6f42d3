//! 虚拟节拍器：周期触发、非阻塞追赶。
//!
//! # 教案式说明
//! - **意图 (Why)**：一次 `forward` 可能跨越多个周期；节拍器必须逐周期触发以保证顺序，
//!   又不能因为消费者来不及读取而阻塞引擎或无限堆积；
//! - **逻辑 (How)**：每次触发向容量为 1 的通道尝试投递当前计划时间，然后把计划时间推进一个周期并留在登记表中；
//!   排空循环会在同一次推进中再次考虑它，直到计划时间越过截止点；
//! - **契约 (What)**：通道已满时新节拍被丢弃（消费者读到的是最早未读的那一拍），丢弃次数计入统计；
//!   `stop` 幂等，句柄被丢弃时自动停止；
//!   下一拍的时间无法表示时节拍器停在原地：仍在册，但不再触发。

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_channel::Sender;

use crate::clock::{TimeReceiver, Ticker};

use super::Engine;
use super::registry::{Delivery, EntryId, Executable, Firing, Slot, SlotKind};

pub(crate) struct TickerSlot {
    next: Option<SystemTime>,
    interval: Duration,
    sender: Sender<SystemTime>,
}

impl TickerSlot {
    pub(crate) fn new(
        next: Option<SystemTime>,
        interval: Duration,
        sender: Sender<SystemTime>,
    ) -> Self {
        debug_assert!(!interval.is_zero());
        Self {
            next,
            interval,
            sender,
        }
    }

    /// 截至 `now`，从 `due` 起已经到期的整周期数，至少为 1。
    fn elapsed_periods(&self, due: SystemTime, now: SystemTime) -> u128 {
        let overdue = now.duration_since(due).unwrap_or(Duration::ZERO);
        overdue.as_nanos() / self.interval.as_nanos() + 1
    }
}

impl Executable for TickerSlot {
    fn next_fire_time(&self) -> Option<SystemTime> {
        self.next
    }

    fn fire(&mut self, now: SystemTime) -> Firing {
        let due = self.next.unwrap_or(now);
        let periods = self.elapsed_periods(due, now);
        if periods > 1 {
            tracing::trace!(?due, periods, "ticker catching up");
        }
        self.next = due.checked_add(self.interval);
        if self.next.is_none() {
            tracing::warn!(
                ?due,
                interval = ?self.interval,
                "ticker parked: next tick unrepresentable"
            );
        }
        Firing {
            kind: SlotKind::Ticker,
            due,
            delivery: Delivery::Channel {
                sender: self.sender.clone(),
                value: due,
            },
            retain: true,
        }
    }
}

/// 由 [`crate::VirtualClock`] 创建的节拍器句柄。
pub struct VirtualTicker {
    engine: Arc<Engine>,
    id: EntryId,
    interval: Duration,
    receiver: TimeReceiver,
}

impl VirtualTicker {
    /// 调用方需保证 `interval` 非零。
    pub(crate) fn register(engine: &Arc<Engine>, interval: Duration) -> Self {
        let (sender, receiver) = async_channel::bounded(1);
        let id = {
            let mut state = engine.state.lock();
            let next = state.now.checked_add(interval);
            let id = state.registry.allocate_id();
            state
                .registry
                .insert(id, Slot::Ticker(TickerSlot::new(next, interval, sender)));
            tracing::trace!(entry = %id, ?next, ?interval, "ticker registered");
            id
        };
        Self {
            engine: Arc::clone(engine),
            id,
            interval,
            receiver,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 下一拍的计划时间；已停止或下一拍无法表示时返回 `None`。
    pub fn next_tick(&self) -> Option<SystemTime> {
        self.engine.state.lock().registry.next_fire_time_of(self.id)
    }
}

impl Ticker for VirtualTicker {
    fn receiver(&self) -> &TimeReceiver {
        &self.receiver
    }

    fn stop(&self) {
        if self.engine.state.lock().registry.remove(self.id).is_some() {
            tracing::trace!(entry = %self.id, "ticker stopped");
        }
    }
}

impl Drop for VirtualTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for VirtualTicker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualTicker")
            .field("id", &self.id)
            .field("interval", &self.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn fire_delivers_current_tick_and_advances_one_interval() {
        let (sender, receiver) = async_channel::bounded(1);
        let mut slot = TickerSlot::new(Some(at(10)), Duration::from_secs(10), sender);
        let firing = slot.fire(at(35));
        assert!(firing.retain);
        assert_eq!(firing.due, at(10));
        assert_eq!(slot.next_fire_time(), Some(at(20)));
        match firing.delivery {
            Delivery::Channel { value, .. } => assert_eq!(value, at(10)),
            Delivery::Callback(_) => panic!("tickers deliver on channels"),
        }
        drop(receiver);
    }

    #[test]
    fn elapsed_periods_counts_whole_intervals() {
        let (sender, _receiver) = async_channel::bounded(1);
        let slot = TickerSlot::new(Some(at(10)), Duration::from_secs(10), sender);
        assert_eq!(slot.elapsed_periods(at(10), at(10)), 1);
        assert_eq!(slot.elapsed_periods(at(10), at(19)), 1);
        assert_eq!(slot.elapsed_periods(at(10), at(35)), 3);
    }

    #[test]
    fn dropping_the_handle_deregisters() {
        let clock = crate::VirtualClock::new();
        let ticker = clock.create_ticker(Duration::from_secs(1));
        assert_eq!(clock.pending(), 1);
        assert_eq!(ticker.next_tick(), Some(at(1)));
        drop(ticker);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn unrepresentable_interval_never_ticks() {
        let clock = crate::VirtualClock::new();
        let ticker = clock.create_ticker(Duration::MAX);
        assert_eq!(clock.pending(), 1);
        assert_eq!(ticker.next_tick(), None);
        clock.forward(Duration::from_secs(86_400 * 365));
        assert!(ticker.receiver().try_recv().is_err());
    }
}
