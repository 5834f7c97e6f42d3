//! 虚拟时钟的登记表：可执行项的 arena 与按触发时间排序的索引。
//!
//! # 教案式说明
//! - **意图 (Why)**：引擎推进时间时需要反复回答“最早到期且不晚于截止点的是哪一项”，
//!   同时定时器的 `stop`/`reset` 需要按标识精确删除或改期；
//! - **逻辑 (How)**：`slots` 以 [`EntryId`] 为键保存槽位本体，`queue` 以 `(触发时间, EntryId)`
//!   排序，最小元素即下一项；所有对槽位触发时间的修改都经由本模块完成，确保索引与槽位同步；
//! - **契约 (What)**：`queue` 恰好包含 `slots` 中每个 `next_fire_time()` 为 `Some` 的项且键值与之相等；
//!   触发时间不可表示（`None`）的项仍在册、可被停止，但永远不会被排空循环取到；
//!   相同触发时间按 `EntryId`（即创建顺序）决胜，保证同一输入序列得到同一触发顺序。

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use async_channel::Sender;
use parking_lot::Mutex;

use crate::clock::TimerCallback;

use super::ticker::TickerSlot;
use super::timer::TimerSlot;

/// 登记表内部的不透明标识，单调递增分配。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct EntryId(u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 引擎排空循环依赖的唯一能力：查询下一次触发时间、执行一次触发。
///
/// `next_fire_time` 为 `None` 表示“永不触发”（触发时间超出 `SystemTime` 可表示范围）。
/// `fire` 在登记表锁内调用，只负责状态迁移；真正的投递（通道发送、用户回调）由返回的
/// [`Firing`] 描述，在锁外执行。
pub(crate) trait Executable {
    fn next_fire_time(&self) -> Option<SystemTime>;

    fn fire(&mut self, now: SystemTime) -> Firing;
}

/// 一次触发的结果。
pub(crate) struct Firing {
    pub(crate) kind: SlotKind,
    pub(crate) due: SystemTime,
    pub(crate) delivery: Delivery,
    /// 为 `true` 时槽位以新的 `next_fire_time()` 继续留在登记表中。
    pub(crate) retain: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SlotKind {
    Timer,
    Ticker,
}

impl SlotKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Ticker => "ticker",
        }
    }
}

/// 需要在锁外完成的投递动作。
pub(crate) enum Delivery {
    Channel {
        sender: Sender<SystemTime>,
        value: SystemTime,
    },
    Callback(Arc<Mutex<TimerCallback>>),
}

/// 定时器与节拍器的和类型，排空循环不区分二者。
pub(crate) enum Slot {
    Timer(TimerSlot),
    Ticker(TickerSlot),
}

impl Slot {
    fn kind(&self) -> SlotKind {
        match self {
            Self::Timer(_) => SlotKind::Timer,
            Self::Ticker(_) => SlotKind::Ticker,
        }
    }
}

impl Executable for Slot {
    fn next_fire_time(&self) -> Option<SystemTime> {
        match self {
            Self::Timer(timer) => timer.next_fire_time(),
            Self::Ticker(ticker) => ticker.next_fire_time(),
        }
    }

    fn fire(&mut self, now: SystemTime) -> Firing {
        match self {
            Self::Timer(timer) => timer.fire(now),
            Self::Ticker(ticker) => ticker.fire(now),
        }
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    slots: HashMap<EntryId, Slot>,
    queue: BTreeSet<(SystemTime, EntryId)>,
    next_id: u64,
}

impl Registry {
    pub(crate) fn allocate_id(&mut self) -> EntryId {
        let id = EntryId(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn insert(&mut self, id: EntryId, slot: Slot) {
        self.remove(id);
        if let Some(at) = slot.next_fire_time() {
            self.queue.insert((at, id));
        }
        self.slots.insert(id, slot);
    }

    pub(crate) fn remove(&mut self, id: EntryId) -> Option<Slot> {
        let slot = self.slots.remove(&id)?;
        if let Some(at) = slot.next_fire_time() {
            self.queue.remove(&(at, id));
        }
        Some(slot)
    }

    pub(crate) fn contains(&self, id: EntryId) -> bool {
        self.slots.contains_key(&id)
    }

    pub(crate) fn next_fire_time_of(&self, id: EntryId) -> Option<SystemTime> {
        self.slots.get(&id).and_then(Executable::next_fire_time)
    }

    /// 在保持索引一致的前提下修改槽位。
    pub(crate) fn update<R>(&mut self, id: EntryId, f: impl FnOnce(&mut Slot) -> R) -> Option<R> {
        let slot = self.slots.get_mut(&id)?;
        if let Some(at) = slot.next_fire_time() {
            self.queue.remove(&(at, id));
        }
        let result = f(slot);
        if let Some(at) = slot.next_fire_time() {
            self.queue.insert((at, id));
        }
        Some(result)
    }

    /// 最早到期且不晚于 `deadline` 的项。
    pub(crate) fn peek_due(&self, deadline: SystemTime) -> Option<EntryId> {
        self.queue
            .first()
            .filter(|(at, _)| *at <= deadline)
            .map(|(_, id)| *id)
    }

    /// 触发指定项：槽位自行决定投递内容，单次定时器随即出表，节拍器按新时间重新入索引。
    pub(crate) fn fire(&mut self, id: EntryId, now: SystemTime) -> Option<Firing> {
        let mut slot = self.remove(id)?;
        let firing = slot.fire(now);
        debug_assert_eq!(firing.kind, slot.kind());
        if firing.retain {
            self.insert(id, slot);
        }
        Some(firing)
    }

    /// 所有在册单次定时器中最晚的可达触发时间；节拍器可能无限触发，永不触发的定时器无法到达，均不参与计算。
    pub(crate) fn latest_timer_deadline(&self) -> Option<SystemTime> {
        self.slots
            .values()
            .filter(|slot| slot.kind() == SlotKind::Timer)
            .filter_map(Executable::next_fire_time)
            .max()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
