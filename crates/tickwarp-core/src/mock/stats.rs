use std::sync::atomic::{AtomicU64, Ordering};

/// 引擎运行期计数器快照。
///
/// # 契约说明（What）
/// - `timers_fired`：单次定时器触发次数（含回调式）；
/// - `ticks_fired`：节拍器触发次数，包括被丢弃的追赶节拍；
/// - `deliveries_dropped`：因通道已满而丢弃的投递次数；
/// - `callbacks_run`：实际执行的定时器回调次数；
/// - `pending`：快照时刻仍在册的定时器与节拍器数量。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub timers_fired: u64,
    pub ticks_fired: u64,
    pub deliveries_dropped: u64,
    pub callbacks_run: u64,
    pub pending: usize,
}

#[derive(Default)]
pub(crate) struct EngineCounters {
    timers_fired: AtomicU64,
    ticks_fired: AtomicU64,
    deliveries_dropped: AtomicU64,
    callbacks_run: AtomicU64,
}

impl EngineCounters {
    pub(crate) fn record_timer(&self) {
        self.timers_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tick(&self) {
        self.ticks_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.deliveries_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_callback(&self) {
        self.callbacks_run.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, pending: usize) -> EngineStats {
        EngineStats {
            timers_fired: self.timers_fired.load(Ordering::Relaxed),
            ticks_fired: self.ticks_fired.load(Ordering::Relaxed),
            deliveries_dropped: self.deliveries_dropped.load(Ordering::Relaxed),
            callbacks_run: self.callbacks_run.load(Ordering::Relaxed),
            pending,
        }
    }
}
