use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use async_channel::{Sender, TrySendError};
use parking_lot::{Condvar, Mutex};

use crate::clock::{TimeReceiver, Ticker};

struct TickerShared {
    stopped: Mutex<bool>,
    wakeup: Condvar,
}

impl TickerShared {
    fn run(&self, interval: Duration, sender: Sender<SystemTime>) {
        let mut next = Instant::now() + interval;
        loop {
            {
                let mut stopped = self.stopped.lock();
                while !*stopped && Instant::now() < next {
                    self.wakeup.wait_until(&mut stopped, next);
                }
                if *stopped {
                    return;
                }
            }
            if let Err(TrySendError::Closed(_)) = sender.try_send(SystemTime::now()) {
                return;
            }
            next += interval;
            // 消费者或调度落后多个周期时跳过错过的节拍，而不是连续补发。
            let now = Instant::now();
            if next <= now {
                next = now + interval;
            }
        }
    }
}

/// 基于后台线程的真实节拍器；句柄被丢弃时自动停止。
pub struct SystemTicker {
    shared: Arc<TickerShared>,
    receiver: TimeReceiver,
    interval: Duration,
}

impl SystemTicker {
    /// 调用方需保证 `interval` 非零。
    pub(crate) fn start(interval: Duration) -> Self {
        let (sender, receiver) = async_channel::bounded(1);
        let shared = Arc::new(TickerShared {
            stopped: Mutex::new(false),
            wakeup: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        thread::spawn(move || worker.run(interval, sender));
        Self {
            shared,
            receiver,
            interval,
        }
    }
}

impl Ticker for SystemTicker {
    fn receiver(&self) -> &TimeReceiver {
        &self.receiver
    }

    fn stop(&self) {
        *self.shared.stopped.lock() = true;
        self.shared.wakeup.notify_all();
    }
}

impl Drop for SystemTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for SystemTicker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemTicker")
            .field("interval", &self.interval)
            .field("stopped", &*self.shared.stopped.lock())
            .finish()
    }
}
