use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use async_channel::Sender;
use parking_lot::{Condvar, Mutex};

use crate::clock::{TimeReceiver, Timer, TimerCallback};

/// `Instant + duration` 溢出时使用的远期上限，视作“永不触发”。
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

enum Delivery {
    Channel(Sender<SystemTime>),
    Callback(Mutex<TimerCallback>),
}

struct TimerState {
    /// 每次 `stop`/`reset` 递增；后台线程发现代数变化即退出。
    generation: u64,
    deadline: Option<Instant>,
}

struct TimerShared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
    delivery: Delivery,
}

impl TimerShared {
    /// 在持锁状态下重新布防并启动等待线程。
    fn arm(self: &Arc<Self>, state: &mut TimerState, duration: Duration) {
        let now = Instant::now();
        state.generation += 1;
        state.deadline = Some(now.checked_add(duration).unwrap_or(now + FAR_FUTURE));
        self.wakeup.notify_all();

        let generation = state.generation;
        let shared = Arc::clone(self);
        thread::spawn(move || shared.wait_and_fire(generation));
    }

    fn wait_and_fire(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            loop {
                if state.generation != generation {
                    return;
                }
                let Some(deadline) = state.deadline else {
                    return;
                };
                if Instant::now() >= deadline {
                    state.deadline = None;
                    break;
                }
                self.wakeup.wait_until(&mut state, deadline);
            }
        }
        match &self.delivery {
            Delivery::Channel(sender) => {
                let _ = sender.try_send(SystemTime::now());
            }
            Delivery::Callback(callback) => {
                let mut callback = callback.lock();
                (*callback)();
            }
        }
    }
}

/// 基于后台线程与条件变量的真实定时器。
///
/// 每次激活启动一个等待线程；`stop`/`reset` 通过递增代数让旧线程退出。
pub struct SystemTimer {
    shared: Arc<TimerShared>,
    receiver: Option<TimeReceiver>,
}

impl SystemTimer {
    pub(crate) fn with_channel(duration: Duration) -> Self {
        let (sender, receiver) = async_channel::bounded(1);
        Self::start(duration, Delivery::Channel(sender), Some(receiver))
    }

    /// 只返回接收端的定时器；等待线程持有发送端直到触发。
    pub(crate) fn detached(duration: Duration) -> TimeReceiver {
        let (sender, receiver) = async_channel::bounded(1);
        let _timer = Self::start(duration, Delivery::Channel(sender), None);
        receiver
    }

    pub(crate) fn with_callback(duration: Duration, callback: TimerCallback) -> Self {
        Self::start(duration, Delivery::Callback(Mutex::new(callback)), None)
    }

    fn start(duration: Duration, delivery: Delivery, receiver: Option<TimeReceiver>) -> Self {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                generation: 0,
                deadline: None,
            }),
            wakeup: Condvar::new(),
            delivery,
        });
        {
            let mut state = shared.state.lock();
            shared.arm(&mut state, duration);
        }
        Self { shared, receiver }
    }
}

impl Timer for SystemTimer {
    fn receiver(&self) -> Option<&TimeReceiver> {
        self.receiver.as_ref()
    }

    fn stop(&self) -> bool {
        let mut state = self.shared.state.lock();
        let was_active = state.deadline.take().is_some();
        state.generation += 1;
        self.shared.wakeup.notify_all();
        was_active
    }

    fn reset(&self, duration: Duration) -> bool {
        let mut state = self.shared.state.lock();
        let was_active = state.deadline.is_some();
        self.shared.arm(&mut state, duration);
        was_active
    }
}

impl fmt::Debug for SystemTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("SystemTimer")
            .field("active", &state.deadline.is_some())
            .finish()
    }
}
