//! 可注入时钟的能力契约。
//!
//! # 设计背景（Why）
//! - 业务代码若直接调用系统时间与线程睡眠，定时器、心跳与重试节律都将无法在测试中复现；
//! - 通过 [`Clock`] trait 统一 `now`/`after`/`sleep`/定时器/节拍器等原语，生产环境注入
//!   [`crate::SystemClock`]，测试注入 [`crate::VirtualClock`] 并手动推进时间。
//!
//! # 契约说明（What）
//! - 所有投递通道均为容量 1 的 [`async_channel`] 有界通道，既可阻塞接收（`recv_blocking`），
//!   也可在异步上下文中 `recv().await`；
//! - 时钟实现对通道只做非阻塞投递，消费者不读取通道永远不会阻塞时钟。

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime};

/// 定时器/节拍器投递时间点所用的接收端。
pub type TimeReceiver = async_channel::Receiver<SystemTime>;

/// 定时器回调的统一形态。
///
/// 使用 `FnMut` 是因为定时器在 `reset` 后可再次触发，回调需要被多次调用。
pub type TimerCallback = Box<dyn FnMut() + Send + 'static>;

/// 异步睡眠 Future。
///
/// # 契约说明（What）
/// - Future 完成表示指定持续时间已在对应时钟上流逝；
/// - `Send + 'static` 以便跨任务存活。
pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// 单次触发的定时器句柄。
///
/// # 契约说明（What）
/// - `stop`：若定时器仍处于激活状态则停止并返回 `true`；已触发或已停止时返回 `false`；
///   停止不会收回已经投递到通道中的值，调用方需自行排空；
/// - `reset`：将定时器重新安排在“当前时间 + `duration`”触发，返回调用前是否处于激活状态；
///   已触发或已停止的定时器会被重新激活；
/// - `receiver`：通道式定时器返回接收端；回调式定时器（`after_fn`）返回 `None`。
pub trait Timer: Send + Sync + fmt::Debug {
    fn receiver(&self) -> Option<&TimeReceiver>;

    fn stop(&self) -> bool;

    fn reset(&self, duration: Duration) -> bool;
}

/// 周期触发的节拍器句柄。
///
/// `stop` 幂等；停止后通道不再收到新的节拍，但已缓存的一个值仍可读取。
pub trait Ticker: Send + Sync + fmt::Debug {
    fn receiver(&self) -> &TimeReceiver;

    fn stop(&self);
}

/// 抽象可注入的时钟。
///
/// # 接口约束（What）
/// - `now`：返回时钟视角下的当前时间，不阻塞；
/// - `after`：`duration` 流逝后在返回的通道上投递触发时间；
/// - `after_fn`：`duration` 流逝后执行回调，返回可停止的定时器；
/// - `sleep`：阻塞当前线程直到时钟上流逝 `duration`；零时长立即返回；
/// - `since`/`until`：基于 `now` 的纯算术，结果为负时截断为零；
/// - `new_timer`/`new_ticker`：创建定时器与节拍器；节拍间隔为零属于契约违例，实现应 panic。
///
/// # 使用指引（How）
/// - 推荐以 `Arc<dyn Clock>` 传递给需要时间能力的组件；
/// - 测试场景注入 [`crate::VirtualClock`]，由测试驱动调用 `forward`/`set` 推进时间。
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> SystemTime;

    fn after(&self, duration: Duration) -> TimeReceiver;

    fn after_fn(&self, duration: Duration, callback: TimerCallback) -> Box<dyn Timer>;

    fn new_timer(&self, duration: Duration) -> Box<dyn Timer>;

    fn new_ticker(&self, interval: Duration) -> Box<dyn Ticker>;

    /// 阻塞直到 `duration` 在本时钟上流逝。
    ///
    /// 对虚拟时钟而言，只有其它线程推进时间才会唤醒调用方。
    fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        // 通道仅在发送端全部释放时才会关闭，而定时器槽位持有发送端直到触发，因此错误分支只代表时钟已被销毁。
        let _ = self.after(duration).recv_blocking();
    }

    /// `sleep` 的异步版本，基于 `after` 的接收端实现。
    fn sleep_async(&self, duration: Duration) -> Sleep {
        if duration.is_zero() {
            return Box::pin(async {});
        }
        let receiver = self.after(duration);
        Box::pin(async move {
            let _ = receiver.recv().await;
        })
    }

    fn since(&self, earlier: SystemTime) -> Duration {
        self.now()
            .duration_since(earlier)
            .unwrap_or(Duration::ZERO)
    }

    fn until(&self, later: SystemTime) -> Duration {
        later.duration_since(self.now()).unwrap_or(Duration::ZERO)
    }
}
