#![deny(unsafe_code)]
#![doc = "tickwarp-core: 可注入时钟契约与确定性虚拟时间引擎。"]
#![doc = ""]
#![doc = "业务代码依赖 [`Clock`] trait；生产环境注入 [`SystemClock`]，测试注入 [`VirtualClock`] 并通过 `forward`/`set` 显式推进时间。"]
#![doc = "虚拟时钟按触发时间升序执行所有到期的定时器与节拍器，投递全部为非阻塞，消费者不读取通道不会阻塞引擎。"]

//! # 结构概览（What）
//! - [`clock`]：`Clock`/`Timer`/`Ticker` 能力契约与投递通道类型；
//! - [`mock`]：虚拟时间引擎（登记表、排空循环、定时器与节拍器状态机）；
//! - [`system`]：委托宿主时间设施的真实实现；
//! - [`config`]：虚拟时钟的构造参数，可从 TOML 加载；
//! - [`error`]：契约违例的错误域。

pub mod clock;
pub mod config;
pub mod error;
pub mod mock;
pub mod prelude;
pub mod system;

pub use clock::{Clock, Sleep, Ticker, TimeReceiver, Timer, TimerCallback};
pub use config::VirtualClockConfig;
pub use error::{ClockError, Result};
pub use mock::{EngineStats, VirtualClock, VirtualTicker, VirtualTimer};
pub use system::{SystemClock, SystemTicker, SystemTimer};
