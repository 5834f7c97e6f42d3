//! 常用类型与 trait 的一站式导入：`use tickwarp_core::prelude::*;`。

pub use crate::clock::{Clock, Ticker, TimeReceiver, Timer};
pub use crate::config::VirtualClockConfig;
pub use crate::error::ClockError;
pub use crate::mock::{VirtualClock, VirtualTicker, VirtualTimer};
pub use crate::system::SystemClock;
