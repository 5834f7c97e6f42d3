//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 时钟子系统的大多数“失败”以状态迁移表达（如 `Timer::stop` 返回 `false`），并非错误；
//! - 仅少数入口确实可能因调用方违反契约而失败：零间隔 Ticker、时间溢出、被配置禁止的时间回拨，
//!   以及配置文本解析失败，这些集中定义于 [`ClockError`]。
//!
//! ## 设计要求（What）
//! - 错误类型派生 `thiserror::Error`，兼容 `std::error::Error` 与 `?` 传播；
//! - `try_*` 入口返回 [`Result`]，对应的非 `try` 入口在同样条件下以错误文本 panic（快速失败）。

use std::time::{Duration, SystemTime};

use thiserror::Error;

/// 时钟子系统的统一结果别名。
pub type Result<T, E = ClockError> = std::result::Result<T, E>;

/// 时钟契约违例的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：区分“可以由调用方恢复”的契约违例，为测试基建提供可断言的错误分支；
/// - **契约 (What)**：所有变体均为 `Send + Sync + 'static`，可跨线程传播；
/// - **权衡 (Trade-offs)**：`InvalidConfig` 仅保存渲染后的文本，避免将 `toml` 的错误类型泄漏到公共 API。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ClockError {
    /// Ticker 间隔必须严格大于零。
    #[error("non-positive interval for ticker")]
    NonPositiveInterval,

    /// 推进后的时间超出 `SystemTime` 可表示范围。
    #[error("advancing virtual time from {base:?} by {delta:?} overflows the representable range")]
    TimeOverflow { base: SystemTime, delta: Duration },

    /// 当前配置禁止将虚拟时间回拨。
    #[error("backward set rejected: current virtual time {current:?}, requested {requested:?}")]
    BackwardSet {
        current: SystemTime,
        requested: SystemTime,
    },

    /// 配置文本无法解析。
    #[error("invalid virtual clock configuration: {0}")]
    InvalidConfig(String),
}

impl ClockError {
    /// 判断错误是否源自调用方传入的时间参数（而非配置）。
    pub fn is_time_violation(&self) -> bool {
        matches!(
            self,
            Self::NonPositiveInterval | Self::TimeOverflow { .. } | Self::BackwardSet { .. }
        )
    }
}
