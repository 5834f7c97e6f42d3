//! 虚拟时钟配置。
//!
//! # 模块定位（Why）
//! - 测试套件常需要固定的起始时间（例如统一从 Unix 纪元开始）与一致的调度让出策略；
//! - 将这些旋钮集中到 [`VirtualClockConfig`]，既可在代码中以 builder 方式构造，也可由 TOML 片段加载，
//!   方便多个测试二进制共享同一份设定。
//!
//! # 契约说明（What）
//! - 默认配置：起点为 Unix 纪元、推进后让出调度、允许时间回拨；
//! - 反序列化时缺失字段回退到默认值。

use std::time::{Duration, SystemTime};

use serde::Deserialize;

#[cfg(feature = "config_toml")]
use crate::error::{ClockError, Result};

/// [`crate::VirtualClock`] 的构造参数。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VirtualClockConfig {
    /// 起始时间相对 Unix 纪元的整秒数。
    pub start_unix_secs: u64,
    /// 起始时间的亚秒纳秒部分，取值需小于 `1_000_000_000`。
    pub start_subsec_nanos: u32,
    /// `forward`/`set` 结束后是否调用 [`std::thread::yield_now`]，给消费线程运行机会。
    pub yield_after_advance: bool,
    /// 是否允许 `set` 将时间回拨到当前虚拟时间之前。
    pub allow_backward_set: bool,
}

impl Default for VirtualClockConfig {
    fn default() -> Self {
        Self {
            start_unix_secs: 0,
            start_subsec_nanos: 0,
            yield_after_advance: true,
            allow_backward_set: true,
        }
    }
}

impl VirtualClockConfig {
    /// 等价于 [`Default::default`]。
    pub fn new() -> Self {
        Self::default()
    }

    /// 以指定时间点作为起点；早于 Unix 纪元的时间会被截断到纪元。
    pub fn with_start(mut self, start: SystemTime) -> Self {
        let offset = start
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        self.start_unix_secs = offset.as_secs();
        self.start_subsec_nanos = offset.subsec_nanos();
        self
    }

    pub fn with_yield_after_advance(mut self, enabled: bool) -> Self {
        self.yield_after_advance = enabled;
        self
    }

    pub fn with_backward_set(mut self, allowed: bool) -> Self {
        self.allow_backward_set = allowed;
        self
    }

    /// 解析出的起始时间点。
    ///
    /// 纳秒部分越界时按 `Duration::new` 的语义进位到秒。
    pub fn start(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH
            + Duration::from_secs(self.start_unix_secs)
            + Duration::from_nanos(u64::from(self.start_subsec_nanos))
    }

    /// 从 TOML 文本加载配置。
    ///
    /// # 契约说明（What）
    /// - **输入**：形如 `start_unix_secs = 1000` 的 TOML 片段，未出现的字段使用默认值；
    /// - **错误**：语法错误或未知字段返回 [`ClockError::InvalidConfig`]。
    #[cfg(feature = "config_toml")]
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| ClockError::InvalidConfig(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_starts_at_epoch() {
        let config = VirtualClockConfig::default();
        assert_eq!(config.start(), SystemTime::UNIX_EPOCH);
        assert!(config.yield_after_advance);
        assert!(config.allow_backward_set);
    }

    #[test]
    fn with_start_round_trips_subsecond_offset() {
        let start = SystemTime::UNIX_EPOCH + Duration::new(1_000, 250);
        let config = VirtualClockConfig::new().with_start(start);
        assert_eq!(config.start_unix_secs, 1_000);
        assert_eq!(config.start_subsec_nanos, 250);
        assert_eq!(config.start(), start);
    }

    #[test]
    fn pre_epoch_start_is_clamped() {
        let before = SystemTime::UNIX_EPOCH - Duration::from_secs(5);
        let config = VirtualClockConfig::new().with_start(before);
        assert_eq!(config.start(), SystemTime::UNIX_EPOCH);
    }

    #[cfg(feature = "config_toml")]
    #[test]
    fn toml_fills_missing_fields_with_defaults() {
        let config = VirtualClockConfig::from_toml_str(
            "start_unix_secs = 86400\nallow_backward_set = false\n",
        )
        .expect("valid config");
        assert_eq!(config.start_unix_secs, 86_400);
        assert!(!config.allow_backward_set);
        assert!(config.yield_after_advance);
    }

    #[cfg(feature = "config_toml")]
    #[test]
    fn toml_rejects_unknown_fields() {
        let err = VirtualClockConfig::from_toml_str("tick_rate = 3").expect_err("unknown field");
        assert!(matches!(err, ClockError::InvalidConfig(_)));
    }
}
