//! 配置常量模块
//!
//! 载体线程相关的可配置常量都在这里定义，便于后期修改

use crate::coroutine::{Error, Result};

/// 载体线程默认栈大小：1MB
pub const DEFAULT_CARRIER_STACK_SIZE: usize = 1 << 20;

/// 载体线程最小栈大小：64KB
pub const MIN_CARRIER_STACK_SIZE: usize = 64 * 1024;

/// 载体线程名前缀
pub const CARRIER_THREAD_PREFIX: &str = "qcoro-carrier";

/// 载体配置
///
/// 每个调用线程在首次创建协程时按此配置启动自己的载体线程，
/// 载体线程上再启动的子载体沿用同一配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrierConfig {
    /// 载体线程栈大小（字节），所有协程的入口函数都运行在这个栈上
    pub stack_size: usize,
    /// 载体线程名前缀
    pub name_prefix: String,
}

impl CarrierConfig {
    /// 设置栈大小
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// 设置线程名前缀
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// 检查配置是否合法
    pub fn validate(&self) -> Result<()> {
        if self.stack_size < MIN_CARRIER_STACK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "carrier stack size {} is below the minimum of {} bytes",
                self.stack_size, MIN_CARRIER_STACK_SIZE
            )));
        }
        if self.name_prefix.is_empty() {
            return Err(Error::InvalidConfig(
                "carrier thread name prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_CARRIER_STACK_SIZE,
            name_prefix: CARRIER_THREAD_PREFIX.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CarrierConfig::default();
        assert_eq!(config.stack_size, DEFAULT_CARRIER_STACK_SIZE);
        assert_eq!(config.name_prefix, CARRIER_THREAD_PREFIX);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_small_stack() {
        let config = CarrierConfig::default().with_stack_size(1024);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_config_rejects_empty_prefix() {
        let config = CarrierConfig::default().with_name_prefix("");
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
