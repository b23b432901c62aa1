//! 统一配置中心
//!
//! 提供引擎的全局配置管理，包括：
//! - 在线状态（心跳间隔、时效窗口）
//! - 房间生命周期（TTL、宽限期、清理与弃置扫描周期）
//! - 发言限流（突发窗口、锁定时长、空闲淘汰）
//! - 会话存活超时
//! - 事件总线容量与日志级别
//!
//! 加载顺序：默认值 -> 可选配置文件（APP_CONFIG_FILE，TOML）-> 环境变量（APP_*，`__` 分隔层级）。

use std::time::Duration as StdDuration;

use chrono::Duration;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// 全局应用配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub rooms: RoomConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub events: EventConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 在线状态配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub heartbeat_interval_secs: u64,
    /// 超过该时长没有心跳即视为离线
    pub staleness_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            staleness_secs: 300,
        }
    }
}

impl PresenceConfig {
    pub fn heartbeat_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn staleness(&self) -> Duration {
        seconds(self.staleness_secs)
    }
}

/// 房间生命周期配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    pub ttl_secs: u64,
    /// 过期后保留消息与成员的宽限期
    pub grace_secs: u64,
    pub reap_interval_secs: u64,
    /// 房主离线多久后自动关闭房间
    pub abandon_threshold_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 8 * 60 * 60,
            grace_secs: 10 * 60,
            reap_interval_secs: 5 * 60,
            abandon_threshold_secs: 60 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl RoomConfig {
    pub fn ttl(&self) -> Duration {
        seconds(self.ttl_secs)
    }

    pub fn grace(&self) -> Duration {
        seconds(self.grace_secs)
    }

    pub fn abandon_threshold(&self) -> Duration {
        seconds(self.abandon_threshold_secs)
    }

    pub fn reap_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.reap_interval_secs)
    }

    pub fn sweep_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.sweep_interval_secs)
    }
}

/// 发言限流配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub burst_window_ms: u64,
    /// 窗口内连续发送达到该条数即锁定
    pub burst_threshold: u32,
    pub lockout_ms: u64,
    /// 最后发言与锁定截止都早于该时长的状态会被淘汰
    pub idle_ttl_secs: u64,
    pub eviction_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst_window_ms: 3_000,
            burst_threshold: 3,
            lockout_ms: 30_000,
            idle_ttl_secs: 600,
            eviction_interval_secs: 120,
        }
    }
}

impl RateLimitConfig {
    pub fn burst_window(&self) -> Duration {
        millis(self.burst_window_ms)
    }

    pub fn lockout(&self) -> Duration {
        millis(self.lockout_ms)
    }

    pub fn idle_ttl(&self) -> Duration {
        seconds(self.idle_ttl_secs)
    }

    pub fn eviction_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.eviction_interval_secs)
    }
}

/// 会话配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 服务端存活超时：超过该时长未 touch 的会话被关闭并执行其结束钩子
    pub liveness_timeout_secs: u64,
    pub liveness_check_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            liveness_timeout_secs: 90,
            liveness_check_interval_secs: 30,
        }
    }
}

impl SessionConfig {
    pub fn liveness_timeout(&self) -> Duration {
        seconds(self.liveness_timeout_secs)
    }

    pub fn liveness_check_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.liveness_check_interval_secs)
    }
}

/// 事件总线配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    pub capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// RUST_LOG 未设置时使用的过滤级别
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn seconds(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1_000))
}

fn millis(value: u64) -> Duration {
    Duration::milliseconds(i64::try_from(value).unwrap_or(i64::MAX / 1_000))
}

impl AppConfig {
    /// 按默认值 -> APP_CONFIG_FILE -> APP_* 环境变量的顺序加载并验证
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Self::from_figment(figment)
    }

    /// 从任意 figment 提取并验证
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// 在默认值之上叠加一段 TOML
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(AppConfig::default())).merge(Toml::string(toml)),
        )
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.presence.heartbeat_interval_secs == 0 {
            return Err(ConfigError::InvalidPresenceConfig(
                "heartbeat interval must be greater than 0".to_string(),
            ));
        }
        if self.presence.staleness_secs <= self.presence.heartbeat_interval_secs {
            return Err(ConfigError::InvalidPresenceConfig(
                "staleness window must be longer than the heartbeat interval".to_string(),
            ));
        }

        if self.rooms.ttl_secs == 0 {
            return Err(ConfigError::InvalidRoomConfig(
                "room TTL must be greater than 0".to_string(),
            ));
        }
        if self.rooms.reap_interval_secs == 0 || self.rooms.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidRoomConfig(
                "scheduler intervals must be greater than 0".to_string(),
            ));
        }
        if self.rooms.abandon_threshold_secs == 0 {
            return Err(ConfigError::InvalidRoomConfig(
                "abandon threshold must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit.burst_threshold < 2 {
            return Err(ConfigError::InvalidRateLimitConfig(
                "burst threshold must be at least 2".to_string(),
            ));
        }
        if self.rate_limit.burst_window_ms == 0 || self.rate_limit.lockout_ms == 0 {
            return Err(ConfigError::InvalidRateLimitConfig(
                "burst window and lockout must be greater than 0".to_string(),
            ));
        }
        if self.rate_limit.eviction_interval_secs == 0 {
            return Err(ConfigError::InvalidRateLimitConfig(
                "eviction interval must be greater than 0".to_string(),
            ));
        }

        if self.session.liveness_timeout_secs == 0 || self.session.liveness_check_interval_secs == 0
        {
            return Err(ConfigError::InvalidSessionConfig(
                "liveness timeout and check interval must be greater than 0".to_string(),
            ));
        }

        if self.events.capacity == 0 {
            return Err(ConfigError::InvalidEventConfig(
                "event capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid presence configuration: {0}")]
    InvalidPresenceConfig(String),
    #[error("Invalid room configuration: {0}")]
    InvalidRoomConfig(String),
    #[error("Invalid rate limit configuration: {0}")]
    InvalidRateLimitConfig(String),
    #[error("Invalid session configuration: {0}")]
    InvalidSessionConfig(String),
    #[error("Invalid event configuration: {0}")]
    InvalidEventConfig(String),
}
