use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Duration;
use config::RateLimitConfig;
use domain::{ConversationId, Timestamp, UserId};
use serde::Serialize;

use crate::clock::Clock;
use crate::error::ApplicationError;

/// 拒绝发送的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// 房间慢速模式冷却中
    Cooldown,
    /// 连续刷屏后的锁定期
    Lockout,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Cooldown => f.write_str("slow mode"),
            DenyReason::Lockout => f.write_str("spam lockout"),
        }
    }
}

/// 发送检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendCheck {
    pub allowed: bool,
    pub remaining_seconds: Option<u64>,
    pub reason: Option<DenyReason>,
}

impl SendCheck {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            remaining_seconds: None,
            reason: None,
        }
    }

    pub fn denied(reason: DenyReason, remaining: Duration) -> Self {
        Self {
            allowed: false,
            remaining_seconds: Some(ceil_seconds(remaining)),
            reason: Some(reason),
        }
    }

    pub fn into_result(self) -> Result<(), ApplicationError> {
        match (self.allowed, self.reason) {
            (true, _) => Ok(()),
            (false, reason) => Err(ApplicationError::RateLimited {
                remaining_seconds: self.remaining_seconds.unwrap_or(1),
                reason: reason.unwrap_or(DenyReason::Cooldown),
            }),
        }
    }
}

/// 剩余时间向上取整到秒，拒绝时至少为 1
fn ceil_seconds(remaining: Duration) -> u64 {
    let millis = remaining.num_milliseconds().max(1);
    u64::try_from((millis + 999) / 1000).unwrap_or(u64::MAX)
}

/// 单个 (用户, 会话) 的限流状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub last_message_at: Option<Timestamp>,
    /// 当前突发窗口内的连续发送条数
    pub burst_count: u32,
    pub lockout_until: Option<Timestamp>,
}

impl RateLimitState {
    pub fn is_locked_at(&self, now: Timestamp) -> bool {
        self.lockout_until.is_some_and(|until| now < until)
    }

    fn is_idle_at(&self, now: Timestamp, idle_ttl: Duration) -> bool {
        let cutoff = now - idle_ttl;
        self.last_message_at.map_or(true, |at| at < cutoff)
            && self.lockout_until.map_or(true, |until| until < cutoff)
    }
}

type GuardKey = (UserId, ConversationId);

/// 发言限流
///
/// 同时实施两条规则：房间慢速模式（两次发送之间的最小间隔）与刷屏锁定
/// （突发窗口内连续发送达到阈值后锁定一段时间）。状态只保存在本进程内存中，
/// 按 (用户, 会话) 隔离，空闲状态由后台任务定期淘汰。
pub struct RateLimitGuard {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    states: Arc<RwLock<HashMap<GuardKey, RateLimitState>>>,
}

impl RateLimitGuard {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 检查当前能否发送，不修改状态
    pub fn check_send(
        &self,
        user_id: &UserId,
        conversation: &ConversationId,
        slow_mode_seconds: u32,
    ) -> SendCheck {
        let now = self.clock.now();
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = states.get(&(user_id.clone(), conversation.clone())) else {
            return SendCheck::allowed();
        };

        if let Some(until) = state.lockout_until {
            if now < until {
                return SendCheck::denied(DenyReason::Lockout, until - now);
            }
        }

        if slow_mode_seconds > 0 {
            if let Some(last) = state.last_message_at {
                let cooldown = Duration::seconds(i64::from(slow_mode_seconds));
                let elapsed = now - last;
                if elapsed < cooldown {
                    return SendCheck::denied(DenyReason::Cooldown, cooldown - elapsed);
                }
            }
        }

        SendCheck::allowed()
    }

    /// 记录一次发送。触发锁定的这一次本身也被拒绝。
    pub fn record_send(&self, user_id: &UserId, conversation: &ConversationId) -> SendCheck {
        let now = self.clock.now();
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        let state = states
            .entry((user_id.clone(), conversation.clone()))
            .or_default();

        match state.last_message_at {
            Some(last) if now - last < self.config.burst_window() => state.burst_count += 1,
            _ => state.burst_count = 1,
        }
        state.last_message_at = Some(now);

        if state.burst_count >= self.config.burst_threshold {
            let lockout = self.config.lockout();
            state.lockout_until = Some(now + lockout);
            state.burst_count = 0;
            tracing::warn!(
                user_id = %user_id,
                conversation = %conversation,
                lockout_ms = lockout.num_milliseconds(),
                "连续发送过快，已锁定"
            );
            return SendCheck::denied(DenyReason::Lockout, lockout);
        }

        SendCheck::allowed()
    }

    /// 获取限流状态
    pub fn state(&self, user_id: &UserId, conversation: &ConversationId) -> Option<RateLimitState> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        states.get(&(user_id.clone(), conversation.clone())).cloned()
    }

    /// 清除某个用户在某个会话的状态（管理功能）
    pub fn reset(&self, user_id: &UserId, conversation: &ConversationId) {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        states.remove(&(user_id.clone(), conversation.clone()));
    }

    pub fn tracked(&self) -> usize {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 淘汰空闲状态（防止内存泄漏），返回淘汰条数
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.now();
        let idle_ttl = self.config.idle_ttl();
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        let before = states.len();
        states.retain(|_, state| !state.is_idle_at(now, idle_ttl));
        let evicted = before - states.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = states.len(), "已淘汰空闲限流状态");
        }
        evicted
    }
}
