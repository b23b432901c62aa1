//! 后台任务调度
//!
//! 周期任务的每一次执行都在独立的 task 中运行：某一次返回错误或 panic 只记录日志，
//! 周期本身不会因此停止。所有任务共享一个取消令牌，关闭时中止正在执行的那一次
//! 并等待全部任务退出。

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::ApplicationError;

pub struct Scheduler {
    token: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            tasks: Vec::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// 注册周期任务，第一次执行立即开始
    pub fn every<F, Fut>(&mut self, name: &'static str, period: Duration, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ApplicationError>> + Send + 'static,
    {
        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(job = name, period_ms = period.as_millis() as u64, "定时任务已启动");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let mut tick = tokio::spawn(job());
                tokio::select! {
                    _ = token.cancelled() => {
                        tick.abort();
                        let _ = tick.await;
                        break;
                    }
                    result = &mut tick => match result {
                        Ok(Ok(())) => tracing::trace!(job = name, "定时任务执行完成"),
                        Ok(Err(err)) => {
                            tracing::warn!(job = name, error = ?err, "定时任务执行失败，等待下一次调度");
                        }
                        Err(join_err) if join_err.is_panic() => {
                            tracing::error!(job = name, "定时任务 panic，等待下一次调度");
                        }
                        Err(_) => {}
                    }
                }
            }
            tracing::info!(job = name, "定时任务已停止");
        });
        self.tasks.push((name, handle));
    }

    /// 注册常驻任务，任务自身负责响应取消令牌
    pub fn spawn<Fut>(&mut self, name: &'static str, task: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push((name, tokio::spawn(task)));
    }

    /// 取消全部任务并等待退出
    pub async fn shutdown(self) {
        self.token.cancel();
        for (name, handle) in self.tasks {
            if let Err(err) = handle.await {
                tracing::error!(job = name, error = %err, "后台任务异常退出");
            }
        }
        tracing::info!("调度器已关闭");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
