//! 主应用程序入口
//!
//! 开发模式的后台进程：基于内存存储构建引擎，运行房间清理、弃置扫描、
//! 限流淘汰与会话存活检查，直到收到 Ctrl+C。

use std::sync::Arc;

use application::{ChatEngine, Clock, EngineDependencies, MemoryStore, Store, SystemClock};
use config::AppConfig;
use domain::RoomVisibility;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    // 初始化日志，RUST_LOG 优先
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new(clock.clone()));
    let engine = ChatEngine::new(EngineDependencies {
        store,
        clock,
        config,
    });

    let lobby = engine
        .rooms
        .create_official_room("Lobby", RoomVisibility::Public)
        .await?;
    tracing::info!(room_id = %lobby, "官方大厅已创建");

    let scheduler = engine.start();
    tracing::info!("ephemeral-chat 已启动，按 Ctrl+C 退出");

    tokio::signal::ctrl_c().await?;
    tracing::info!("收到退出信号，正在关闭");
    scheduler.shutdown().await;

    Ok(())
}
