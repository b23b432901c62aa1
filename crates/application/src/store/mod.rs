//! 存储端口
//!
//! 引擎只依赖一个按路径寻址的 JSON 文档树：单路径读写、多路径原子批量写入、
//! 单路径读改写事务，以及按路径前缀订阅变更。提交时由存储把服务端时间戳占位符
//! 解析为统一的毫秒时间，客户端时钟从不参与过期或离线判断。

pub mod memory;
pub mod path;
pub mod paths;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

pub use memory::MemoryStore;

/// 服务端时间戳占位符的键
pub const SERVER_VALUE_KEY: &str = ".sv";

/// 提交时被替换成存储当前时间（毫秒）的占位值
pub fn server_timestamp() -> Value {
    json!({ ".sv": "timestamp" })
}

pub fn is_server_timestamp(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.len() == 1
                && map
                    .get(SERVER_VALUE_KEY)
                    .is_some_and(|v| v.as_str() == Some("timestamp"))
        }
        _ => false,
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("permission denied writing {0}")]
    PermissionDenied(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("transaction conflict at {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed document: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 多路径写入，整体提交或整体失败。`None` 表示删除该路径下的整棵子树。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<(String, Option<Value>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: impl Into<String>, value: Value) -> &mut Self {
        self.writes.push((path.into(), Some(value)));
        self
    }

    pub fn set_json<T: Serialize + ?Sized>(
        &mut self,
        path: impl Into<String>,
        value: &T,
    ) -> Result<&mut Self, StoreError> {
        let value = serde_json::to_value(value)?;
        Ok(self.set(path, value))
    }

    pub fn remove(&mut self, path: impl Into<String>) -> &mut Self {
        self.writes.push((path.into(), None));
        self
    }

    pub fn extend(&mut self, other: WriteBatch) -> &mut Self {
        self.writes.extend(other.writes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.writes.iter().map(|(path, _)| path.as_str())
    }

    pub fn into_writes(self) -> Vec<(String, Option<Value>)> {
        self.writes
    }
}

/// 已提交的单路径变更。`value` 是提交后该路径的完整值，删除时为 None。
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub path: String,
    pub value: Option<Value>,
}

/// 事务闭包的决定
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionStep {
    /// 写入新值，`None` 删除该路径
    Commit(Option<Value>),
    Abort,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOutcome {
    pub committed: bool,
    /// 事务结束后该路径的值
    pub snapshot: Option<Value>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// 原子批量写入
    async fn update(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// 删除整棵子树，路径不存在时不做任何事
    async fn remove(&self, path: &str) -> Result<(), StoreError>;

    /// 读改写事务。闭包可能被调用多次，必须是当前值的纯函数。
    async fn transaction(
        &self,
        path: &str,
        apply: &mut (dyn FnMut(Option<Value>) -> TransactionStep + Send),
    ) -> Result<TransactionOutcome, StoreError>;

    /// 订阅 `path` 及其祖先、后代路径上的已提交变更
    fn subscribe(&self, path: &str) -> Subscription;
}

/// 变更订阅，只投递与订阅路径相关的变更
pub struct Subscription {
    receiver: broadcast::Receiver<StoreChange>,
    path: String,
}

impl Subscription {
    pub fn new(receiver: broadcast::Receiver<StoreChange>, path: impl Into<String>) -> Self {
        Self {
            receiver,
            path: path::normalize(&path.into()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn next(&mut self) -> Option<StoreChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) => {
                    if path::is_related(&self.path, &change.path) {
                        return Some(change);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        path = %self.path,
                        skipped,
                        "store subscription lagged, changes were dropped"
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// 非阻塞地取出下一条已缓冲的变更
    pub fn try_next(&mut self) -> Option<StoreChange> {
        loop {
            match self.receiver.try_recv() {
                Ok(change) => {
                    if path::is_related(&self.path, &change.path) {
                        return Some(change);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(path = %self.path, skipped, "store subscription lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

/// 类型化的便捷方法
#[async_trait]
pub trait StoreExt: Store {
    async fn get_json<T>(&self, path: &str) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(path).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T>(&self, path: &str, value: &T) -> Result<(), StoreError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let value = serde_json::to_value(value)?;
        self.set(path, value).await
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self.get(path).await?.is_some())
    }

    async fn child_keys(&self, path: &str) -> Result<Vec<String>, StoreError> {
        match self.get(path).await? {
            Some(Value::Object(map)) => Ok(map.keys().cloned().collect()),
            _ => Ok(Vec::new()),
        }
    }

    /// 读取 `path` 下所有能解析为 `T` 的子文档，无法解析的子节点记录日志后跳过
    async fn children<T>(&self, path: &str) -> Result<Vec<(String, T)>, StoreError>
    where
        T: DeserializeOwned + Send,
    {
        let Some(Value::Object(map)) = self.get(path).await? else {
            return Ok(Vec::new());
        };
        let mut items = Vec::with_capacity(map.len());
        for (key, value) in map {
            match serde_json::from_value(value) {
                Ok(item) => items.push((key, item)),
                Err(err) => {
                    tracing::warn!(path, key = %key, error = %err, "skipping malformed document");
                }
            }
        }
        Ok(items)
    }

    /// 类型化读改写。闭包返回 None 放弃写入；提交成功时返回闭包的结果。
    async fn transact<T, R, F>(&self, path: &str, mut f: F) -> Result<Option<R>, StoreError>
    where
        T: Serialize + DeserializeOwned + Default + Send,
        R: Send,
        F: FnMut(&mut T) -> Option<R> + Send,
    {
        let mut result: Option<R> = None;
        let mut failure: Option<serde_json::Error> = None;
        let mut step = |current: Option<Value>| {
            result = None;
            let mut doc: T = match current {
                Some(value) => match serde_json::from_value(value) {
                    Ok(doc) => doc,
                    Err(err) => {
                        failure = Some(err);
                        return TransactionStep::Abort;
                    }
                },
                None => T::default(),
            };
            let Some(outcome) = f(&mut doc) else {
                return TransactionStep::Abort;
            };
            match serde_json::to_value(&doc) {
                Ok(value) => {
                    result = Some(outcome);
                    TransactionStep::Commit(Some(value))
                }
                Err(err) => {
                    failure = Some(err);
                    TransactionStep::Abort
                }
            }
        };
        let outcome = self.transaction(path, &mut step).await?;
        if let Some(err) = failure {
            return Err(err.into());
        }
        if !outcome.committed {
            return Ok(None);
        }
        Ok(result)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
