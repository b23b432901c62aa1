//! 内存存储实现，供开发模式与测试使用
//!
//! 整棵文档树放在一把互斥锁后面，所有写入在锁内完成并按提交顺序广播变更，
//! 因此批量写入对订阅者与并发读者都是原子可见的。

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use super::path;
use super::{
    is_server_timestamp, Store, StoreChange, StoreError, Subscription, TransactionOutcome,
    TransactionStep, WriteBatch,
};
use crate::clock::Clock;

const DEFAULT_CHANGE_CAPACITY: usize = 4096;

pub struct MemoryStore {
    root: Mutex<Value>,
    changes: broadcast::Sender<StoreChange>,
    clock: Arc<dyn Clock>,
    /// 拒绝写入的路径前缀，用于模拟权限规则
    denied_prefixes: RwLock<Vec<String>>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(clock, DEFAULT_CHANGE_CAPACITY)
    }

    pub fn with_capacity(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            root: Mutex::new(Value::Null),
            changes,
            clock,
            denied_prefixes: RwLock::new(Vec::new()),
        }
    }

    /// 之后任何触及 `prefix` 子树的写入都以 PermissionDenied 失败
    pub fn reject_writes_under(&self, prefix: impl Into<String>) {
        if let Ok(mut denied) = self.denied_prefixes.write() {
            denied.push(path::normalize(&prefix.into()));
        }
    }

    pub fn allow_all_writes(&self) {
        if let Ok(mut denied) = self.denied_prefixes.write() {
            denied.clear();
        }
    }

    /// 整棵树的快照
    pub fn snapshot(&self) -> Value {
        self.root
            .lock()
            .map(|root| root.clone())
            .unwrap_or(Value::Null)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Value>, StoreError> {
        self.root
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn check_writable(&self, target: &str) -> Result<(), StoreError> {
        let denied = self
            .denied_prefixes
            .read()
            .map_err(|_| StoreError::Unavailable("permission rules lock poisoned".to_string()))?;
        if denied.iter().any(|prefix| path::is_related(prefix, target)) {
            return Err(StoreError::PermissionDenied(target.to_string()));
        }
        Ok(())
    }

    /// 在已持有的锁内应用一组写入并广播变更
    fn commit(
        &self,
        root: &mut Value,
        writes: Vec<(String, Option<Value>)>,
    ) -> Result<(), StoreError> {
        let now_ms = self.clock.now().timestamp_millis();
        let mut prepared = Vec::with_capacity(writes.len());
        for (target, value) in writes {
            let target = path::normalize(&target);
            path::segments(&target)?;
            self.check_writable(&target)?;
            let value = value.and_then(|mut value| {
                resolve_server_values(&mut value, now_ms);
                prune(value)
            });
            prepared.push((target, value));
        }

        for (target, value) in &prepared {
            let segments = path::segments(target)?;
            match value {
                Some(value) => insert_at(root, &segments, value.clone()),
                None => {
                    if remove_at(root, &segments) {
                        *root = Value::Null;
                    }
                }
            }
        }

        for (target, _) in prepared {
            let segments = path::segments(&target)?;
            let value = read_at(root, &segments).cloned();
            // 没有订阅者时发送失败是正常情况
            let _ = self.changes.send(StoreChange {
                path: target,
                value,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, target: &str) -> Result<Option<Value>, StoreError> {
        let segments = path::segments(target)?;
        let root = self.lock()?;
        Ok(read_at(&root, &segments).cloned())
    }

    async fn set(&self, target: &str, value: Value) -> Result<(), StoreError> {
        let mut root = self.lock()?;
        self.commit(&mut root, vec![(target.to_string(), Some(value))])
    }

    async fn update(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut root = self.lock()?;
        self.commit(&mut root, batch.into_writes())
    }

    async fn remove(&self, target: &str) -> Result<(), StoreError> {
        let segments = path::segments(target)?;
        let mut root = self.lock()?;
        if read_at(&root, &segments).is_none() {
            return Ok(());
        }
        self.commit(&mut root, vec![(target.to_string(), None)])
    }

    async fn transaction(
        &self,
        target: &str,
        apply: &mut (dyn FnMut(Option<Value>) -> TransactionStep + Send),
    ) -> Result<TransactionOutcome, StoreError> {
        let segments = path::segments(target)?;
        let mut root = self.lock()?;
        let current = read_at(&root, &segments).cloned();
        match apply(current.clone()) {
            TransactionStep::Abort => Ok(TransactionOutcome {
                committed: false,
                snapshot: current,
            }),
            TransactionStep::Commit(value) => {
                self.commit(&mut root, vec![(target.to_string(), value)])?;
                Ok(TransactionOutcome {
                    committed: true,
                    snapshot: read_at(&root, &segments).cloned(),
                })
            }
        }
    }

    fn subscribe(&self, target: &str) -> Subscription {
        Subscription::new(self.changes.subscribe(), target)
    }
}

fn read_at<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments {
        node = node.as_object()?.get(*segment)?;
    }
    if node.is_null() {
        None
    } else {
        Some(node)
    }
}

fn insert_at(node: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry((*first).to_string()).or_insert(Value::Null);
        insert_at(child, rest, value);
    }
}

/// 删除子树并向上清理变空的父节点。返回当前节点是否已变空。
fn remove_at(node: &mut Value, segments: &[&str]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        *node = Value::Null;
        return true;
    };
    let Value::Object(map) = node else {
        return false;
    };
    if rest.is_empty() {
        map.remove(*first);
    } else if let Some(child) = map.get_mut(*first) {
        if remove_at(child, rest) {
            map.remove(*first);
        }
    }
    map.is_empty()
}

fn resolve_server_values(value: &mut Value, now_ms: i64) {
    if is_server_timestamp(value) {
        *value = Value::from(now_ms);
        return;
    }
    match value {
        Value::Object(map) => map
            .values_mut()
            .for_each(|child| resolve_server_values(child, now_ms)),
        Value::Array(items) => items
            .iter_mut()
            .for_each(|child| resolve_server_values(child, now_ms)),
        _ => {}
    }
}

/// null 与空对象不落库
fn prune(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .filter_map(|(key, child)| prune(child).map(|child| (key, child)))
                .collect();
            if map.is_empty() {
                None
            } else {
                Some(Value::Object(map))
            }
        }
        other => Some(other),
    }
}
