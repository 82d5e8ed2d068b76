//! 连接注册表：会话 ID → 当前活跃连接
//!
//! - upsert：新连接替换旧连接，旧连接在锁外关闭，返回新版本号
//! - remove：无条件删除并关闭
//! - remove_if：仅当注册的仍是调用方持有的那条连接时才删除（防止旧连接的清理误删重连后的新连接）
//!
//! 版本号来自注册表全局递增计数，同一 ID 的版本号在删除重建后依然单调递增。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use super::transport::{same_connection, ConnectionHandle};

struct Entry {
    handle: ConnectionHandle,
    version: u64,
    updated_at: Instant,
}

/// 注册信息快照
#[derive(Clone)]
pub struct ConnectionInfo {
    pub handle: ConnectionHandle,
    pub version: u64,
    pub updated_at: Instant,
}

pub struct ConnectionRegistry {
    map: Mutex<HashMap<String, Entry>>,
    next_version: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            next_version: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.map.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 安装为当前连接；若替换了另一条连接，则在锁外关闭旧连接
    pub fn upsert(&self, id: &str, handle: ConnectionHandle) -> u64 {
        let (version, replaced) = {
            let mut map = self.lock();
            // 取号与写入在同一临界区内，后写入者的版本号一定更大
            let version = self.next_version.fetch_add(1, Ordering::SeqCst);
            let replaced = map.insert(
                id.to_string(),
                Entry {
                    handle: handle.clone(),
                    version,
                    updated_at: Instant::now(),
                },
            );
            (version, replaced)
        };

        if let Some(old) = replaced {
            if !same_connection(&old.handle, &handle) {
                tracing::info!(user_id = id, old_version = old.version, version, "Connection replaced");
                close_quietly(id, &old.handle);
            }
        }
        version
    }

    pub fn get(&self, id: &str) -> Option<ConnectionHandle> {
        self.lock().get(id).map(|e| e.handle.clone())
    }

    pub fn get_info(&self, id: &str) -> Option<ConnectionInfo> {
        self.lock().get(id).map(|e| ConnectionInfo {
            handle: e.handle.clone(),
            version: e.version,
            updated_at: e.updated_at,
        })
    }

    /// 无条件删除并关闭当前连接；返回是否存在
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.lock().remove(id);
        match removed {
            Some(entry) => {
                close_quietly(id, &entry.handle);
                true
            }
            None => false,
        }
    }

    /// 仅当当前注册的正是 expected 这条连接时删除并关闭；否则什么都不做
    pub fn remove_if(&self, id: &str, expected: &ConnectionHandle) -> bool {
        let removed = {
            let mut map = self.lock();
            match map.get(id) {
                Some(entry) if same_connection(&entry.handle, expected) => map.remove(id),
                _ => None,
            }
        };
        match removed {
            Some(entry) => {
                close_quietly(id, &entry.handle);
                true
            }
            None => false,
        }
    }

    /// 关闭并清空所有连接（停机时调用）
    pub fn close_all(&self) -> usize {
        let drained: Vec<(String, Entry)> = self.lock().drain().collect();
        for (id, entry) in &drained {
            close_quietly(id, &entry.handle);
        }
        drained.len()
    }

    /// {id: version} 快照，仅用于观察
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.lock()
            .iter()
            .map(|(id, e)| (id.clone(), e.version))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn close_quietly(id: &str, handle: &ConnectionHandle) {
    if let Err(e) = handle.close() {
        tracing::warn!(user_id = id, "Closing connection failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::ChannelTransport;
    use std::sync::Arc;

    #[test]
    fn test_identity_checked_removal() {
        let registry = ConnectionRegistry::new();
        let (h1, _rx1) = ChannelTransport::new();
        let (h2, _rx2) = ChannelTransport::new();
        let c1: ConnectionHandle = h1.clone();
        let c2: ConnectionHandle = h2.clone();

        let v1 = registry.upsert("x", c1.clone());
        assert_eq!(h1.close_calls(), 0);

        let v2 = registry.upsert("x", c2.clone());
        assert!(v2 > v1);
        assert_eq!(h1.close_calls(), 1);
        assert!(h1.is_closed());

        assert!(!registry.remove_if("x", &c1));
        let current = registry.get("x").unwrap();
        assert!(same_connection(&current, &c2));
        assert!(!h2.is_closed());

        assert!(registry.remove_if("x", &c2));
        assert!(registry.get("x").is_none());
        assert!(h2.is_closed());
        assert_eq!(h1.close_calls(), 1);
    }

    #[test]
    fn test_concurrent_upserts_keep_highest_version() {
        let registry = ConnectionRegistry::new();
        let results: Vec<(u64, Arc<ChannelTransport>)> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let mut mine = Vec::new();
                        for _ in 0..50 {
                            let (h, _rx) = ChannelTransport::new();
                            let version = registry.upsert("x", h.clone());
                            mine.push((version, h));
                        }
                        mine
                    })
                })
                .collect();
            workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
        });

        let (top_version, top_handle) = results.iter().max_by_key(|(v, _)| *v).unwrap();
        let info = registry.get_info("x").unwrap();
        assert_eq!(info.version, *top_version);
        let expected: ConnectionHandle = top_handle.clone();
        assert!(same_connection(&info.handle, &expected));
        assert!(!top_handle.is_closed());
        let closed = results.iter().filter(|(_, h)| h.is_closed()).count();
        assert_eq!(closed, results.len() - 1);
    }

    #[test]
    fn test_upsert_same_handle_does_not_close() {
        let registry = ConnectionRegistry::new();
        let (h, _rx) = ChannelTransport::new();
        let c: ConnectionHandle = h.clone();
        let v1 = registry.upsert("x", c.clone());
        let v2 = registry.upsert("x", c);
        assert!(v2 > v1);
        assert_eq!(h.close_calls(), 0);
        assert_eq!(registry.get_info("x").unwrap().version, v2);
    }

    #[test]
    fn test_versions_keep_increasing_after_remove() {
        let registry = ConnectionRegistry::new();
        let (h1, _rx1) = ChannelTransport::new();
        let (h2, _rx2) = ChannelTransport::new();
        let v1 = registry.upsert("x", h1.clone());
        assert!(registry.remove("x"));
        assert!(h1.is_closed());
        assert!(!registry.remove("x"));
        let v2 = registry.upsert("x", h2);
        assert!(v2 > v1);
    }

    #[test]
    fn test_close_all() {
        let registry = ConnectionRegistry::new();
        let (h1, _rx1) = ChannelTransport::new();
        let (h2, _rx2) = ChannelTransport::new();
        registry.upsert("a", h1.clone());
        registry.upsert("b", h2.clone());
        assert_eq!(registry.snapshot().len(), 2);
        assert_eq!(registry.close_all(), 2);
        assert!(registry.is_empty());
        assert!(h1.is_closed() && h2.is_closed());
    }
}
