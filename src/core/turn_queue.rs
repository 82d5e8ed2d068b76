//! 轮转队列：活跃会话的公平轮询集合
//!
//! - add：不存在则追加到队尾（空 → 非空时唤醒一个等待者），已存在则刷新 payload 并移到队尾
//! - next：队列为空时等待（可超时），取队头后立即放回队尾，保证严格轮转、不饿死任何会话
//! - 同一会话 ID 至多一个条目

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

struct Inner<P> {
    order: VecDeque<String>,
    payloads: HashMap<String, P>,
}

impl<P> Inner<P> {
    fn detach(&mut self, id: &str) {
        if let Some(pos) = self.order.iter().position(|x| x == id) {
            self.order.remove(pos);
        }
    }
}

/// 公平轮询集合；P 为随条目携带的数据（如会话提示）
pub struct TurnQueue<P> {
    inner: Mutex<Inner<P>>,
    not_empty: Notify,
}

impl<P: Clone> TurnQueue<P> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                order: VecDeque::new(),
                payloads: HashMap::new(),
            }),
            not_empty: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<P>> {
        // 临界区内没有会 panic 的操作；即便中毒也继续使用内部数据
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 加入会话；已存在则刷新 payload 并移到队尾
    pub fn add(&self, id: impl Into<String>, payload: P) {
        let id = id.into();
        let was_empty = {
            let mut inner = self.lock();
            let was_empty = inner.order.is_empty();
            if inner.payloads.insert(id.clone(), payload).is_some() {
                inner.detach(&id);
            }
            inner.order.push_back(id);
            was_empty
        };
        if was_empty {
            self.not_empty.notify_one();
        }
    }

    /// 删除会话；不存在则忽略。返回是否真的删除了
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.lock();
        if inner.payloads.remove(id).is_some() {
            inner.detach(id);
            true
        } else {
            false
        }
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.order.clear();
        inner.payloads.clear();
    }

    /// 非阻塞取下一个：队头出队后立刻放回队尾
    pub fn try_next(&self) -> Option<(String, P)> {
        let mut inner = self.lock();
        let id = inner.order.pop_front()?;
        let payload = inner.payloads.get(&id).cloned();
        match payload {
            Some(payload) => {
                inner.order.push_back(id.clone());
                Some((id, payload))
            }
            None => None,
        }
    }

    /// 轮询下一个会话；为空时等待直到有会话加入或超时（超时返回 None，timeout 为 None 时一直等）
    pub async fn next(&self, timeout: Option<Duration>) -> Option<(String, P)> {
        let wait = async {
            loop {
                let notified = self.not_empty.notified();
                tokio::pin!(notified);
                // 先登记等待再检查，避免 add 的唤醒落在检查与等待之间
                notified.as_mut().enable();
                if let Some(entry) = self.try_next() {
                    return entry;
                }
                notified.await;
            }
        };

        match timeout {
            Some(t) => tokio::time::timeout(t, wait).await.ok(),
            None => Some(wait.await),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().payloads.contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// 当前顺序的快照（队头在前）
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().order.iter().cloned().collect()
    }
}

impl<P: Clone> Default for TurnQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}
