//! 会话上下文缓存：按会话 ID 存放，闲置超时淘汰，超出容量时淘汰最久未用的一条
//!
//! 归 DialogueController 独占，只在调度循环里访问。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::context::ConversationContext;

struct Slot {
    context: ConversationContext,
    last_used: Instant,
}

pub struct ContextStore {
    slots: HashMap<String, Slot>,
    ttl: Duration,
    capacity: usize,
}

impl ContextStore {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&ConversationContext> {
        self.slots.get(id).map(|s| &s.context)
    }

    /// 取出上下文（一轮结束后用 insert 放回）
    pub fn take(&mut self, id: &str) -> Option<ConversationContext> {
        self.slots.remove(id).map(|s| s.context)
    }

    /// 放入并刷新使用时间；容量满时先淘汰最久未用的一条
    pub fn insert(&mut self, id: impl Into<String>, context: ConversationContext) {
        let id = id.into();
        if !self.slots.contains_key(&id) && self.slots.len() >= self.capacity {
            self.evict_lru();
        }
        self.slots.insert(
            id,
            Slot {
                context,
                last_used: Instant::now(),
            },
        );
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.slots.remove(id).is_some()
    }

    /// 淘汰闲置超过 ttl 的上下文，返回淘汰数量
    pub fn evict_expired(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.slots.len();
        self.slots.retain(|id, slot| {
            let keep = slot.last_used.elapsed() < ttl;
            if !keep {
                tracing::debug!(id = %id, "Evicting idle conversation context");
            }
            keep
        });
        before - self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .slots
            .iter()
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            tracing::debug!(id = %id, "Context store full, evicting least recently used");
            self.slots.remove(&id);
        }
    }
}
