//! Agent 注册表
//!
//! Controller 持有的唯一共享状态：AgentId → 是否正在审计。
//! 标识由单调计数器分配，不从表大小推导，也不会复用。

use std::cmp::Ordering;
use std::collections::HashMap;

use parking_lot::RwLock;

use crate::protocol::AgentId;

/// 注册表条目（快照用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub id: AgentId,
    pub auditing: bool,
}

struct Inner {
    entries: HashMap<AgentId, bool>,
    next_id: u64,
}

/// Agent 注册表
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    /// 分配新的 AgentId 并插入 auditing=false 的条目
    pub fn register(&self) -> AgentId {
        let mut inner = self.inner.write();
        let id = AgentId::new(inner.next_id.to_string());
        inner.next_id += 1;
        inner.entries.insert(id.clone(), false);
        id
    }

    /// 更新审计状态（未注册的标识直接插入）
    ///
    /// 返回之前的状态，`None` 表示此前没有条目。
    pub fn set_auditing(&self, id: &AgentId, auditing: bool) -> Option<bool> {
        self.inner.write().entries.insert(id.clone(), auditing)
    }

    pub fn get(&self, id: &AgentId) -> Option<bool> {
        self.inner.read().entries.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// 按注册顺序输出所有条目
    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        let mut entries: Vec<RegistryEntry> = self
            .inner
            .read()
            .entries
            .iter()
            .map(|(id, auditing)| RegistryEntry {
                id: id.clone(),
                auditing: *auditing,
            })
            .collect();
        entries.sort_by(|a, b| registration_order(&a.id, &b.id));
        entries
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

// 数字标识按数值排序，其他（外部上报的未知标识）排在后面
fn registration_order(a: &AgentId, b: &AgentId) -> Ordering {
    match (a.as_str().parse::<u64>(), b.as_str().parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
