//! Tab-local state.
//!
//! Facts owned by exactly one tab and never replicated: focus,
//! visibility, drafts, scroll positions. Keeping them out of
//! [`tandem_core::GlobalState`] means no version traffic and no
//! reconciliation for data no other tab can observe anyway.

use serde_json::Value;
use std::collections::BTreeMap;
use tandem_core::TabId;

#[derive(Debug, Clone)]
pub struct TabState {
    tab: TabId,
    focused: bool,
    last_activity_ms: u64,
    entries: BTreeMap<String, Value>,
}

impl TabState {
    pub fn new(tab: TabId) -> Self {
        Self {
            tab,
            focused: false,
            last_activity_ms: 0,
            entries: BTreeMap::new(),
        }
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn set_focused(&mut self, focused: bool, now_ms: u64) {
        self.focused = focused;
        self.touch(now_ms);
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_activity_ms = self.last_activity_ms.max(now_ms);
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }
}
