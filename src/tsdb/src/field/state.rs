use std::collections::HashMap;

/// StateStore holds the previous raw value of every delta chain during one encode or
/// decode pass. A chain that has not been seen yet needs initialization: its first value
/// is written in full.
#[derive(Debug, Default)]
pub struct StateStore {
    slots: HashMap<String, i64>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// prev returns the last value of the chain, None if the chain needs initialization.
    pub fn prev(&self, state_name: &str) -> Option<i64> {
        self.slots.get(state_name).copied()
    }

    pub fn needs_init(&self, state_name: &str) -> bool {
        !self.slots.contains_key(state_name)
    }

    pub fn set(&mut self, state_name: &str, v: i64) {
        if let Some(slot) = self.slots.get_mut(state_name) {
            *slot = v;
        } else {
            self.slots.insert(state_name.to_string(), v);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
