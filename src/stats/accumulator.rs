use serde::{Deserialize, Serialize};

/// Custom data an agent contributes alongside regular statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CustomValue {
    Counter(u64),
    Max(u64),
    Min(u64),
}

impl CustomValue {
    /// Merges `other` into `self`. Values of a different kind replace the
    /// current one.
    fn add(&mut self, other: Self) {
        *self = match (*self, other) {
            (CustomValue::Counter(left), CustomValue::Counter(right)) => {
                CustomValue::Counter(left.saturating_add(right))
            }
            (CustomValue::Max(left), CustomValue::Max(right)) => CustomValue::Max(left.max(right)),
            (CustomValue::Min(left), CustomValue::Min(right)) => CustomValue::Min(left.min(right)),
            (
                CustomValue::Counter(_) | CustomValue::Max(_) | CustomValue::Min(_),
                replacement,
            ) => replacement,
        };
    }
}

/// Cross-agent merge of one custom value: created on first arrival, then
/// `add`ed for every contribution and `complete`d once at run end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accumulator {
    value: CustomValue,
    contributions: u32,
    completed: bool,
}

impl Accumulator {
    #[must_use]
    pub const fn new(first: CustomValue) -> Self {
        Self {
            value: first,
            contributions: 1,
            completed: false,
        }
    }

    /// Adds a contribution; ignored once completed.
    pub fn add(&mut self, value: CustomValue) {
        if self.completed {
            return;
        }
        self.value.add(value);
        self.contributions = self.contributions.saturating_add(1);
    }

    /// Final value, produced only on the first call.
    pub const fn complete(&mut self) -> Option<CustomValue> {
        if self.completed {
            return None;
        }
        self.completed = true;
        Some(self.value)
    }

    #[must_use]
    pub const fn value(&self) -> CustomValue {
        self.value
    }

    #[must_use]
    pub const fn contributions(&self) -> u32 {
        self.contributions
    }
}
