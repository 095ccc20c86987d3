use crate::value::Value;

/// One property of a pending mutation: original and current value plus flags.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDelta {
    /// Property name
    pub name: String,
    /// Value when the entity was loaded or last committed
    pub original_value: Value,
    /// Value as currently held by the unit of work
    pub current_value: Value,
    /// Flagged modified by the change tracker
    pub is_modified: bool,
    /// Part of the primary key
    pub is_key: bool,
    /// Source of a foreign key relation
    pub is_foreign_key: bool,
    /// Never included in captured history
    pub is_excluded: bool,
}

impl PropertyDelta {
    /// Creates an unmodified, unflagged property delta.
    pub fn new(name: impl Into<String>, original: impl Into<Value>, current: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            original_value: original.into(),
            current_value: current.into(),
            is_modified: false,
            is_key: false,
            is_foreign_key: false,
            is_excluded: false,
        }
    }

    /// Sets the modified flag.
    pub fn modified(mut self) -> Self {
        self.is_modified = true;
        self
    }

    /// Sets the key flag.
    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    /// Sets the foreign key flag.
    pub fn foreign_key(mut self) -> Self {
        self.is_foreign_key = true;
        self
    }

    /// Sets the excluded flag.
    pub fn excluded(mut self) -> Self {
        self.is_excluded = true;
        self
    }
}
