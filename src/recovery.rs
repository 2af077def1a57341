//! Local recovery strategies keyed by controller error code

use std::collections::HashMap;

/// ORiN "object already exists": the task is already open in this session
pub const E_OBJECT_ALREADY_EXISTS: i32 = -2147483131;

/// What to do when a fresh task resolution fails with a known code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Fall back to the cached binding after re-validating it
    ReuseCached,
}

/// Error-code to recovery mapping. Codes not in the table propagate unchanged.
#[derive(Debug, Clone)]
pub struct RecoveryTable {
    entries: HashMap<i32, Recovery>,
}

impl RecoveryTable {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn with(mut self, code: i32, recovery: Recovery) -> Self {
        self.entries.insert(code, recovery);
        self
    }

    pub fn lookup(&self, code: i32) -> Option<Recovery> {
        self.entries.get(&code).copied()
    }
}

impl Default for RecoveryTable {
    fn default() -> Self {
        Self::empty().with(E_OBJECT_ALREADY_EXISTS, Recovery::ReuseCached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_knows_already_exists() {
        let table = RecoveryTable::default();
        assert_eq!(table.lookup(E_OBJECT_ALREADY_EXISTS), Some(Recovery::ReuseCached));
        assert_eq!(table.lookup(-1), None);
    }

    #[test]
    fn test_empty_table_recovers_nothing() {
        assert_eq!(RecoveryTable::empty().lookup(E_OBJECT_ALREADY_EXISTS), None);
    }
}
