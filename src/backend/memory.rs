use super::Backend;
use crate::error::Result;
use std::collections::HashMap;

/// Process-local map used as the no-I/O baseline.
///
/// Each worker process owns a separate map, so workers never observe each
/// other's writes.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: HashMap<String, String>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Backend for InMemoryBackend {
    fn get(&mut self, key: &str) -> Result<Option<String>> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &str) -> Result<()> {
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
