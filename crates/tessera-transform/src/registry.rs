/// Function id → implementation mapping produced by the client pass
use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::TransformError;

/// Where a registered function lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Resolved source file
    pub file: PathBuf,
    /// Exported name (`default` for default exports)
    pub name: String,
}

/// Ordered map of every function id referenced from client code
///
/// Owned by the build orchestrator, cleared and repopulated each cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Records an entry
    ///
    /// Re-inserting an identical entry is a no-op. A different entry under
    /// an existing id is a hash collision and is rejected.
    ///
    /// ```
    /// use tessera_transform::{FunctionRegistry, RegistryEntry};
    ///
    /// let mut registry = FunctionRegistry::new();
    /// let entry = RegistryEntry { file: "/app/api.ts".into(), name: "load".into() };
    /// registry.insert("fn_1".into(), entry.clone()).unwrap();
    /// registry.insert("fn_1".into(), entry).unwrap();
    /// assert_eq!(registry.len(), 1);
    ///
    /// let other = RegistryEntry { file: "/app/api.ts".into(), name: "save".into() };
    /// assert!(registry.insert("fn_1".into(), other).is_err());
    /// ```
    pub fn insert(&mut self, id: String, entry: RegistryEntry) -> Result<(), TransformError> {
        match self.entries.get(&id) {
            Some(existing) if *existing != entry => Err(TransformError::IdCollision {
                existing: format!("{}#{}", existing.file.display(), existing.name),
                incoming: format!("{}#{}", entry.file.display(), entry.name),
                id,
            }),
            Some(_) => Ok(()),
            None => {
                self.entries.insert(id, entry);
                Ok(())
            }
        }
    }

    /// Merges every entry of `other`, stopping at the first collision
    pub fn extend<I>(&mut self, entries: I) -> Result<(), TransformError>
    where
        I: IntoIterator<Item = (String, RegistryEntry)>,
    {
        entries
            .into_iter()
            .try_for_each(|(id, entry)| self.insert(id, entry))
    }

    pub fn get(&self, id: &str) -> Option<&RegistryEntry> {
        self.entries.get(id)
    }

    /// Entries in id order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &RegistryEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
