use std::collections::HashMap;
use std::sync::Arc;

use crate::store::Repository;

/// Named repositories a unit of work may write to.
///
/// Operations are queued against a repository name; the name is resolved
/// against this registry when the operation is registered.
#[derive(Clone, Default)]
pub struct RepositoryRegistry {
    repositories: HashMap<String, Arc<dyn Repository>>,
}

impl RepositoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a repository under the given name, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, repository: Arc<dyn Repository>) {
        self.repositories.insert(name.into(), repository);
    }

    /// Builder-style variant of [`RepositoryRegistry::register`].
    pub fn with(mut self, name: impl Into<String>, repository: Arc<dyn Repository>) -> Self {
        self.register(name, repository);
        self
    }

    /// Returns the repository registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Repository>> {
        self.repositories.get(name).cloned()
    }

    /// Returns true if a repository is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.repositories.contains_key(name)
    }

    /// Returns the number of registered repositories.
    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    /// Returns true if no repository is registered.
    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }
}

impl std::fmt::Debug for RepositoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.repositories.keys().collect();
        names.sort();
        f.debug_struct("RepositoryRegistry")
            .field("repositories", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryRepository;

    #[test]
    fn register_and_resolve() {
        let registry = RepositoryRegistry::new()
            .with("contracts", Arc::new(InMemoryRepository::new()));

        assert!(registry.contains("contracts"));
        assert!(registry.get("contracts").is_some());
        assert!(registry.get("campaigns").is_none());
        assert_eq!(registry.len(), 1);
    }
}
