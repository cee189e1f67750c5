//! Skill registry: name → skill lookup built once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::skills::skill::{Skill, SkillDescriptor};

/// Registry of available skills.
///
/// Populated through `&mut self` during startup and then shared read-only
/// behind an `Arc`, so lookups need no locking.
#[derive(Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Arc<dyn Skill>>,
}

impl SkillRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill. A name that is already taken is an error.
    pub fn register(&mut self, skill: Arc<dyn Skill>) -> Result<(), RegistryError> {
        let name = skill.name().to_string();
        if self.has(&name) {
            return Err(RegistryError::DuplicateSkill { name });
        }
        tracing::debug!(skill = %name, version = %skill.version(), "Registered skill");
        self.skills.insert(name, skill);
        Ok(())
    }

    /// Get a skill by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.get(name).cloned()
    }

    /// Check if a skill exists.
    pub fn has(&self, name: &str) -> bool {
        self.skills.contains_key(name)
    }

    /// List all skill names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.skills.keys().cloned().collect();
        names.sort();
        names
    }

    /// Descriptors for every registered skill, sorted by name.
    pub fn descriptors(&self) -> Vec<SkillDescriptor> {
        let mut descriptors: Vec<SkillDescriptor> =
            self.skills.values().map(|skill| skill.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::context::SkillContext;
    use crate::skills::skill::{SkillMetadata, SkillResult, ValidationResult};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct MockSkill {
        name: String,
        version: &'static str,
    }

    #[async_trait]
    impl Skill for MockSkill {
        fn name(&self) -> &str {
            &self.name
        }
        fn version(&self) -> &str {
            self.version
        }
        fn description(&self) -> &str {
            "A mock skill for testing"
        }
        fn validate(&self, _ctx: &SkillContext) -> ValidationResult {
            ValidationResult::ok()
        }
        async fn execute(&self, _ctx: &SkillContext) -> SkillResult {
            SkillResult::success(
                serde_json::json!({}),
                SkillMetadata::new(self.name.clone(), self.version, 0),
            )
        }
    }

    fn mock(name: &str, version: &'static str) -> Arc<dyn Skill> {
        Arc::new(MockSkill {
            name: name.to_string(),
            version,
        })
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = SkillRegistry::new();
        registry.register(mock("test_skill", "1.0.0")).unwrap();

        assert!(registry.has("test_skill"));
        assert!(!registry.has("nonexistent"));

        let retrieved = registry.get("test_skill");
        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().name(), "test_skill");
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_duplicate_is_rejected_and_original_kept() {
        let mut registry = SkillRegistry::new();
        registry.register(mock("dup", "1.0.0")).unwrap();

        let err = registry.register(mock("dup", "2.0.0")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateSkill { ref name } if name == "dup"));
        assert_eq!(registry.get("dup").unwrap().version(), "1.0.0");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_list_and_descriptors_sorted() {
        let mut registry = SkillRegistry::new();
        assert!(registry.is_empty());
        registry.register(mock("b", "1.0.0")).unwrap();
        registry.register(mock("a", "1.1.0")).unwrap();

        assert_eq!(registry.list(), vec!["a".to_string(), "b".to_string()]);
        let descriptors = registry.descriptors();
        assert_eq!(descriptors[0].name, "a");
        assert_eq!(descriptors[0].version, "1.1.0");
        assert_eq!(descriptors[1].description, "A mock skill for testing");
    }
}
