//! Tag to task-class registry.

use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use tracing::debug;

use crate::core::error::RegistryError;
use crate::core::task::Task;

/// A task type the launcher can build by tag.
pub trait LauncherTask: Task + Sized {
    /// Unique tag.
    const TAG: &'static str;

    /// Parameterless construction.
    ///
    /// # Errors
    ///
    /// Construction failure.
    fn launcher_task() -> anyhow::Result<Self>;

    /// Tags that must be running before this task starts.
    fn requirements() -> &'static [&'static str] {
        &[]
    }
}

type Factory = Arc<dyn Fn() -> anyhow::Result<Arc<dyn Task>> + Send + Sync>;

static NEXT_CLASS_KEY: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassKey {
    Type(TypeId),
    Custom(u64),
}

/// Everything needed to build and order one task class.
#[derive(Clone)]
pub struct TaskClass {
    tag: String,
    key: ClassKey,
    type_name: &'static str,
    requirements: Vec<String>,
    factory: Factory,
}

impl TaskClass {
    /// Class of a [`LauncherTask`] type.
    #[must_use]
    pub fn of<T: LauncherTask>() -> Self {
        Self {
            tag: T::TAG.to_string(),
            key: ClassKey::Type(TypeId::of::<T>()),
            type_name: std::any::type_name::<T>(),
            requirements: T::requirements().iter().map(|r| (*r).to_string()).collect(),
            factory: Arc::new(|| -> anyhow::Result<Arc<dyn Task>> {
                Ok(Arc::new(T::launcher_task()?) as Arc<dyn Task>)
            }),
        }
    }

    /// Class built by a closure. Every call creates a distinct class.
    pub fn custom<F>(
        tag: impl Into<String>,
        requirements: impl IntoIterator<Item = impl Into<String>>,
        factory: F,
    ) -> Self
    where
        F: Fn() -> anyhow::Result<Arc<dyn Task>> + Send + Sync + 'static,
    {
        Self {
            tag: tag.into(),
            key: ClassKey::Custom(NEXT_CLASS_KEY.fetch_add(1, Ordering::Relaxed)),
            type_name: "custom",
            requirements: requirements.into_iter().map(Into::into).collect(),
            factory: Arc::new(factory),
        }
    }

    /// Tag the class is registered under.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Required tags.
    #[must_use]
    pub fn requirements(&self) -> &[String] {
        &self.requirements
    }

    /// Implementing type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Build a fresh instance.
    ///
    /// # Errors
    ///
    /// Construction failure.
    pub fn create(&self) -> anyhow::Result<Arc<dyn Task>> {
        (self.factory)()
    }

    fn same_class(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl fmt::Debug for TaskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskClass")
            .field("tag", &self.tag)
            .field("type_name", &self.type_name)
            .field("requirements", &self.requirements)
            .finish_non_exhaustive()
    }
}

/// Tag to class mapping with optional fallback on miss.
#[derive(Default)]
pub struct TaskRegistry {
    classes: RwLock<BTreeMap<String, TaskClass>>,
    fallback: Option<Arc<TaskRegistry>>,
}

impl TaskRegistry {
    /// Empty registry without fallback.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty registry consulting `fallback` on miss.
    #[must_use]
    pub fn with_fallback(fallback: Arc<Self>) -> Self {
        Self {
            classes: RwLock::default(),
            fallback: Some(fallback),
        }
    }

    /// Register a [`LauncherTask`] type under its tag.
    ///
    /// # Errors
    ///
    /// See [`Self::register_class`].
    pub fn register<T: LauncherTask>(&self) -> Result<(), RegistryError> {
        self.register_class(TaskClass::of::<T>())
    }

    /// Bind a class to its tag. Binding the same class again is a no-op.
    ///
    /// # Errors
    ///
    /// [`RegistryError::EmptyTag`] or [`RegistryError::DuplicateTag`].
    pub fn register_class(&self, class: TaskClass) -> Result<(), RegistryError> {
        if class.tag.is_empty() {
            return Err(RegistryError::EmptyTag);
        }
        let mut classes = self.classes.write();
        if let Some(existing) = classes.get(&class.tag) {
            if existing.same_class(&class) {
                return Ok(());
            }
            return Err(RegistryError::DuplicateTag {
                tag: class.tag,
                existing: existing.type_name,
                attempted: class.type_name,
            });
        }
        debug!(tag = %class.tag, class = class.type_name, "task class registered");
        classes.insert(class.tag.clone(), class);
        Ok(())
    }

    /// Remove a binding from this registry (fallbacks are untouched).
    pub fn unregister(&self, tag: &str) -> Option<TaskClass> {
        self.classes.write().remove(tag)
    }

    /// Resolve a tag, consulting fallbacks.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NoSuchTag`].
    pub fn get(&self, tag: &str) -> Result<TaskClass, RegistryError> {
        if let Some(class) = self.classes.read().get(tag) {
            return Ok(class.clone());
        }
        match &self.fallback {
            Some(fallback) => fallback.get(tag),
            None => Err(RegistryError::NoSuchTag(tag.to_string())),
        }
    }

    /// True if the tag resolves here or in a fallback.
    #[must_use]
    pub fn has(&self, tag: &str) -> bool {
        self.classes.read().contains_key(tag)
            || self.fallback.as_ref().is_some_and(|f| f.has(tag))
    }

    /// Tags resolvable through this registry, sorted.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.classes.read().keys().cloned().collect();
        if let Some(fallback) = &self.fallback {
            tags.extend(fallback.tags());
            tags.sort();
            tags.dedup();
        }
        tags
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tags", &self.classes.read().keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

static DEFAULT_REGISTRY: LazyLock<Arc<TaskRegistry>> = LazyLock::new(|| Arc::new(TaskRegistry::new()));

/// Process-wide registry.
pub fn default_registry() -> Arc<TaskRegistry> {
    Arc::clone(&DEFAULT_REGISTRY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signal::Payload;

    struct Alpha;

    impl Task for Alpha {
        fn start(&self) -> anyhow::Result<Payload> {
            Ok(Payload::none())
        }
    }

    impl LauncherTask for Alpha {
        const TAG: &'static str = "alpha";
        fn launcher_task() -> anyhow::Result<Self> {
            Ok(Self)
        }
    }

    struct OtherAlpha;

    impl Task for OtherAlpha {
        fn start(&self) -> anyhow::Result<Payload> {
            Ok(Payload::none())
        }
    }

    impl LauncherTask for OtherAlpha {
        const TAG: &'static str = "alpha";
        fn launcher_task() -> anyhow::Result<Self> {
            Ok(Self)
        }
        fn requirements() -> &'static [&'static str] {
            &["beta"]
        }
    }

    #[test]
    fn test_rebinding() {
        let registry = TaskRegistry::new();
        registry.register::<Alpha>().unwrap();
        registry.register::<Alpha>().unwrap();
        let err = registry.register::<OtherAlpha>().unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTag { ref tag, .. } if tag == "alpha"));
    }

    #[test]
    fn test_fallback_lookup() {
        let parent = Arc::new(TaskRegistry::new());
        parent.register::<OtherAlpha>().unwrap();
        let child = TaskRegistry::with_fallback(Arc::clone(&parent));
        assert!(child.has("alpha"));
        assert_eq!(child.get("alpha").unwrap().requirements(), ["beta".to_string()]);
        assert_eq!(child.tags(), vec!["alpha".to_string()]);
        assert_eq!(
            child.get("gamma").unwrap_err(),
            RegistryError::NoSuchTag("gamma".to_string())
        );
    }

    #[test]
    fn test_empty_tag_rejected() {
        let registry = TaskRegistry::new();
        let class = TaskClass::custom("", Vec::<String>::new(), || {
            Ok(Arc::new(Alpha) as Arc<dyn Task>)
        });
        assert_eq!(registry.register_class(class), Err(RegistryError::EmptyTag));
    }
}
