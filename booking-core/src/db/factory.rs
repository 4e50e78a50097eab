use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::repository::{BookingRepository, RepositoryError};

/// Which backend to open, and the string handed to it untouched: a file
/// path, sqlx URL or `:memory:` for `sqlite`; ignored by `memory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub backend: String,
    pub connection_string: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            connection_string: ":memory:".to_string(),
        }
    }
}

/// Opens one kind of backend. Backend crates export a unit struct
/// implementing this.
#[async_trait]
pub trait RepositoryFactory: Send + Sync {
    /// Lowercase name the backend is selected by.
    fn backend_name(&self) -> &'static str;

    /// Connects and returns a repository ready for use, running any
    /// migrations or seeds first.
    async fn create(
        &self,
        config: &DbConfig,
    ) -> Result<Box<dyn BookingRepository>, RepositoryError>;
}

/// The backends a binary can open, by name.
///
/// ```rust,no_run
/// # use booking_core::db::{MemoryRepositoryFactory, RepositoryRegistry};
/// let registry = RepositoryRegistry::new().with(MemoryRepositoryFactory);
/// assert_eq!(registry.backends(), vec!["memory"]);
/// ```
#[derive(Default)]
pub struct RepositoryRegistry {
    factories: BTreeMap<&'static str, Box<dyn RepositoryFactory>>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `factory` under its backend name. The last factory added for a
    /// name wins.
    pub fn with(
        mut self,
        factory: impl RepositoryFactory + 'static,
    ) -> Self {
        self.factories.insert(factory.backend_name(), Box::new(factory));
        self
    }

    /// Registered backend names, sorted.
    pub fn backends(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Opens the backend `config.backend` names. The name is matched
    /// ignoring case and surrounding whitespace.
    ///
    /// # Errors
    /// [`RepositoryError::UnknownBackend`] when nothing is registered under
    /// that name; otherwise whatever the backend's factory returns.
    pub async fn open(
        &self,
        config: &DbConfig,
    ) -> Result<Box<dyn BookingRepository>, RepositoryError> {
        let requested = config.backend.trim().to_ascii_lowercase();
        let Some(factory) = self.factories.get(requested.as_str()) else {
            return Err(RepositoryError::UnknownBackend {
                requested,
                available: self.backends(),
            });
        };
        debug!(backend = factory.backend_name(), "opening repository");
        factory.create(config).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::{DbConfig, RepositoryError, RepositoryFactory, RepositoryRegistry};
    use crate::BookingRepository;
    use crate::db::memory::InMemoryRepository;

    /// Counts how often it was asked to open a repository.
    struct Counting {
        name: &'static str,
        opened: Arc<AtomicUsize>,
    }

    impl Counting {
        fn new(name: &'static str) -> (Self, Arc<AtomicUsize>) {
            let opened = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name,
                    opened: opened.clone(),
                },
                opened,
            )
        }
    }

    #[async_trait]
    impl RepositoryFactory for Counting {
        fn backend_name(&self) -> &'static str {
            self.name
        }

        async fn create(
            &self,
            _config: &DbConfig,
        ) -> Result<Box<dyn BookingRepository>, RepositoryError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(InMemoryRepository::new()))
        }
    }

    struct Unreachable;

    #[async_trait]
    impl RepositoryFactory for Unreachable {
        fn backend_name(&self) -> &'static str {
            "remote"
        }

        async fn create(
            &self,
            config: &DbConfig,
        ) -> Result<Box<dyn BookingRepository>, RepositoryError> {
            Err(RepositoryError::Connection(format!(
                "{} refused the connection",
                config.connection_string
            )))
        }
    }

    fn config(backend: &str) -> DbConfig {
        DbConfig {
            backend: backend.to_string(),
            ..DbConfig::default()
        }
    }

    #[test]
    fn default_config_is_an_in_memory_sqlite() {
        let cfg = DbConfig::default();
        assert_eq!(cfg.backend, "sqlite");
        assert_eq!(cfg.connection_string, ":memory:");
    }

    #[test]
    fn backends_are_listed_in_order_and_replaced_by_name() {
        let (sqlite, _) = Counting::new("sqlite");
        let (memory, _) = Counting::new("memory");
        let (again, _) = Counting::new("sqlite");
        let registry = RepositoryRegistry::new().with(sqlite).with(memory).with(again);

        assert_eq!(registry.backends(), vec!["memory", "sqlite"]);
        assert!(RepositoryRegistry::new().backends().is_empty());
    }

    #[tokio::test]
    async fn later_factory_with_the_same_name_is_the_one_opened() {
        let (first, first_opened) = Counting::new("sqlite");
        let (second, second_opened) = Counting::new("sqlite");
        let registry = RepositoryRegistry::new().with(first).with(second);

        registry.open(&config("sqlite")).await.unwrap();

        assert_eq!(first_opened.load(Ordering::SeqCst), 0);
        assert_eq!(second_opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backend_name_ignores_case_and_padding() {
        let (sqlite, sqlite_opened) = Counting::new("sqlite");
        let (memory, memory_opened) = Counting::new("memory");
        let registry = RepositoryRegistry::new().with(sqlite).with(memory);

        registry.open(&config(" SQLite ")).await.unwrap();

        assert_eq!(sqlite_opened.load(Ordering::SeqCst), 1);
        assert_eq!(memory_opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_backend_lists_what_is_available() {
        let (sqlite, _) = Counting::new("sqlite");
        let (memory, _) = Counting::new("memory");
        let registry = RepositoryRegistry::new().with(sqlite).with(memory);

        let Err(err) = registry.open(&config("Postgres")).await else {
            panic!("postgres is not registered");
        };

        assert_eq!(
            err,
            RepositoryError::UnknownBackend {
                requested: "postgres".to_string(),
                available: vec!["memory", "sqlite"],
            }
        );
        assert_eq!(
            err.to_string(),
            "Unknown backend 'postgres'; available: memory, sqlite"
        );
    }

    #[tokio::test]
    async fn factory_errors_pass_through() {
        let registry = RepositoryRegistry::new().with(Unreachable);
        let cfg = DbConfig {
            backend: "remote".to_string(),
            connection_string: "db.internal:5432".to_string(),
        };

        let Err(err) = registry.open(&cfg).await else {
            panic!("the remote backend always fails");
        };

        assert_eq!(
            err,
            RepositoryError::Connection("db.internal:5432 refused the connection".to_string())
        );
    }
}
