//! Engine configuration, loaded from `FORMKIT_*` environment variables with
//! development defaults.

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// SQLite database path. `None` opens an in-memory database.
    pub database_path: Option<String>,

    /// Page size used when a lookup query does not specify a limit.
    pub default_page_size: usize,

    /// Upper bound applied to any requested limit.
    pub max_page_size: usize,

    /// Whether `list_sources` includes the built-in static lists.
    pub list_static_sources: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            list_static_sources: true,
        }
    }
}

impl EngineConfig {
    /// Environment variables:
    /// - `FORMKIT_DATABASE_PATH`: SQLite file (default: in-memory)
    /// - `FORMKIT_LOOKUP_PAGE_SIZE`: default lookup page size (default: 50)
    /// - `FORMKIT_LOOKUP_MAX_PAGE_SIZE`: maximum lookup page size (default: 500)
    /// - `FORMKIT_STATIC_SOURCES`: "false" hides static sources (default: true)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let database_path = get("FORMKIT_DATABASE_PATH")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && s != ":memory:");

        let max_page_size = get("FORMKIT_LOOKUP_MAX_PAGE_SIZE")
            .and_then(|s| s.trim().parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults.max_page_size);

        let default_page_size = get("FORMKIT_LOOKUP_PAGE_SIZE")
            .and_then(|s| s.trim().parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults.default_page_size)
            .min(max_page_size);

        let list_static_sources = get("FORMKIT_STATIC_SOURCES")
            .map(|s| s.trim().to_lowercase() != "false")
            .unwrap_or(defaults.list_static_sources);

        Self {
            database_path,
            default_page_size,
            max_page_size,
            list_static_sources,
        }
    }

    /// Effective page size for a requested limit.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(0) | None => self.default_page_size,
            Some(n) => n.min(self.max_page_size),
        }
    }
}
