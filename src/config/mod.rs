//! Typed configuration, layered from an optional file and the environment.
//!
//! Sources, later ones winning:
//! 1. built-in defaults,
//! 2. `config/searchstate.{toml,json,yaml}` in the working directory, if present,
//! 3. an explicit file passed to [`SearchConfig::load`],
//! 4. `SEARCHSTATE__*` environment variables (`SEARCHSTATE__CACHE__TTL_MINUTES=5`).

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

use crate::cache::memory::{DEFAULT_MAX_ENTRIES, MAX_TTL};
use crate::cache::{CacheStore, MemoryCache, ParameterStore, key::DEFAULT_PREFIX};
use crate::params::SearchParameters;
use crate::schema::{Callbacks, ResourceSchema, SpecError};
use crate::search::{DEFAULT_PER_PAGE, PAGINATION_PARAM, SearchResource};

const DEFAULT_CONFIG_BASENAME: &str = "config/searchstate";
const ENV_PREFIX: &str = "SEARCHSTATE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Build(#[from] config::ConfigError),

    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("resource `{name}`: {source}")]
    Resource {
        name: String,
        #[source]
        source: SpecError,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_minutes: u64,
    pub prefix: String,
    /// Capacity of the in-process backend.
    pub max_entries: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_minutes: 60,
            prefix: DEFAULT_PREFIX.to_owned(),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Defaults every resource starts from.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DefaultSettings {
    pub filters: SearchParameters,
    pub sorts: SearchParameters,
    pub pagination: u64,
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            filters: SearchParameters::new(),
            sorts: SearchParameters::new(),
            pagination: DEFAULT_PER_PAGE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub bind: String,
    pub base_path: String,
    /// Header carrying the authenticated user id, set by a trusted gateway.
    pub identity_header: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_owned(),
            base_path: "/search".to_owned(),
            identity_header: "x-user-id".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub cache: CacheSettings,
    pub defaults: DefaultSettings,
    pub http: HttpSettings,
    /// Reject unknown filter types instead of treating them as `exact`.
    pub strict_specs: bool,
    /// Save supplied request parameters for the next visit.
    pub persist_request: bool,
    pub resources: IndexMap<String, ResourceSchema>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            defaults: DefaultSettings::default(),
            http: HttpSettings::default(),
            strict_specs: true,
            persist_request: true,
            resources: IndexMap::new(),
        }
    }
}

impl SearchConfig {
    /// Loads and validates configuration from every source.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a TOML document, ignoring files and environment.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.ttl_minutes == 0 {
            return Err(ConfigError::Invalid {
                key: "cache.ttl_minutes",
                reason: "must be greater than zero".into(),
            });
        }
        if self.cache.ttl_minutes > MAX_TTL.as_secs() / 60 {
            return Err(ConfigError::Invalid {
                key: "cache.ttl_minutes",
                reason: format!("must be at most {} minutes", MAX_TTL.as_secs() / 60),
            });
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid {
                key: "cache.max_entries",
                reason: "must be greater than zero".into(),
            });
        }
        if self.cache.prefix.is_empty() {
            return Err(ConfigError::Invalid {
                key: "cache.prefix",
                reason: "must not be empty".into(),
            });
        }
        if self.defaults.pagination == 0 {
            return Err(ConfigError::Invalid {
                key: "defaults.pagination",
                reason: "must be greater than zero".into(),
            });
        }
        if !self.http.base_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                key: "http.base_path",
                reason: format!("`{}` must start with `/`", self.http.base_path),
            });
        }
        if self.http.identity_header.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "http.identity_header",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_minutes.saturating_mul(60))
    }

    /// A store over `cache` using the configured TTL.
    pub fn store<C: CacheStore>(&self, cache: C) -> ParameterStore<C> {
        ParameterStore::new(cache).with_ttl(self.ttl())
    }

    /// An in-process backend sized by `cache.max_entries`.
    pub fn memory_cache(&self) -> MemoryCache {
        MemoryCache::with_capacity(self.cache.max_entries)
    }

    /// Global default parameters: filter defaults, sort defaults and page size.
    pub fn default_parameters(&self) -> SearchParameters {
        let mut params = self.defaults.filters.clone();
        params.merge(&self.defaults.sorts);
        if !params.contains_key(PAGINATION_PARAM) {
            params.insert(PAGINATION_PARAM, self.defaults.pagination);
        }
        params
    }

    /// Builds every configured resource. Resource defaults are layered over
    /// the global ones and resources without a page size get the global one.
    pub fn resources(
        &self,
        callbacks: &Callbacks,
    ) -> Result<IndexMap<String, SearchResource>, ConfigError> {
        self.resources
            .iter()
            .map(|(name, schema)| {
                let mut schema = schema.clone();
                let mut defaults = self.default_parameters();
                defaults.merge(&schema.defaults);
                if schema.pagination.is_none() {
                    schema.pagination = Some(self.defaults.pagination);
                    if !schema.defaults.contains_key(PAGINATION_PARAM) {
                        defaults.remove(PAGINATION_PARAM);
                    }
                }
                schema.defaults = defaults;

                let resource = schema
                    .build(callbacks, self.strict_specs)
                    .map_err(|source| ConfigError::Resource {
                        name: name.clone(),
                        source,
                    })?;
                Ok((name.clone(), resource))
            })
            .collect()
    }
}
