//! Registry - 隔离舱注册表
//!
//! Caches configs and bulkhead instances by name for a single strategy.
//! Every config held here has been validated, so creating an instance from a
//! registered config cannot fail.

use super::Bulkhead;
use super::config::{
    BulkheadConfig, INLINE_CONFIG_NAME, StrategyConfig, StrategyKind, ThreadPoolBulkheadConfig,
};
use super::error::ConfigError;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// Config used when a bulkhead is created without naming or supplying one.
pub const DEFAULT_CONFIG_NAME: &str = "default";

/// Where [`Registry::get_or_create`] takes the config for a new instance.
#[derive(Debug, Clone, Default)]
pub enum ConfigSource {
    /// The `"default"` entry, or the strategy defaults when it is absent.
    #[default]
    Default,
    /// A registered config, looked up by name.
    Named(String),
    /// A config supplied by the caller. Validated before use.
    Inline(StrategyConfig),
}

impl From<&str> for ConfigSource {
    fn from(name: &str) -> Self {
        ConfigSource::Named(name.to_string())
    }
}

impl From<BulkheadConfig> for ConfigSource {
    fn from(config: BulkheadConfig) -> Self {
        ConfigSource::Inline(config.into())
    }
}

impl From<ThreadPoolBulkheadConfig> for ConfigSource {
    fn from(config: ThreadPoolBulkheadConfig) -> Self {
        ConfigSource::Inline(config.into())
    }
}

/// 隔离舱注册表 - one strategy per registry
#[derive(Debug)]
pub struct Registry {
    strategy: StrategyKind,
    configs: RwLock<HashMap<String, StrategyConfig>>,
    instances: Mutex<HashMap<String, Bulkhead>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::empty(StrategyKind::Semaphore)
    }
}

impl Registry {
    /// Builds a registry, validating every config up front. Fails on the
    /// first invalid entry and builds nothing.
    pub fn new<I>(strategy: StrategyKind, configs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, StrategyConfig)>,
    {
        let mut validated = HashMap::new();
        for (name, config) in configs {
            config.validate_for(strategy, &name)?;
            validated.insert(name, config);
        }

        info!(
            strategy = %strategy,
            configs = validated.len(),
            "Bulkhead registry created"
        );

        Ok(Self {
            strategy,
            configs: RwLock::new(validated),
            instances: Mutex::new(HashMap::new()),
        })
    }

    pub fn empty(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            configs: RwLock::new(HashMap::new()),
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn semaphore(configs: HashMap<String, BulkheadConfig>) -> Result<Self, ConfigError> {
        Self::new(
            StrategyKind::Semaphore,
            configs.into_iter().map(|(name, c)| (name, c.into())),
        )
    }

    pub fn thread_pool(
        configs: HashMap<String, ThreadPoolBulkheadConfig>,
    ) -> Result<Self, ConfigError> {
        Self::new(
            StrategyKind::ThreadPool,
            configs.into_iter().map(|(name, c)| (name, c.into())),
        )
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    /// 获取或创建隔离舱
    ///
    /// An existing instance is returned as is and `source` is ignored, even
    /// when it names an unknown config. Creation happens at most once per
    /// name: concurrent first lookups all receive the same instance.
    pub fn get_or_create(
        &self,
        name: &str,
        source: impl Into<ConfigSource>,
    ) -> Result<Bulkhead, ConfigError> {
        let mut instances = self.instances.lock();
        if let Some(existing) = instances.get(name) {
            return Ok(existing.clone());
        }

        let config = match source.into() {
            ConfigSource::Default => self.default_config(),
            ConfigSource::Named(config_name) => self
                .configuration(&config_name)
                .ok_or(ConfigError::Unknown { name: config_name })?,
            ConfigSource::Inline(config) => {
                config.validate_for(self.strategy, INLINE_CONFIG_NAME)?;
                config
            }
        };

        let bulkhead = Bulkhead::from_validated(name, config);
        instances.insert(name.to_string(), bulkhead.clone());
        Ok(bulkhead)
    }

    /// Like [`get_or_create`](Self::get_or_create) with the default config.
    pub fn bulkhead(&self, name: &str) -> Bulkhead {
        let mut instances = self.instances.lock();
        instances
            .entry(name.to_string())
            .or_insert_with(|| Bulkhead::from_validated(name, self.default_config()))
            .clone()
    }

    /// 获取隔离舱（如果存在）
    pub fn find(&self, name: &str) -> Option<Bulkhead> {
        self.instances.lock().get(name).cloned()
    }

    /// Forgets the instance. Holders of the returned handle keep using it.
    pub fn remove(&self, name: &str) -> Option<Bulkhead> {
        let removed = self.instances.lock().remove(name);
        if removed.is_some() {
            debug!(bulkhead = name, "Bulkhead removed from registry");
        }
        removed
    }

    /// Stores `bulkhead` under `name`, returning the instance it replaced.
    pub fn replace(&self, name: &str, bulkhead: Bulkhead) -> Result<Option<Bulkhead>, ConfigError> {
        if bulkhead.kind() != self.strategy {
            return Err(ConfigError::invalid(
                name,
                "strategy",
                format!(
                    "is {} but the registry uses {}",
                    bulkhead.kind(),
                    self.strategy
                ),
            ));
        }
        debug!(bulkhead = name, "Bulkhead replaced in registry");
        Ok(self.instances.lock().insert(name.to_string(), bulkhead))
    }

    /// Names of the instances created so far, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Registers a config for later lookups. Instances already created keep
    /// the config they were built with.
    pub fn add_configuration(
        &self,
        name: impl Into<String>,
        config: impl Into<StrategyConfig>,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        let config = config.into();
        config.validate_for(self.strategy, &name)?;
        debug!(config = %name, "Bulkhead config registered");
        self.configs.write().insert(name, config);
        Ok(())
    }

    pub fn configuration(&self, name: &str) -> Option<StrategyConfig> {
        self.configs.read().get(name).cloned()
    }

    /// The `"default"` entry, or the strategy defaults when it is absent.
    pub fn default_config(&self) -> StrategyConfig {
        self.configuration(DEFAULT_CONFIG_NAME)
            .unwrap_or_else(|| StrategyConfig::defaults_for(self.strategy))
    }
}

// ── Global registry ─────────────────────────────────────────────────

static GLOBAL: OnceLock<RwLock<Arc<Registry>>> = OnceLock::new();

fn global() -> &'static RwLock<Arc<Registry>> {
    GLOBAL.get_or_init(|| RwLock::new(Arc::new(Registry::default())))
}

/// The process-wide registry used for name-based calls. Starts out as an
/// empty semaphore registry.
pub fn global_registry() -> Arc<Registry> {
    Arc::clone(&global().read())
}

/// Swaps the process-wide registry and returns the previous one. Handles
/// already obtained from the old registry keep working.
pub fn set_global_registry(registry: Arc<Registry>) -> Arc<Registry> {
    info!(strategy = %registry.strategy(), "Global bulkhead registry replaced");
    std::mem::replace(&mut *global().write(), registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulkhead::SemaphoreBulkhead;
    use std::time::Duration;

    fn semaphore_config(calls: usize) -> BulkheadConfig {
        BulkheadConfig::builder()
            .max_concurrent_calls(calls)
            .build()
            .unwrap()
    }

    #[test]
    fn lookup_returns_same_instance() {
        let registry = Registry::default();
        let first = registry.get_or_create("db", ConfigSource::Default).unwrap();
        let second = registry.get_or_create("db", semaphore_config(1)).unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(
            second.config(),
            StrategyConfig::Semaphore(BulkheadConfig::default())
        );
    }

    #[test]
    fn named_config_is_resolved() {
        let registry = Registry::semaphore(HashMap::from([(
            "small".to_string(),
            semaphore_config(2),
        )]))
        .unwrap();
        let bulkhead = registry.get_or_create("db", "small").unwrap();
        assert_eq!(bulkhead.config(), StrategyConfig::Semaphore(semaphore_config(2)));
    }

    #[test]
    fn unknown_config_name_fails_without_creating() {
        let registry = Registry::default();
        let err = registry.get_or_create("db", "missing").unwrap_err();
        assert_eq!(
            err,
            ConfigError::Unknown {
                name: "missing".into()
            }
        );
        assert!(registry.find("db").is_none());
    }

    #[test]
    fn existing_instance_ignores_unknown_config_name() {
        let registry = Registry::default();
        registry.bulkhead("db");
        assert!(registry.get_or_create("db", "missing").is_ok());
    }

    #[test]
    fn default_entry_overrides_strategy_defaults() {
        let registry = Registry::semaphore(HashMap::from([(
            DEFAULT_CONFIG_NAME.to_string(),
            semaphore_config(3),
        )]))
        .unwrap();
        assert_eq!(
            registry.bulkhead("any").config(),
            StrategyConfig::Semaphore(semaphore_config(3))
        );
    }

    #[test]
    fn invalid_config_fails_construction() {
        let bad = ThreadPoolBulkheadConfig {
            core_thread_pool_size: 10,
            max_thread_pool_size: 5,
            ..ThreadPoolBulkheadConfig::default()
        };
        let err = Registry::thread_pool(HashMap::from([("bad".to_string(), bad)])).unwrap_err();
        match err {
            ConfigError::Invalid { config, field, .. } => {
                assert_eq!(config, "bad");
                assert_eq!(field, "core_thread_pool_size");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn inline_config_of_wrong_strategy_is_rejected() {
        let registry = Registry::default();
        let err = registry
            .get_or_create("db", ThreadPoolBulkheadConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "strategy", .. }));
    }

    #[test]
    fn thread_pool_registry_builds_pools() {
        let registry = Registry::thread_pool(HashMap::new()).unwrap();
        let bulkhead = registry.bulkhead("io");
        assert_eq!(bulkhead.kind(), StrategyKind::ThreadPool);
        assert_eq!(bulkhead.execute(|| Ok::<_, ()>(5)).unwrap(), 5);
    }

    #[test]
    fn add_configuration_validates() {
        let registry = Registry::empty(StrategyKind::ThreadPool);
        assert!(
            registry
                .add_configuration("sem", BulkheadConfig::default())
                .is_err()
        );
        let config = ThreadPoolBulkheadConfig::builder()
            .core_thread_pool_size(1)
            .max_thread_pool_size(1)
            .keep_alive_duration(Duration::from_millis(5))
            .build()
            .unwrap();
        registry.add_configuration("io", config.clone()).unwrap();
        assert_eq!(
            registry.configuration("io"),
            Some(StrategyConfig::ThreadPool(config))
        );
    }

    #[test]
    fn remove_and_replace() {
        let registry = Registry::default();
        let original = registry.bulkhead("db");
        assert_eq!(registry.names(), vec!["db".to_string()]);

        let replacement = Bulkhead::from(SemaphoreBulkhead::with_defaults("db"));
        let previous = registry.replace("db", replacement.clone()).unwrap();
        assert!(previous.unwrap().ptr_eq(&original));
        assert!(registry.find("db").unwrap().ptr_eq(&replacement));

        assert!(registry.remove("db").is_some());
        assert!(registry.names().is_empty());
        assert!(!registry.bulkhead("db").ptr_eq(&replacement));
    }

    #[test]
    fn replace_rejects_other_strategy() {
        let registry = Registry::default();
        let pool = Bulkhead::new("db", ThreadPoolBulkheadConfig::default().into()).unwrap();
        assert!(registry.replace("db", pool).is_err());
        assert!(registry.find("db").is_none());
    }
}
