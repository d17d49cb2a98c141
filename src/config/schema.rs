use crate::bulkhead::{
    BulkheadConfig, Registry, StrategyConfig, StrategyKind, ThreadPoolBulkheadConfig,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

// ── Bulkheads file ──────────────────────────────────────────────────

/// On-disk registry description.
///
/// ```toml
/// strategy = "thread_pool"
///
/// [configs.default]
/// max_thread_pool_size = 4
/// core_thread_pool_size = 2
///
/// [configs.reports]
/// queue_capacity = 10
/// ```
///
/// Config tables are read against the schema of `strategy`, so a table may
/// only use that strategy's fields. Omitted fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BulkheadsFile {
    #[serde(default)]
    pub strategy: StrategyKind,

    #[serde(default)]
    pub configs: BTreeMap<String, toml::Value>,
}

impl BulkheadsFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read bulkheads file: {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse bulkheads file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Invalid bulkheads TOML")
    }

    /// Typed configs, read against the file's strategy.
    pub fn strategy_configs(&self) -> Result<BTreeMap<String, StrategyConfig>> {
        self.configs
            .iter()
            .map(|(name, table)| {
                let config = match self.strategy {
                    StrategyKind::Semaphore => table
                        .clone()
                        .try_into::<BulkheadConfig>()
                        .map(StrategyConfig::from),
                    StrategyKind::ThreadPool => table
                        .clone()
                        .try_into::<ThreadPoolBulkheadConfig>()
                        .map(StrategyConfig::from),
                }
                .with_context(|| {
                    format!("Config '{name}' is not a valid {} config", self.strategy)
                })?;
                Ok((name.clone(), config))
            })
            .collect()
    }

    /// Builds the registry the file describes, validating every config.
    pub fn into_registry(self) -> Result<Registry> {
        let configs = self.strategy_configs()?;
        let registry = Registry::new(self.strategy, configs)?;
        Ok(registry)
    }
}
