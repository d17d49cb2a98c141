#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::uninlined_format_args
)]

pub mod bulkhead;
pub mod config;

pub use bulkhead::{
    Bulkhead, BulkheadConfig, BulkheadEvent, BulkheadEventKind, BulkheadFullError, CallError,
    ConfigError, ConfigSource, Isolation, Metrics, Registry, SemaphoreBulkhead, StrategyConfig,
    StrategyKind, ThreadPoolBulkhead, ThreadPoolBulkheadConfig, execute, execute_named,
    global_registry, set_global_registry,
};
