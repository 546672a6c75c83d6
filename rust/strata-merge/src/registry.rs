//! Registry of the pluggable merge components, looked up by name.
//!
//! A [`PluginRegistry`] is built once, populated with the built-in factories plus any
//! custom ones, and then shared by reference with the components that create split
//! strategies and attribute mergers. There is no process-wide registry.

use std::{collections::BTreeMap, sync::Arc};

use ahash::AHashMap;
use strata_attribute::AttributeConfig;
use strata_common::{Result, error::Error};
use strata_format::SplitConfig;

use crate::{
    attribute_merger::{AttributeMerger, DefaultAttributeMerger},
    split_strategy::{
        DefaultSplitStrategy, SegmentSplitStrategy, SplitContext, TimeSeriesSplitStrategy,
    },
};

pub const DEFAULT_PLUGIN: &str = "default";
pub const TIME_SERIES_PLUGIN: &str = "time_series";

/// Creates split strategies for one merge plan.
pub trait SplitStrategyFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(
        &self,
        ctx: &SplitContext<'_>,
        params: &BTreeMap<String, String>,
    ) -> Result<Box<dyn SegmentSplitStrategy>>;
}

/// Creates the merger of one attribute.
pub trait AttributeMergerFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, config: &AttributeConfig) -> Result<Box<dyn AttributeMerger>>;
}

struct DefaultSplitFactory;

impl SplitStrategyFactory for DefaultSplitFactory {
    fn name(&self) -> &str {
        DEFAULT_PLUGIN
    }

    fn create(
        &self,
        _ctx: &SplitContext<'_>,
        _params: &BTreeMap<String, String>,
    ) -> Result<Box<dyn SegmentSplitStrategy>> {
        Ok(Box::new(DefaultSplitStrategy))
    }
}

struct TimeSeriesSplitFactory;

impl SplitStrategyFactory for TimeSeriesSplitFactory {
    fn name(&self) -> &str {
        TIME_SERIES_PLUGIN
    }

    fn create(
        &self,
        ctx: &SplitContext<'_>,
        params: &BTreeMap<String, String>,
    ) -> Result<Box<dyn SegmentSplitStrategy>> {
        Ok(Box::new(TimeSeriesSplitStrategy::from_params(ctx, params)?))
    }
}

struct DefaultMergerFactory;

impl AttributeMergerFactory for DefaultMergerFactory {
    fn name(&self) -> &str {
        DEFAULT_PLUGIN
    }

    fn create(&self, _config: &AttributeConfig) -> Result<Box<dyn AttributeMerger>> {
        Ok(Box::new(DefaultAttributeMerger))
    }
}

/// Reduces a plugin name to the form used for built-in alias matching:
/// `"TimeSeriesSplitStrategy"`, `"time-series"` and `"time_series"` all become
/// `"timeseries"`.
fn alias_key(name: &str) -> String {
    let key = name
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect::<String>();
    ["splitstrategy", "attributemerger", "strategy", "merger"]
        .iter()
        .find_map(|suffix| key.strip_suffix(suffix).filter(|k| !k.is_empty()))
        .map(str::to_string)
        .unwrap_or(key)
}

/// Name-keyed factories of one plugin kind, with built-in alias fallback.
struct FactoryMap<F: ?Sized> {
    kind: &'static str,
    factories: AHashMap<String, Arc<F>>,
    builtins: Vec<String>,
}

impl<F: ?Sized> FactoryMap<F> {
    fn new(kind: &'static str) -> Self {
        FactoryMap {
            kind,
            factories: AHashMap::new(),
            builtins: Vec::new(),
        }
    }

    fn insert(&mut self, name: &str, factory: Arc<F>, builtin: bool) {
        if builtin {
            self.builtins.push(name.to_string());
        }
        self.factories.insert(name.to_string(), factory);
    }

    fn resolve(&self, name: &str) -> Result<Arc<F>> {
        if let Some(factory) = self.factories.get(name) {
            return Ok(factory.clone());
        }
        let key = alias_key(name);
        let builtin = self
            .builtins
            .iter()
            .find(|b| alias_key(b) == key)
            .ok_or_else(|| Error::plugin_not_found(name))?;
        log::warn!(
            "{} '{name}' is not registered, falling back to built-in '{builtin}'",
            self.kind
        );
        self.factories
            .get(builtin)
            .cloned()
            .ok_or_else(|| Error::plugin_not_found(name))
    }

    fn names(&self) -> Vec<String> {
        let mut names = self.factories.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }
}

/// Split strategy and attribute merger factories, keyed by name.
pub struct PluginRegistry {
    split_strategies: FactoryMap<dyn SplitStrategyFactory>,
    attribute_mergers: FactoryMap<dyn AttributeMergerFactory>,
}

impl PluginRegistry {
    /// Registry holding the built-in factories only.
    pub fn new() -> PluginRegistry {
        let mut registry = PluginRegistry {
            split_strategies: FactoryMap::new("split strategy"),
            attribute_mergers: FactoryMap::new("attribute merger"),
        };
        registry
            .split_strategies
            .insert(DEFAULT_PLUGIN, Arc::new(DefaultSplitFactory), true);
        registry
            .split_strategies
            .insert(TIME_SERIES_PLUGIN, Arc::new(TimeSeriesSplitFactory), true);
        registry
            .attribute_mergers
            .insert(DEFAULT_PLUGIN, Arc::new(DefaultMergerFactory), true);
        registry
    }

    /// Registers a split strategy factory under its name, replacing any previous one.
    pub fn register_split_strategy(&mut self, factory: impl SplitStrategyFactory + 'static) {
        let name = factory.name().to_string();
        self.split_strategies.insert(&name, Arc::new(factory), false);
    }

    /// Registers an attribute merger factory under its name, replacing any previous one.
    pub fn register_attribute_merger(&mut self, factory: impl AttributeMergerFactory + 'static) {
        let name = factory.name().to_string();
        self.attribute_mergers.insert(&name, Arc::new(factory), false);
    }

    pub fn split_strategy_names(&self) -> Vec<String> {
        self.split_strategies.names()
    }

    pub fn attribute_merger_names(&self) -> Vec<String> {
        self.attribute_mergers.names()
    }

    /// Creates the split strategy configured for a merge; `None` selects the default.
    pub fn create_split_strategy(
        &self,
        config: Option<&SplitConfig>,
        ctx: &SplitContext<'_>,
    ) -> Result<Box<dyn SegmentSplitStrategy>> {
        match config {
            Some(config) => self
                .split_strategies
                .resolve(&config.name)?
                .create(ctx, &config.params),
            None => Ok(Box::new(DefaultSplitStrategy)),
        }
    }

    pub fn create_attribute_merger(
        &self,
        name: &str,
        config: &AttributeConfig,
    ) -> Result<Box<dyn AttributeMerger>> {
        self.attribute_mergers.resolve(name)?.create(config)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        PluginRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use strata_common::{error::ErrorKind, ids::DocId};
    use strata_format::{FieldConfig, FieldType, Schema};

    use super::*;

    struct Halves;

    impl SegmentSplitStrategy for Halves {
        fn name(&self) -> &str {
            "halves"
        }

        fn target_segment_count(&self) -> usize {
            2
        }

        fn process(&self, source_index: usize, _local_doc_id: DocId) -> Result<usize> {
            Ok(source_index % 2)
        }
    }

    struct HalvesFactory;

    impl SplitStrategyFactory for HalvesFactory {
        fn name(&self) -> &str {
            "halves"
        }

        fn create(
            &self,
            _ctx: &SplitContext<'_>,
            _params: &BTreeMap<String, String>,
        ) -> Result<Box<dyn SegmentSplitStrategy>> {
            Ok(Box::new(Halves))
        }
    }

    fn schema() -> Schema {
        Schema {
            fields: vec![FieldConfig::new(0, "ts", FieldType::Int64)],
            ..Default::default()
        }
    }

    #[test]
    fn test_builtins_and_custom() {
        let schema = schema();
        let ctx = SplitContext {
            schema: &schema,
            sources: &[],
        };
        let mut registry = PluginRegistry::new();
        assert_eq!(registry.split_strategy_names(), vec!["default", "time_series"]);

        let strategy = registry.create_split_strategy(None, &ctx).unwrap();
        assert_eq!(strategy.name(), "default");

        let config = SplitConfig::new("time_series")
            .with_param("field", "ts")
            .with_param("ranges", "10,20");
        let strategy = registry.create_split_strategy(Some(&config), &ctx).unwrap();
        assert_eq!(strategy.target_segment_count(), 3);

        registry.register_split_strategy(HalvesFactory);
        let strategy = registry
            .create_split_strategy(Some(&SplitConfig::new("halves")), &ctx)
            .unwrap();
        assert_eq!(strategy.process(3, 0).unwrap(), 1);

        let config = AttributeConfig::for_field(&schema.fields[0]);
        let merger = registry.create_attribute_merger("default", &config).unwrap();
        assert_eq!(merger.name(), "default");
    }

    #[test]
    fn test_alias_falls_back_to_builtin() {
        let schema = schema();
        let ctx = SplitContext {
            schema: &schema,
            sources: &[],
        };
        let registry = PluginRegistry::new();
        for name in ["TimeSeries", "time-series", "TimeSeriesSplitStrategy"] {
            let config = SplitConfig::new(name).with_param("field", "ts");
            let strategy = registry.create_split_strategy(Some(&config), &ctx).unwrap();
            assert_eq!(strategy.name(), "time_series", "alias {name}");
        }
        let config = AttributeConfig::for_field(&schema.fields[0]);
        let merger = registry
            .create_attribute_merger("DefaultAttributeMerger", &config)
            .unwrap();
        assert_eq!(merger.name(), "default");
    }

    #[test]
    fn test_unknown_plugin() {
        let schema = schema();
        let ctx = SplitContext {
            schema: &schema,
            sources: &[],
        };
        let registry = PluginRegistry::new();
        let err = registry
            .create_split_strategy(Some(&SplitConfig::new("geo_hash")), &ctx)
            .err()
            .unwrap();
        assert!(matches!(err.kind(), ErrorKind::PluginNotFound { name } if name == "geo_hash"));
        assert!(!err.is_retryable());
    }
}
