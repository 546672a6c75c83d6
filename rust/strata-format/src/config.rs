use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};
use strata_common::error::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// The building segment is dumped once it holds this many documents.
    pub max_docs_per_segment: u32,
    /// Memory available to building segments, offset table extension and merge writers.
    pub memory_quota_bytes: u64,
    /// Sort added documents of each batch by the schema's sort fields.
    pub enable_sort: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            max_docs_per_segment: 64 * 1024,
            memory_quota_bytes: 1024 * 1024 * 1024,
            enable_sort: false,
        }
    }
}

/// Names a split strategy in the plugin registry along with its parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub name: String,
    pub params: BTreeMap<String, String>,
}

impl SplitConfig {
    pub fn new(name: impl Into<String>) -> SplitConfig {
        SplitConfig {
            name: name.into(),
            params: Default::default(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Number of parallel merge instances.
    pub instance_count: usize,
    pub split: Option<SplitConfig>,
    /// Upper bound on source segments combined by one merge plan.
    pub max_source_segments: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            instance_count: 4,
            split: None,
            max_source_segments: 64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionOptions {
    pub build: BuildConfig,
    pub merge: MergeConfig,
}

impl PartitionOptions {
    pub fn from_json_str(json: &str) -> strata_common::Result<PartitionOptions> {
        let options: PartitionOptions =
            serde_json::from_str(json).map_err(|e| Error::json("partition options", e))?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> strata_common::Result<PartitionOptions> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::io(path.display().to_string(), e))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> strata_common::Result<()> {
        if self.build.max_docs_per_segment == 0 {
            return Err(Error::invalid_arg(
                "max_docs_per_segment",
                "must be positive",
            ));
        }
        if self.merge.instance_count == 0 {
            return Err(Error::invalid_arg("instance_count", "must be positive"));
        }
        if self.merge.max_source_segments < 2 {
            return Err(Error::invalid_arg(
                "max_source_segments",
                "a merge needs at least two source segments",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let options = PartitionOptions::from_json_str(
            r#"{"merge": {"instance_count": 2, "split": {"name": "time_series",
                "params": {"field": "ts", "ranges": "100,200"}}}}"#,
        )
        .unwrap();
        assert_eq!(options.build, BuildConfig::default());
        assert_eq!(options.merge.instance_count, 2);
        assert_eq!(options.merge.max_source_segments, 64);
        let split = options.merge.split.unwrap();
        assert_eq!(split.name, "time_series");
        assert_eq!(split.params["ranges"], "100,200");
    }

    #[test]
    fn test_invalid_options_rejected() {
        assert!(PartitionOptions::from_json_str(r#"{"merge": {"instance_count": 0}}"#).is_err());
        assert!(PartitionOptions::from_json_str("{not json").is_err());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"build": {{"max_docs_per_segment": 10, "enable_sort": true}}}}"#)
            .unwrap();
        let options = PartitionOptions::from_json_file(file.path()).unwrap();
        assert_eq!(options.build.max_docs_per_segment, 10);
        assert!(options.build.enable_sort);
    }
}
