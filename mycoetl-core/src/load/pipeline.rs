//! Fans the final table out to every registered loader.

use super::Loader;
use crate::error::Result;
use crate::persistence::atomic_write_json;
use crate::table::RecordBatch;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingStats {
    pub successful_loadings: usize,
    pub failed_loadings: usize,
    pub total_loaders: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderOutcome {
    pub success: bool,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingSummary {
    pub total_loaders: usize,
    pub successful_loadings: usize,
    pub failed_loadings: usize,
    pub loaders: BTreeMap<String, LoaderOutcome>,
}

#[derive(Default)]
pub struct LoadingPipeline {
    loaders: Vec<Box<dyn Loader>>,
    results: Vec<(String, bool)>,
    stats: LoadingStats,
}

impl LoadingPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_loader(&mut self, loader: Box<dyn Loader>) {
        tracing::info!(loader = %loader.name(), "Added loader");
        self.loaders.push(loader);
    }

    pub fn loader_count(&self) -> usize {
        self.loaders.len()
    }

    /// Validate and load `batch` with every loader.
    ///
    /// `destinations` maps a loader name to the table or file name it should
    /// write to. Returns true when at least one loader succeeded.
    pub fn run_loadings(
        &mut self,
        batch: &RecordBatch,
        destinations: Option<&HashMap<String, String>>,
    ) -> bool {
        tracing::info!(records = batch.row_count(), "Starting loading pipeline");
        self.results.clear();

        for loader in &mut self.loaders {
            let name = loader.name().to_string();
            tracing::info!(loader = %name, "Running loader");
            let destination = destinations.and_then(|d| d.get(&name)).map(String::as_str);

            let success = if !loader.validate(batch) {
                tracing::error!(loader = %name, "Validation failed");
                false
            } else {
                match loader.load(batch, destination) {
                    Ok(()) => {
                        tracing::info!(loader = %name, "Loading successful");
                        true
                    }
                    Err(e) => {
                        tracing::error!(loader = %name, error = %e, "Loading failed");
                        false
                    }
                }
            };
            self.results.push((name, success));
        }

        let successful = self.results.iter().filter(|(_, ok)| *ok).count();
        self.stats = LoadingStats {
            successful_loadings: successful,
            failed_loadings: self.results.len() - successful,
            total_loaders: self.loaders.len(),
        };
        tracing::info!(
            successful = self.stats.successful_loadings,
            failed = self.stats.failed_loadings,
            "Loading pipeline completed"
        );
        successful > 0
    }

    pub fn results(&self) -> &[(String, bool)] {
        &self.results
    }

    pub fn stats(&self) -> LoadingStats {
        self.stats
    }

    pub fn get_loading_summary(&self) -> LoadingSummary {
        let successful = self.results.iter().filter(|(_, ok)| *ok).count();
        LoadingSummary {
            total_loaders: self.loaders.len(),
            successful_loadings: successful,
            failed_loadings: self.results.len() - successful,
            loaders: self
                .results
                .iter()
                .map(|(name, ok)| {
                    let status = if *ok { "successful" } else { "failed" };
                    (
                        name.clone(),
                        LoaderOutcome {
                            success: *ok,
                            status: status.to_string(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Write summary, per-loader results and counters to
    /// `{dir}/loading_logs.json`.
    pub fn save_loading_logs(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join("loading_logs.json");
        let results: BTreeMap<&str, bool> =
            self.results.iter().map(|(n, ok)| (n.as_str(), *ok)).collect();
        let log = serde_json::json!({
            "summary": self.get_loading_summary(),
            "results": results,
            "stats": self.stats,
        });
        atomic_write_json(&path, &log)?;
        tracing::info!(path = %path.display(), "Loading logs saved");
        Ok(path)
    }

    pub fn get_loader_stats(&self) -> BTreeMap<String, Value> {
        self.loaders
            .iter()
            .map(|l| (l.name().to_string(), l.stats()))
            .collect()
    }

    pub fn test_all_connections(&mut self) -> BTreeMap<String, bool> {
        self.loaders
            .iter_mut()
            .map(|l| {
                let ok = l.test_connection();
                if !ok {
                    tracing::error!(loader = %l.name(), "Connection test failed");
                }
                (l.name().to_string(), ok)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EtlError;
    use crate::load::{DatabaseLoader, DatabaseLoaderConfig, FileLoader, FileLoaderConfig};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    struct Broken;

    impl Loader for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn load(&mut self, _batch: &RecordBatch, _destination: Option<&str>) -> Result<()> {
            Err(EtlError::persistence("disk full"))
        }

        fn validate(&self, _batch: &RecordBatch) -> bool {
            true
        }

        fn stats(&self) -> Value {
            json!({})
        }

        fn test_connection(&mut self) -> bool {
            false
        }
    }

    fn batch() -> RecordBatch {
        RecordBatch::new(vec!["class".into()], vec![vec![json!("e")], vec![json!("p")]]).unwrap()
    }

    #[test]
    fn test_partial_success_counts() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = LoadingPipeline::new();
        pipeline.add_loader(Box::new(Broken));
        pipeline.add_loader(Box::new(FileLoader::new(FileLoaderConfig::new("csv", dir.path()))));

        let mut destinations = HashMap::new();
        destinations.insert("file_loader".to_string(), "final.csv".to_string());
        assert!(pipeline.run_loadings(&batch(), Some(&destinations)));
        assert!(dir.path().join("final.csv").exists());

        assert_eq!(
            pipeline.results(),
            &[("broken".to_string(), false), ("file_loader".to_string(), true)]
        );
        let summary = pipeline.get_loading_summary();
        assert_eq!(summary.failed_loadings, 1);
        assert_eq!(summary.loaders["broken"].status, "failed");
        assert_eq!(pipeline.get_loader_stats()["file_loader"]["records_loaded"], json!(2));
    }

    #[test]
    fn test_csv_and_json_loaders_share_output_dir() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = LoadingPipeline::new();
        pipeline.add_loader(Box::new(FileLoader::new(FileLoaderConfig::new("json", dir.path()))));
        pipeline.add_loader(Box::new(FileLoader::new(FileLoaderConfig::new("csv", dir.path()))));
        assert!(pipeline.run_loadings(&batch(), None));

        let text = std::fs::read_to_string(dir.path().join("loaded_data.json")).unwrap();
        let data: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(data, json!([{"class": "e"}, {"class": "p"}]));
        assert!(dir.path().join("loaded_data.json.meta.json").exists());
        assert!(dir.path().join("loaded_data.csv.meta.json").exists());
    }

    #[test]
    fn test_validation_failure_is_recorded() {
        let mut pipeline = LoadingPipeline::new();
        pipeline.add_loader(Box::new(DatabaseLoader::new(DatabaseLoaderConfig::new("sqlite://"))));
        assert!(!pipeline.run_loadings(&RecordBatch::empty(), None));
        assert_eq!(pipeline.results(), &[("database_loader".to_string(), false)]);
        assert_eq!(pipeline.stats().failed_loadings, 1);
    }

    #[test]
    fn test_connections_and_logs() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = LoadingPipeline::new();
        pipeline.add_loader(Box::new(Broken));
        pipeline.add_loader(Box::new(DatabaseLoader::new(DatabaseLoaderConfig::new("sqlite://"))));

        let connections = pipeline.test_all_connections();
        assert_eq!(connections["broken"], false);
        assert_eq!(connections["database_loader"], true);

        pipeline.run_loadings(&batch(), None);
        let path = pipeline.save_loading_logs(dir.path()).unwrap();
        let raw: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(raw["results"]["database_loader"], json!(true));
        assert_eq!(raw["stats"]["total_loaders"], json!(2));
    }
}
