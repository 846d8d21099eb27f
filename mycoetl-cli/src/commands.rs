//! Subcommand handlers.

use crate::{Commands, ConfigAction};
use chrono::{DateTime, Utc};
use mycoetl_core::config::{Settings, WORKSPACE_CONFIG_FILE};
use mycoetl_core::extract::{
    ApiExtractor, ApiExtractorConfig, Extractor, FileExtractor, UciMushroomExtractor,
};
use mycoetl_core::load::{
    DatabaseLoader, DatabaseLoaderConfig, FileLoader, FileLoaderConfig, Loader, summarize_table,
};
use mycoetl_core::orchestration::{
    EtlPipeline, OverallHealth, PipelineHealth, PipelineStats, load_latest_pipeline_logs,
};
use mycoetl_core::transform::{DataCleaner, FeatureEngineer, Transformer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

pub async fn handle_command(
    command: Commands,
    settings: &Settings,
    workspace: &Path,
) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            file,
            api,
            table,
            format,
            no_database,
            no_file,
        } => {
            let options = RunOptions {
                file,
                api,
                table,
                format,
                no_database,
                no_file,
            };
            handle_run(options, settings).await
        }
        Commands::Health { json } => handle_health(settings, json),
        Commands::Stats => handle_stats(settings),
        Commands::Query { table, column } => handle_query(settings, table, &column),
        Commands::Config { action } => handle_config(action, settings, workspace),
    }
}

struct RunOptions {
    file: Option<std::path::PathBuf>,
    api: Option<String>,
    table: Option<String>,
    format: String,
    no_database: bool,
    no_file: bool,
}

fn build_pipeline(options: &RunOptions, settings: &Settings) -> EtlPipeline {
    let mut extractors: Vec<Box<dyn Extractor>> = Vec::new();
    if let Some(path) = &options.file {
        extractors.push(Box::new(
            FileExtractor::from_path(path).with_metadata_dir(&settings.raw_data_dir),
        ));
    }
    if let Some(url) = &options.api {
        let mut config = ApiExtractorConfig::new(url.clone());
        config.timeout_secs = settings.data_source.timeout_secs;
        extractors.push(Box::new(ApiExtractor::new(config)));
    }
    if extractors.is_empty() {
        extractors.push(Box::new(
            UciMushroomExtractor::from_settings(settings).with_raw_dir(&settings.raw_data_dir),
        ));
    }

    let transformers: Vec<Box<dyn Transformer>> = vec![
        Box::new(DataCleaner::default()),
        Box::new(FeatureEngineer::default()),
    ];

    let mut loaders: Vec<Box<dyn Loader>> = Vec::new();
    if !options.no_database {
        let mut config = DatabaseLoaderConfig::from_settings(settings);
        if let Some(table) = &options.table {
            config.table_name = table.clone();
        }
        loaders.push(Box::new(DatabaseLoader::new(config)));
    }
    if !options.no_file {
        loaders.push(Box::new(FileLoader::new(FileLoaderConfig::new(
            options.format.clone(),
            &settings.processed_data_dir,
        ))));
    }

    let mut pipeline = EtlPipeline::new().with_log_dir(&settings.processed_data_dir);
    pipeline.configure_extraction(extractors);
    pipeline.configure_transformation(transformers);
    pipeline.configure_loading(loaders);
    pipeline
}

async fn handle_run(options: RunOptions, settings: &Settings) -> anyhow::Result<()> {
    if options.no_database && options.no_file {
        anyhow::bail!("--no-database and --no-file leave nothing to load into");
    }
    settings.ensure_directories()?;

    let mut pipeline = build_pipeline(&options, settings);
    println!("Mushroom ETL Pipeline");
    println!("{}", "=".repeat(50));

    let success = pipeline.run_pipeline().await;
    print_stats(pipeline.get_pipeline_stats());
    println!(
        "\nPipeline logs saved to {}",
        settings.processed_data_dir.display()
    );

    if !success {
        anyhow::bail!("ETL pipeline {} failed", pipeline.pipeline_id());
    }
    println!("\nETL pipeline completed successfully");
    Ok(())
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
}

fn print_stats(stats: &PipelineStats) {
    println!("Pipeline ID: {}", stats.pipeline_id);
    println!("Status:      {}", stats.status);
    println!("Start Time:  {}", format_time(stats.start_time));
    println!("End Time:    {}", format_time(stats.end_time));
    if let Some(secs) = stats.duration_secs {
        println!("Duration:    {secs:.2}s");
    }

    for (stage, report) in &stats.stages {
        println!("\n{} STAGE:", stage.to_string().to_uppercase());
        if report.success {
            println!("  Status: SUCCESS");
        } else {
            println!("  Status: FAILED");
        }
        println!(
            "  Components: {}/{} succeeded",
            report.components_succeeded, report.components_total
        );
        println!("  Input Records:  {}", report.input_records);
        println!("  Output Records: {}", report.output_records);
        if let Some(error) = &report.error {
            println!("  Error: {error}");
        }
    }
}

#[derive(Debug, Serialize)]
struct CheckResult {
    status: OverallHealth,
    message: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    details: serde_json::Value,
}

impl CheckResult {
    fn new(healthy: bool, message: impl Into<String>) -> Self {
        Self {
            status: if healthy {
                OverallHealth::Healthy
            } else {
                OverallHealth::Unhealthy
            },
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthReport {
    overall_status: OverallHealth,
    timestamp: DateTime<Utc>,
    checks: BTreeMap<&'static str, CheckResult>,
}

fn check_database(settings: &Settings) -> CheckResult {
    let mut loader = DatabaseLoader::from_settings(settings);
    if loader.test_connection() {
        CheckResult::new(true, "Database connection successful")
    } else {
        CheckResult::new(false, format!("Database connection failed: {}", settings.database.url))
    }
}

fn check_directories(settings: &Settings) -> CheckResult {
    let mut details = serde_json::Map::new();
    let mut healthy = true;
    for dir in [
        &settings.raw_data_dir,
        &settings.processed_data_dir,
        &settings.models_dir,
    ] {
        let (exists, writable) = match std::fs::metadata(dir) {
            Ok(meta) => (meta.is_dir(), meta.is_dir() && !meta.permissions().readonly()),
            Err(_) => (false, false),
        };
        healthy &= exists && writable;
        details.insert(
            dir.display().to_string(),
            serde_json::json!({ "exists": exists, "writable": writable }),
        );
    }
    let message = if healthy {
        "Data directories present and writable"
    } else {
        "Missing or read-only data directories"
    };
    CheckResult {
        details: serde_json::Value::Object(details),
        ..CheckResult::new(healthy, message)
    }
}

fn check_last_run(settings: &Settings) -> CheckResult {
    match load_latest_pipeline_logs(&settings.processed_data_dir) {
        Ok(Some(stats)) => {
            let health = PipelineHealth::from(&stats);
            CheckResult {
                details: serde_json::to_value(&health).unwrap_or_default(),
                ..CheckResult::new(
                    health.overall_health == OverallHealth::Healthy,
                    format!("Last run {} {}", health.pipeline_id, health.status),
                )
            }
        }
        Ok(None) => CheckResult::new(false, "No pipeline runs recorded"),
        Err(e) => CheckResult::new(false, format!("Could not read pipeline logs: {e}")),
    }
}

fn build_health_report(settings: &Settings) -> HealthReport {
    let mut checks = BTreeMap::new();
    checks.insert("database", check_database(settings));
    checks.insert("file_system", check_directories(settings));
    checks.insert("last_run", check_last_run(settings));

    let overall_status = if checks.values().all(|c| c.status == OverallHealth::Healthy) {
        OverallHealth::Healthy
    } else {
        OverallHealth::Unhealthy
    };
    HealthReport {
        overall_status,
        timestamp: Utc::now(),
        checks,
    }
}

fn handle_health(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let report = build_health_report(settings);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Overall Status: {}", report.overall_status.to_string().to_uppercase());
        println!("Timestamp: {}", report.timestamp.to_rfc3339());
        for (name, check) in &report.checks {
            let mark = if check.status == OverallHealth::Healthy { "ok" } else { "FAIL" };
            println!("\n[{mark}] {}: {}", name.to_uppercase(), check.status);
            println!("   {}", check.message);
        }
    }

    let issues = report
        .checks
        .values()
        .filter(|c| c.status == OverallHealth::Unhealthy)
        .count();
    if issues > 0 {
        anyhow::bail!("{issues} health check(s) failed");
    }
    Ok(())
}

fn handle_stats(settings: &Settings) -> anyhow::Result<()> {
    match load_latest_pipeline_logs(&settings.processed_data_dir)? {
        Some(stats) => {
            print_stats(&stats);
            Ok(())
        }
        None => {
            println!(
                "No pipeline logs found in {}",
                settings.processed_data_dir.display()
            );
            Ok(())
        }
    }
}

fn handle_query(settings: &Settings, table: Option<String>, column: &str) -> anyhow::Result<()> {
    let table = table.unwrap_or_else(|| settings.database.table_name.clone());
    let summary = summarize_table(&settings.database.url, &table, column)?;

    println!("Table: {}", summary.table_name);
    println!("Rows:  {}", summary.row_count);
    println!("\n{column} distribution:");
    for (value, count) in &summary.distribution {
        let pct = if summary.row_count > 0 {
            *count as f64 * 100.0 / summary.row_count as f64
        } else {
            0.0
        };
        println!("  {value:<12} {count:>8} ({pct:.1}%)");
    }
    Ok(())
}

fn handle_config(
    action: ConfigAction,
    settings: &Settings,
    workspace: &Path,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace.join(WORKSPACE_CONFIG_FILE);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            let toml_str = toml::to_string_pretty(&Settings::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!("Created default configuration at: {}", config_path.display());
            Ok(())
        }
        ConfigAction::Show => {
            println!("{}", toml::to_string_pretty(settings)?);
            Ok(())
        }
    }
}
