use clap::Args;
use medsync_core::{CachedRecord, Collection, DataView, EnqueueOutcome, ListQuery};
use serde_json::Value;

use super::{try_auto_sync, AppContext, CommandError, OutputFormat};
use crate::config::Config;

/// List entities of a collection (cache first)
#[derive(Args)]
pub struct ListCommand {
    /// Collection (hospitals, doctors, patients, medical-records, bills, pharmacies, workers)
    pub collection: Collection,

    /// Page number (1-based)
    #[arg(long)]
    pub page: Option<u32>,

    /// Items per page
    #[arg(long)]
    pub limit: Option<u32>,

    /// Free-text search
    #[arg(long)]
    pub search: Option<String>,

    /// Sort field, prefix with '-' for descending
    #[arg(long)]
    pub sort: Option<String>,

    /// Extra filter as key=value (can be repeated)
    #[arg(long = "filter", value_name = "KEY=VALUE")]
    pub filters: Vec<String>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

impl ListCommand {
    pub async fn run(&self, ctx: &AppContext) -> Result<(), CommandError> {
        let mut query = ListQuery::new();
        query.page = self.page;
        query.limit = self.limit;
        query.search = self.search.clone();
        query.sort = self.sort.clone();
        for filter in &self.filters {
            let (key, value) = parse_filter(filter)?;
            query = query.with_filter(key, value);
        }

        ctx.connect().await;
        let view: DataView<Value> = ctx.data.fetch(self.collection, query).await?;

        match self.format {
            OutputFormat::Json => {
                let out = serde_json::json!({
                    "data": view.data,
                    "total_items": view.total_items,
                    "from_cache": view.from_cache,
                    "issue": view.issue,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            }
            OutputFormat::Text => {
                if view.data.is_empty() {
                    println!("No {} found.", self.collection);
                } else {
                    for doc in &view.data {
                        println!("{}", summarize(doc));
                    }
                    println!();
                    println!("Showing {} of {}", view.data.len(), view.total_items);
                }
                print_source(view.from_cache, view.issue.as_deref());
            }
        }
        Ok(())
    }
}

/// Show one entity
#[derive(Args)]
pub struct ShowCommand {
    pub collection: Collection,

    /// Entity id (server id or tmp-…)
    pub id: String,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

impl ShowCommand {
    pub async fn run(&self, ctx: &AppContext) -> Result<(), CommandError> {
        ctx.connect().await;
        let view = ctx.data.get::<Value>(self.collection, &self.id).await?;

        let doc = view
            .data
            .ok_or_else(|| CommandError::NotFound(format!("{} {}", self.collection, self.id)))?;

        println!("{}", serde_json::to_string_pretty(&doc)?);
        if matches!(self.format, OutputFormat::Text) {
            print_source(view.from_cache, view.issue.as_deref());
        }
        Ok(())
    }
}

/// Create an entity (applied locally, synced later)
#[derive(Args)]
pub struct CreateCommand {
    pub collection: Collection,

    /// Entity fields as a JSON object
    #[arg(long)]
    pub data: String,
}

impl CreateCommand {
    pub async fn run(&self, ctx: &AppContext, config: &Config) -> Result<(), CommandError> {
        let payload = parse_payload(&self.data)?;
        let record = ctx.data.create(self.collection, payload).await?;
        print_written("Created", &record);

        try_auto_sync(ctx, config).await;
        Ok(())
    }
}

/// Update fields of an entity (applied locally, synced later)
#[derive(Args)]
pub struct UpdateCommand {
    pub collection: Collection,

    pub id: String,

    /// Fields to change as a JSON object
    #[arg(long)]
    pub data: String,
}

impl UpdateCommand {
    pub async fn run(&self, ctx: &AppContext, config: &Config) -> Result<(), CommandError> {
        let patch = parse_payload(&self.data)?;
        let record = ctx.data.update(self.collection, &self.id, patch).await?;
        print_written("Updated", &record);

        try_auto_sync(ctx, config).await;
        Ok(())
    }
}

/// Delete an entity (applied locally, synced later)
#[derive(Args)]
pub struct DeleteCommand {
    pub collection: Collection,

    pub id: String,
}

impl DeleteCommand {
    pub async fn run(&self, ctx: &AppContext, config: &Config) -> Result<(), CommandError> {
        match ctx.data.delete(self.collection, &self.id).await? {
            EnqueueOutcome::Queued(_) => {
                println!("Deleted {} {} (pending sync)", self.collection, self.id);
            }
            EnqueueOutcome::Cancelled { superseded } => {
                println!(
                    "Deleted {} {} (never synced, dropped {} queued change{})",
                    self.collection,
                    self.id,
                    superseded,
                    if superseded == 1 { "" } else { "s" }
                );
            }
        }

        try_auto_sync(ctx, config).await;
        Ok(())
    }
}

fn parse_payload(raw: &str) -> Result<Value, CommandError> {
    serde_json::from_str(raw)
        .map_err(|e| CommandError::InvalidInput(format!("--data is not valid JSON: {}", e)))
}

fn parse_filter(raw: &str) -> Result<(String, String), CommandError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(CommandError::InvalidInput(format!(
            "filter must be KEY=VALUE, got '{}'",
            raw
        ))),
    }
}

fn summarize(doc: &Value) -> String {
    let id = medsync_core::record_id(doc).unwrap_or_else(|| "?".to_string());
    let mut rest = doc.clone();
    if let Some(map) = rest.as_object_mut() {
        map.remove("id");
        map.remove("_id");
    }
    format!("{:<40} {}", id, rest)
}

fn print_written(verb: &str, record: &CachedRecord) {
    println!("{} {} {}", verb, record.collection, record.id);
    println!("  {}", record.payload);
}

fn print_source(from_cache: bool, issue: Option<&str>) {
    if from_cache {
        match issue {
            Some(issue) => println!("(cached data: {})", issue),
            None => println!("(cached data)"),
        }
    }
}
