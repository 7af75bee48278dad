//! Stats command showing row counts and the ingest checkpoint

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use owo_colors::OwoColorize;

use crate::data_paths::DataPaths;
use crate::query::QueryService;

#[derive(Args, Clone)]
pub struct StatsArgs {
    /// Custom database path (default: <data_dir>/db)
    #[arg(long)]
    pub db_path: Option<PathBuf>,
}

pub struct StatsCommand {
    args: StatsArgs,
}

impl StatsCommand {
    pub fn new(args: StatsArgs) -> Self {
        Self { args }
    }

    pub async fn execute(&self, data_paths: DataPaths, verbose: u8) -> Result<()> {
        // Tables render on stdout, so logs go to file only
        crate::logging::init_logging(crate::logging::LoggingConfig::new(
            crate::logging::LogMode::FileOnly,
            data_paths.clone(),
            verbose,
        ))?;

        let db_path = self
            .args
            .db_path
            .clone()
            .unwrap_or_else(|| data_paths.db());
        let service = QueryService::open(&db_path)?;

        let counts = service.table_counts()?;
        let checkpoint = service.checkpoint()?;

        println!("{}", "📊 MATERIALIZED RELATIONS".bright_white().bold());
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Relation", "Rows"]);
        let relation_rows = [
            ("entities", counts.entities),
            ("relationships", counts.relationships),
            ("positions", counts.positions),
            ("instruments", counts.instruments),
            ("pair_summaries", counts.pair_summaries),
            ("term_rollups", counts.term_rollups),
            ("pair_term_rollups", counts.pair_term_rollups),
            ("predicate_object_stats", counts.predicate_object_stats),
            ("subject_predicate_stats", counts.subject_predicate_stats),
            ("processed_events", counts.processed_events),
        ];
        for (name, value) in relation_rows {
            table.add_row(vec![name.to_string(), value.to_string()]);
        }
        println!("{}", table);

        println!();
        println!("{}", "📍 INGEST CHECKPOINT".bright_white().bold());
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Counter", "Value"]);
        let counter_rows = [
            ("events applied", checkpoint.events_applied),
            ("duplicates dropped", checkpoint.duplicates_dropped),
            ("entities created", checkpoint.entities_created),
            ("relationships created", checkpoint.relationships_created),
            ("deposits", checkpoint.deposits),
            ("redemptions", checkpoint.redemptions),
            ("price changes", checkpoint.price_changes),
        ];
        for (name, value) in counter_rows {
            table.add_row(vec![name.to_string(), value.to_string()]);
        }
        table.add_row(vec![
            "highest order key".to_string(),
            checkpoint
                .high_order
                .map(|order| order.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]);
        table.add_row(vec![
            "updated at".to_string(),
            checkpoint.updated_at.to_rfc3339(),
        ]);
        println!("{}", table);

        Ok(())
    }
}
