//! Top command ranking terms and instruments by market capitalization

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, ValueEnum};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use owo_colors::OwoColorize;

use crate::cli::commands::format_amount;
use crate::data_paths::DataPaths;
use crate::query::QueryService;

#[derive(Debug, Clone, ValueEnum)]
pub enum TopRelation {
    /// Rank whole terms by rollup market cap (default)
    Terms,
    /// Rank individual instruments by market cap
    Instruments,
}

#[derive(Args, Clone)]
pub struct TopArgs {
    /// What to rank
    #[arg(long, short = 'r', value_enum, default_value = "terms")]
    pub relation: TopRelation,

    /// Maximum number of rows to display
    #[arg(long, short = 'n', default_value = "20")]
    pub limit: usize,

    /// Custom database path (default: <data_dir>/db)
    #[arg(long)]
    pub db_path: Option<PathBuf>,
}

pub struct TopCommand {
    args: TopArgs,
}

impl TopCommand {
    pub fn new(args: TopArgs) -> Self {
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

        match self.args.relation {
            TopRelation::Terms => self.render_terms(&service),
            TopRelation::Instruments => self.render_instruments(&service),
        }
    }

    fn render_terms(&self, service: &QueryService) -> Result<()> {
        let rows = service.top_term_rollups(self.args.limit)?;
        if rows.is_empty() {
            println!("{}", "No term rollups found".bright_black().italic());
            return Ok(());
        }

        println!("{}", "🏆 TOP TERMS BY MARKET CAP".bright_white().bold());
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                "#",
                "Term",
                "Kind",
                "Market Cap",
                "Assets",
                "Participants",
            ]);
        for (rank, row) in rows.iter().enumerate() {
            table.add_row(vec![
                (rank + 1).to_string(),
                row.term_id.short(),
                row.kind.to_string(),
                format_amount(row.market_cap),
                format_amount(row.total_assets),
                row.participants.to_string(),
            ]);
        }
        println!("{}", table);
        Ok(())
    }

    fn render_instruments(&self, service: &QueryService) -> Result<()> {
        let rows = service.top_instruments(self.args.limit)?;
        if rows.is_empty() {
            println!("{}", "No instruments found".bright_black().italic());
            return Ok(());
        }

        println!("{}", "🏆 TOP INSTRUMENTS BY MARKET CAP".bright_white().bold());
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                "#",
                "Term",
                "Curve",
                "Kind",
                "Market Cap",
                "Share Price",
                "Participants",
            ]);
        for (rank, row) in rows.iter().enumerate() {
            table.add_row(vec![
                (rank + 1).to_string(),
                row.term_id.short(),
                row.curve_id.to_string(),
                row.kind.to_string(),
                format_amount(row.market_cap),
                format_amount(row.share_price),
                row.participants.to_string(),
            ]);
        }
        println!("{}", table);
        Ok(())
    }
}
