//! Ingest command for applying contract-event feeds to the database
//!
//! Reads newline-delimited JSON events from a file or stdin and applies them
//! through the engine. The feed may deliver events in any order and may
//! repeat them; replays are dropped and counted rather than reapplied.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use crate::data_paths::DataPaths;
use crate::engine::{Engine, Outcome};
use crate::events;
use crate::externals::{KeccakDeriver, Utf8Decoder};
use crate::query::QueryService;
use crate::store::models::ALL_COLUMN_FAMILIES;
use crate::store::TypedDbContext;

#[derive(Args, Clone)]
pub struct IngestArgs {
    /// Path to a newline-delimited JSON event feed (reads stdin when omitted)
    #[arg(long)]
    pub feed: Option<PathBuf>,

    /// Custom database path (default: <data_dir>/db)
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Clear existing database before ingesting
    #[arg(long)]
    pub clear: bool,

    /// 32-byte hex salt for opposing-instrument id derivation
    #[arg(long)]
    pub opposing_salt: Option<String>,

    /// Stop at the first malformed or failing line instead of skipping it
    #[arg(long)]
    pub strict: bool,
}

/// Running totals for one ingest session.
#[derive(Debug, Default, Clone, Copy)]
struct IngestTally {
    applied: u64,
    duplicates: u64,
    failed: u64,
}

impl IngestTally {
    fn lines_seen(&self) -> u64 {
        self.applied + self.duplicates + self.failed
    }
}

pub struct IngestCommand {
    args: IngestArgs,
}

impl IngestCommand {
    pub fn new(args: IngestArgs) -> Self {
        Self { args }
    }

    pub async fn execute(&self, data_paths: DataPaths, verbose: u8) -> Result<()> {
        // Initialize logging
        crate::logging::init_logging(crate::logging::LoggingConfig::new(
            crate::logging::LogMode::ConsoleAndFile,
            data_paths.clone(),
            verbose,
        ))?;

        info!("🌿 Starting event ingest...");

        let db_path = self
            .args
            .db_path
            .clone()
            .unwrap_or_else(|| data_paths.db());
        info!("📂 Database path: {}", db_path.display());

        if self.args.clear && db_path.exists() {
            info!("🗑️ Clearing existing database...");
            std::fs::remove_dir_all(&db_path)
                .with_context(|| format!("Failed to remove {}", db_path.display()))?;
        }

        let mut engine = self.open_engine(&db_path)?;
        let started = Instant::now();
        let mut tally = IngestTally::default();

        match &self.args.feed {
            Some(path) => {
                info!("📥 Reading events from {}", path.display());
                let file = File::open(path)
                    .await
                    .with_context(|| format!("Failed to open feed {}", path.display()))?;
                self.drain_feed(&mut engine, BufReader::new(file), &mut tally)
                    .await?;
            }
            None => {
                info!("📥 Reading events from stdin");
                self.drain_feed(&mut engine, BufReader::new(tokio::io::stdin()), &mut tally)
                    .await?;
            }
        }

        let checkpoint = QueryService::new(engine.store().clone()).checkpoint()?;

        info!("✅ Ingest complete in {:.2}s", started.elapsed().as_secs_f64());
        info!("📊 Summary:");
        info!("   • Events applied: {}", tally.applied);
        info!("   • Duplicates dropped: {}", tally.duplicates);
        info!("   • Lines skipped: {}", tally.failed);
        info!("   • Total events in database: {}", checkpoint.events_applied);
        if let Some(high) = checkpoint.high_order {
            info!("   • Highest order key: {}", high);
        }

        Ok(())
    }

    fn open_engine(&self, db_path: &Path) -> Result<Engine> {
        match &self.args.opposing_salt {
            Some(salt_hex) => {
                let bytes = crate::identity::decode_hex(salt_hex)?;
                let salt: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| anyhow!("Opposing salt must be 32 bytes, got {}", bytes.len()))?;
                let store = TypedDbContext::open(db_path, ALL_COLUMN_FAMILIES.to_vec())?;
                Ok(Engine::new(
                    store,
                    Arc::new(KeccakDeriver::new(salt)),
                    Arc::new(Utf8Decoder),
                ))
            }
            None => Ok(Engine::open(db_path)?),
        }
    }

    async fn drain_feed<R>(
        &self,
        engine: &mut Engine,
        reader: R,
        tally: &mut IngestTally,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut line_number = 0u64;

        while let Some(line) = lines.next_line().await? {
            line_number += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match events::parse_line(trimmed) {
                Ok(event) => match engine.process(&event) {
                    Ok(Outcome::Applied { .. }) => tally.applied += 1,
                    Ok(Outcome::Duplicate) => tally.duplicates += 1,
                    Err(e) => {
                        if self.args.strict {
                            return Err(e)
                                .with_context(|| format!("Event at line {} failed", line_number));
                        }
                        error!("Event at line {} failed: {}", line_number, e);
                        tally.failed += 1;
                    }
                },
                Err(e) => {
                    if self.args.strict {
                        return Err(e)
                            .with_context(|| format!("Malformed event at line {}", line_number));
                    }
                    warn!("Skipping malformed line {}: {}", line_number, e);
                    tally.failed += 1;
                }
            }

            if tally.lines_seen() % 10_000 == 0 {
                info!(
                    "🔄 Processed {} lines ({} applied, {} duplicates)",
                    line_number, tally.applied, tally.duplicates
                );
            }
        }

        Ok(())
    }
}
