//! Show command for inspecting single materialized rows

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::{Args, Subcommand};
use owo_colors::OwoColorize;

use crate::cli::commands::format_amount;
use crate::data_paths::DataPaths;
use crate::identity::{self, TermId};
use crate::query::QueryService;

#[derive(Args, Clone)]
pub struct ShowArgs {
    #[command(subcommand)]
    pub target: ShowTarget,

    /// Custom database path (default: <data_dir>/db)
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand, Clone)]
pub enum ShowTarget {
    /// Show an entity and its decoded payload
    Entity {
        /// Term id (0x-prefixed 32-byte hex)
        id: String,
    },

    /// Show a relationship and its opposing instrument id
    Relationship {
        /// Term id (0x-prefixed 32-byte hex)
        id: String,
    },

    /// Show one instrument of a term
    Instrument {
        /// Term id (0x-prefixed 32-byte hex)
        id: String,

        /// Bonding curve number
        #[arg(long, default_value = "1")]
        curve: u64,
    },

    /// Show one account position on an instrument
    Position {
        /// Term id (0x-prefixed 32-byte hex)
        id: String,

        /// Account address (0x-prefixed 20-byte hex)
        account: String,

        /// Bonding curve number
        #[arg(long, default_value = "1")]
        curve: u64,
    },

    /// Show aggregates for relationships sharing a predicate and object
    PredicateObject {
        /// Predicate term id
        predicate: String,

        /// Object term id
        object: String,
    },

    /// Show aggregates for relationships sharing a subject and predicate
    SubjectPredicate {
        /// Subject term id
        subject: String,

        /// Predicate term id
        predicate: String,
    },
}

pub struct ShowCommand {
    args: ShowArgs,
}

impl ShowCommand {
    pub fn new(args: ShowArgs) -> Self {
        Self { args }
    }

    pub async fn execute(&self, data_paths: DataPaths, verbose: u8) -> Result<()> {
        // Output renders on stdout, so logs go to file only
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

        match &self.args.target {
            ShowTarget::Entity { id } => self.show_entity(&service, id),
            ShowTarget::Relationship { id } => self.show_relationship(&service, id),
            ShowTarget::Instrument { id, curve } => self.show_instrument(&service, id, *curve),
            ShowTarget::Position { id, account, curve } => {
                self.show_position(&service, id, account, *curve)
            }
            ShowTarget::PredicateObject { predicate, object } => {
                self.show_predicate_object(&service, predicate, object)
            }
            ShowTarget::SubjectPredicate { subject, predicate } => {
                self.show_subject_predicate(&service, subject, predicate)
            }
        }
    }

    fn show_entity(&self, service: &QueryService, id: &str) -> Result<()> {
        let term_id = TermId::from_str(id)?;
        let row = match service.entity(&term_id)? {
            Some(row) => row,
            None => {
                println!("{}", "No entity found for that id".bright_black().italic());
                return Ok(());
            }
        };

        println!("{}", "🧾 ENTITY".bright_white().bold());
        println!("  Term id:     {}", row.term_id.to_string().bright_cyan());
        println!("  Creator:     {}", identity::format_address(&row.creator));
        println!("  Wallet:      {}", identity::format_address(&row.wallet));
        println!("  Class:       {}", row.class);
        println!("  Resolution:  {}", row.resolution);
        match &row.decoded {
            Some(text) => println!("  Decoded:     {}", text.bright_green()),
            None => println!("  Decoded:     {}", "(not decodable)".bright_black()),
        }
        println!("  Payload:     0x{}", hex::encode(&row.data));
        println!("  Created at:  {}", row.created_at.to_rfc3339());
        println!("  Watermark:   {}", row.watermark);
        Ok(())
    }

    fn show_relationship(&self, service: &QueryService, id: &str) -> Result<()> {
        let term_id = TermId::from_str(id)?;
        let row = match service.relationship(&term_id)? {
            Some(row) => row,
            None => {
                println!(
                    "{}",
                    "No relationship found for that id".bright_black().italic()
                );
                return Ok(());
            }
        };

        println!("{}", "🔗 RELATIONSHIP".bright_white().bold());
        println!("  Term id:     {}", row.term_id.to_string().bright_cyan());
        println!("  Creator:     {}", identity::format_address(&row.creator));
        println!("  Subject:     {}", row.subject_id);
        println!("  Predicate:   {}", row.predicate_id);
        println!("  Object:      {}", row.object_id);
        println!(
            "  Opposing id: {}",
            row.opposing_id.to_string().bright_yellow()
        );
        println!("  Created at:  {}", row.created_at.to_rfc3339());
        println!("  Watermark:   {}", row.watermark);

        if let Some(rollup) = service.pair_term_rollup(&term_id)? {
            println!();
            println!("  {}", "Paired rollup:".bright_yellow());
            println!("    Market cap:   {}", format_amount(rollup.market_cap));
            println!("    Assets:       {}", format_amount(rollup.total_assets));
            println!("    Participants: {}", rollup.participants);
        }
        Ok(())
    }

    fn show_instrument(&self, service: &QueryService, id: &str, curve: u64) -> Result<()> {
        let term_id = TermId::from_str(id)?;
        let row = match service.instrument(&term_id, curve)? {
            Some(row) => row,
            None => {
                println!(
                    "{}",
                    "No instrument found for that term and curve"
                        .bright_black()
                        .italic()
                );
                return Ok(());
            }
        };

        println!("{}", "📈 INSTRUMENT".bright_white().bold());
        println!("  Term id:      {}", row.term_id.to_string().bright_cyan());
        println!("  Curve:        {}", row.curve_id);
        println!("  Kind:         {}", row.kind);
        println!("  Share price:  {}", format_amount(row.share_price));
        println!("  Total shares: {}", format_amount(row.total_shares));
        println!("  Total assets: {}", format_amount(row.total_assets));
        println!(
            "  Market cap:   {}",
            format_amount(row.market_cap).bright_green()
        );
        println!("  Participants: {}", row.participants);
        match row.watermark {
            Some(order) => println!("  Watermark:    {}", order),
            None => println!(
                "  Watermark:    {}",
                "(no price event yet)".bright_black()
            ),
        }
        Ok(())
    }

    fn show_position(
        &self,
        service: &QueryService,
        id: &str,
        account: &str,
        curve: u64,
    ) -> Result<()> {
        let term_id = TermId::from_str(id)?;
        let address = identity::parse_address(account)?;
        let row = match service.position(&term_id, curve, &address)? {
            Some(row) => row,
            None => {
                println!(
                    "{}",
                    "No position found for that account".bright_black().italic()
                );
                return Ok(());
            }
        };

        println!("{}", "💼 POSITION".bright_white().bold());
        println!(
            "  Account:      {}",
            identity::format_address(&row.account).bright_cyan()
        );
        println!("  Term id:      {}", row.term_id);
        println!("  Curve:        {}", row.curve_id);
        println!(
            "  Shares:       {}",
            format_amount(row.shares).bright_green()
        );
        println!("  Deposited:    {}", format_amount(row.deposited));
        println!("  Redeemed:     {}", format_amount(row.redeemed));
        println!("  Watermark:    {}", row.watermark);
        Ok(())
    }

    fn show_predicate_object(
        &self,
        service: &QueryService,
        predicate: &str,
        object: &str,
    ) -> Result<()> {
        let predicate = TermId::from_str(predicate)?;
        let object = TermId::from_str(object)?;
        let row = match service.predicate_object(&predicate, &object)? {
            Some(row) => row,
            None => {
                println!(
                    "{}",
                    "No analytics row for that predicate and object"
                        .bright_black()
                        .italic()
                );
                return Ok(());
            }
        };

        println!("{}", "🧮 PREDICATE-OBJECT ANALYTICS".bright_white().bold());
        println!(
            "  Predicate:     {}",
            row.predicate_id.to_string().bright_cyan()
        );
        println!(
            "  Object:        {}",
            row.object_id.to_string().bright_cyan()
        );
        println!("  Relationships: {}", row.relationships);
        println!("  Participants:  {}", row.participants);
        println!(
            "  Market cap:    {}",
            format_amount(row.market_cap).bright_green()
        );

        let members = service.relationships_with_predicate_object(&predicate, &object)?;
        if !members.is_empty() {
            println!("  Members:");
            for member in members {
                println!("    • {}", member.short());
            }
        }
        Ok(())
    }

    fn show_subject_predicate(
        &self,
        service: &QueryService,
        subject: &str,
        predicate: &str,
    ) -> Result<()> {
        let subject = TermId::from_str(subject)?;
        let predicate = TermId::from_str(predicate)?;
        let row = match service.subject_predicate(&subject, &predicate)? {
            Some(row) => row,
            None => {
                println!(
                    "{}",
                    "No analytics row for that subject and predicate"
                        .bright_black()
                        .italic()
                );
                return Ok(());
            }
        };

        println!("{}", "🧮 SUBJECT-PREDICATE ANALYTICS".bright_white().bold());
        println!(
            "  Subject:       {}",
            row.subject_id.to_string().bright_cyan()
        );
        println!(
            "  Predicate:     {}",
            row.predicate_id.to_string().bright_cyan()
        );
        println!("  Relationships: {}", row.relationships);
        println!("  Participants:  {}", row.participants);
        println!(
            "  Market cap:    {}",
            format_amount(row.market_cap).bright_green()
        );

        let members = service.relationships_with_subject_predicate(&subject, &predicate)?;
        if !members.is_empty() {
            println!("  Members:");
            for member in members {
                println!("    • {}", member.short());
            }
        }
        Ok(())
    }
}
