//! CLI Commands module
//!
//! This module contains all command implementations for the Trellis CLI.
//! Each command follows a consistent pattern with dedicated Args and Command
//! structs, and shares the amount display helper below.

use ethers_core::types::U256;

// Command modules
pub mod ingest;
pub mod show;
pub mod stats;
pub mod top;

/// Render an 18-decimal fixed-point amount without trailing zeros.
pub fn format_amount(value: U256) -> String {
    match ethers_core::utils::format_units(value, 18) {
        Ok(text) => {
            let trimmed = text.trim_end_matches('0').trim_end_matches('.');
            if trimmed.is_empty() {
                "0".to_string()
            } else {
                trimmed.to_string()
            }
        }
        Err(_) => value.to_string(),
    }
}
