pub mod cli;
pub mod data_paths;
pub mod engine;
pub mod events;
pub mod externals;
pub mod identity;
pub mod logging;
pub mod query;
pub mod store;
