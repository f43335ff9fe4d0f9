//! Catalog daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (migrate, reindex, vacuum, fields, mapping)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, MappingCommands};
pub use commands::{
    cancel_on_shutdown, fields_report, init_logging, load_settings, print_migration, print_reindex,
    print_vacuum, run_force_mapping, run_migrate, run_reindex, run_update_mapping, run_vacuum,
    CatalogContext,
};
