//! CLI argument parsing for the catalog daemon.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};

/// Catalog indexing daemon
///
/// Keeps a search backend in sync with the object store.
#[derive(Parser, Debug)]
#[command(name = "catalog-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/catalog-index/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override object store path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Move every container to a freshly mapped index and swap the alias
    Migrate {
        /// Rebuild every document instead of copying unchanged ones
        #[arg(long)]
        full: bool,

        /// Discard a pending migration left behind by an earlier run
        #[arg(long)]
        force: bool,

        #[arg(long)]
        log_details: bool,

        #[arg(long)]
        memory_tracking: bool,

        /// Rewrite access-control fields while walking
        #[arg(long)]
        reindex_security: bool,

        /// Only re-walk objects whose type gained or changed fields
        #[arg(long)]
        mapping_only: bool,

        /// Container id or zoid (default: all containers)
        #[arg(long)]
        container: Option<String>,
    },

    /// Rewrite documents in the active index
    Reindex {
        /// Delete every document first
        #[arg(long)]
        clean: bool,

        /// Only rewrite access-control fields
        #[arg(long)]
        security: bool,

        /// Send partial updates with upsert
        #[arg(long)]
        update: bool,

        /// Only index objects that have no document yet
        #[arg(long)]
        update_missing: bool,

        #[arg(long)]
        log_details: bool,

        #[arg(long)]
        memory_tracking: bool,

        #[arg(long)]
        container: Option<String>,
    },

    /// Remove orphaned documents and index missing objects
    Vacuum {
        /// Keep running, sleeping between passes
        #[arg(long)]
        continuous: bool,

        /// Seconds between continuous passes (default from config)
        #[arg(long)]
        sleep: Option<u64>,

        #[arg(long)]
        container: Option<String>,

        /// Restart the missing-document scan from the beginning
        #[arg(long)]
        reset_cursor: bool,
    },

    /// Describe the computed mapping
    Fields {
        /// Field count per backend type
        #[arg(long)]
        summary: bool,

        /// Only fields contributed by this content type
        #[arg(long)]
        schema: Option<String>,

        /// Only fields of this backend type
        #[arg(long = "type")]
        field_type: Option<String>,
    },

    /// Mapping maintenance on live indexes
    Mapping {
        #[command(subcommand)]
        command: MappingCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum MappingCommands {
    /// Touch every document so newly mapped fields get populated
    Force {
        #[arg(long)]
        container: Option<String>,
    },

    /// Push the computed mapping onto the live indexes
    Update {
        #[arg(long)]
        container: Option<String>,

        /// Apply even when the backend reports conflicts
        #[arg(long)]
        force: bool,
    },
}
