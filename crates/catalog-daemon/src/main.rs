//! Catalog Daemon
//!
//! Keeps a search backend in sync with the object store.
//!
//! # Usage
//!
//! ```bash
//! catalog-daemon migrate [--full] [--force] [--mapping-only] [--container ID]
//! catalog-daemon reindex [--clean] [--security] [--update] [--update-missing]
//! catalog-daemon vacuum [--continuous] [--sleep SECONDS] [--reset-cursor]
//! catalog-daemon fields [--summary] [--schema NAME] [--type TYPE]
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/catalog-index/config.toml)
//! 3. `--config` file
//! 4. Environment variables (CATALOG_*)
//! 5. CLI flags

use anyhow::Result;
use clap::Parser;

use catalog_daemon::{
    cancel_on_shutdown, fields_report, init_logging, load_settings, print_migration, print_reindex,
    print_vacuum, run_force_mapping, run_migrate, run_reindex, run_update_mapping, run_vacuum,
    CatalogContext, Cli, Commands, MappingCommands,
};
use catalog_indexing::{MigrationOptions, ReindexOptions};
use catalog_search::MappingRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref(), cli.log_level.as_deref(), cli.db_path.as_deref())?;
    init_logging(&settings.log_level)?;

    if let Commands::Fields {
        summary,
        schema,
        field_type,
    } = &cli.command
    {
        let registry = MappingRegistry::new(settings.content_types.clone());
        let report = fields_report(&registry, *summary, schema.as_deref(), field_type.as_deref())?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let ctx = CatalogContext::open(settings)?;
    cancel_on_shutdown(ctx.cancel.clone());

    match cli.command {
        Commands::Migrate {
            full,
            force,
            log_details,
            memory_tracking,
            reindex_security,
            mapping_only,
            container,
        } => {
            let options = MigrationOptions {
                full,
                force,
                reindex_security,
                mapping_only,
                log_details,
                memory_tracking,
            };
            for report in run_migrate(&ctx, options, container.as_deref()).await? {
                print_migration(&report);
            }
        }
        Commands::Reindex {
            clean,
            security,
            update,
            update_missing,
            log_details,
            memory_tracking,
            container,
        } => {
            let options = ReindexOptions {
                security,
                clean,
                update,
                update_missing,
                log_details,
                memory_tracking,
            };
            for report in run_reindex(&ctx, options, container.as_deref()).await? {
                print_reindex(&report);
            }
        }
        Commands::Vacuum {
            continuous,
            sleep,
            container,
            reset_cursor,
        } => {
            for report in run_vacuum(&ctx, continuous, sleep, container.as_deref(), reset_cursor).await? {
                print_vacuum(&report);
            }
        }
        Commands::Mapping { command } => match command {
            MappingCommands::Force { container } => {
                let updated = run_force_mapping(&ctx, container.as_deref()).await?;
                println!("Touched {} document(s)", updated);
            }
            MappingCommands::Update { container, force } => {
                for report in run_update_mapping(&ctx, container.as_deref(), force).await? {
                    print_migration(&report);
                }
            }
        },
        Commands::Fields { .. } => {}
    }

    Ok(())
}
