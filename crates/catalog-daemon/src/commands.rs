//! Command implementations for the catalog daemon.
//!
//! Every long-running command observes one [`CancellationToken`], cancelled
//! on Ctrl-C or SIGTERM. An interrupted command returns what it finished and
//! the process exits 0.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use catalog_indexing::{
    force_mapping, update_mapping, AdapterRegistry, IndexManager, IndexManagerFactory, IndexingError,
    LoggingEventSink, MigrationOptions, MigrationReport, Migrator, ReindexOptions, ReindexReport,
    Reindexer, Vacuum, VacuumReport,
};
use catalog_search::{connect, MappingRegistry, SearchClient};
use catalog_storage::{ObjectStore, Storage};
use catalog_types::{Settings, StoredObject};

/// Load settings and apply CLI overrides on top.
pub fn load_settings(
    config_path: Option<&str>,
    log_level: Option<&str>,
    db_path: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;

    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    if let Some(path) = db_path {
        settings.db_path = path.to_string();
    }
    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Cancel `cancel` on Ctrl-C or SIGTERM.
pub fn cancel_on_shutdown(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, stopping"),
            _ = terminate => info!("Received SIGTERM, stopping"),
        }
        cancel.cancel();
    });
}

/// Everything a command needs: store, backend client, managers and adapters.
pub struct CatalogContext {
    pub settings: Settings,
    pub factory: IndexManagerFactory,
    pub adapters: Arc<AdapterRegistry>,
    pub cancel: CancellationToken,
}

impl CatalogContext {
    /// Open the object store at `settings.db_path` and connect the configured backend.
    pub fn open(settings: Settings) -> Result<Self> {
        let db_path = Path::new(&settings.db_path);
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let store = Storage::open(db_path)
            .with_context(|| format!("Failed to open object store at {}", db_path.display()))?;
        let client = connect(&settings).context("Failed to create search client")?;
        info!(db_path = %settings.db_path, backend = ?settings.backend, "Catalog opened");
        Ok(Self::new(settings, Arc::new(store), client))
    }

    pub fn new(settings: Settings, store: Arc<dyn ObjectStore>, client: Arc<dyn SearchClient>) -> Self {
        let factory = IndexManagerFactory::from_settings(&settings, store, client);
        let adapters = Arc::new(AdapterRegistry::from_registry(factory.registry()));
        Self {
            settings,
            factory,
            adapters,
            cancel: CancellationToken::new(),
        }
    }

    /// Containers to process; `only` matches a container id or zoid.
    pub fn containers(&self, only: Option<&str>) -> Result<Vec<StoredObject>> {
        let containers = self.factory.store().containers().context("Failed to list containers")?;
        let selected: Vec<StoredObject> = match only {
            Some(wanted) => containers
                .into_iter()
                .filter(|c| c.id == wanted || c.zoid == wanted)
                .collect(),
            None => containers,
        };
        if let (Some(wanted), true) = (only, selected.is_empty()) {
            bail!("Container not found: {}", wanted);
        }
        Ok(selected)
    }

    fn manager(&self, container: StoredObject) -> Arc<IndexManager> {
        Arc::new(self.factory.for_container(container))
    }

    /// Managers of the sub-indices `owners` below `parent`.
    fn sub_managers(&self, parent: &IndexManager, owners: &[String]) -> Result<Vec<Arc<IndexManager>>> {
        let mut managers = Vec::with_capacity(owners.len());
        for zoid in owners {
            let Some(owner) = self.factory.store().get_object(zoid)? else {
                warn!(zoid = %zoid, "Sub-index owner vanished");
                continue;
            };
            managers.push(Arc::new(self.factory.for_sub_index(parent, owner)?));
        }
        Ok(managers)
    }
}

/// Migrate each selected container, then the sub-indices its walk met,
/// nested ones included.
pub async fn run_migrate(
    ctx: &CatalogContext,
    options: MigrationOptions,
    container: Option<&str>,
) -> Result<Vec<MigrationReport>> {
    let mut reports = Vec::new();
    for container in ctx.containers(container)? {
        let mut pending = VecDeque::from([ctx.manager(container)]);
        while let Some(manager) = pending.pop_front() {
            let Some(report) = migrate_one(ctx, manager.clone(), &options).await? else {
                return Ok(reports);
            };
            pending.extend(ctx.sub_managers(&manager, &report.sub_indices)?);
            reports.push(report);
        }
    }
    Ok(reports)
}

/// `None` when the operator interrupted the migration.
async fn migrate_one(
    ctx: &CatalogContext,
    manager: Arc<IndexManager>,
    options: &MigrationOptions,
) -> Result<Option<MigrationReport>> {
    let owner = manager.owner().zoid.clone();
    let migrator = Migrator::new(manager, ctx.adapters.clone(), options.clone())
        .with_bulk_size(ctx.settings.bulk_size)
        .with_cancel(ctx.cancel.child_token())
        .with_sink(Arc::new(LoggingEventSink));

    match migrator.run().await {
        Ok(report) => Ok(Some(report)),
        Err(IndexingError::Cancelled) => {
            warn!(owner = %owner, "Migration interrupted");
            Ok(None)
        }
        Err(e) => Err(e).with_context(|| format!("Migration of {} failed", owner)),
    }
}

/// Reindex each selected container in place, then the sub-indices its
/// walk met.
pub async fn run_reindex(
    ctx: &CatalogContext,
    options: ReindexOptions,
    container: Option<&str>,
) -> Result<Vec<ReindexReport>> {
    let mut reports = Vec::new();
    for container in ctx.containers(container)? {
        let mut pending = VecDeque::from([ctx.manager(container)]);
        while let Some(manager) = pending.pop_front() {
            let Some(report) = reindex_one(ctx, manager.clone(), &options).await? else {
                return Ok(reports);
            };
            pending.extend(ctx.sub_managers(&manager, &report.sub_indices)?);
            reports.push(report);
        }
    }
    Ok(reports)
}

/// `None` when the operator interrupted the reindex.
async fn reindex_one(
    ctx: &CatalogContext,
    manager: Arc<IndexManager>,
    options: &ReindexOptions,
) -> Result<Option<ReindexReport>> {
    let owner = manager.owner().zoid.clone();
    let reindexer = Reindexer::new(manager, ctx.adapters.clone(), options.clone())
        .with_bulk_size(ctx.settings.bulk_size)
        .with_cancel(ctx.cancel.child_token())
        .with_sink(Arc::new(LoggingEventSink));

    match reindexer.run().await {
        Ok(report) => Ok(Some(report)),
        Err(IndexingError::Cancelled) => {
            warn!(owner = %owner, "Reindex interrupted");
            Ok(None)
        }
        Err(e) => Err(e).with_context(|| format!("Reindex of {} failed", owner)),
    }
}

/// One vacuum pass, or passes until interrupted when `continuous`.
pub async fn run_vacuum(
    ctx: &CatalogContext,
    continuous: bool,
    sleep: Option<u64>,
    container: Option<&str>,
    reset_cursor: bool,
) -> Result<Vec<VacuumReport>> {
    let selected = ctx.containers(container)?;
    let mut vacuum = Vacuum::new(ctx.factory.clone(), ctx.adapters.clone())
        .with_bulk_size(ctx.settings.bulk_size)
        .with_cancel(ctx.cancel.child_token());

    if reset_cursor {
        for c in &selected {
            vacuum.reset_cursor(&c.zoid)?;
        }
    }

    if continuous {
        let sleep = Duration::from_secs(sleep.unwrap_or(ctx.settings.vacuum_sleep_secs));
        let passes = vacuum.run_continuous(container, sleep).await?;
        info!(passes, "Continuous vacuum finished");
        return Ok(Vec::new());
    }

    match vacuum.run_once(container).await {
        Ok(reports) => Ok(reports),
        Err(IndexingError::Cancelled) => {
            warn!("Vacuum interrupted");
            Ok(Vec::new())
        }
        Err(e) => Err(e).context("Vacuum failed"),
    }
}

/// Install the computed mapping on each live index and touch every document.
pub async fn run_force_mapping(ctx: &CatalogContext, container: Option<&str>) -> Result<u64> {
    let mut updated = 0;
    for container in ctx.containers(container)? {
        let manager = ctx.manager(container);
        updated += force_mapping(&manager).await?;
    }
    Ok(updated)
}

/// Move each container to a fresh index carrying the computed mapping.
pub async fn run_update_mapping(
    ctx: &CatalogContext,
    container: Option<&str>,
    force: bool,
) -> Result<Vec<MigrationReport>> {
    let mut reports = Vec::new();
    for container in ctx.containers(container)? {
        let manager = ctx.manager(container);
        reports.push(update_mapping(manager, ctx.adapters.clone(), force).await?);
    }
    Ok(reports)
}

/// Render the computed mapping, filtered by schema and backend type.
///
/// `summary` gives the field count per backend type instead of descriptors.
pub fn fields_report(
    registry: &MappingRegistry,
    summary: bool,
    schema: Option<&str>,
    field_type: Option<&str>,
) -> Result<Value> {
    let mapping = match schema {
        Some(name) => {
            if registry.schema(name).is_none() {
                bail!("Unknown content type: {}", name);
            }
            registry.compute_mapping_for(&[name])?
        }
        None => registry.compute_mapping()?,
    };

    if summary {
        return Ok(json!(mapping.type_histogram()));
    }
    Ok(match field_type {
        Some(t) => json!(mapping.fields_of_type(t)),
        None => json!(mapping.properties),
    })
}

pub fn print_migration(report: &MigrationReport) {
    println!(
        "{}: {} -> {} (copied {}, processed {}, missing {}, updated {}, orphaned {}, failed {}) in {:.1}s",
        report.alias,
        report.old_index,
        report.new_index,
        report.copied,
        report.processed,
        report.missing.len(),
        report.updated,
        report.orphaned.len(),
        report.failed.len(),
        report.elapsed.as_secs_f64(),
    );
}

pub fn print_reindex(report: &ReindexReport) {
    println!(
        "{} ({}): processed {}, indexed {}, skipped {}, cleaned {}, failed {} in {:.1}s",
        report.alias,
        report.index,
        report.processed,
        report.indexed,
        report.skipped,
        report.cleaned,
        report.failed.len(),
        report.elapsed.as_secs_f64(),
    );
}

pub fn print_vacuum(report: &VacuumReport) {
    println!(
        "{} ({}): {} orphaned, {} removed; {} missing, {} repaired; {} leaked sub-indices dropped [{:?}]",
        report.container,
        report.alias,
        report.orphaned.len(),
        report.orphans_removed,
        report.missing.len(),
        report.repaired,
        report.leaked_sub_indices.len(),
        report.strategy,
    );
}

#[cfg(test)]
mod tests {
    use catalog_search::InMemoryBackend;
    use catalog_storage::Transaction;
    use catalog_types::{CatalogType, ContentSchema, IndexField, ROOT_ZOID};
    use tempfile::TempDir;

    use super::*;

    fn schemas() -> Vec<ContentSchema> {
        vec![
            ContentSchema::new("Item").with_field(IndexField::new("price", CatalogType::Float)),
            ContentSchema::new("Folder").with_sub_index(true),
        ]
    }

    fn context(dir: &TempDir) -> (CatalogContext, Arc<InMemoryBackend>) {
        let store = Arc::new(Storage::open(dir.path()).unwrap());
        let mut txn = Transaction::new();
        txn.put_object(StoredObject::new("c0", Some(ROOT_ZOID.into()), "site", "Container"));
        txn.put_object(StoredObject::new("i0", Some("c0".into()), "a", "Item"));
        txn.put_object(StoredObject::new("i1", Some("c0".into()), "b", "Item"));
        store.commit(txn).unwrap();

        let settings = Settings {
            index_name_prefix: "guillotina-".to_string(),
            content_types: schemas(),
            ..Default::default()
        };
        let backend = Arc::new(InMemoryBackend::new());
        (CatalogContext::new(settings, store, backend.clone()), backend)
    }

    #[test]
    fn test_fields_summary_counts_types() {
        let registry = MappingRegistry::new(schemas());
        let report = fields_report(&registry, true, None, None).unwrap();
        assert_eq!(report["float"], json!(1));
        assert!(report["keyword"].as_u64().unwrap() >= 1);
    }

    #[test]
    fn test_fields_filter_by_type() {
        let registry = MappingRegistry::new(schemas());
        let report = fields_report(&registry, false, None, Some("float")).unwrap();
        assert_eq!(report, json!({"price": {"type": "float"}}));
    }

    #[test]
    fn test_fields_unknown_schema() {
        let registry = MappingRegistry::new(schemas());
        assert!(fields_report(&registry, false, Some("Missing"), None).is_err());
    }

    #[test]
    fn test_unknown_container_is_an_error() {
        let dir = TempDir::new().unwrap();
        let (ctx, _) = context(&dir);
        assert!(ctx.containers(Some("nope")).is_err());
        assert_eq!(ctx.containers(Some("site")).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reindex_then_migrate() {
        let dir = TempDir::new().unwrap();
        let (ctx, backend) = context(&dir);

        let reports = run_reindex(&ctx, ReindexOptions::default(), None).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].indexed, 2);

        let reports = run_migrate(&ctx, MigrationOptions::full(), Some("c0")).await.unwrap();
        assert_eq!(reports[0].new_index, "guillotina-db-site_2");
        assert_eq!(backend.doc_ids("guillotina-db-site"), vec!["i0", "i1"]);
    }

    #[tokio::test]
    async fn test_cancelled_reindex_exits_cleanly() {
        let dir = TempDir::new().unwrap();
        let (ctx, _) = context(&dir);
        ctx.cancel.cancel();
        let reports = run_reindex(&ctx, ReindexOptions::default(), None).await.unwrap();
        assert!(reports.is_empty());
    }

    #[tokio::test]
    async fn test_vacuum_indexes_missing_objects() {
        let dir = TempDir::new().unwrap();
        let (ctx, backend) = context(&dir);
        run_reindex(&ctx, ReindexOptions::default(), None).await.unwrap();

        let mut txn = Transaction::new();
        txn.put_object(StoredObject::new("i2", Some("c0".into()), "c", "Item"));
        ctx.factory.store().commit(txn).unwrap();

        let reports = run_vacuum(&ctx, false, None, None, true).await.unwrap();
        assert_eq!(reports[0].missing, vec!["i2"]);
        assert_eq!(backend.doc_ids("guillotina-db-site"), vec!["i0", "i1", "i2"]);
    }

    #[tokio::test]
    async fn test_reindex_repopulates_cleaned_sub_index() {
        let dir = TempDir::new().unwrap();
        let (ctx, backend) = context(&dir);
        let mut txn = Transaction::new();
        txn.put_object(StoredObject::new("f0", Some("c0".into()), "docs", "Folder"));
        txn.put_object(StoredObject::new("n0", Some("f0".into()), "note", "Item"));
        ctx.factory.store().commit(txn).unwrap();

        let reports = run_reindex(&ctx, ReindexOptions::default(), None).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].alias, "guillotina-db-site__folder-f0");
        assert_eq!(backend.doc_ids("guillotina-db-site"), vec!["f0", "i0", "i1"]);
        assert_eq!(backend.doc_ids("guillotina-db-site__folder-f0"), vec!["n0"]);

        backend
            .delete_by_query("guillotina-db-site__folder-f0", &json!({"match_all": {}}))
            .await
            .unwrap();
        assert!(backend.doc_ids("guillotina-db-site__folder-f0").is_empty());

        let options = ReindexOptions {
            update_missing: true,
            ..Default::default()
        };
        let reports = run_reindex(&ctx, options, Some("site")).await.unwrap();
        assert_eq!(reports[0].skipped, 3);
        assert_eq!(reports[1].indexed, 1);
        assert_eq!(backend.doc_ids("guillotina-db-site__folder-f0"), vec!["n0"]);
    }
}
