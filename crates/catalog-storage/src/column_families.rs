//! Column family definitions for RocksDB.
//!
//! - objects: object records keyed by zoid
//! - children: `{parent}\0{id}` -> child zoid, for paged container walks
//! - tids: `{tid}{zoid}` with an empty value, ordered by commit
//! - registry: index registry records keyed by owner zoid
//! - checkpoints: vacuum cursors and other resumable job state

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for object records
pub const CF_OBJECTS: &str = "objects";

/// Column family name for the parent -> children index
pub const CF_CHILDREN: &str = "children";

/// Column family name for the commit-order (TID) index
pub const CF_TIDS: &str = "tids";

/// Column family name for per-container index registry records
pub const CF_REGISTRY: &str = "registry";

/// Column family name for background job checkpoints
pub const CF_CHECKPOINTS: &str = "checkpoints";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_OBJECTS, CF_CHILDREN, CF_TIDS, CF_REGISTRY, CF_CHECKPOINTS];

/// Object records are the bulk of the data; compress them.
fn objects_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_OBJECTS, objects_options()),
        ColumnFamilyDescriptor::new(CF_CHILDREN, Options::default()),
        ColumnFamilyDescriptor::new(CF_TIDS, Options::default()),
        ColumnFamilyDescriptor::new(CF_REGISTRY, Options::default()),
        ColumnFamilyDescriptor::new(CF_CHECKPOINTS, Options::default()),
    ]
}
