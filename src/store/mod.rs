// Configuration store module
// Named configuration catalogue, default configuration, and dirty tracking

mod backend;
mod catalogue;
mod types;

pub use backend::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use catalogue::{ConfigStore, CurrentConfig, EditOutcome};
pub use types::{
    canonical_name, is_default_name, ConfigPatch, ConfigPayload, Configuration, DirtyState,
    ParamMap, DEFAULT_CONFIG_NAME,
};
