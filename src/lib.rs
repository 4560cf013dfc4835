pub mod classifier;
pub mod config;
pub mod connectivity;
mod engine;
mod error;
pub mod orchestrator;
pub mod policy;
pub mod queue;
pub mod remote;
pub mod scheduler;
pub mod snapshot;
pub mod storage;
pub mod telemetry;

pub use classifier::{classify, ChangeContext, ChangeDescriptor, ChangeOrigin};
pub use config::{AutosaveConfig, ConfigError, RetryBackoff};
pub use connectivity::ConnectivityMonitor;
pub use engine::AutosaveEngine;
pub use error::{SaveError, StorageError, StoreError};
pub use orchestrator::{ChangeOutcome, DocumentHandle, SaveReceipt, SaveState, SaveStatus};
pub use policy::SavePolicy;
pub use queue::{LocalQueue, PendingEntry, QueueSweeper};
pub use remote::{
    AuthorInfo, DocumentPatch, DocumentStore, InMemoryDocumentStore, InMemoryRevisionStore,
    Revision, RevisionStore, StoredDocument,
};
pub use snapshot::{Baseline, BaselineDiff, DocumentId, FieldRules, Snapshot};
#[cfg(feature = "file-store")]
pub use storage::FileKvStore;
pub use storage::{InMemoryKvStore, KvStore};
