//! Remote collaborators: the document store and the append-only revision store.
//!
//! Both are async traits so real clients can talk to the network. The
//! in-memory implementations model the server-side rules (last-writer-wins
//! documents, strictly increasing revision versions, stale-baseline conflicts).

mod document;
mod in_memory;
mod revision;

pub use document::{DocumentPatch, DocumentStore, StoredDocument};
pub use in_memory::{InMemoryDocumentStore, InMemoryRevisionStore};
pub use revision::{AuthorInfo, Revision, RevisionStore};
