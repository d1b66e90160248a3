//! Domain documents and the lock-free snapshot tables built from them.

pub mod catalog;
pub mod cdn;
pub mod distribution;
pub mod request;

/// A change delivered by the configuration feed.
///
/// Events for the same id arrive in write order; a consumer may see the same event
/// more than once and must treat application as idempotent.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T> {
    /// The document was created or replaced.
    Updated {
        /// Document id.
        id: String,
        /// The full new document.
        doc: T,
    },
    /// The document was removed.
    Deleted {
        /// Document id.
        id: String,
    },
}

impl<T> ChangeEvent<T> {
    /// The id of the document this event concerns.
    pub fn id(&self) -> &str {
        match self {
            ChangeEvent::Updated { id, .. } | ChangeEvent::Deleted { id } => id,
        }
    }
}

pub(crate) fn default_true() -> bool {
    true
}
