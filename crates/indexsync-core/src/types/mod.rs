//! Core data types shared by resolution, planning, and coordination.

pub mod document;
pub mod event;
pub mod ids;

#[cfg(test)]
mod proptests;

pub use document::{AffectedDocument, DocumentKey, IndexDocument, IndexDocumentBuilder};
pub use event::{ChangeEvent, ChangeRecord, DirtyProperties, OperationKind};
pub use ids::{EntityId, TypeName};
