//! Owned, mutable XML documents.
//!
//! Responses are parsed once into an [`XmlDocument`] backed by an [`xot`]
//! tree. Lookups are pure functions over the tree returning [`NodeId`]
//! handles; every change is an explicit edit on the document that owns the
//! node. Handles are only meaningful for the document that produced them.
//!
//! ```text
//! backend body ──▶ XmlDocument::parse ──▶ queries / edits ──▶ indent ──▶ to_xml
//! ```

mod document;
mod output;

pub use document::{NodeId, XmlDocument};
pub use output::has_root_element;

/// OAI-PMH 2.0 namespace; all protocol element lookups are scoped to it.
pub const OAI_NS: &str = "http://www.openarchives.org/OAI/2.0/";
