//! Schema-driven extraction of flat records from parsed documents
//!
//! The extractor walks a document against a [`crate::schema::CompiledSchema`],
//! assigning natural or synthetic primary keys and `{parent}_id` foreign keys,
//! and appends finished records to a [`TableAccumulator`].
//!
//! Documents of one source file must be processed in stream order: synthetic
//! keys depend on the order in which children are encountered.

pub mod accumulator;
pub mod extractor;
pub mod types;

pub use accumulator::TableAccumulator;
pub use extractor::{normalize_text, DocumentContext, Extractor};
pub use types::{ParentRef, Record, RecordKey, Table};
