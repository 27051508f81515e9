//! Error kinds raised while compiling schemas and processing documents
//!
//! Schema errors are fatal for the whole run. Segmentation warnings and
//! document errors only abort the document they were raised for; the runner
//! decides whether to continue.

use crate::path::PathError;
use thiserror::Error;

/// The schema cannot be used for any document
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse schema YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration for key \"{location}\": {reason}\n {spec}")]
    InvalidSpec {
        location: String,
        reason: String,
        /// The offending schema fragment, rendered back to YAML
        spec: String,
    },

    #[error(transparent)]
    InvalidPath(#[from] PathError),
}

/// A document boundary could not be determined cleanly
#[derive(Debug, Clone, Error)]
#[error("unexpected XML document at line {line}")]
pub struct SegmentationWarning {
    pub line: usize,
    pub text: String,
}

/// Processing of a single document failed
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(
        "multiple elements found for {path}! Should your config file include a joiner, \
         or new entity definition?\n\n- {}",
        .matches.join("\n- ")
    )]
    AmbiguousField {
        path: String,
        entity: Option<String>,
        record_key: Option<String>,
        matches: Vec<String>,
    },

    #[error("entity {entity}: primary key path {path} matched {found} elements, expected exactly 1")]
    MissingPrimaryKey {
        entity: String,
        path: String,
        found: usize,
        parent_key: Option<String>,
    },

    #[error("unable to parse XML document: {0}")]
    XmlSyntax(String),

    #[error("document failed validation: {0}")]
    Validation(String),
}

impl DocumentError {
    /// Key of the record that was being built when the error was raised, if known
    pub fn record_key(&self) -> Option<&str> {
        match self {
            DocumentError::AmbiguousField { record_key, .. } => record_key.as_deref(),
            DocumentError::MissingPrimaryKey { parent_key, .. } => parent_key.as_deref(),
            DocumentError::XmlSyntax(_) | DocumentError::Validation(_) => None,
        }
    }

    /// Entity whose record was being built, if known
    pub fn entity(&self) -> Option<&str> {
        match self {
            DocumentError::AmbiguousField { entity, .. } => entity.as_deref(),
            DocumentError::MissingPrimaryKey { entity, .. } => Some(entity),
            DocumentError::XmlSyntax(_) | DocumentError::Validation(_) => None,
        }
    }
}
