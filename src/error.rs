use thiserror::Error;

/// A feature declaration was missing one of its four required attributes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("missing {attribute} for key {key}")]
    MissingAttribute {
        key: String,
        attribute: &'static str,
    },
}

/// Arithmetic was requested on a feature a stat does not carry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeatureError {
    #[error("stat ID{id} has no value for feature {key}")]
    Missing { id: i64, key: String },

    #[error("stat ID{id} holds a non-numeric value for feature {key}")]
    NotNumeric { id: i64, key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("remove operation is not supported for stat collection iterators")]
    UnsupportedOperation,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("directory is missing")]
    MissingDirectory,

    #[error("file name is missing")]
    MissingName,

    #[error("reading settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing settings: {0}")]
    Parse(#[from] serde_json::Error),
}
