//! Error types for the nfig library

use thiserror::Error;

/// Result type alias for nfig operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the nfig library
#[derive(Error, Debug)]
pub enum Error {
    // -------------------------------------------------------------------------
    // Schema Errors (fatal, at construction)
    // -------------------------------------------------------------------------
    #[error("Duplicate setting name: {0}")]
    DuplicateSetting(String),

    #[error("No converter known for {setting} (type {type_name})")]
    UnknownConverter {
        setting: String,
        type_name: &'static str,
    },

    #[error("Setting {setting} declares more than one converter")]
    MultipleConverters { setting: String },

    #[error("Setting {setting} has no unconditional default (sub-app none, tier Any, data center Any)")]
    MissingRootDefault { setting: String },

    #[error("Duplicate default for {setting}: identical (sub-app, tier, data center) tuple")]
    DuplicateDefault { setting: String },

    #[error("Encrypted setting {setting} may not declare an unconditional default")]
    EncryptedDefault { setting: String },

    #[error("Invalid default for {setting}: {reason}")]
    InvalidDefault { setting: String, reason: String },

    #[error("Invalid encryptor: {0}")]
    InvalidEncryptor(String),

    #[error("{axis} must not be the Any wildcard for a store's current context")]
    WildcardContext { axis: &'static str },

    // -------------------------------------------------------------------------
    // Conversion Errors
    // -------------------------------------------------------------------------
    #[error("Cannot parse value as {type_name}: {reason}")]
    Conversion {
        type_name: &'static str,
        reason: String,
    },

    // -------------------------------------------------------------------------
    // Override Errors
    // -------------------------------------------------------------------------
    #[error("Unknown setting: {0}")]
    UnknownSetting(String),

    #[error("Invalid override for {setting}: {reason}")]
    InvalidOverrideValue { setting: String, reason: String },

    #[error("Overrides are not allowed for {setting} in the current context")]
    OverridesNotAllowed { setting: String },

    // -------------------------------------------------------------------------
    // Store Errors
    // -------------------------------------------------------------------------
    #[error("Snapshot belongs to app '{actual}', expected '{expected}'")]
    SnapshotAppMismatch { expected: String, actual: String },

    #[error("Corrupt store state: {0}")]
    CorruptState(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation cancelled before commit")]
    Cancelled,

    // -------------------------------------------------------------------------
    // Encryption Errors
    // -------------------------------------------------------------------------
    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Decryption failed for {setting}")]
    DecryptionFailed { setting: String },
}

impl Error {
    /// Build a transport error from any displayable driver failure
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Error::Transport(err.to_string())
    }

    /// Check if this is a schema-construction error
    #[must_use]
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            Error::DuplicateSetting(_)
                | Error::UnknownConverter { .. }
                | Error::MultipleConverters { .. }
                | Error::MissingRootDefault { .. }
                | Error::DuplicateDefault { .. }
                | Error::EncryptedDefault { .. }
                | Error::InvalidDefault { .. }
                | Error::InvalidEncryptor(_)
                | Error::WildcardContext { .. }
        )
    }

    /// Check if this error came from the backing transport
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}
