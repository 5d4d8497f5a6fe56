//! Error types for vault operations

use thiserror::Error;

/// How a caller is expected to react to a [`VaultError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// User-correctable; re-prompt and try again.
    Recoverable,
    /// Another process holds the vault lock. No retry loop.
    Contention,
    /// A save failed after the in-memory store was already mutated.
    /// Memory and disk disagree; the session must be shut down.
    Inconsistent,
    /// Misconfiguration or undefined state. Terminate.
    Internal,
}

/// Errors that can occur during vault operations
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Wrong master passphrase or corrupted vault")]
    WrongPassphrase,

    #[error("Vault is already open in another instance")]
    AlreadyOpenElsewhere,

    #[error("A session is already open")]
    AlreadyOpen,

    #[error("Vault is not open - open it with the master passphrase first")]
    NotOpen,

    #[error("Login already exists: {0}")]
    DuplicateName(String),

    #[error("Login not found: {0}")]
    NotFound(String),

    #[error("No character class selected")]
    NoClassSelected,

    #[error("Length {length} out of range (1-{max})")]
    LengthOutOfRange { length: usize, max: usize },

    #[error("Length {length} too short for {classes} selected character classes")]
    LengthTooShort { length: usize, classes: usize },

    #[error("Required field is empty: {0}")]
    EmptyField(&'static str),

    #[error("Failed to persist vault: {0}")]
    PersistenceFailure(#[source] Box<VaultError>),

    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decrypted vault has unexpected content: {0}")]
    UnexpectedContent(#[from] serde_json::Error),

    #[error("Failed to serialize vault: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to release vault lock: {0}")]
    LockRelease(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Classify the error for the presentation layer.
    pub fn class(&self) -> ErrorClass {
        match self {
            VaultError::WrongPassphrase
            | VaultError::AlreadyOpen
            | VaultError::NotOpen
            | VaultError::DuplicateName(_)
            | VaultError::NotFound(_)
            | VaultError::NoClassSelected
            | VaultError::LengthOutOfRange { .. }
            | VaultError::LengthTooShort { .. }
            | VaultError::EmptyField(_) => ErrorClass::Recoverable,
            VaultError::AlreadyOpenElsewhere => ErrorClass::Contention,
            VaultError::PersistenceFailure(_) => ErrorClass::Inconsistent,
            VaultError::KeyDerivation(_)
            | VaultError::Encryption(_)
            | VaultError::UnexpectedContent(_)
            | VaultError::Serialization(_)
            | VaultError::Config(_)
            | VaultError::LockRelease(_)
            | VaultError::Io(_) => ErrorClass::Internal,
        }
    }

    /// True when the session cannot safely continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self.class(), ErrorClass::Inconsistent | ErrorClass::Internal)
    }

    pub(crate) fn persistence(err: VaultError) -> Self {
        VaultError::PersistenceFailure(Box::new(err))
    }
}

pub type VaultResult<T> = Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors_are_recoverable() {
        assert_eq!(VaultError::WrongPassphrase.class(), ErrorClass::Recoverable);
        assert_eq!(
            VaultError::DuplicateName("mail".to_string()).class(),
            ErrorClass::Recoverable
        );
        assert!(!VaultError::NoClassSelected.is_fatal());
    }

    #[test]
    fn test_lock_contention_is_distinct() {
        assert_eq!(VaultError::AlreadyOpenElsewhere.class(), ErrorClass::Contention);
        assert!(!VaultError::AlreadyOpenElsewhere.is_fatal());
    }

    #[test]
    fn test_persistence_failure_is_fatal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = VaultError::persistence(VaultError::Io(io));
        assert_eq!(err.class(), ErrorClass::Inconsistent);
        assert!(err.is_fatal());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_serialization_failure_is_not_reported_as_bad_content() {
        let json_err = serde_json::from_str::<u8>("x").unwrap_err();
        let err = VaultError::Serialization(json_err);
        assert_eq!(err.class(), ErrorClass::Internal);
        assert!(err.to_string().starts_with("Failed to serialize vault"));
        assert!(!err.to_string().contains("unexpected content"));
    }
}
