//! ircdm-keys - key manager for ircdm
//!
//! This crate provides a command-line interface for:
//! - Showing the local identity and its fingerprint
//! - Exporting and importing out-of-band key payloads
//! - Listing, verifying, moving and deleting peer keys
//! - Migrating legacy nick-only keys onto a network
//! - Encrypting and decrypting DM bodies

#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod output;
pub mod storage;

pub use cli::Cli;
pub use config::{CliOverrides, Config};
pub use output::{JsonResponse, OutputFormat, OutputFormatter};

use ircdm_core::{CoreError, ErrorKind};

/// Process exit codes.
///
/// - 0: Success
/// - 1: General error
/// - 2: Verification failed - bad signature, fingerprint mismatch
/// - 3: Timeout
/// - 4: Key changed - a different key is already stored
/// - 5: Invalid input - bad arguments or payload
/// - 6: Unknown peer - no key stored
/// - 7: Storage error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    VerificationFailed = 2,
    Timeout = 3,
    KeyChanged = 4,
    InvalidInput = 5,
    UnknownPeer = 6,
    StorageError = 7,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<&CoreError> for ExitCode {
    fn from(err: &CoreError) -> Self {
        match err.kind() {
            ErrorKind::Storage => ExitCode::StorageError,
            ErrorKind::CryptoInit | ErrorKind::Encrypt => ExitCode::GeneralError,
            ErrorKind::Verification | ErrorKind::Decrypt => ExitCode::VerificationFailed,
            ErrorKind::KeyChanged => ExitCode::KeyChanged,
            ErrorKind::NoPendingOffer | ErrorKind::InvalidPayload => ExitCode::InvalidInput,
            ErrorKind::UnknownPeer => ExitCode::UnknownPeer,
            ErrorKind::Timeout => ExitCode::Timeout,
        }
    }
}

impl ExitCode {
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::VerificationFailed => "VERIFICATION_FAILED",
            ExitCode::Timeout => "TIMEOUT",
            ExitCode::KeyChanged => "KEY_CHANGED",
            ExitCode::InvalidInput => "INVALID_INPUT",
            ExitCode::UnknownPeer => "UNKNOWN_PEER",
            ExitCode::StorageError => "STORAGE_ERROR",
        }
    }
}
