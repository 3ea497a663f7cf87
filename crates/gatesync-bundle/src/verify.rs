//! Checksum verification of fetched bundle bytes.

use md5::Md5;
use sha2::{Digest, Sha256, Sha512};

use crate::error::VerifyError;

/// Supported checksum algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumType {
    Crc32,
    Md5,
    Sha256,
    Sha512,
}

impl ChecksumType {
    /// Parse an upstream checksum type name (case-insensitive).
    pub fn parse(name: &str) -> Result<Self, VerifyError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "crc-32" | "crc32" => Ok(Self::Crc32),
            "md5" | "md-5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            _ => Err(VerifyError::UnsupportedAlgorithm(name.to_string())),
        }
    }

    /// Lowercase hex digest of `bytes`. CRC-32 renders as 8 big-endian digits.
    pub fn digest(self, bytes: &[u8]) -> String {
        match self {
            Self::Crc32 => format!("{:08x}", crc32fast::hash(bytes)),
            Self::Md5 => hex::encode(Md5::digest(bytes)),
            Self::Sha256 => hex::encode(Sha256::digest(bytes)),
            Self::Sha512 => hex::encode(Sha512::digest(bytes)),
        }
    }
}

/// Verify `bytes` against an expected hex `checksum`.
pub fn verify(bytes: &[u8], checksum: &str, checksum_type: &str) -> Result<(), VerifyError> {
    let algorithm = ChecksumType::parse(checksum_type)?;
    let actual = algorithm.digest(bytes);
    let expected = checksum.trim();
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(VerifyError::Mismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
