//! Checksum utilities for stored descriptor sets

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SHA256 checksum of a serialized schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that bytes match this checksum
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::from_bytes(data) == *self
    }

    /// A `sha256sum`-compatible line: `<hex>  <file>`
    pub fn to_line(&self, file_name: &str) -> String {
        format!("{}  {}\n", self.0, file_name)
    }

    /// Parse the first `sha256sum` line of `content`
    pub fn parse_line(content: &str) -> Option<(Checksum, &str)> {
        let line = content.lines().next()?;
        let (hex, file) = line.split_once(char::is_whitespace)?;
        let file = file.trim_start_matches([' ', '*']);
        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) || file.is_empty() {
            return None;
        }
        Some((Checksum(hex.to_ascii_lowercase()), file))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_consistency() {
        let data = b"\x0a\x05a.proto";
        assert_eq!(Checksum::from_bytes(data), Checksum::from_bytes(data));
        assert_ne!(Checksum::from_bytes(data), Checksum::from_bytes(b"other"));
    }

    #[test]
    fn test_checksum_verification() {
        let checksum = Checksum::from_bytes(b"schema");
        assert!(checksum.verify(b"schema"));
        assert!(!checksum.verify(b"schema2"));
    }

    #[test]
    fn test_line_round_trip() {
        let checksum = Checksum::from_bytes(b"schema");
        let line = checksum.to_line("registry.pb");
        let (parsed, file) = Checksum::parse_line(&line).unwrap();
        assert_eq!(parsed, checksum);
        assert_eq!(file, "registry.pb");

        assert!(Checksum::parse_line("not a checksum").is_none());
        assert!(Checksum::parse_line("").is_none());
    }
}
