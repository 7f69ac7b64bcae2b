//! Input validation for Devgate
//!
//! Size checks and bounded reads for every file the agent loads.

use std::fs;
use std::path::Path;

use crate::error::{DevgateError, Result};

/// Validates that a file exists and is no larger than `max_size` bytes
pub fn validate_file_size(path: &Path, max_size: u64) -> Result<()> {
    let metadata = fs::metadata(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DevgateError::FileNotFound(path.to_path_buf())
        } else {
            DevgateError::FileRead {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    if metadata.len() > max_size {
        return Err(DevgateError::FileTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            max_size,
        });
    }

    Ok(())
}

/// Read a whole text file after checking its size
pub fn read_bounded(path: &Path, max_size: u64) -> Result<String> {
    validate_file_size(path, max_size)?;
    fs::read_to_string(path).map_err(|e| DevgateError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Validates a 4-digit hexadecimal vendor or product id (empty is a wildcard)
pub fn validate_hex_id(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() != 4 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DevgateError::policy(format!(
            "{} '{}' is not a 4-digit hex id",
            field, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_validate_hex_id() {
        assert!(validate_hex_id("vid", "").is_ok());
        assert!(validate_hex_id("vid", "0781").is_ok());
        assert!(validate_hex_id("pid", "aBcD").is_ok());
        assert!(validate_hex_id("vid", "781").is_err());
        assert!(validate_hex_id("pid", "zzzz").is_err());
    }

    #[test]
    fn test_read_bounded_rejects_large_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[b'x'; 64]).unwrap();
        assert!(read_bounded(file.path(), 1024).is_ok());
        match read_bounded(file.path(), 16) {
            Err(DevgateError::FileTooLarge { size, .. }) => assert_eq!(size, 64),
            other => panic!("expected FileTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(matches!(
            validate_file_size(&missing, 1024),
            Err(DevgateError::FileNotFound(_))
        ));
    }
}
