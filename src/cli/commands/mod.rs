//! CLI command implementations
//!
//! Every command returns the process exit code:
//!
//! - `0` success
//! - `1` the submission was answered with a `fatal-error` envelope
//! - `2` configuration or input error
//! - `4` the resource store could not be reached
//! - `5` fatal error

pub mod check;
pub mod init;
pub mod process;
pub mod validate;

use anyhow::Context;
use serde_json::Value;
use std::io::Read;

/// Read a JSON document from a file, or from stdin when `path` is `-`
pub(crate) fn read_input(path: &str) -> anyhow::Result<String> {
    if path == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read stdin")?;
        return Ok(buffer);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))
}

pub(crate) fn read_json(path: &str) -> anyhow::Result<Value> {
    let text = read_input(path)?;
    serde_json::from_str(&text).with_context(|| format!("{path} is not valid JSON"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_json_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"resourceType": "Patient", "id": "p1"}}"#).unwrap();

        let value = read_json(file.path().to_str().unwrap()).unwrap();
        assert_eq!(value["id"], "p1");
    }

    #[test]
    fn test_read_json_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = read_json(file.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn test_read_missing_file() {
        assert!(read_input("/nonexistent/pdr-bundle.json").is_err());
    }
}
