//! Splitting of absolute `/`-delimited paths.

use crate::config::MAX_NAME_LEN;
use crate::error::{MemFsError, Result};

/// Splits an absolute path into its components. Empty components produced by
/// repeated or trailing slashes are skipped, so `/a//b/` names the same entry
/// as `/a/b`. The root path yields no components.
pub fn components(path: &str) -> Result<Vec<&str>> {
    if !path.starts_with('/') {
        return Err(MemFsError::InvalidArgument(format!(
            "path \"{}\" must start with \"/\"",
            path
        )));
    }

    Ok(path.split('/').filter(|part| !part.is_empty()).collect())
}

/// Splits a path into its parent components and final name.
pub fn split_last(path: &str) -> Result<(Vec<&str>, &str)> {
    let mut parts = components(path)?;
    match parts.pop() {
        Some(name) => Ok((parts, name)),
        None => Err(MemFsError::InvalidArgument(
            "the root directory has no parent".to_string(),
        )),
    }
}

/// Checks that a name can be stored in a node.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(MemFsError::InvalidArgument(format!(
            "\"{}\" is not a valid file name",
            name
        )));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(MemFsError::NameTooLong);
    }
    Ok(())
}

/// Joins a directory path and an entry name.
pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_has_no_components() {
        assert!(components("/").unwrap().is_empty());
    }

    #[test]
    fn skips_empty_components() {
        assert_eq!(components("/a//b/").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn relative_paths_are_rejected() {
        match components("a/b") {
            Err(MemFsError::InvalidArgument(_)) => (),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn splits_parent_and_name() {
        let (parent, name) = split_last("/usr/local/bin").unwrap();
        assert_eq!(parent, vec!["usr", "local"]);
        assert_eq!(name, "bin");
        assert!(split_last("/").is_err());
    }

    #[test]
    fn names_are_bounded() {
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
        assert_eq!(
            validate_name(&"x".repeat(MAX_NAME_LEN + 1)),
            Err(MemFsError::NameTooLong)
        );
        assert!(validate_name("..").is_err());
    }

    #[test]
    fn joins_under_root_and_subdirectories() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }
}
