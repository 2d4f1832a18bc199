//! Loading serialized SSA programs.
//!
//! The frontend hands programs over as one JSON document. Loading is
//! parse-only; structural checks live in `validate`.

use std::fs;
use std::io::Read;
use std::path::Path;

use crate::program::Program;

/// Error raised while reading or parsing a serialized program.
#[derive(Debug)]
pub enum LoadError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "cannot read SSA input: {e}"),
            LoadError::Parse(e) => write!(f, "malformed SSA input: {e}"),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        LoadError::Io(e)
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(e: serde_json::Error) -> Self {
        LoadError::Parse(e)
    }
}

/// Parse a program from a JSON string.
pub fn from_json(src: &str) -> Result<Program, LoadError> {
    Ok(serde_json::from_str(src)?)
}

/// Read and parse a program from a file.
pub fn from_path(path: &Path) -> Result<Program, LoadError> {
    let src = fs::read_to_string(path)?;
    from_json(&src)
}

/// Read and parse a program from an arbitrary reader (used for
/// standard input).
pub fn from_reader(mut r: impl Read) -> Result<Program, LoadError> {
    let mut src = String::new();
    r.read_to_string(&mut src)?;
    from_json(&src)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EMPTY: &str = r#"{"types":[],"packages":[],"functions":[],"globals":[]}"#;

    #[test]
    fn test_from_json_empty_program() {
        let p = from_json(EMPTY).unwrap();
        assert!(p.types.is_empty());
        assert!(p.packages.is_empty());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = from_json("{not json").unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn test_from_path_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog.json");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(EMPTY.as_bytes()).unwrap();
        let p = from_path(&path).unwrap();
        assert!(p.functions.is_empty());
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = from_path(Path::new("/no/such/file.json")).unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
    }
}
