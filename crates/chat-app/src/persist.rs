use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PersistError {
    #[snafu(display("failed to create directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize {path:?} on `{stage}`: {source}"))]
    SerializeJson {
        stage: &'static str,
        path: PathBuf,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to replace file from {from:?} to {to:?} on `{stage}`: {source}"))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to read file at {path:?} on `{stage}`: {source}"))]
    ReadFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to parse {path:?} on `{stage}`: {source}"))]
    ParseJson {
        stage: &'static str,
        path: PathBuf,
        source: serde_json::Error,
    },
    #[snafu(display("failed to remove file at {path:?} on `{stage}`: {source}"))]
    RemoveFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type PersistResult<T> = Result<T, PersistError>;

/// Writes pretty JSON next to `path` and renames it into place.
pub(crate) fn write_json_atomically<T>(path: &Path, value: &T) -> PersistResult<()>
where
    T: Serialize + ?Sized,
{
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateDirSnafu {
            stage: "create-parent-directory",
            path: parent.to_path_buf(),
        })?;
    }

    let content = serde_json::to_string_pretty(value).context(SerializeJsonSnafu {
        stage: "serialize-json",
        path: path.to_path_buf(),
    })?;

    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, content).context(WriteFileSnafu {
        stage: "write-temporary-file",
        path: temp_path.clone(),
    })?;

    std::fs::rename(&temp_path, path).context(RenameTempFileSnafu {
        stage: "rename-temporary-file",
        from: temp_path,
        to: path.to_path_buf(),
    })?;

    Ok(())
}

/// Reads a JSON file; a missing file is `Ok(None)`.
pub(crate) fn read_json<T>(path: &Path) -> PersistResult<Option<T>>
where
    T: DeserializeOwned,
{
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistError::ReadFile {
                stage: "read-json-file",
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .context(ParseJsonSnafu {
            stage: "parse-json-file",
            path: path.to_path_buf(),
        })
}

/// Removes a file; a file that is already gone counts as removed.
pub(crate) fn remove_file(path: &Path) -> PersistResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PersistError::RemoveFile {
            stage: "remove-file",
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn round_trips_through_a_fresh_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("values.json");
        let values = BTreeMap::from([("apikey".to_string(), "sk-1".to_string())]);

        write_json_atomically(&path, &values).expect("write");

        let loaded: Option<BTreeMap<String, String>> = read_json(&path).expect("read");
        assert_eq!(loaded, Some(values));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_file_reads_as_none_and_removes_cleanly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.json");

        let loaded: Option<BTreeMap<String, String>> = read_json(&path).expect("read");
        assert!(loaded.is_none());
        remove_file(&path).expect("remove missing file");
    }

    #[test]
    fn malformed_json_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").expect("seed");

        let result: PersistResult<Option<BTreeMap<String, String>>> = read_json(&path);
        assert!(matches!(result, Err(PersistError::ParseJson { .. })));
    }
}
