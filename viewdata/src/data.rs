//! Structured data (configuration, data source catalogues, cache snapshots,
//! persisted view specifications) is read from the file system in one of a
//! small number of formats.

use std::{ffi::OsStr, fs, path::Path, str::FromStr};

use serde::de::DeserializeOwned;

use crate::Error;

/// The supported file formats from which we can load structured data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SupportedFormat {
    Json,
    Yaml,
}

impl FromStr for SupportedFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Ok(match lower.as_ref() {
            "json" => Self::Json,
            "yaml" | "yml" => Self::Yaml,
            _ => return Err(Error::UnsupportedFileType(s.to_string())),
        })
    }
}

/// Parse the given content in the given format.
pub fn load_as<T: DeserializeOwned>(fmt: SupportedFormat, content: &str) -> Result<T, Error> {
    Ok(match fmt {
        SupportedFormat::Json => serde_json::from_str(content)?,
        SupportedFormat::Yaml => serde_yaml::from_str(content)?,
    })
}

/// Load structured data from the given file, detecting its format from the
/// file's extension.
pub fn load_from_file<T, P>(path: P) -> Result<T, Error>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(OsStr::to_str)
        .ok_or_else(|| Error::CannotDetermineFileType(path.to_path_buf()))?;
    let fmt = SupportedFormat::from_str(ext)
        .map_err(|e| Error::LoadFromFile(path.to_path_buf(), Box::new(e)))?;
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("while trying to read from {}", path.display()), e))?;
    load_as(fmt, &content).map_err(|e| Error::LoadFromFile(path.to_path_buf(), Box::new(e)))
}
