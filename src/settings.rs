//! YAML-backed run settings.
//!
//! [`SettingsFile`] opens and parses a settings file once, then serves
//! per-tag reads through [`SettingsFile::read_key`]. A read can forbid null
//! values, demand the value name an existing filesystem path, substitute a
//! default for null, and echo the result to the log. A missing tag is always
//! an error; defaults only stand in for tags that are present but null.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::logging::ActionLogger;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings file not found: {path}")]
    FileMissing { path: PathBuf },
    #[error("could not read settings file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse settings file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("settings root in {path} is not a mapping")]
    NotMapping { path: PathBuf },
    #[error("\"{tag}\" not found in settings file")]
    KeyMissing { tag: String },
    #[error("\"{tag}\" is empty in settings file")]
    ValueBlank { tag: String },
    #[error("\"{tag}\" is not a scalar value")]
    NotScalar { tag: String },
    #[error("\"{value}\" from \"{tag}\" not found")]
    PathMissing { tag: String, value: String },
}

/// Per-read behaviour for [`SettingsFile::read_key`].
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Error when the tag is present but null. Checked before any default
    /// substitution, so a null value errors even with a default configured.
    pub forbid_blank: bool,
    /// Error unless the value names an existing file or directory.
    pub must_exist_path: bool,
    /// Substituted when the tag is present but null.
    pub default: Option<String>,
    /// Log the returned value.
    pub echo: bool,
}

/// The two values every run needs, pulled out by [`SettingsFile::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub locators_file: PathBuf,
    pub base_url: String,
}

#[derive(Debug)]
pub struct SettingsFile {
    path: PathBuf,
    root: serde_yaml::Value,
    logger: ActionLogger,
}

impl SettingsFile {
    /// Open and parse `path`. The file must exist and its root must be a
    /// mapping.
    pub fn open(path: impl Into<PathBuf>, logger: ActionLogger) -> Result<Self, SettingsError> {
        let path = path.into();
        if !path.exists() {
            return Err(SettingsError::FileMissing { path });
        }
        let text = std::fs::read_to_string(&path).map_err(|source| SettingsError::Io {
            path: path.clone(),
            source,
        })?;
        let root: serde_yaml::Value =
            serde_yaml::from_str(&text).map_err(|source| SettingsError::Parse {
                path: path.clone(),
                source,
            })?;
        if !root.is_mapping() {
            return Err(SettingsError::NotMapping { path });
        }
        Ok(Self { path, root, logger })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read one scalar tag. Returns `None` only for a null value with no
    /// default configured.
    pub fn read_key(
        &self,
        tag: &str,
        options: &ReadOptions,
    ) -> Result<Option<String>, SettingsError> {
        let entry = self.root.get(tag).ok_or_else(|| SettingsError::KeyMissing {
            tag: tag.to_string(),
        })?;
        let raw = scalar_of(tag, entry)?;

        if options.forbid_blank && raw.is_none() {
            return Err(SettingsError::ValueBlank {
                tag: tag.to_string(),
            });
        }
        if options.must_exist_path {
            let value = raw.as_deref().ok_or_else(|| SettingsError::ValueBlank {
                tag: tag.to_string(),
            })?;
            if !Path::new(value).exists() {
                return Err(SettingsError::PathMissing {
                    tag: tag.to_string(),
                    value: value.to_string(),
                });
            }
        }

        let value = match raw {
            Some(value) => Some(value),
            None => options.default.clone(),
        };
        if options.echo {
            let shown = value.as_deref().unwrap_or("<blank>");
            self.logger
                .info(&format!("{tag} = {shown}"), Some("settings"), None);
        }
        Ok(value)
    }

    /// Pull the required keys out of the file: `locators_file` must name an
    /// existing path and `base_url` must be non-null.
    pub fn load(&self) -> Result<Settings, SettingsError> {
        let locators_file = self
            .read_key(
                "locators_file",
                &ReadOptions {
                    must_exist_path: true,
                    ..ReadOptions::default()
                },
            )?
            .ok_or_else(|| SettingsError::ValueBlank {
                tag: "locators_file".to_string(),
            })?;
        let base_url = self
            .read_key(
                "base_url",
                &ReadOptions {
                    forbid_blank: true,
                    ..ReadOptions::default()
                },
            )?
            .ok_or_else(|| SettingsError::ValueBlank {
                tag: "base_url".to_string(),
            })?;
        Ok(Settings {
            locators_file: PathBuf::from(locators_file),
            base_url,
        })
    }
}

fn scalar_of(tag: &str, value: &serde_yaml::Value) -> Result<Option<String>, SettingsError> {
    match value {
        serde_yaml::Value::Null => Ok(None),
        serde_yaml::Value::String(text) => Ok(Some(text.clone())),
        serde_yaml::Value::Number(number) => Ok(Some(number.to_string())),
        serde_yaml::Value::Bool(flag) => Ok(Some(flag.to_string())),
        _ => Err(SettingsError::NotScalar {
            tag: tag.to_string(),
        }),
    }
}
