//! Launch script metadata.
//!
//! Application launch scripts carry `##LDT <key> = "<value>"` lines that
//! describe how the application should be started (partition, job kind,
//! graphics mode, group restriction, menu placement).

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use std::fs;
use thiserror::Error;

const TAG_PREFIX: &str = "##LDT";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
}

/// Tags read from a launch script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchMetadata {
    pub category: Option<String>,
    pub title: Option<String>,
    /// Partition to use
    pub part: Option<String>,
    /// Job kind key (e.g. "notebook")
    pub job: Option<String>,
    /// Partition group
    pub group: Option<String>,
    /// Run through VirtualGL
    pub vgl: bool,
    pub part_disable: bool,
    pub feature_disable: bool,
    pub no_launcher: bool,
    pub icon: Option<String>,
    /// Unix group required to run the application
    pub restrict: Option<String>,
    /// Tags not known to the launcher, kept for menu generation
    pub other: BTreeMap<String, String>,
}

fn flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "1" | "on"
    )
}

/// Parse one `##LDT key = "value"` line.
fn parse_tag(line: &str) -> Option<(String, String)> {
    let rest = line.trim().strip_prefix(TAG_PREFIX)?;
    let (key, value) = rest.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Some((key.to_string(), value.to_string()))
}

impl LaunchMetadata {
    /// Collect all tags in a script. Later tags override earlier ones.
    pub fn parse(content: &str) -> Self {
        let mut meta = Self::default();

        for (key, value) in content.lines().filter_map(parse_tag) {
            let text = (!value.is_empty()).then(|| value.clone());
            match key.as_str() {
                "category" => meta.category = text,
                "title" => meta.title = text,
                "part" => meta.part = text,
                "job" => meta.job = text,
                "group" => meta.group = text,
                "vgl" => meta.vgl = flag(&value),
                "part_disable" => meta.part_disable = flag(&value),
                "feature_disable" => meta.feature_disable = flag(&value),
                "no_launcher" => meta.no_launcher = flag(&value),
                "icon" => meta.icon = text,
                "restrict" => meta.restrict = text,
                _ => {
                    meta.other.insert(key, value);
                }
            }
        }

        meta
    }
}

/// A launch script on disk together with its tags.
#[derive(Debug, Clone)]
pub struct LaunchScript {
    pub path: Utf8PathBuf,
    pub metadata: LaunchMetadata,
}

impl LaunchScript {
    pub fn read(path: &Utf8Path) -> Result<Self, MetadataError> {
        let content = fs::read_to_string(path).map_err(|source| MetadataError::Io {
            path: path.to_owned(),
            source,
        })?;
        Ok(Self {
            path: path.to_owned(),
            metadata: LaunchMetadata::parse(&content),
        })
    }

    /// Title for display, falling back to the file name.
    pub fn title(&self) -> &str {
        self.metadata
            .title
            .as_deref()
            .or_else(|| self.path.file_stem())
            .unwrap_or("application")
    }
}
