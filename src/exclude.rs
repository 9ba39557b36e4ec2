use std::path::Path;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExcludeError {
    #[error("exclude glob '{0}' must be relative to the scan root")]
    AbsoluteGlob(String),
    #[error("invalid exclude regex '{pattern}': {source}")]
    Regex {
        pattern: String,
        source: regex::Error,
    },
    #[error("invalid exclude glob '{pattern}': {source}")]
    Glob {
        pattern: String,
        source: globset::Error,
    },
}

/// Path rules that remove files and whole subtrees from a scan.
///
/// A path is excluded when any rule of any kind matches:
/// - a literal entry occurs anywhere in the path string,
/// - a regex finds a match somewhere in the path string,
/// - a glob, taken relative to the scan root, matches the path or one of
///   its ancestor directories.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    paths: Vec<String>,
    regexes: Vec<Regex>,
    globs: Option<GlobSet>,
}

impl ExclusionRules {
    pub fn new<S: AsRef<str>>(
        paths: &[S],
        regexes: &[S],
        globs: &[S],
    ) -> Result<Self, ExcludeError> {
        let regexes = regexes
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|source| ExcludeError::Regex {
                    pattern: p.as_ref().to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let globs = if globs.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in globs {
                let pattern = pattern.as_ref();
                if is_absolute_pattern(pattern) {
                    return Err(ExcludeError::AbsoluteGlob(pattern.to_string()));
                }
                let glob = GlobBuilder::new(pattern)
                    .literal_separator(true)
                    .build()
                    .map_err(|source| ExcludeError::Glob {
                        pattern: pattern.to_string(),
                        source,
                    })?;
                builder.add(glob);
            }
            Some(builder.build().map_err(|source| ExcludeError::Glob {
                pattern: String::new(),
                source,
            })?)
        };

        Ok(Self {
            paths: paths.iter().map(|p| p.as_ref().to_string()).collect(),
            regexes,
            globs,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.regexes.is_empty() && self.globs.is_none()
    }

    /// Whether `path`, found while scanning `root`, is excluded.
    pub fn is_excluded(&self, path: &Path, root: &Path) -> bool {
        let text = path.to_string_lossy();

        if self.paths.iter().any(|p| text.contains(p.as_str())) {
            return true;
        }

        if self.regexes.iter().any(|re| re.is_match(&text)) {
            return true;
        }

        if let Some(globs) = &self.globs {
            if let Ok(relative) = path.strip_prefix(root) {
                return relative
                    .ancestors()
                    .filter(|a| !a.as_os_str().is_empty())
                    .any(|a| globs.is_match(a));
            }
        }

        false
    }
}

fn is_absolute_pattern(pattern: &str) -> bool {
    pattern.starts_with('/') || pattern.starts_with('\\') || Path::new(pattern).is_absolute()
}
