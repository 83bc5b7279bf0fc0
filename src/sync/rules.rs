//! Exclude rules for a project's local tree
//!
//! Patterns follow the familiar ignore-file conventions:
//! - `*.log`, `node_modules` match a file or directory name at any depth
//! - a pattern containing `/` is anchored at the project root (`/build`, `assets/raw/**`)
//! - a trailing `/` matches only directories (and everything below them)
//! - a leading `!` re-includes a path excluded by an earlier pattern
//!
//! When several patterns match, the last one wins.

use crate::error::{Error, Result};
use crate::scan::LocalFile;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

/// Per-project exclude configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncRules {
    /// When false, nothing is excluded
    pub enabled: bool,

    /// Ordered exclude patterns
    pub patterns: Vec<String>,
}

impl SyncRules {
    /// Enabled rules with the given patterns
    pub fn new(patterns: Vec<String>) -> Self {
        Self {
            enabled: true,
            patterns,
        }
    }

    /// Rules that exclude nothing
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Compile the patterns, failing on the first invalid one
    pub fn compile(&self) -> Result<CompiledRules> {
        CompiledRules::build(self, true)
    }

    /// Check a single relative path
    pub fn is_excluded(&self, path: &str) -> bool {
        match CompiledRules::build(self, false) {
            Ok(compiled) => compiled.is_excluded(path),
            Err(_) => false,
        }
    }

    /// Drop excluded files from a scan
    ///
    /// Invalid patterns are logged and ignored so a typo never blocks a sync.
    pub fn filter(&self, files: Vec<LocalFile>) -> Vec<LocalFile> {
        if !self.enabled || self.patterns.is_empty() {
            return files;
        }
        match CompiledRules::build(self, false) {
            Ok(compiled) => {
                let before = files.len();
                let kept: Vec<_> = files
                    .into_iter()
                    .filter(|f| !compiled.is_excluded(&f.path))
                    .collect();
                tracing::debug!(excluded = before - kept.len(), "Applied sync rules");
                kept
            }
            Err(_) => files,
        }
    }
}

#[derive(Debug)]
struct Rule {
    negated: bool,
    dir_only: bool,
}

/// Rules ready for matching
#[derive(Debug)]
pub struct CompiledRules {
    enabled: bool,
    set: GlobSet,
    rules: Vec<Rule>,
}

impl CompiledRules {
    fn build(rules: &SyncRules, strict: bool) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut compiled = Vec::new();

        for raw in &rules.patterns {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let (negated, body) = match trimmed.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, trimmed),
            };
            let (dir_only, body) = match body.strip_suffix('/') {
                Some(rest) => (true, rest),
                None => (false, body),
            };
            let anchored = body.contains('/');
            let body = body.trim_start_matches('/');
            if body.is_empty() {
                continue;
            }

            let text = if anchored {
                body.to_string()
            } else {
                format!("**/{}", body)
            };

            let glob = match GlobBuilder::new(&text).literal_separator(true).build() {
                Ok(g) => g,
                Err(e) if strict => {
                    return Err(Error::config(format!("invalid pattern '{}': {}", raw, e)))
                }
                Err(e) => {
                    tracing::warn!(pattern = %raw, error = %e, "Ignoring invalid sync rule");
                    continue;
                }
            };
            builder.add(glob);
            compiled.push(Rule { negated, dir_only });
        }

        let set = builder
            .build()
            .map_err(|e| Error::config(format!("building rule set: {}", e)))?;

        Ok(Self {
            enabled: rules.enabled,
            set,
            rules: compiled,
        })
    }

    /// Whether `path` (relative, `/` separated) is excluded
    pub fn is_excluded(&self, path: &str) -> bool {
        if !self.enabled || self.rules.is_empty() {
            return false;
        }

        let mut winner: Option<usize> = None;
        let mut consider = |candidate: &str, is_dir: bool| {
            for index in self.set.matches(candidate) {
                if self.rules[index].dir_only && !is_dir {
                    continue;
                }
                winner = Some(winner.map_or(index, |w| w.max(index)));
            }
        };

        // Every ancestor directory is a candidate, then the file itself
        for (i, _) in path.match_indices('/') {
            consider(&path[..i], true);
        }
        consider(path, false);

        winner.is_some_and(|i| !self.rules[i].negated)
    }
}
