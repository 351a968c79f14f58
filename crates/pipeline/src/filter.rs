use std::path::{Component, Path};
use crate::config::PipelineConfig;

/// Decides whether a discovered file is worth probing.
///
/// Rules, in order: extension in the allow-list, no hidden segment,
/// no quarantined segment. Pure; holds no state beyond its configuration.
#[derive(Debug, Clone)]
pub struct PathFilter {
    extensions: Vec<String>,
    quarantine_prefixes: Vec<String>,
}

impl PathFilter {
    pub fn new<E, Q>(extensions: E, quarantine_prefixes: Q) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        Q: IntoIterator,
        Q::Item: Into<String>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
            quarantine_prefixes: quarantine_prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self::new(&cfg.extensions, cfg.quarantine_prefixes.iter().cloned())
    }

    /// `path` is expected to be root-relative; segments of the root itself
    /// are not judged.
    pub fn is_eligible(&self, path: &Path) -> bool {
        self.has_allowed_extension(path) && self.is_visible(path)
    }

    /// No hidden segment and no quarantined segment, whatever the extension
    pub fn is_visible(&self, path: &Path) -> bool {
        !segments(path).any(|s| s.starts_with('.'))
            && !segments(path).any(|s| self.is_quarantined(s))
    }

    pub fn has_allowed_extension(&self, path: &Path) -> bool {
        match path.extension().and_then(|s| s.to_str()) {
            Some(ext) => self.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }

    fn is_quarantined(&self, segment: &str) -> bool {
        self.quarantine_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && segment.starts_with(prefix.as_str()))
    }
}

fn segments(path: &Path) -> impl Iterator<Item = &str> {
    path.components().filter_map(|c| match c {
        Component::Normal(s) => s.to_str(),
        _ => None,
    })
}
