//! Replacement-header annotations
//!
//! A private header can name the public header that should be included instead, either
//! with an include-what-you-use pragma (`IWYU pragma: private, include "vector.h"`) or a
//! Doxygen command (`@headername{vector}`). Symbols declared in the private header are
//! attributed to the replacement by tooling.

use crate::model::{Comment, FileLocation};
use regex::Regex;
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct ReplacementHeaderScanner {
    iwyu_private: Regex,
    headername: Regex,
}

impl ReplacementHeaderScanner {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            // IWYU pragma: private, include "public.h"  /  <public.h>
            iwyu_private: Regex::new(
                r#"IWYU\s+pragma:\s*private\s*,\s*include\s+(?:"([^"\s]+)"|<([^>\s]+)>)"#,
            )?,

            // @headername{vector} or @headername{vector, list}
            headername: Regex::new(r"@headername\s*\{\s*([^},\s]+)\s*[},]")?,
        })
    }

    /// Replacement header named by `comments`, if any.
    ///
    /// Comments are joined first, so an annotation continued over several consecutive
    /// comments is still recognized. Incomplete annotations yield `None`.
    pub fn extract(&self, comments: &[Comment]) -> Option<String> {
        if comments.is_empty() {
            return None;
        }
        let joined = comments
            .iter()
            .map(|comment| comment.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let normalized = joined.split_whitespace().collect::<Vec<_>>().join(" ");

        if let Some(captures) = self.iwyu_private.captures(&normalized) {
            let header = captures.get(1).or_else(|| captures.get(2))?;
            return Some(header.as_str().to_string());
        }
        self.headername
            .captures(&normalized)
            .and_then(|captures| captures.get(1))
            .map(|header| header.as_str().to_string())
    }
}

impl Default for ReplacementHeaderScanner {
    fn default() -> Self {
        Self::new().expect("Failed to compile replacement header patterns")
    }
}

/// Replacement headers discovered during one indexing run
#[derive(Debug, Clone, Default)]
pub struct ReplacementHeaderMap {
    headers: HashMap<FileLocation, String>,
}

impl ReplacementHeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, location: &FileLocation) -> Option<&str> {
        self.headers.get(location).map(String::as_str)
    }

    /// Decide the replacement for `location`: its own annotation, else the replacement of
    /// the private header that included it.
    pub fn resolve(
        &mut self,
        location: &FileLocation,
        own: Option<String>,
        includer: Option<&FileLocation>,
    ) -> Option<String> {
        let resolved = own.or_else(|| {
            includer
                .and_then(|includer| self.headers.get(includer))
                .cloned()
        });
        match &resolved {
            Some(header) => {
                trace!("Replacement header for {}: {}", location, header);
                self.headers.insert(location.clone(), header.clone());
            }
            None => {
                self.headers.remove(location);
            }
        }
        resolved
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}
