// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Detection of paths belonging to the proxy’s own endpoints.
//!
//! A path is a list of names separated by slashes. The number of separating slashes is
//! irrelevant, so that `/oauth2/callback` and `//oauth2//callback` are the same path. A path is
//! located within a prefix if the prefix segments are its leading segments: `/oauth2/callback` is
//! located within `/oauth2` but `/oauth2-other/callback` is not. `.` and `..` segments are resolved
//! before comparing.

use percent_encoding::percent_decode_str;
use std::fmt::{Debug, Display};

const SEPARATOR: char = '/';

/// Splits a path into its non-empty segments, ignoring query string and fragment.
///
/// Percent-encoded characters are decoded before splitting. `.` segments are dropped and `..`
/// segments remove the preceding segment, the way a browser resolves them.
pub(crate) fn path_segments(path: &str) -> Vec<String> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let mut segments = Vec::new();
    for segment in percent_decode_str(path).decode_utf8_lossy().split(SEPARATOR) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment.to_owned()),
        }
    }
    segments
}

/// The path prefix reserved for the proxy’s own endpoints, e.g. `/oauth2`
///
/// Redirects into this prefix would send the user back into the sign-in or callback endpoints.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ProxyPrefix {
    segments: Vec<String>,
}

impl ProxyPrefix {
    /// Creates a reserved prefix from its path.
    ///
    /// Returns `None` if the path has no segments, i.e. is the root path. A root prefix would
    /// reserve every local path.
    pub fn new(prefix: &str) -> Option<Self> {
        let segments = path_segments(prefix);
        if segments.is_empty() {
            None
        } else {
            Some(Self { segments })
        }
    }

    /// Checks whether the given path is located within the reserved prefix.
    ///
    /// The path can contain a query string, it is ignored. An absolute URL never matches.
    pub fn contains(&self, path: &str) -> bool {
        if !path.starts_with(SEPARATOR) {
            return false;
        }

        let segments = path_segments(path);
        segments.len() >= self.segments.len()
            && self
                .segments
                .iter()
                .zip(&segments)
                .all(|(expected, actual)| expected == actual)
    }
}

impl Display for ProxyPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for segment in &self.segments {
            write!(f, "{SEPARATOR}{segment}")?;
        }
        Ok(())
    }
}

impl Debug for ProxyPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
