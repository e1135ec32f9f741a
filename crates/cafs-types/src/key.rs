use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Content-derived address for a stored file or directory.
///
/// A `Key` is a slash-separated path of the form `/<prefix>/<token>`, where
/// `prefix` names the backend that produced it (`map` for the in-memory
/// store) and `token` encodes the content hash. Keys may carry further
/// segments addressing a file inside a stored directory
/// (`/map/<token>/data.json`); [`Key::normalize`] strips those.
///
/// Construction through [`Key::new`] never fails: the input is cleaned the way
/// a datastore key is (leading slash added, empty and `.` segments dropped,
/// `..` resolved). [`Key::from_str`] is the strict parser.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Key(String);

impl Key {
    /// Clean an arbitrary string into key form.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.as_ref().split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                s => segments.push(s),
            }
        }
        Self(format!("/{}", segments.join("/")))
    }

    /// Build a key from a backend prefix and a content token.
    pub fn from_parts(prefix: &str, token: &str) -> Self {
        Self::new(format!("/{prefix}/{token}"))
    }

    /// The full key string, always starting with `/`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Non-empty path segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// The backend prefix (first segment), if any.
    pub fn prefix(&self) -> Option<&str> {
        self.segments().next()
    }

    /// The content token (second segment), if any.
    pub fn token(&self) -> Option<&str> {
        self.segments().nth(1)
    }

    /// Reduce the key to its `/<prefix>/<token>` indexing granularity.
    ///
    /// `/map/QmFoo/file.json` becomes `/map/QmFoo`. Keys with two or fewer
    /// segments are returned unchanged.
    pub fn normalize(&self) -> Key {
        let mut segments = self.segments();
        match (segments.next(), segments.next(), segments.next()) {
            (Some(prefix), Some(token), Some(_)) => Key::from_parts(prefix, token),
            _ => self.clone(),
        }
    }

    /// Returns `true` for the empty root key `/`.
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.0)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Key {
    type Err = TypeError;

    /// Strict parse: requires at least `/<prefix>/<token>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.starts_with('/') {
            return Err(TypeError::InvalidKey {
                key: s.to_string(),
                reason: "must start with '/'",
            });
        }
        let key = Key::new(s);
        if key.token().is_none() {
            return Err(TypeError::InvalidKey {
                key: s.to_string(),
                reason: "expected /<prefix>/<token>",
            });
        }
        Ok(key)
    }
}

impl From<String> for Key {
    fn from(raw: String) -> Self {
        Key::new(raw)
    }
}

impl From<&str> for Key {
    fn from(raw: &str) -> Self {
        Key::new(raw)
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.0
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
