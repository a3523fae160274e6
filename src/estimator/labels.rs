//! Label bookkeeping: raw label tokens, the name→index encoder, and the set
//! of class indices the classifier currently covers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A label as submitted by an annotator: either an index into the label
/// schema or a raw label name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelToken {
    Index(usize),
    Name(String),
}

impl From<usize> for LabelToken {
    fn from(v: usize) -> Self {
        LabelToken::Index(v)
    }
}

impl From<&str> for LabelToken {
    fn from(v: &str) -> Self {
        LabelToken::Name(v.to_string())
    }
}

impl From<String> for LabelToken {
    fn from(v: String) -> Self {
        LabelToken::Name(v)
    }
}

/// Name→index mapping, fitted once and only ever extended.
///
/// The first batch of names is assigned indices in sorted order; later novel
/// names take the next free index. Every change bumps `version`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelEncoder {
    mapping: BTreeMap<String, usize>,
    version: u32,
}

impl LabelEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.mapping.get(name).copied()
    }

    /// Index → name, for the indices that have a name.
    pub fn names(&self) -> BTreeMap<usize, String> {
        self.mapping.iter().map(|(k, v)| (*v, k.clone())).collect()
    }

    /// First fit: sorted unique names take indices `0..`. A no-op once the
    /// encoder holds any name; use [`LabelEncoder::extend`] after that.
    pub fn fit_initial<'a>(&mut self, tokens: impl IntoIterator<Item = &'a LabelToken>, capacity: usize) -> usize {
        if !self.is_empty() {
            return 0;
        }
        self.extend(tokens, capacity)
    }

    /// Register any genuinely novel names among `tokens`. Indices are never
    /// reassigned. Names that would land at or beyond `capacity` are refused.
    /// Returns how many names were added.
    pub fn extend<'a>(&mut self, tokens: impl IntoIterator<Item = &'a LabelToken>, capacity: usize) -> usize {
        let novel: BTreeSet<&str> = tokens
            .into_iter()
            .filter_map(|t| match t {
                LabelToken::Name(n) if !self.mapping.contains_key(n) => Some(n.as_str()),
                _ => None,
            })
            .collect();
        if novel.is_empty() {
            return 0;
        }

        let mut next = self.mapping.values().copied().max().map(|m| m + 1).unwrap_or(0);
        let mut added = 0;
        for name in novel {
            if next >= capacity {
                break;
            }
            self.mapping.insert(name.to_string(), next);
            next += 1;
            added += 1;
        }
        if added > 0 {
            self.version += 1;
        }
        added
    }

    /// Resolve a token to a class index within `capacity`.
    pub fn encode(&self, token: &LabelToken, capacity: usize) -> Option<usize> {
        let idx = match token {
            LabelToken::Index(i) => *i,
            LabelToken::Name(n) => self.get(n)?,
        };
        (idx < capacity).then_some(idx)
    }
}

/// Ordered set of class indices the classifier has been fitted against.
/// Only ever widens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSet {
    classes: BTreeSet<usize>,
}

impl ClassSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add indices; returns true if the set grew.
    pub fn widen(&mut self, indices: impl IntoIterator<Item = usize>) -> bool {
        let before = self.classes.len();
        self.classes.extend(indices);
        self.classes.len() > before
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.classes.contains(&idx)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.classes.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.iter().collect()
    }
}

impl FromIterator<usize> for ClassSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self {
            classes: iter.into_iter().collect(),
        }
    }
}
