//! Iterations and the tag sets that group their metrics

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Ordered set of metric tags
///
/// Backed by a `BTreeMap` so two sets with the same pairs compare and hash
/// equal regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a tag, builder style
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Add or replace a tag
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a tag value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Overlay `other` on top of `self`; `other` wins on conflicts
    pub fn merged(&self, other: &TagSet) -> TagSet {
        let mut out = self.clone();
        for (k, v) in &other.0 {
            out.0.insert(k.clone(), v.clone());
        }
        out
    }

    /// True if every tag of `selector` is present here with the same value
    pub fn matches(&self, selector: &TagSet) -> bool {
        selector
            .0
            .iter()
            .all(|(k, v)| self.0.get(k).is_some_and(|own| own == v))
    }

    /// Iterate over `(key, value)` pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no tags are set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (idx, (k, v)) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ",")?;
            }
            write!(f, "{k}:{v}")?;
        }
        write!(f, "}}")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, String>> for TagSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

/// One logical arrival
///
/// Created by the arrival clock, stamped by the worker that serves it and
/// discarded once its outcome has been recorded.
#[derive(Debug, Clone)]
pub struct Iteration {
    /// Sequence number within its stream, starting at zero
    pub sequence: u64,

    /// Stream (scenario) name
    pub stream: Arc<str>,

    /// Executor entry point for this stream (k6 `exec`)
    pub exec: Option<Arc<str>>,

    /// Tags every metric of this iteration is recorded under
    pub tags: Arc<TagSet>,

    /// When the schedule said this arrival was due
    pub scheduled_at: Instant,

    /// When the clock handed it to the pool
    pub dispatched_at: Instant,

    /// When a worker began executing it
    pub started_at: Option<Instant>,

    /// When execution completed
    pub ended_at: Option<Instant>,
}

impl Iteration {
    /// Create an iteration scheduled (and dispatched) at `now`
    pub fn new(
        sequence: u64,
        stream: Arc<str>,
        exec: Option<Arc<str>>,
        tags: Arc<TagSet>,
        now: Instant,
    ) -> Self {
        Self {
            sequence,
            stream,
            exec,
            tags,
            scheduled_at: now,
            dispatched_at: now,
            started_at: None,
            ended_at: None,
        }
    }

    /// Time spent between dispatch and the start of execution
    pub fn queue_delay(&self) -> Option<std::time::Duration> {
        self.started_at
            .map(|started| started.saturating_duration_since(self.dispatched_at))
    }
}
