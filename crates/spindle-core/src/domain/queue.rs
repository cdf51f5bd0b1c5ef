//! Queue names and priority weights.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{SpindleError, SpindleResult};

pub const DEFAULT_QUEUE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for QueueName {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE)
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for QueueName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Queue name -> positive weight.
///
/// Weights set the expected share of dispatch slots, not a strict order.
/// `BTreeMap` keeps iteration order stable so seeded selection is reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, u32>", into = "BTreeMap<String, u32>")]
pub struct QueueWeights(BTreeMap<QueueName, u32>);

impl QueueWeights {
    pub fn new<I, Q>(weights: I) -> SpindleResult<Self>
    where
        I: IntoIterator<Item = (Q, u32)>,
        Q: Into<QueueName>,
    {
        let mut map = BTreeMap::new();
        for (queue, weight) in weights {
            let queue = queue.into();
            if queue.as_str().is_empty() {
                return Err(SpindleError::Config("queue name must not be empty".into()));
            }
            if weight == 0 {
                return Err(SpindleError::Config(format!(
                    "queue {queue} has weight 0; weights must be positive"
                )));
            }
            map.insert(queue, weight);
        }
        if map.is_empty() {
            return Err(SpindleError::Config("at least one queue is required".into()));
        }
        Ok(Self(map))
    }

    /// Single `default` queue with weight 1.
    pub fn single(queue: impl Into<QueueName>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(queue.into(), 1);
        Self(map)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QueueName, u32)> {
        self.0.iter().map(|(q, w)| (q, *w))
    }

    pub fn queues(&self) -> impl Iterator<Item = &QueueName> {
        self.0.keys()
    }

    pub fn weight(&self, queue: &QueueName) -> Option<u32> {
        self.0.get(queue).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_weight(&self) -> u64 {
        self.0.values().map(|w| u64::from(*w)).sum()
    }
}

impl Default for QueueWeights {
    fn default() -> Self {
        Self::single(QueueName::default())
    }
}

impl TryFrom<BTreeMap<String, u32>> for QueueWeights {
    type Error = SpindleError;

    fn try_from(map: BTreeMap<String, u32>) -> Result<Self, Self::Error> {
        Self::new(map.into_iter().map(|(q, w)| (QueueName::new(q), w)))
    }
}

impl From<QueueWeights> for BTreeMap<String, u32> {
    fn from(weights: QueueWeights) -> Self {
        weights
            .0
            .into_iter()
            .map(|(q, w)| (q.0, w))
            .collect()
    }
}
