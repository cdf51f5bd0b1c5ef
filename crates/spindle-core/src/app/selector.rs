//! QueueSelector - 重み付きキュー選択
//!
//! claim ごとに dequeue へ渡すキュー順を決めます。
//! - weighted: 先頭になる確率が重みに比例、残りは fallback として続く（starvation なし）
//! - strict: 常に重みの降順

use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Mutex;

use crate::domain::{QueueName, QueueWeights};

pub struct QueueSelector {
    weights: Vec<(QueueName, u32)>,
    strict: bool,
    rng: Mutex<StdRng>,
}

impl QueueSelector {
    pub fn new(weights: &QueueWeights, strict: bool) -> Self {
        Self::with_rng(weights, strict, StdRng::from_entropy())
    }

    /// Deterministic selector for tests.
    pub fn seeded(weights: &QueueWeights, strict: bool, seed: u64) -> Self {
        Self::with_rng(weights, strict, StdRng::seed_from_u64(seed))
    }

    fn with_rng(weights: &QueueWeights, strict: bool, rng: StdRng) -> Self {
        let mut weights: Vec<(QueueName, u32)> =
            weights.iter().map(|(q, w)| (q.clone(), w)).collect();
        // Heavier first, then by name, so strict order is stable.
        weights.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Self {
            weights,
            strict,
            rng: Mutex::new(rng),
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Queue order for the next claim.
    ///
    /// Weighted mode draws queues without replacement, each draw proportional
    /// to the remaining weights.
    pub fn order(&self) -> Vec<QueueName> {
        if self.strict {
            return self.weights.iter().map(|(q, _)| q.clone()).collect();
        }

        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let mut remaining: Vec<&(QueueName, u32)> = self.weights.iter().collect();
        let mut order = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let total: u64 = remaining.iter().map(|(_, w)| u64::from(*w)).sum();
            let mut pick = rng.gen_range(0..total);
            let idx = remaining
                .iter()
                .position(|(_, w)| {
                    let w = u64::from(*w);
                    if pick < w {
                        true
                    } else {
                        pick -= w;
                        false
                    }
                })
                .unwrap_or(remaining.len() - 1);
            order.push(remaining.remove(idx).0.clone());
        }
        order
    }
}
