//! Per-step usage accounting

use crate::types::{TokenUsage, UsageRecord};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Accumulates token usage per pipeline step; never decrements
#[derive(Debug, Default)]
pub struct UsageAggregator {
    steps: Mutex<BTreeMap<String, TokenUsage>>,
}

impl UsageAggregator {
    /// Create an empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Add usage for a step and return the record to surface to the caller
    pub fn record(&self, step: impl Into<String>, usage: TokenUsage) -> UsageRecord {
        let step = step.into();
        self.steps
            .lock()
            .entry(step.clone())
            .or_default()
            .add(usage);
        UsageRecord::new(step, usage)
    }

    /// Running totals across all steps
    pub fn total(&self) -> TokenUsage {
        self.steps
            .lock()
            .values()
            .fold(TokenUsage::default(), |mut acc, usage| {
                acc.add(*usage);
                acc
            })
    }

    /// Running totals for one step
    pub fn step(&self, step: &str) -> Option<TokenUsage> {
        self.steps.lock().get(step).copied()
    }

    /// Snapshot of all steps, ordered by name
    pub fn by_step(&self) -> Vec<(String, TokenUsage)> {
        self.steps
            .lock()
            .iter()
            .map(|(step, usage)| (step.clone(), *usage))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_and_total() {
        let usage = UsageAggregator::new();
        let record = usage.record("synthesize:cover", TokenUsage::new(10, 2));
        assert_eq!(record.prompt_units, 10);

        usage.record("synthesize:cover", TokenUsage::new(5, 1));
        usage.record("extract_facts", TokenUsage::new(1, 1));

        assert_eq!(usage.step("synthesize:cover"), Some(TokenUsage::new(15, 3)));
        assert_eq!(usage.total(), TokenUsage::new(16, 4));
        assert_eq!(usage.by_step()[0].0, "extract_facts");
    }

    #[tokio::test]
    async fn test_concurrent_records() {
        let usage = Arc::new(UsageAggregator::new());
        let mut handles = Vec::new();
        for i in 0..10 {
            let usage = usage.clone();
            handles.push(tokio::spawn(async move {
                usage.record(format!("step{}", i % 3), TokenUsage::new(1, 1));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(usage.total(), TokenUsage::new(10, 10));
    }
}
