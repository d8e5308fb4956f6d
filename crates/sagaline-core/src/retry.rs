//! Ordered retry stages.

use std::time::Duration;

/// One delay stage: a topic and the sleep applied before re-queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryStage {
    /// Stage topic, e.g. `retry.5s`.
    pub topic: String,
    /// Delay before the record returns to the commands topic.
    pub delay: Duration,
}

/// The ordered list of delay stages. Delays increase monotonically; a record
/// whose attempt count reaches the stage count routes to the DLQ instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPlan {
    stages: Vec<RetryStage>,
}

impl RetryPlan {
    /// Builds a plan from an ordered stage list.
    #[must_use]
    pub fn new(stages: Vec<RetryStage>) -> Self {
        Self { stages }
    }

    /// The stage a record with incoming attempt `attempt` should hop to, or
    /// `None` when stages are exhausted and the record belongs on the DLQ.
    #[must_use]
    pub fn stage_for(&self, attempt: u32) -> Option<&RetryStage> {
        self.stages.get(attempt as usize)
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> u32 {
        u32::try_from(self.stages.len()).unwrap_or(u32::MAX)
    }

    /// Whether the plan has no stages (every transient failure goes straight
    /// to the DLQ).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// All stage topics, in order.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.topic.clone()).collect()
    }

    /// The delay configured for `topic`, if it is a stage topic.
    #[must_use]
    pub fn delay_for_topic(&self, topic: &str) -> Option<Duration> {
        self.stages
            .iter()
            .find(|s| s.topic == topic)
            .map(|s| s.delay)
    }
}

impl Default for RetryPlan {
    /// Stages of the shipped deployment: 5s, 30s, 2m.
    fn default() -> Self {
        Self::new(vec![
            RetryStage {
                topic: "retry.5s".into(),
                delay: Duration::from_secs(5),
            },
            RetryStage {
                topic: "retry.30s".into(),
                delay: Duration::from_secs(30),
            },
            RetryStage {
                topic: "retry.2m".into(),
                delay: Duration::from_secs(120),
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_for_walks_stages_in_order() {
        let plan = RetryPlan::default();
        assert_eq!(plan.stage_for(0).unwrap().topic, "retry.5s");
        assert_eq!(plan.stage_for(1).unwrap().topic, "retry.30s");
        assert_eq!(plan.stage_for(2).unwrap().topic, "retry.2m");
        assert!(plan.stage_for(3).is_none());
    }

    #[test]
    fn test_default_delays_increase() {
        let plan = RetryPlan::default();
        let delays: Vec<Duration> = plan.topics().iter()
            .map(|t| plan.delay_for_topic(t).unwrap())
            .collect();
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_delay_for_unknown_topic_is_none() {
        assert!(RetryPlan::default().delay_for_topic("commands").is_none());
    }

    #[test]
    fn test_empty_plan_sends_first_failure_to_dlq() {
        let plan = RetryPlan::new(vec![]);
        assert!(plan.is_empty());
        assert!(plan.stage_for(0).is_none());
    }
}
