// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/emberwatch

//! Confidence aggregation policies
//!
//! Alarm gating is always `sources_triggered >= min_sources`; the
//! confidence score is a separate, swappable policy. A triggered
//! channel's normalized exceedance is `((value - threshold) /
//! threshold).clamp(0, 1)`, so a channel scores 0.5 right at its
//! threshold and 1.0 at twice its threshold. With no triggered
//! channels every policy reports 0.

use crate::config::ConfidencePolicyKind;

use super::SourceChannel;

/// One triggered channel's input to the confidence policy
#[derive(Debug, Clone)]
pub struct ChannelContribution {
    /// Which channel triggered
    pub channel: SourceChannel,
    /// Observed value in the channel's unit
    pub value: f64,
    /// Configured threshold
    pub threshold: f64,
    /// Normalized exceedance in [0, 1]
    pub exceedance: f64,
}

/// Swappable confidence scoring over the triggered channels
pub trait ConfidencePolicy: Send + Sync {
    /// Policy name for logs and snapshots
    fn name(&self) -> &'static str;

    /// Aggregate confidence in [0, 1]
    fn confidence(&self, triggered: &[ChannelContribution]) -> f64;
}

fn channel_score(c: &ChannelContribution) -> f64 {
    0.5 + 0.5 * c.exceedance.clamp(0.0, 1.0)
}

/// Mean of the triggered channels' scores (default policy)
pub struct MeanExceedance;

impl ConfidencePolicy for MeanExceedance {
    fn name(&self) -> &'static str {
        "mean_exceedance"
    }

    fn confidence(&self, triggered: &[ChannelContribution]) -> f64 {
        if triggered.is_empty() {
            return 0.0;
        }
        let sum: f64 = triggered.iter().map(channel_score).sum();
        (sum / triggered.len() as f64).clamp(0.0, 1.0)
    }
}

/// Strongest single channel's score
pub struct MaxExceedance;

impl ConfidencePolicy for MaxExceedance {
    fn name(&self) -> &'static str {
        "max_exceedance"
    }

    fn confidence(&self, triggered: &[ChannelContribution]) -> f64 {
        triggered
            .iter()
            .map(channel_score)
            .fold(0.0, f64::max)
            .clamp(0.0, 1.0)
    }
}

/// Instantiate the policy selected in configuration
pub fn build_policy(kind: ConfidencePolicyKind) -> Box<dyn ConfidencePolicy> {
    match kind {
        ConfidencePolicyKind::MeanExceedance => Box::new(MeanExceedance),
        ConfidencePolicyKind::MaxExceedance => Box::new(MaxExceedance),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contribution(channel: SourceChannel, value: f64, threshold: f64) -> ChannelContribution {
        ChannelContribution {
            channel,
            value,
            threshold,
            exceedance: ((value - threshold) / threshold).clamp(0.0, 1.0),
        }
    }

    #[test]
    fn test_no_triggered_channels_scores_zero() {
        assert_eq!(MeanExceedance.confidence(&[]), 0.0);
        assert_eq!(MaxExceedance.confidence(&[]), 0.0);
    }

    #[test]
    fn test_mean_policy() {
        let triggered = vec![
            contribution(SourceChannel::Thermal, 120.0, 60.0), // exceedance 1.0 -> 1.0
            contribution(SourceChannel::Gas, 400.0, 400.0),    // exceedance 0.0 -> 0.5
        ];
        let c = MeanExceedance.confidence(&triggered);
        assert!((c - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_max_policy() {
        let triggered = vec![
            contribution(SourceChannel::Smoke, 13.0, 12.0),
            contribution(SourceChannel::Flame, 100.0, 50.0),
        ];
        let c = MaxExceedance.confidence(&triggered);
        assert!((c - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_bounded() {
        let triggered = vec![contribution(SourceChannel::Gas, 1e9, 400.0)];
        for policy in [&MeanExceedance as &dyn ConfidencePolicy, &MaxExceedance] {
            let c = policy.confidence(&triggered);
            assert!((0.0..=1.0).contains(&c));
        }
    }
}
