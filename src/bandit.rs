//! Beta-distribution bandit arms and the Thompson-style estimate drawn from
//! them.
//!
//! An arm counts evidence for one genre or one artist: `alpha` grows with
//! likes, `beta` with dislikes, and a bounded history keeps the most recent
//! outcomes for the recency bonus. Both parameters never drop below the
//! uniform prior of 1.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Outcomes kept per arm.
pub const HISTORY_CAPACITY: usize = 50;

/// Outcomes averaged for the recency bonus.
const RECENT_WINDOW: usize = 10;

/// Prior value of both parameters.
pub const PRIOR: f64 = 1.0;

/// Shape of the estimate for one family of arms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleProfile {
    /// Evidence needed to fully trust the posterior mean.
    pub confidence_scale: f64,
    /// Weight of the recent-history average added on top.
    pub recency_weight: f64,
    /// `beta > alpha × dampen_ratio` marks an arm as strongly disliked.
    pub dampen_ratio: f64,
    /// Multiplier applied to strongly disliked arms.
    pub dampen_factor: f64,
}

impl SampleProfile {
    pub const GENRE: Self = Self {
        confidence_scale: 20.0,
        recency_weight: 0.5,
        dampen_ratio: 2.5,
        dampen_factor: 0.4,
    };

    /// Artists are a narrower, noisier signal than genres.
    pub const ARTIST: Self = Self {
        confidence_scale: 15.0,
        recency_weight: 0.4,
        dampen_ratio: 2.0,
        dampen_factor: 0.5,
    };
}

/// Success/failure counter for one genre or artist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditArm {
    pub alpha: f64,
    pub beta: f64,
    #[serde(default)]
    pub history: VecDeque<f64>,
    /// Outcomes pushed out of `history`, newest last. An undo that frees a
    /// slot brings the newest one back.
    #[serde(default, skip_serializing_if = "VecDeque::is_empty")]
    pub evicted: VecDeque<f64>,
}

impl Default for BanditArm {
    fn default() -> Self {
        Self::new()
    }
}

impl BanditArm {
    /// Uniform prior, empty history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            alpha: PRIOR,
            beta: PRIOR,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            evicted: VecDeque::new(),
        }
    }

    /// Add `strength` of evidence for a like or a dislike.
    pub fn record(&mut self, liked: bool, strength: f64) {
        if liked {
            self.alpha += strength;
        } else {
            self.beta += strength;
        }
        if self.history.len() == HISTORY_CAPACITY {
            if let Some(oldest) = self.history.pop_front() {
                if self.evicted.len() == HISTORY_CAPACITY {
                    self.evicted.pop_front();
                }
                self.evicted.push_back(oldest);
            }
        }
        self.history.push_back(outcome(liked));
        self.enforce_floor();
    }

    /// Reverse an earlier [`record`](Self::record) with the same arguments.
    ///
    /// Removes the newest history entry with the same outcome, so ratings
    /// recorded in between keep their entries.
    pub fn revert(&mut self, liked: bool, strength: f64) {
        if liked {
            self.alpha -= strength;
        } else {
            self.beta -= strength;
        }
        let target = outcome(liked);
        if let Some(pos) = self.history.iter().rposition(|&h| h == target) {
            self.history.remove(pos);
            if self.history.len() < HISTORY_CAPACITY {
                if let Some(restored) = self.evicted.pop_back() {
                    self.history.push_front(restored);
                }
            }
        }
        self.enforce_floor();
    }

    /// Shrink both parameters by `factor` (in `(0, 1]`), never below the prior.
    pub fn decay(&mut self, factor: f64) {
        self.alpha *= factor;
        self.beta *= factor;
        self.enforce_floor();
    }

    #[must_use]
    pub fn posterior_mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Evidence gathered beyond the prior.
    #[must_use]
    pub fn evidence(&self) -> f64 {
        self.alpha + self.beta - 2.0 * PRIOR
    }

    /// Mean of the last `window` outcomes, `None` with no history.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn recent_average(&self, window: usize) -> Option<f64> {
        let take = window.min(self.history.len());
        if take == 0 {
            return None;
        }
        let sum: f64 = self.history.iter().rev().take(take).sum();
        Some(sum / take as f64)
    }

    /// Thompson-style estimate in `[0, 1]`.
    ///
    /// Blends the posterior mean with a neutral 0.5 as evidence accumulates,
    /// adds a bonus for recent likes, and suppresses strongly disliked arms.
    #[must_use]
    pub fn sample(&self, profile: &SampleProfile) -> f64 {
        let confidence = (self.evidence() / profile.confidence_scale).clamp(0.0, 1.0);
        let blended = confidence * self.posterior_mean() + (1.0 - confidence) * 0.5;
        let recency_bonus = self
            .recent_average(RECENT_WINDOW)
            .map_or(0.0, |avg| avg * profile.recency_weight);

        let mut estimate = blended + recency_bonus;
        if self.beta > self.alpha * profile.dampen_ratio {
            estimate *= profile.dampen_factor;
        }

        if estimate.is_finite() {
            estimate.clamp(0.0, 1.0)
        } else {
            0.5
        }
    }

    fn enforce_floor(&mut self) {
        self.alpha = self.alpha.max(PRIOR);
        self.beta = self.beta.max(PRIOR);
    }
}

fn outcome(liked: bool) -> f64 {
    if liked {
        1.0
    } else {
        0.0
    }
}
