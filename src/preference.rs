//! # Preference Model
//!
//! Long-lived taste profile: one [`BanditArm`] per genre key and per artist,
//! plus two running means over the feature space (global, slow; recent,
//! medium). The session-scoped mean lives in [`crate::session`].
//!
//! ## Update rules
//!
//! - A like adds 3.0 to the genre arm's `alpha`, a dislike adds 1.5 to its
//!   `beta`; artist arms receive 30% of that.
//! - An undo subtracts exactly what the original rating added and pops the
//!   history entry it pushed, so like → undo leaves the arm untouched.
//! - Likes pull the global/recent means toward the track (rates 0.05/0.15);
//!   dislikes push them away at 0.3×/0.5× of those rates.
//! - Before each update every arm decays toward the prior by
//!   `1 - (1 - exp(-hours/24)) × 0.1`, `hours` being the gap since the last
//!   rating.

use crate::bandit::{BanditArm, SampleProfile};
use crate::features::FeatureVector;
use crate::rating::Rating;
use crate::taxonomy::GenreTaxonomy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Genre-arm evidence added by a like.
pub const LIKE_STRENGTH: f64 = 3.0;
/// Genre-arm evidence added by a dislike.
pub const DISLIKE_STRENGTH: f64 = 1.5;
/// Share of the genre strength applied to artist arms.
pub const ARTIST_SHARE: f64 = 0.3;

/// Liked genres returned at most.
const LIKED_GENRE_LIMIT: usize = 6;

/// Learning rates for the three feature means.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningRates {
    pub global: f64,
    pub recent: f64,
    pub session: f64,
    /// Fraction of `global` used when a dislike repels the global mean.
    pub global_repel: f64,
    /// Fraction of `recent` used when a dislike repels the recent mean.
    pub recent_repel: f64,
}

pub const LEARNING_RATES: LearningRates = LearningRates {
    global: 0.05,
    recent: 0.15,
    session: 0.3,
    global_repel: 0.3,
    recent_repel: 0.5,
};

/// Genre-arm evidence for one rating.
#[must_use]
pub const fn reward_strength(rating: Rating) -> f64 {
    match rating {
        Rating::Like => LIKE_STRENGTH,
        Rating::Dislike => DISLIKE_STRENGTH,
    }
}

/// Arm multiplier for `hours` since the previous rating.
#[must_use]
pub fn decay_factor(hours: f64) -> f64 {
    if !hours.is_finite() || hours <= 0.0 {
        return 1.0;
    }
    let decay = (-hours / 24.0).exp();
    1.0 - (1.0 - decay) * 0.1
}

/// Arm key for a genre tag: trimmed and lower-cased.
#[must_use]
pub fn genre_key(genre: &str) -> String {
    genre.trim().to_lowercase()
}

/// Leaderboard row: every leaf genre folded into its display name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenreAggregate {
    pub alpha: f64,
    pub beta: f64,
    pub history: Vec<f64>,
    pub subgenres: Vec<String>,
    pub total_interactions: usize,
}

impl GenreAggregate {
    #[must_use]
    pub fn posterior_mean(&self) -> f64 {
        let total = self.alpha + self.beta;
        if total > 0.0 {
            self.alpha / total
        } else {
            0.5
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferenceModel {
    pub genres: BTreeMap<String, BanditArm>,
    pub artists: BTreeMap<String, BanditArm>,
    pub global_mean: FeatureVector,
    pub recent_mean: FeatureVector,
}

impl Default for PreferenceModel {
    fn default() -> Self {
        Self {
            genres: BTreeMap::new(),
            artists: BTreeMap::new(),
            global_mean: FeatureVector::neutral(),
            recent_mean: FeatureVector::neutral(),
        }
    }
}

impl PreferenceModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for `genre`, created with the uniform prior on first touch.
    pub fn genre_arm_mut(&mut self, genre: &str) -> &mut BanditArm {
        self.genres.entry(genre_key(genre)).or_default()
    }

    /// Arm for `artist_id`, created with the uniform prior on first touch.
    pub fn artist_arm_mut(&mut self, artist_id: &str) -> &mut BanditArm {
        self.artists.entry(artist_id.to_string()).or_default()
    }

    /// Estimate for a genre key; unknown genres read as a fresh arm.
    #[must_use]
    pub fn sample_genre(&self, genre: &str) -> f64 {
        self.genres
            .get(&genre_key(genre))
            .map_or(0.5, |arm| arm.sample(&SampleProfile::GENRE))
    }

    /// Estimate for an artist; unknown artists read as a fresh arm.
    #[must_use]
    pub fn sample_artist(&self, artist_id: &str) -> f64 {
        self.artists
            .get(artist_id)
            .map_or(0.5, |arm| arm.sample(&SampleProfile::ARTIST))
    }

    /// Apply (or, with `is_undo`, reverse) a rating on a genre arm.
    pub fn update_genre(&mut self, genre: &str, rating: Rating, is_undo: bool) {
        let strength = reward_strength(rating);
        apply(self.genre_arm_mut(genre), rating, strength, is_undo);
    }

    /// Apply (or reverse) a rating on an artist arm at the artist share.
    pub fn update_artist(&mut self, artist_id: &str, rating: Rating, is_undo: bool) {
        let strength = reward_strength(rating) * ARTIST_SHARE;
        apply(self.artist_arm_mut(artist_id), rating, strength, is_undo);
    }

    /// Decay every arm toward the prior for `hours` of inactivity.
    pub fn apply_time_decay(&mut self, hours: f64) {
        let factor = decay_factor(hours);
        if factor >= 1.0 {
            return;
        }
        log::debug!(
            "Decaying {} genre and {} artist arms by {factor:.5} after {hours:.2}h",
            self.genres.len(),
            self.artists.len()
        );
        for arm in self.genres.values_mut().chain(self.artists.values_mut()) {
            arm.decay(factor);
        }
    }

    /// Move the global and recent means for a rating (or reverse that move).
    pub fn update_feature_means(&mut self, vector: &FeatureVector, rating: Rating, is_undo: bool) {
        let rates = &LEARNING_RATES;
        let (global, recent) = match rating {
            Rating::Like => (rates.global, rates.recent),
            Rating::Dislike => (
                -rates.global * rates.global_repel,
                -rates.recent * rates.recent_repel,
            ),
        };

        if is_undo {
            self.global_mean.unblend(vector, global);
            self.recent_mean.unblend(vector, recent);
        } else {
            self.global_mean.blend(vector, global);
            self.recent_mean.blend(vector, recent);
        }
    }

    /// Genres the user reliably likes, best first.
    ///
    /// Qualifies with 3+ history entries, `alpha / (beta + 1) > 1.3` and
    /// `alpha > 2.5`; ranked by that ratio × (1 + average of the last 5).
    #[must_use]
    pub fn liked_genres(&self) -> Vec<String> {
        let mut liked: Vec<(&String, f64)> = self
            .genres
            .iter()
            .filter(|(_, arm)| arm.history.len() >= 3)
            .filter_map(|(genre, arm)| {
                let ratio = arm.alpha / (arm.beta + 1.0);
                if ratio > 1.3 && arm.alpha > 2.5 {
                    let recent = arm.recent_average(5).unwrap_or(0.0);
                    Some((genre, ratio * (1.0 + recent)))
                } else {
                    None
                }
            })
            .collect();

        liked.sort_by(|(_, a), (_, b)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        liked
            .into_iter()
            .take(LIKED_GENRE_LIMIT)
            .map(|(genre, _)| genre.clone())
            .collect()
    }

    /// Read-only projection of the genre arms onto display names.
    #[must_use]
    pub fn aggregated_genre_scores(&self, taxonomy: &GenreTaxonomy) -> BTreeMap<String, GenreAggregate> {
        let mut aggregated: BTreeMap<String, GenreAggregate> = BTreeMap::new();
        for (genre, arm) in &self.genres {
            let entry = aggregated.entry(taxonomy.display_name(genre)).or_default();
            entry.alpha += arm.alpha;
            entry.beta += arm.beta;
            entry.history.extend(arm.history.iter().copied());
            entry.subgenres.push(genre.clone());
            entry.total_interactions += arm.history.len();
        }
        aggregated
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn apply(arm: &mut BanditArm, rating: Rating, strength: f64, is_undo: bool) {
    if is_undo {
        arm.revert(rating.is_like(), strength);
    } else {
        arm.record(rating.is_like(), strength);
    }
}
