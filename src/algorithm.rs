//! # Candidate Scoring
//!
//! Fuses every signal the engine has about a candidate into one scalar:
//!
//! ```text
//! score = w.feature         · feature similarity
//!       + w.genre           · genre arm estimate
//!       + w.artist          · artist arm estimate
//!       + w.exploration     · uniform(0,1) · exploration_rate
//!       + w.diversity       · 0.1   (not among the last 5 rated)
//!       + w.genre_diversity · 0.15  (new primary genre)
//!       + w.mood            · 0.15 · session similarity
//!       + uniform(-0.01, 0.01)
//!       - artist repetition penalty
//! ```
//!
//! clamped to `[0, 1]`. Two [`WeightProfile`]s exist: one for tracks whose
//! features came from the provider and one for degraded fallback estimates,
//! which lean on the genre arm instead of the unreliable feature vector.
//! Both sum to 1.0.
//!
//! All randomness comes from the caller's [`Rng`], so a seeded source gives
//! reproducible scores.

use crate::features::{FeatureVector, TrackFeatures};
use crate::preference::{genre_key, PreferenceModel};
use crate::session::SessionTracker;
use crate::taxonomy::{GenreTaxonomy, TAXONOMY};
use rand::Rng;
use std::collections::HashSet;

/// Linear weights of the score terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightProfile {
    pub feature: f64,
    pub genre: f64,
    pub artist: f64,
    pub exploration: f64,
    pub diversity: f64,
    pub genre_diversity: f64,
    pub mood: f64,
}

impl WeightProfile {
    /// Tracks with provider-supplied features.
    pub const PROVIDER: Self = Self {
        feature: 0.28,
        genre: 0.35,
        artist: 0.08,
        exploration: 0.08,
        diversity: 0.10,
        genre_diversity: 0.07,
        mood: 0.04,
    };

    /// Tracks whose features are a fallback estimate.
    pub const FALLBACK: Self = Self {
        feature: 0.10,
        genre: 0.45,
        artist: 0.10,
        exploration: 0.12,
        diversity: 0.12,
        genre_diversity: 0.11,
        mood: 0.0,
    };

    #[must_use]
    pub fn total(&self) -> f64 {
        self.feature
            + self.genre
            + self.artist
            + self.exploration
            + self.diversity
            + self.genre_diversity
            + self.mood
    }
}

/// Tunables of the scorer.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringContext {
    pub provider: WeightProfile,
    pub fallback: WeightProfile,
    /// `k` in `exp(-k · distance)`.
    pub similarity_sharpness: f64,
    /// Half-width of the tie-breaking jitter.
    pub jitter: f64,
    /// Raw bonus for a track outside the last [`recent_window`](Self::recent_window).
    pub novelty_bonus: f64,
    /// Raw bonus for a primary genre absent from the recent window.
    pub genre_diversity_bonus: f64,
    /// Scale of the session-similarity mood term.
    pub mood_bonus: f64,
    /// Ratings looked at for novelty, genre diversity and the strong artist penalty.
    pub recent_window: usize,
    /// Ratings looked at for the mild artist penalty.
    pub artist_window: usize,
    /// Session ratings needed before the mood term counts.
    pub mood_min_ratings: u64,
}

impl Default for ScoringContext {
    fn default() -> Self {
        Self {
            provider: WeightProfile::PROVIDER,
            fallback: WeightProfile::FALLBACK,
            similarity_sharpness: 2.0,
            jitter: 0.01,
            novelty_bonus: 0.1,
            genre_diversity_bonus: 0.15,
            mood_bonus: 0.15,
            recent_window: 5,
            artist_window: 10,
            mood_min_ratings: 3,
        }
    }
}

/// Every term of one score, before weighting.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub feature: f64,
    pub genre: f64,
    pub artist: f64,
    pub exploration: f64,
    pub diversity: f64,
    pub genre_diversity: f64,
    pub mood: f64,
    pub jitter: f64,
    pub artist_penalty: f64,
    pub fallback: bool,
    /// Weighted sum, clamped to `[0, 1]`.
    pub total: f64,
}

/// Read-only view over the engine state that scores candidates.
#[derive(Debug, Clone, Copy)]
pub struct CandidateScorer<'a> {
    prefs: &'a PreferenceModel,
    session: &'a SessionTracker,
    context: &'a ScoringContext,
    taxonomy: &'a GenreTaxonomy,
}

impl<'a> CandidateScorer<'a> {
    #[must_use]
    pub fn new(
        prefs: &'a PreferenceModel,
        session: &'a SessionTracker,
        context: &'a ScoringContext,
    ) -> Self {
        Self {
            prefs,
            session,
            context,
            taxonomy: &TAXONOMY,
        }
    }

    /// Score a candidate; a track without features reads as neutral 0.5.
    pub fn score<R: Rng + ?Sized>(&self, features: Option<&TrackFeatures>, rng: &mut R) -> f64 {
        features.map_or(0.5, |features| self.breakdown(features, rng).total)
    }

    /// Similarity of `vector` to the session mean.
    #[must_use]
    pub fn session_similarity(&self, vector: &FeatureVector) -> f64 {
        vector.similarity(&self.session.session_mean, self.context.similarity_sharpness)
    }

    /// Weighted similarity to the global, recent and session means.
    #[must_use]
    pub fn feature_score(&self, features: &TrackFeatures) -> f64 {
        if features.fallback {
            return 0.5;
        }
        let sharpness = self.context.similarity_sharpness;
        let (global_w, recent_w, session_w) = self.session.preference_weights();
        let vector = &features.vector;

        global_w * vector.similarity(&self.prefs.global_mean, sharpness)
            + recent_w * vector.similarity(&self.prefs.recent_mean, sharpness)
            + session_w * self.session_similarity(vector)
    }

    /// Penalty for an artist heard in the last few ratings.
    ///
    /// Any hit in the short window costs up to 0.5; only repeated hits in the
    /// longer window cost anything, up to 0.3.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn artist_penalty(&self, artist_id: Option<&str>) -> f64 {
        let Some(artist_id) = artist_id else {
            return 0.0;
        };
        let short = self.context.recent_window;
        let long = self.context.artist_window;
        let hits = |window: usize| {
            self.session
                .last_events(window)
                .filter(|event| event.artist_id.as_deref() == Some(artist_id))
                .count()
        };

        let (short_hits, long_hits) = (hits(short), hits(long));
        if short_hits > 0 {
            0.5 * (short_hits as f64 / short as f64)
        } else if long_hits > 1 {
            0.3 * (long_hits as f64 / long as f64)
        } else {
            0.0
        }
    }

    /// Full term-by-term score of one candidate.
    pub fn breakdown<R: Rng + ?Sized>(&self, features: &TrackFeatures, rng: &mut R) -> ScoreBreakdown {
        let ctx = self.context;
        let fallback = features.fallback;
        let weights = if fallback { &ctx.fallback } else { &ctx.provider };
        let primary_genre = self.taxonomy.primary_genre(&features.genres);

        let mut terms = ScoreBreakdown {
            feature: self.feature_score(features),
            genre: primary_genre.map_or(0.5, |genre| self.prefs.sample_genre(genre)),
            artist: features
                .artist_id
                .as_deref()
                .map_or(0.5, |artist| self.prefs.sample_artist(artist)),
            fallback,
            ..ScoreBreakdown::default()
        };

        if self.session.recent.len() >= ctx.recent_window {
            let recently_rated = self
                .session
                .last_events(ctx.recent_window)
                .any(|event| event.track_id == features.track_id);
            if !recently_rated {
                terms.diversity = ctx.novelty_bonus;
            }

            terms.artist_penalty = self.artist_penalty(features.artist_id.as_deref());

            if let Some(genre) = primary_genre.map(genre_key) {
                let recent_genres: HashSet<&str> = self
                    .session
                    .last_events(ctx.recent_window)
                    .filter_map(|event| event.primary_genre.as_deref())
                    .collect();
                if recent_genres.len() >= 2 && !recent_genres.contains(genre.as_str()) {
                    terms.genre_diversity = ctx.genre_diversity_bonus;
                }
            }
        }

        terms.exploration = rng.gen::<f64>() * self.session.exploration_rate;

        if !fallback && self.session.session_ratings >= ctx.mood_min_ratings {
            terms.mood = self.session_similarity(&features.vector) * ctx.mood_bonus;
        }

        terms.jitter = (rng.gen::<f64>() * 2.0 - 1.0) * ctx.jitter;

        let raw = weights.feature * terms.feature
            + weights.genre * terms.genre
            + weights.artist * terms.artist
            + weights.exploration * terms.exploration
            + weights.diversity * terms.diversity
            + weights.genre_diversity * terms.genre_diversity
            + weights.mood * terms.mood
            + terms.jitter
            - terms.artist_penalty;

        terms.total = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.5 };

        log::trace!(
            "Scored {}: total={:.4} feature={:.3} genre={:.3} artist={:.3} penalty={:.3}{}",
            features.track_id,
            terms.total,
            terms.feature,
            terms.genre,
            terms.artist,
            terms.artist_penalty,
            if fallback { " (fallback)" } else { "" }
        );
        terms
    }
}
