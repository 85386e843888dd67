//! # Engine
//!
//! The caller-facing facade. It owns the one [`EngineState`] of the process
//! and injects it into the scorer and the selector; nothing else holds or
//! mutates learned state.
//!
//! ## Locking
//!
//! - Rating updates, time decay and resets take the state write lock, so no
//!   reader ever sees a half-applied rating.
//! - Recommendation and playlist scoring take the read lock and may run in
//!   parallel with each other.
//! - Catalog calls (searches, feature lookups) run with no lock held.
//! - The random source has its own mutex, always taken after the state lock.
//!
//! Persistence happens under the write lock, so snapshots and rating-log
//! entries reach the store in the order the updates were applied.

use crate::algorithm::{CandidateScorer, ScoringContext};
use crate::catalog::{Catalog, Track};
use crate::db::StateStore;
use crate::features::{infer_genre, TrackFeatures};
use crate::preference::{genre_key, GenreAggregate, PreferenceModel};
use crate::rating::{Rating, RatingEvent};
use crate::selector::{RecommendationSelector, SelectorConfig, Sourcing};
use crate::session::{SessionStats, SessionTracker};
use crate::taxonomy::TAXONOMY;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Default length of the top-rated list.
pub const TOP_RATED_LIMIT: usize = 50;

/// Everything the engine learns, saved as one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineState {
    pub preferences: PreferenceModel,
    pub session: SessionTracker,
}

/// What a rating call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RatingOutcome {
    Applied {
        primary_genre: Option<String>,
        /// A session shift was detected before the rating was applied.
        session_reset: bool,
    },
    /// The catalog had no features for the track; nothing was learned.
    MissingFeatures,
}

pub struct Engine {
    state: RwLock<EngineState>,
    rng: Mutex<StdRng>,
    catalog: Arc<dyn Catalog>,
    store: Arc<dyn StateStore>,
    selector: RecommendationSelector,
    scoring: ScoringContext,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("selector", &self.selector)
            .field("scoring", &self.scoring)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine from whatever state the store holds. An unreadable
    /// store degrades to a fresh profile.
    pub fn new(catalog: Arc<dyn Catalog>, store: Arc<dyn StateStore>) -> Self {
        let state = match store.load_state() {
            Ok(Some(state)) => {
                log::info!(
                    "Loaded profile: {} genres, {} artists, {} ratings",
                    state.preferences.genres.len(),
                    state.preferences.artists.len(),
                    state.session.total_ratings
                );
                state
            }
            Ok(None) => {
                log::info!("No saved profile; starting fresh");
                EngineState::default()
            }
            Err(err) => {
                log::warn!("Could not load saved profile, starting fresh: {err:#}");
                EngineState::default()
            }
        };

        Self {
            state: RwLock::new(state),
            rng: Mutex::new(StdRng::from_entropy()),
            catalog,
            store,
            selector: RecommendationSelector::default(),
            scoring: ScoringContext::default(),
        }
    }

    /// Make every random draw reproducible.
    #[must_use]
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    #[must_use]
    pub fn with_scoring(self, scoring: ScoringContext) -> Self {
        Self { scoring, ..self }
    }

    #[must_use]
    pub fn with_selector(self, config: SelectorConfig) -> Self {
        Self {
            selector: RecommendationSelector::new(config),
            ..self
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, EngineState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, EngineState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next track to play, or `None` when no candidate is available this cycle.
    pub fn recommend(&self, exclude: &HashSet<String>) -> Option<Track> {
        let plan = {
            let state = self.read();
            self.selector.plan(&state.preferences, &state.session)
        };
        let sourcing = self.selector.choose_sourcing(&plan, &mut *self.rng());

        if let Sourcing::LikedGenres(queries) = sourcing {
            log::debug!("Searching {} liked genres", queries.len());
            let candidates = self.selector.search_liked_genres(self.catalog.as_ref(), &queries, exclude);
            if let Some(track) = self.pick_from(&candidates, exclude) {
                return Some(track);
            }
            log::debug!("Liked-genre search gave nothing usable; falling back to discovery");
        }

        let candidates = self.selector.discover(self.catalog.as_ref(), &plan, exclude);
        self.pick_from(&candidates, exclude)
    }

    fn pick_from(&self, candidates: &[Track], exclude: &HashSet<String>) -> Option<Track> {
        if candidates.is_empty() {
            return None;
        }
        let ids: Vec<String> = candidates.iter().map(|t| t.id.clone()).collect();
        let features = self.catalog.batch_features(&ids);

        let state = self.read();
        let scorer = CandidateScorer::new(&state.preferences, &state.session, &self.scoring);
        let mut rng = self.rng();
        let ranked = self.selector.rank(&scorer, candidates, &features, exclude, &mut *rng);
        self.selector
            .pick(&ranked, candidates, state.session.under_rejection(), &mut *rng)
    }

    /// Learn from explicit feedback.
    pub fn update_with_rating(
        &self,
        track_id: &str,
        rating: Rating,
        is_undo: bool,
        should_count: bool,
    ) -> RatingOutcome {
        self.update_with_rating_at(track_id, rating, is_undo, should_count, Utc::now())
    }

    /// [`update_with_rating`](Self::update_with_rating) with an explicit clock.
    pub fn update_with_rating_at(
        &self,
        track_id: &str,
        rating: Rating,
        is_undo: bool,
        should_count: bool,
        now: DateTime<Utc>,
    ) -> RatingOutcome {
        let Some(features) = self.catalog.features(track_id).map(|f| self.with_genres(f)) else {
            log::warn!("Could not get track features for {track_id}; rating ignored");
            return RatingOutcome::MissingFeatures;
        };

        let mut state = self.write();
        let session_reset = state.session.detect_shift(now);
        if session_reset {
            state.session.reset_session(now);
        }

        let primary_genre = TAXONOMY.primary_genre(&features.genres).map(genre_key);
        log::info!(
            "Applying {}{rating} for {track_id} (genres {:?}, primary {:?})",
            if is_undo { "undo of " } else { "" },
            features.genres,
            primary_genre
        );

        let hours = state.session.hours_since_last_rating(now);
        state.preferences.apply_time_decay(hours);

        let event = RatingEvent {
            track_id: track_id.to_string(),
            rating,
            features: features.vector,
            timestamp: now,
            session_id: state.session.session_id(),
            primary_genre: primary_genre.clone(),
            artist_id: features.artist_id.clone(),
        };

        let EngineState { preferences, session } = &mut *state;
        if is_undo {
            session.forget(track_id);
            session.retract_rating(rating);
        } else {
            session.remember(event.clone());
            session.record_rating(rating);
        }

        preferences.update_feature_means(&features.vector, rating, is_undo);
        session.update_session_mean(&features.vector, rating, is_undo);

        if let Some(genre) = &primary_genre {
            preferences.update_genre(genre, rating, is_undo);
        }
        if let Some(artist_id) = &features.artist_id {
            preferences.update_artist(artist_id, rating, is_undo);
        }

        if should_count {
            session.count(is_undo);
        }
        session.last_rating_at = Some(now);

        self.persist(&state, track_id, rating, &event, is_undo);

        RatingOutcome::Applied {
            primary_genre,
            session_reset,
        }
    }

    /// Fill in missing genre tags: the artist's genres, else a guess from the
    /// audio features.
    fn with_genres(&self, mut features: TrackFeatures) -> TrackFeatures {
        if features.genres.is_empty() {
            if let Some(artist_id) = &features.artist_id {
                let genres = self.catalog.genres_for_artist(artist_id);
                if !genres.is_empty() {
                    log::debug!("Using {} artist genres for {}", genres.len(), features.track_id);
                    features.genres = genres;
                }
            }
        }
        if features.genres.is_empty() {
            if let Some(genre) = infer_genre(&features) {
                log::debug!("Using inferred genre '{genre}' for {}", features.track_id);
                features.genres = vec![genre.to_string()];
            }
        }
        features
    }

    fn persist(&self, state: &EngineState, track_id: &str, rating: Rating, event: &RatingEvent, is_undo: bool) {
        let logged = if is_undo {
            self.store.retract_rating(track_id)
        } else {
            self.store.save_rating(track_id, rating, event)
        };
        if let Err(err) = logged {
            log::warn!("Failed to log rating for {track_id}: {err:#}");
        }
        if let Err(err) = self.store.save_state(state) {
            log::warn!("Failed to save profile snapshot: {err:#}");
        }
    }

    /// Up to `count` tracks for a playlist, artist-capped.
    pub fn generate_playlist(&self, exclude: &HashSet<String>, count: usize) -> Vec<Track> {
        let liked_genres = self.read().preferences.liked_genres();
        let pool = self
            .selector
            .gather_playlist_candidates(self.catalog.as_ref(), &liked_genres, exclude);
        if pool.is_empty() {
            log::warn!("No playlist candidates found");
            return Vec::new();
        }

        let ids: Vec<String> = pool.iter().map(|t| t.id.clone()).collect();
        let features = self.catalog.batch_features(&ids);

        let state = self.read();
        let scorer = CandidateScorer::new(&state.preferences, &state.session, &self.scoring);
        let mut rng = self.rng();
        let playlist = self.selector.select_playlist(
            &scorer,
            &pool,
            &features,
            count,
            state.session.session_ratings,
            &mut *rng,
        );
        log::info!("Generated playlist of {} tracks from {} candidates", playlist.len(), pool.len());
        playlist
    }

    /// Genre leaderboard keyed by display name.
    #[must_use]
    pub fn aggregated_genre_scores(&self) -> BTreeMap<String, GenreAggregate> {
        self.read().preferences.aggregated_genre_scores(&TAXONOMY)
    }

    /// Forget every arm, mean, counter and logged rating.
    pub fn reset_all(&self) {
        let mut state = self.write();
        state.preferences.reset();
        state.session = SessionTracker::new(Utc::now());
        if let Err(err) = self.store.clear() {
            log::warn!("Failed to clear stored profile: {err:#}");
        }
        if let Err(err) = self.store.save_state(&state) {
            log::warn!("Failed to save profile snapshot: {err:#}");
        }
        log::info!("Profile reset");
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.read().session.stats()
    }

    /// Liked tracks from the rating log, newest first.
    pub fn top_rated_tracks(&self, limit: usize) -> Vec<RatingEvent> {
        let ratings = match self.store.load_ratings() {
            Ok(ratings) => ratings,
            Err(err) => {
                log::warn!("Failed to load rating log: {err:#}");
                return Vec::new();
            }
        };
        let mut liked: Vec<RatingEvent> = ratings
            .into_values()
            .filter(|event| event.rating.is_like())
            .collect();
        liked.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        liked.truncate(limit);
        liked
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> EngineState {
        self.read().clone()
    }

    /// Wait for queued persistence writes.
    pub fn flush(&self) {
        if let Err(err) = self.store.flush() {
            log::warn!("Failed to flush persistence: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{LibraryCatalog, LibraryEntry, LibraryFile};
    use crate::db::MemoryStore;
    use crate::features::FeatureVector;
    use chrono::Duration;
    use std::collections::HashMap;

    fn entry(id: &str, artist: &str, genres: &[&str], vector: Option<FeatureVector>) -> LibraryEntry {
        LibraryEntry {
            id: id.to_string(),
            name: format!("Song {id}"),
            artist: artist.to_string(),
            artist_id: Some(format!("{artist}-id")),
            genres: genres.iter().map(|g| g.to_string()).collect(),
            year: Some(2024),
            features: vector,
            fallback: false,
            uri: String::new(),
        }
    }

    fn engine(entries: Vec<LibraryEntry>, artist_genres: HashMap<String, Vec<String>>) -> Engine {
        let catalog = LibraryCatalog::new(LibraryFile { tracks: entries, artist_genres }).with_seed(9);
        Engine::new(Arc::new(catalog), Arc::new(MemoryStore::new())).with_seed(9)
    }

    #[test]
    fn test_missing_features_learn_nothing() {
        let engine = engine(vec![entry("x", "A", &["jazz"], None)], HashMap::new());
        assert_eq!(
            engine.update_with_rating("x", Rating::Like, false, true),
            RatingOutcome::MissingFeatures
        );
        assert_eq!(engine.update_with_rating("nope", Rating::Like, false, true), RatingOutcome::MissingFeatures);
        assert_eq!(engine.stats().total_ratings, 0);
    }

    #[test]
    fn test_missing_features_leave_session_alone() {
        let engine = engine(
            vec![
                entry("a", "A", &["jazz"], Some(FeatureVector::neutral())),
                entry("x", "B", &["jazz"], None),
            ],
            HashMap::new(),
        );
        let start = Utc::now();
        engine.update_with_rating_at("a", Rating::Like, false, true, start);
        let before = engine.snapshot().session;

        let later = start + Duration::hours(5);
        for _ in 0..3 {
            assert_eq!(
                engine.update_with_rating_at("x", Rating::Like, false, true, later),
                RatingOutcome::MissingFeatures
            );
        }
        assert_eq!(engine.snapshot().session, before);

        match engine.update_with_rating_at("a", Rating::Like, false, true, later) {
            RatingOutcome::Applied { session_reset, .. } => assert!(session_reset),
            RatingOutcome::MissingFeatures => panic!("features expected"),
        }
        let session = engine.snapshot().session;
        let expected = (before.exploration_rate + 0.1).min(0.5).max(before.exploration_rate) * 0.95;
        assert!((session.exploration_rate - expected).abs() < 1e-12);
    }

    #[test]
    fn test_genre_resolution_order() {
        let speechy = FeatureVector([0.5, 0.5, 0.5, 0.5, 0.5, 0.1, 0.6, 0.1, 0.5]);
        let engine = engine(
            vec![
                entry("tagged", "A", &["Deep House"], Some(speechy)),
                entry("artist", "B", &[], Some(speechy)),
                entry("inferred", "C", &[], Some(speechy)),
            ],
            HashMap::from([("B-id".to_string(), vec!["hard techno".to_string()])]),
        );

        let genre_of = |id: &str| match engine.update_with_rating(id, Rating::Like, false, true) {
            RatingOutcome::Applied { primary_genre, .. } => primary_genre,
            RatingOutcome::MissingFeatures => panic!("features expected for {id}"),
        };
        assert_eq!(genre_of("tagged").as_deref(), Some("deep house"));
        assert_eq!(genre_of("artist").as_deref(), Some("hard techno"));
        assert_eq!(genre_of("inferred").as_deref(), Some("hip hop"));
    }

    #[test]
    fn test_undo_restores_arms_and_means() {
        let vector = FeatureVector([0.8, 0.8, 0.8, 0.8, 0.2, 0.1, 0.1, 0.1, -5.0]);
        let engine = engine(vec![entry("a", "A", &["deep house"], Some(vector))], HashMap::new());
        let now = Utc::now();

        engine.update_with_rating_at("a", Rating::Like, false, true, now);
        let before = engine.snapshot();
        engine.update_with_rating_at("a", Rating::Like, false, true, now);
        engine.update_with_rating_at("a", Rating::Like, true, true, now);
        let after = engine.snapshot();

        assert_eq!(after.preferences.genres, before.preferences.genres);
        assert_eq!(after.preferences.artists, before.preferences.artists);
        for (got, want) in after
            .preferences
            .global_mean
            .values()
            .iter()
            .zip(before.preferences.global_mean.values())
        {
            assert!((got - want).abs() < 1e-9);
        }
        assert_eq!(after.session.total_ratings, 1);
        assert!(after.session.recent.is_empty(), "undo removes the track from the recent window");
    }

    #[test]
    fn test_idle_gap_resets_session_and_decays() {
        let vector = FeatureVector::neutral();
        let engine = engine(vec![entry("a", "A", &["jazz"], Some(vector))], HashMap::new());
        let start = Utc::now();
        engine.update_with_rating_at("a", Rating::Like, false, true, start);
        assert_eq!(engine.snapshot().preferences.genres["jazz"].alpha, 4.0);

        let later = start + Duration::hours(48);
        match engine.update_with_rating_at("a", Rating::Like, false, true, later) {
            RatingOutcome::Applied { session_reset, .. } => assert!(session_reset),
            RatingOutcome::MissingFeatures => panic!("features expected"),
        }
        let state = engine.snapshot();
        let expected = 4.0 * crate::preference::decay_factor(48.0) + 3.0;
        assert!((state.preferences.genres["jazz"].alpha - expected).abs() < 1e-9);
        assert_eq!(state.session.session_ratings, 1);
        assert_eq!(state.session.total_ratings, 2);
    }

    #[test]
    fn test_should_count_false_still_learns() {
        let engine = engine(vec![entry("a", "A", &["jazz"], Some(FeatureVector::neutral()))], HashMap::new());
        engine.update_with_rating("a", Rating::Like, false, false);
        let state = engine.snapshot();
        assert_eq!(state.session.total_ratings, 0);
        assert_eq!(state.preferences.genres["jazz"].alpha, 4.0);
    }
}
