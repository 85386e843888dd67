//! # Recommendation Selection
//!
//! Two concerns, kept apart so the engine can run catalog I/O without
//! holding any lock:
//!
//! - **Sourcing** decides where candidates come from. The recent like rate
//!   sets the probability of a search targeted at the user's liked genres;
//!   otherwise (or when that search yields nothing) candidates come from
//!   random discovery.
//! - **Picking** scores the pool with a [`CandidateScorer`] and draws
//!   uniformly from the top 5, or from the bottom 60% of the ranking while
//!   the user keeps rejecting suggestions.
//!
//! Playlist generation pools several liked-genre and year-filtered queries
//! plus random filler, then takes a greedy artist-capped top N.

use crate::algorithm::CandidateScorer;
use crate::catalog::{Catalog, Track};
use crate::features::TrackFeatures;
use crate::preference::PreferenceModel;
use crate::session::SessionTracker;
use crate::taxonomy::TAXONOMY;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, HashSet};

/// Tunables of sourcing and picking.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorConfig {
    /// Ratings the like rate is measured over.
    pub like_rate_window: usize,
    /// Liked genres searched for a single recommendation.
    pub genre_searches: usize,
    /// Candidates gathered before queries switch to a random release year.
    pub unfiltered_until: usize,
    pub unfiltered_results: usize,
    pub filtered_results: usize,
    /// Genre search stops once this many candidates are gathered.
    pub genre_pool_limit: usize,
    pub search_years: Vec<u16>,
    /// Tracks requested from random discovery.
    pub discovery_batch: usize,
    /// Once this many ratings exist, the tracks among them are not rediscovered.
    pub recent_exclusion: usize,
    pub top_pool: usize,
    /// Share of the ranking drawn from (its low end) under sustained rejection.
    pub rejection_pool_share: f64,
    pub playlist_genres: usize,
    pub playlist_years: Vec<Option<u16>>,
    pub playlist_results: usize,
    /// Pools smaller than this get random filler.
    pub playlist_min_pool: usize,
    pub playlist_filler: usize,
    pub playlist_session_bonus: f64,
    pub playlist_session_min_ratings: u64,
    /// Slots after which a repeated artist is skipped.
    pub artist_cap_after: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            like_rate_window: 5,
            genre_searches: 4,
            unfiltered_until: 10,
            unfiltered_results: 20,
            filtered_results: 15,
            genre_pool_limit: 20,
            search_years: (2019..=2024).rev().collect(),
            discovery_batch: 12,
            recent_exclusion: 10,
            top_pool: 5,
            rejection_pool_share: 0.6,
            playlist_genres: 6,
            playlist_years: vec![None, Some(2024), Some(2023)],
            playlist_results: 50,
            playlist_min_pool: 50,
            playlist_filler: 30,
            playlist_session_bonus: 0.2,
            playlist_session_min_ratings: 5,
            artist_cap_after: 5,
        }
    }
}

/// One liked-genre search. `year` is only applied once enough unfiltered
/// candidates were gathered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenreQuery {
    pub genre: String,
    pub year: u16,
}

/// Where the next batch of candidates comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sourcing {
    LikedGenres(Vec<GenreQuery>),
    Discovery,
}

/// Everything sourcing needs from the engine state, captured under a read lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcingPlan {
    pub liked_genres: Vec<String>,
    pub genre_search_probability: f64,
    /// Tracks discovery must not offer again.
    pub recently_rated: HashSet<String>,
}

/// Probability of a liked-genre search for the recent like rate.
#[must_use]
pub fn genre_search_probability(like_rate: Option<f64>) -> f64 {
    match like_rate {
        Some(rate) if rate >= 0.8 => 0.85,
        Some(rate) if rate >= 0.6 => 0.70,
        Some(rate) if rate <= 0.2 => 0.30,
        _ => 0.5,
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecommendationSelector {
    config: SelectorConfig,
}

impl RecommendationSelector {
    #[must_use]
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    #[must_use]
    pub fn plan(&self, prefs: &PreferenceModel, session: &SessionTracker) -> SourcingPlan {
        let window = self.config.recent_exclusion;
        let recently_rated = if session.recent.len() >= window {
            session.last_events(window).map(|e| e.track_id.clone()).collect()
        } else {
            HashSet::new()
        };

        SourcingPlan {
            liked_genres: prefs.liked_genres(),
            genre_search_probability: genre_search_probability(
                session.like_rate(self.config.like_rate_window),
            ),
            recently_rated,
        }
    }

    /// Roll for the sourcing strategy. Search years are drawn up front so the
    /// catalog queries need no random source.
    pub fn choose_sourcing<R: Rng + ?Sized>(&self, plan: &SourcingPlan, rng: &mut R) -> Sourcing {
        if plan.liked_genres.is_empty() || rng.gen::<f64>() >= plan.genre_search_probability {
            return Sourcing::Discovery;
        }

        let queries = plan
            .liked_genres
            .iter()
            .take(self.config.genre_searches)
            .map(|genre| GenreQuery {
                genre: genre.clone(),
                year: self.config.search_years.choose(rng).copied().unwrap_or(2024),
            })
            .collect();
        Sourcing::LikedGenres(queries)
    }

    /// Run liked-genre queries, searching by parent category where one resolves.
    pub fn search_liked_genres(
        &self,
        catalog: &dyn Catalog,
        queries: &[GenreQuery],
        exclude: &HashSet<String>,
    ) -> Vec<Track> {
        let mut gathered = Vec::new();
        let mut seen = HashSet::new();

        for query in queries {
            let search_genre = TAXONOMY.parent_of(&query.genre).unwrap_or(query.genre.as_str());
            let (year, limit) = if gathered.len() < self.config.unfiltered_until {
                (None, self.config.unfiltered_results)
            } else {
                (Some(query.year), self.config.filtered_results)
            };

            let results = catalog.search_by_genre(search_genre, year);
            log::debug!("Genre search '{search_genre}' ({year:?}) returned {} tracks", results.len());

            for track in results.into_iter().take(limit) {
                if track.id.is_empty() || exclude.contains(&track.id) || !seen.insert(track.id.clone()) {
                    continue;
                }
                gathered.push(track);
                if gathered.len() >= self.config.genre_pool_limit {
                    return gathered;
                }
            }
        }
        gathered
    }

    /// Unfiltered discovery minus excluded and recently rated tracks.
    pub fn discover(&self, catalog: &dyn Catalog, plan: &SourcingPlan, exclude: &HashSet<String>) -> Vec<Track> {
        let candidates: Vec<Track> = catalog
            .random_tracks(self.config.discovery_batch)
            .into_iter()
            .filter(|track| {
                !track.id.is_empty()
                    && !exclude.contains(&track.id)
                    && !plan.recently_rated.contains(&track.id)
            })
            .collect();
        if candidates.is_empty() {
            log::warn!("Random discovery produced no usable candidates");
        }
        candidates
    }

    /// Score every candidate that has features, best first.
    pub fn rank<R: Rng + ?Sized>(
        &self,
        scorer: &CandidateScorer<'_>,
        candidates: &[Track],
        features: &HashMap<String, TrackFeatures>,
        exclude: &HashSet<String>,
        rng: &mut R,
    ) -> Vec<(Track, f64)> {
        let mut scored: Vec<(Track, f64)> = candidates
            .iter()
            .filter(|track| !exclude.contains(&track.id))
            .filter_map(|track| {
                features
                    .get(&track.id)
                    .map(|f| (track.clone(), scorer.score(Some(f), rng)))
            })
            .collect();
        scored.sort_by(|(_, a), (_, b)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    /// Pick one candidate.
    ///
    /// When no candidate has features the first candidate is returned
    /// unscored.
    pub fn pick<R: Rng + ?Sized>(
        &self,
        ranked: &[(Track, f64)],
        candidates: &[Track],
        under_rejection: bool,
        rng: &mut R,
    ) -> Option<Track> {
        if ranked.is_empty() {
            log::debug!("No candidate has features; returning the first one unscored");
            return candidates.first().cloned();
        }

        let pool = if under_rejection {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
            let size = ((ranked.len() as f64 * self.config.rejection_pool_share) as usize).max(1);
            &ranked[ranked.len() - size..]
        } else {
            &ranked[..self.config.top_pool.min(ranked.len())]
        };

        pool.choose(rng).map(|(track, score)| {
            log::debug!(
                "Picked '{}' by {} (score {score:.3}, pool {}{})",
                track.name,
                track.artist,
                pool.len(),
                if under_rejection { ", exploring" } else { "" }
            );
            track.clone()
        })
    }

    /// Pool candidates for a playlist: every liked genre under each year
    /// filter, topped up with random tracks when the pool is thin.
    pub fn gather_playlist_candidates(
        &self,
        catalog: &dyn Catalog,
        liked_genres: &[String],
        exclude: &HashSet<String>,
    ) -> Vec<Track> {
        let mut seen: HashSet<String> = exclude.clone();
        let mut pool = Vec::new();

        for genre in liked_genres.iter().take(self.config.playlist_genres) {
            let search_genre = TAXONOMY.parent_of(genre).unwrap_or(genre.as_str());
            for &year in &self.config.playlist_years {
                for track in catalog
                    .search_by_genre(search_genre, year)
                    .into_iter()
                    .take(self.config.playlist_results)
                {
                    if !track.id.is_empty() && seen.insert(track.id.clone()) {
                        pool.push(track);
                    }
                }
            }
        }

        if pool.len() < self.config.playlist_min_pool {
            for track in catalog.random_tracks(self.config.playlist_filler) {
                if !track.id.is_empty() && seen.insert(track.id.clone()) {
                    pool.push(track);
                }
            }
        }

        log::debug!("Playlist pool holds {} candidates", pool.len());
        pool
    }

    /// Greedy artist-capped top N. Tracks without features are skipped.
    ///
    /// Once [`artist_cap_after`](SelectorConfig::artist_cap_after) tracks are
    /// in, an artist already present is passed over.
    pub fn select_playlist<R: Rng + ?Sized>(
        &self,
        scorer: &CandidateScorer<'_>,
        candidates: &[Track],
        features: &HashMap<String, TrackFeatures>,
        count: usize,
        session_ratings: u64,
        rng: &mut R,
    ) -> Vec<Track> {
        let use_session = session_ratings >= self.config.playlist_session_min_ratings;

        let mut scored: Vec<(&Track, f64)> = candidates
            .iter()
            .filter_map(|track| {
                let f = features.get(&track.id)?;
                let mut score = scorer.score(Some(f), rng);
                if use_session && !f.fallback {
                    score += scorer.session_similarity(&f.vector) * self.config.playlist_session_bonus;
                }
                Some((track, score))
            })
            .collect();
        scored.sort_by(|(_, a), (_, b)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

        let mut selected: Vec<Track> = Vec::with_capacity(count);
        let mut artists: HashSet<&str> = HashSet::new();
        for (track, _) in scored {
            if selected.len() >= count {
                break;
            }
            if artists.contains(track.artist.as_str()) && selected.len() >= self.config.artist_cap_after {
                continue;
            }
            artists.insert(&track.artist);
            selected.push(track.clone());
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::ScoringContext;
    use crate::catalog::{LibraryCatalog, LibraryEntry, LibraryFile};
    use crate::features::FeatureVector;
    use crate::rating::{Rating, RatingEvent};
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn track(id: &str, artist: &str) -> Track {
        Track {
            id: id.to_string(),
            name: format!("Song {id}"),
            artist: artist.to_string(),
            uri: String::new(),
            album_cover: None,
        }
    }

    fn features_for(tracks: &[Track]) -> HashMap<String, TrackFeatures> {
        tracks
            .iter()
            .map(|t| (t.id.clone(), TrackFeatures::new(t.id.clone(), FeatureVector::neutral())))
            .collect()
    }

    fn library(entries: &[(&str, &str, &str, Option<u16>)]) -> LibraryCatalog {
        LibraryCatalog::new(LibraryFile {
            tracks: entries
                .iter()
                .map(|(id, artist, genre, year)| LibraryEntry {
                    id: (*id).to_string(),
                    name: format!("Song {id}"),
                    artist: (*artist).to_string(),
                    artist_id: None,
                    genres: vec![(*genre).to_string()],
                    year: *year,
                    features: Some(FeatureVector::neutral()),
                    fallback: false,
                    uri: String::new(),
                })
                .collect(),
            artist_genres: HashMap::new(),
        })
        .with_seed(1)
    }

    #[test]
    fn test_genre_search_probability_bands() {
        assert_eq!(genre_search_probability(None), 0.5);
        assert_eq!(genre_search_probability(Some(1.0)), 0.85);
        assert_eq!(genre_search_probability(Some(0.8)), 0.85);
        assert_eq!(genre_search_probability(Some(0.6)), 0.70);
        assert_eq!(genre_search_probability(Some(0.4)), 0.5);
        assert_eq!(genre_search_probability(Some(0.2)), 0.30);
        assert_eq!(genre_search_probability(Some(0.0)), 0.30);
    }

    #[test]
    fn test_no_liked_genres_means_discovery() {
        let selector = RecommendationSelector::default();
        let plan = SourcingPlan { genre_search_probability: 1.0, ..SourcingPlan::default() };
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(selector.choose_sourcing(&plan, &mut rng), Sourcing::Discovery);

        let plan = SourcingPlan {
            liked_genres: (0..6).map(|i| format!("g{i}")).collect(),
            genre_search_probability: 1.0,
            ..SourcingPlan::default()
        };
        match selector.choose_sourcing(&plan, &mut rng) {
            Sourcing::LikedGenres(queries) => {
                assert_eq!(queries.len(), 4);
                assert!(queries.iter().all(|q| (2019..=2024).contains(&q.year)));
            }
            Sourcing::Discovery => panic!("expected a liked-genre search"),
        }
    }

    #[test]
    fn test_search_liked_genres_dedupes_and_excludes() {
        let catalog = library(&[
            ("1", "A", "deep house", Some(2024)),
            ("2", "B", "tech house", Some(2020)),
            ("3", "C", "jazz", None),
        ]);
        let selector = RecommendationSelector::default();
        let queries = vec![
            GenreQuery { genre: "deep house".to_string(), year: 2024 },
            GenreQuery { genre: "tech house".to_string(), year: 2024 },
        ];
        let exclude = HashSet::from(["2".to_string()]);
        let found = selector.search_liked_genres(&catalog, &queries, &exclude);
        let ids: Vec<&str> = found.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["1"]);
    }

    #[test]
    fn test_discovery_skips_recently_rated() {
        let catalog = library(&[("1", "A", "jazz", None), ("2", "B", "jazz", None), ("3", "C", "jazz", None)]);
        let selector = RecommendationSelector::default();
        let plan = SourcingPlan {
            recently_rated: HashSet::from(["1".to_string()]),
            ..SourcingPlan::default()
        };
        let exclude = HashSet::from(["2".to_string()]);
        let found = selector.discover(&catalog, &plan, &exclude);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "3");
    }

    #[test]
    fn test_plan_excludes_recent_only_after_ten_ratings() {
        let selector = RecommendationSelector::default();
        let prefs = PreferenceModel::new();
        let mut session = SessionTracker::new(Utc::now());
        let remember = |session: &mut SessionTracker, i: usize| {
            session.remember(RatingEvent {
                track_id: format!("t{i}"),
                rating: Rating::Like,
                features: FeatureVector::neutral(),
                timestamp: Utc::now(),
                session_id: String::new(),
                primary_genre: None,
                artist_id: None,
            });
        };
        for i in 0..9 {
            remember(&mut session, i);
        }
        let plan = selector.plan(&prefs, &session);
        assert!(plan.recently_rated.is_empty());
        assert_eq!(plan.genre_search_probability, 0.85);

        remember(&mut session, 9);
        assert_eq!(selector.plan(&prefs, &session).recently_rated.len(), 10);
    }

    #[test]
    fn test_pick_pools() {
        let selector = RecommendationSelector::default();
        let mut rng = StdRng::seed_from_u64(11);
        let ranked: Vec<(Track, f64)> = (0..10)
            .map(|i| (track(&format!("t{i}"), "A"), 1.0 - f64::from(i) * 0.05))
            .collect();
        let candidates: Vec<Track> = ranked.iter().map(|(t, _)| t.clone()).collect();

        for _ in 0..50 {
            let picked = selector.pick(&ranked, &candidates, false, &mut rng).map(|t| t.id);
            let idx: usize = picked.as_deref().and_then(|id| id[1..].parse().ok()).unwrap_or(99);
            assert!(idx < 5, "normal pick outside top 5: {idx}");

            let picked = selector.pick(&ranked, &candidates, true, &mut rng).map(|t| t.id);
            let idx: usize = picked.as_deref().and_then(|id| id[1..].parse().ok()).unwrap_or(0);
            assert!(idx >= 4, "rejection pick outside bottom 60%: {idx}");
        }
    }

    #[test]
    fn test_pick_without_features_returns_first_candidate() {
        let selector = RecommendationSelector::default();
        let mut rng = StdRng::seed_from_u64(0);
        let candidates = vec![track("first", "A"), track("second", "B")];
        let picked = selector.pick(&[], &candidates, false, &mut rng);
        assert_eq!(picked.map(|t| t.id), Some("first".to_string()));
        assert_eq!(selector.pick(&[], &[], false, &mut rng), None);
    }

    #[test]
    fn test_playlist_caps_repeated_artists() {
        let selector = RecommendationSelector::default();
        let prefs = PreferenceModel::new();
        let session = SessionTracker::new(Utc::now());
        let context = ScoringContext::default();
        let scorer = CandidateScorer::new(&prefs, &session, &context);
        let mut rng = StdRng::seed_from_u64(5);

        // 20 tracks by one artist, 10 by distinct artists.
        let mut candidates: Vec<Track> = (0..20).map(|i| track(&format!("dup{i}"), "Same")).collect();
        candidates.extend((0..10).map(|i| track(&format!("solo{i}"), &format!("Artist {i}"))));
        let features = features_for(&candidates);

        let playlist = selector.select_playlist(&scorer, &candidates, &features, 25, 0, &mut rng);
        assert!(playlist.len() <= 25);
        let same = playlist.iter().filter(|t| t.artist == "Same").count();
        assert!(same <= 5, "{same} tracks by one artist");
        assert_eq!(playlist.len(), same + 10);

        let unique: HashSet<&str> = playlist.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(unique.len(), playlist.len());
        assert!(selector.select_playlist(&scorer, &candidates, &features, 0, 0, &mut rng).is_empty());
    }

    #[test]
    fn test_playlist_pool_adds_filler() {
        let catalog = library(&[
            ("1", "A", "deep house", Some(2024)),
            ("2", "B", "jazz", None),
            ("3", "C", "metal", None),
        ]);
        let selector = RecommendationSelector::default();
        let pool = selector.gather_playlist_candidates(&catalog, &["deep house".to_string()], &HashSet::new());
        assert_eq!(pool.len(), 3);
        assert_eq!(pool[0].id, "1");
    }
}
