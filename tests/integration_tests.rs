//! # Integration Tests for Attune
//!
//! End-to-end behavior of the learning engine from a user's perspective:
//! rating flows, recommendation and playlist output, persistence across
//! restarts, and the command-line binary.

use anyhow::Result;
use attune::algorithm::ScoringContext;
use attune::catalog::{LibraryCatalog, LibraryEntry, LibraryFile};
use attune::db::{MemoryStore, SqliteStore, StateStore};
use attune::engine::{Engine, RatingOutcome};
use attune::features::FeatureVector;
use attune::rating::Rating;
use attune::selector::SelectorConfig;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn entry(id: &str, artist: &str, genres: &[&str], vector: FeatureVector) -> LibraryEntry {
    LibraryEntry {
        id: id.to_string(),
        name: format!("Song {id}"),
        artist: artist.to_string(),
        artist_id: Some(format!("{artist}-id")),
        genres: genres.iter().map(|g| g.to_string()).collect(),
        year: Some(2024),
        features: Some(vector),
        fallback: false,
        uri: format!("library:{id}"),
    }
}

fn vector(seed: usize) -> FeatureVector {
    #[allow(clippy::cast_precision_loss)]
    let step = (seed % 7) as f64 * 0.05;
    FeatureVector([0.6 + step, 0.7 - step, 0.5 + step, 0.5, 0.2, 0.3 + step, 0.05, 0.1, 0.6])
}

/// Small library: house, techno and jazz tracks.
fn sample_library() -> LibraryFile {
    LibraryFile {
        tracks: vec![
            entry("a", "Artist A", &["deep house"], vector(0)),
            entry("a2", "Artist A", &["deep house"], vector(1)),
            entry("a3", "Artist C", &["deep house"], vector(2)),
            entry("h", "Artist H", &["tech house"], vector(3)),
            entry("b", "Artist B", &["hard techno"], vector(4)),
            entry("j", "Artist J", &["jazz"], vector(5)),
        ],
        artist_genres: HashMap::new(),
    }
}

/// `artists` artists with two deep house tracks each.
fn house_library(artists: usize) -> LibraryFile {
    let tracks = (0..artists * 2)
        .map(|i| entry(&format!("t{i}"), &format!("Artist {}", i / 2), &["deep house"], vector(i)))
        .collect();
    LibraryFile {
        tracks,
        artist_genres: HashMap::new(),
    }
}

fn memory_engine(library: LibraryFile) -> Engine {
    let catalog = LibraryCatalog::new(library).with_seed(17);
    Engine::new(Arc::new(catalog), Arc::new(MemoryStore::new())).with_seed(17)
}

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-03-01T20:00:00Z")
        .map(|t| t.with_timezone(&Utc))
        .expect("valid timestamp")
}

/// Test helper to create a temporary profile database path
fn create_test_database() -> Result<(TempDir, PathBuf)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("profile.db");
    Ok((temp_dir, db_path))
}

#[cfg(test)]
mod learning_tests {
    use super::*;

    #[test]
    fn test_first_like_updates_arms_and_means() {
        let engine = memory_engine(sample_library());
        let outcome = engine.update_with_rating_at("a", Rating::Like, false, true, t0());
        assert_eq!(
            outcome,
            RatingOutcome::Applied {
                primary_genre: Some("deep house".to_string()),
                session_reset: false,
            }
        );

        let state = engine.snapshot();
        let arm = &state.preferences.genres["deep house"];
        assert_eq!((arm.alpha, arm.beta), (4.0, 1.0));
        assert_eq!(arm.history.len(), 1);

        let artist = &state.preferences.artists["Artist A-id"];
        assert!((artist.alpha - 1.9).abs() < 1e-12);
        assert_eq!(artist.beta, 1.0);

        let target = vector(0);
        for (mean, value) in state.preferences.global_mean.values().iter().zip(target.values()) {
            let expected = 0.5 + 0.05 * (value - 0.5);
            assert!((mean - expected).abs() < 1e-12);
        }
        assert_eq!(state.session.total_ratings, 1);
        assert_eq!(state.session.session_ratings, 1);
    }

    #[test]
    fn test_dislike_after_like() {
        let engine = memory_engine(sample_library());
        engine.update_with_rating_at("a", Rating::Like, false, true, t0());
        let after_like = engine.snapshot();

        engine.update_with_rating_at("b", Rating::Dislike, false, true, t0() + Duration::minutes(1));
        let state = engine.snapshot();

        let techno = &state.preferences.genres["hard techno"];
        assert_eq!((techno.alpha, techno.beta), (1.0, 2.5));
        assert_eq!(state.session.consecutive_dislikes, 1);

        // A minute of decay barely touches the earlier arm
        let house = &state.preferences.genres["deep house"];
        assert!(house.alpha < 4.0);
        assert!((house.alpha - 4.0).abs() < 0.01);

        // Dislikes push the recent mean away from the track
        let disliked = vector(4);
        let before = after_like.preferences.recent_mean.distance(&disliked);
        let after = state.preferences.recent_mean.distance(&disliked);
        assert!(after > before);
    }

    #[test]
    fn test_liked_genres_need_repeated_evidence() {
        let engine = memory_engine(sample_library());
        for id in ["a", "a2", "a3", "j"] {
            engine.update_with_rating_at(id, Rating::Like, false, true, t0());
        }
        let liked = engine.snapshot().preferences.liked_genres();
        assert_eq!(liked, vec!["deep house".to_string()]);
    }

    #[test]
    fn test_leaderboard_folds_subgenres() {
        let engine = memory_engine(sample_library());
        engine.update_with_rating_at("a", Rating::Like, false, true, t0());
        engine.update_with_rating_at("h", Rating::Like, false, true, t0());
        engine.update_with_rating_at("j", Rating::Dislike, false, true, t0());

        let scores = engine.aggregated_genre_scores();
        let house = &scores["House"];
        assert_eq!(house.alpha, 8.0);
        assert_eq!(house.beta, 2.0);
        assert_eq!(house.subgenres.len(), 2);
        assert_eq!(house.total_interactions, 2);
        assert!(scores.contains_key("Jazz"));
        assert!(house.posterior_mean() > scores["Jazz"].posterior_mean());
    }

    #[test]
    fn test_like_then_undo_round_trip() {
        let engine = memory_engine(sample_library());
        engine.update_with_rating_at("b", Rating::Dislike, false, true, t0());
        let before = engine.snapshot();

        engine.update_with_rating_at("a", Rating::Like, false, true, t0());
        engine.update_with_rating_at("a", Rating::Like, true, true, t0());
        let after = engine.snapshot();

        let arm = &after.preferences.genres["deep house"];
        assert_eq!((arm.alpha, arm.beta), (1.0, 1.0));
        assert!(arm.history.is_empty());
        assert_eq!(after.preferences.genres["hard techno"], before.preferences.genres["hard techno"]);
        assert_eq!(after.session.total_ratings, before.session.total_ratings);
        for (got, want) in after
            .preferences
            .global_mean
            .values()
            .iter()
            .zip(before.preferences.global_mean.values())
        {
            assert!((got - want).abs() < 1e-9);
        }
        assert!(after.session.recent.iter().all(|e| e.track_id != "a"));
    }

    #[test]
    fn test_undo_on_full_genre_history() {
        let engine = memory_engine(sample_library());
        engine.update_with_rating_at("j", Rating::Dislike, false, true, t0());
        for _ in 1..attune::bandit::HISTORY_CAPACITY {
            engine.update_with_rating_at("j", Rating::Like, false, true, t0());
        }
        let before = engine.snapshot().preferences.genres["jazz"].clone();
        assert_eq!(before.history.front(), Some(&0.0));

        engine.update_with_rating_at("j", Rating::Like, false, true, t0());
        engine.update_with_rating_at("j", Rating::Like, true, true, t0());
        let after = engine.snapshot().preferences.genres["jazz"].clone();
        assert_eq!(after, before);
    }

    #[test]
    fn test_uncounted_rating_still_learns() {
        let engine = memory_engine(sample_library());
        engine.update_with_rating_at("a", Rating::Like, false, false, t0());
        let state = engine.snapshot();
        assert_eq!(state.session.total_ratings, 0);
        assert_eq!(state.preferences.genres["deep house"].alpha, 4.0);
    }

    #[test]
    fn test_missing_track_is_ignored() {
        let engine = memory_engine(sample_library());
        let outcome = engine.update_with_rating_at("unknown", Rating::Like, false, true, t0());
        assert_eq!(outcome, RatingOutcome::MissingFeatures);
        assert!(engine.snapshot().preferences.genres.is_empty());
    }
}

#[cfg(test)]
mod session_tests {
    use super::*;

    #[test]
    fn test_dislike_streak_raises_exploration_and_shifts_session() {
        let engine = memory_engine(house_library(5));
        let mut at = t0();
        for i in 0..5 {
            let outcome = engine.update_with_rating_at(&format!("t{i}"), Rating::Dislike, false, true, at);
            assert!(matches!(outcome, RatingOutcome::Applied { session_reset: false, .. }));
            at += Duration::seconds(30);
        }

        let stats = engine.stats();
        assert_eq!(stats.consecutive_dislikes, 5);
        assert!((stats.exploration_rate - 0.7).abs() < 1e-12);
        assert_eq!(stats.mode.to_string(), "Exploring");

        let outcome = engine.update_with_rating_at("t5", Rating::Like, false, true, at);
        assert!(matches!(outcome, RatingOutcome::Applied { session_reset: true, .. }));

        let stats = engine.stats();
        assert_eq!(stats.consecutive_dislikes, 0);
        assert_eq!(stats.session_ratings, 1);
        assert_eq!(stats.total_ratings, 6);
        assert!((stats.exploration_rate - 0.7 * 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_exploration_stays_in_bounds() {
        let engine = memory_engine(house_library(20));
        let at = t0();
        for i in 0..40 {
            engine.update_with_rating_at(&format!("t{i}"), Rating::Like, false, true, at);
            let rate = engine.stats().exploration_rate;
            assert!((0.15..=0.7).contains(&rate));
        }
        assert!((engine.stats().exploration_rate - 0.15).abs() < 1e-12);
        assert_eq!(engine.stats().mode.to_string(), "Dialed In");
    }

    #[test]
    fn test_idle_gap_starts_new_session() {
        let engine = memory_engine(sample_library());
        engine.update_with_rating_at("a", Rating::Like, false, true, t0());
        engine.update_with_rating_at("a2", Rating::Like, false, true, t0());
        let outcome = engine.update_with_rating_at("a3", Rating::Like, false, true, t0() + Duration::hours(3));
        assert!(matches!(outcome, RatingOutcome::Applied { session_reset: true, .. }));

        let stats = engine.stats();
        assert_eq!(stats.session_ratings, 1);
        assert_eq!(stats.total_ratings, 3);
    }
}

#[cfg(test)]
mod recommendation_tests {
    use super::*;

    #[test]
    fn test_recommend_respects_exclusions() {
        let engine = memory_engine(sample_library());
        let exclude: HashSet<String> = ["a", "a2", "a3", "h", "b"].iter().map(|s| s.to_string()).collect();
        for _ in 0..10 {
            let track = engine.recommend(&exclude).expect("one candidate left");
            assert_eq!(track.id, "j");
        }
    }

    #[test]
    fn test_recommend_from_empty_catalog() {
        let engine = memory_engine(LibraryFile::default());
        assert!(engine.recommend(&HashSet::new()).is_none());
        assert!(engine.generate_playlist(&HashSet::new(), 25).is_empty());
    }

    #[test]
    fn test_recommend_after_learning() {
        let engine = memory_engine(house_library(15));
        for i in 0..6 {
            engine.update_with_rating_at(&format!("t{i}"), Rating::Like, false, true, t0());
        }
        let exclude: HashSet<String> = (0..6).map(|i| format!("t{i}")).collect();
        for _ in 0..20 {
            let track = engine.recommend(&exclude).expect("library is not exhausted");
            assert!(!exclude.contains(&track.id));
        }
    }

    #[test]
    fn test_seeded_engines_agree() {
        let build = || {
            memory_engine(house_library(15))
                .with_scoring(ScoringContext {
                    jitter: 0.0,
                    ..ScoringContext::default()
                })
                .with_selector(SelectorConfig {
                    top_pool: 1,
                    ..SelectorConfig::default()
                })
        };
        let (first, second) = (build(), build());
        for i in 0..4 {
            let id = format!("t{i}");
            first.update_with_rating_at(&id, Rating::Like, false, true, t0());
            second.update_with_rating_at(&id, Rating::Like, false, true, t0());
        }

        let exclude = HashSet::new();
        for _ in 0..5 {
            assert_eq!(first.recommend(&exclude), second.recommend(&exclude));
        }
        assert_eq!(first.generate_playlist(&exclude, 10), second.generate_playlist(&exclude, 10));
    }

    #[test]
    fn test_playlist_count_and_artist_cap() {
        let engine = memory_engine(house_library(30));
        for i in 0..3 {
            engine.update_with_rating_at(&format!("t{i}"), Rating::Like, false, true, t0());
        }

        let playlist = engine.generate_playlist(&HashSet::new(), 25);
        assert_eq!(playlist.len(), 25);

        let ids: HashSet<&str> = playlist.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids.len(), playlist.len(), "no duplicate tracks");

        for (i, track) in playlist.iter().enumerate().skip(5) {
            assert!(
                playlist[..i].iter().all(|earlier| earlier.artist != track.artist),
                "{} repeated after the first five slots",
                track.artist
            );
        }
    }

    #[test]
    fn test_playlist_excludes_tracks() {
        let engine = memory_engine(house_library(10));
        for i in 0..3 {
            engine.update_with_rating_at(&format!("t{i}"), Rating::Like, false, true, t0());
        }
        let exclude: HashSet<String> = (0..10).map(|i| format!("t{i}")).collect();
        let playlist = engine.generate_playlist(&exclude, 25);
        assert!(!playlist.is_empty());
        assert!(playlist.len() <= 25);
        assert!(playlist.iter().all(|t| !exclude.contains(&t.id)));
    }

    #[test]
    fn test_concurrent_ratings_and_recommendations() {
        let engine = Arc::new(memory_engine(house_library(20)));
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        let id = format!("t{}", worker * 10 + i);
                        engine.update_with_rating(&id, Rating::Like, false, true);
                        let _ = engine.recommend(&HashSet::new());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked");
        }

        let state = engine.snapshot();
        assert_eq!(state.session.total_ratings, 40);
        assert_eq!(state.preferences.genres["deep house"].history.len(), 40);
    }
}

#[cfg(test)]
mod persistence_tests {
    use super::*;
    use attune::config::PersistenceMode;
    use attune::db::open_store;

    fn sqlite_engine(db_path: &std::path::Path, mode: PersistenceMode) -> Result<Engine> {
        let catalog = LibraryCatalog::new(sample_library()).with_seed(3);
        Ok(Engine::new(Arc::new(catalog), open_store(db_path, mode)?).with_seed(3))
    }

    #[test]
    fn test_profile_survives_restart() -> Result<()> {
        let (_temp_dir, db_path) = create_test_database()?;

        {
            let engine = sqlite_engine(&db_path, PersistenceMode::Immediate)?;
            engine.update_with_rating_at("a", Rating::Like, false, true, t0());
            engine.update_with_rating_at("b", Rating::Dislike, false, true, t0());
        }

        let engine = sqlite_engine(&db_path, PersistenceMode::Immediate)?;
        let state = engine.snapshot();
        assert_eq!(state.preferences.genres["deep house"].alpha, 4.0);
        assert_eq!(state.preferences.genres["hard techno"].beta, 2.5);
        assert_eq!(state.session.total_ratings, 2);
        assert_eq!(state.session.last_rating_at, Some(t0()));
        Ok(())
    }

    #[test]
    fn test_background_writes_land_after_flush() -> Result<()> {
        let (_temp_dir, db_path) = create_test_database()?;

        let engine = sqlite_engine(&db_path, PersistenceMode::Background)?;
        engine.update_with_rating_at("a", Rating::Like, false, true, t0());
        engine.flush();

        let store = SqliteStore::open(&db_path)?;
        let state = store.load_state()?.expect("snapshot written");
        assert_eq!(state.preferences.genres["deep house"].alpha, 4.0);
        assert!(store.load_ratings()?.contains_key("a"));
        Ok(())
    }

    #[test]
    fn test_corrupt_snapshot_is_quarantined() -> Result<()> {
        let (_temp_dir, db_path) = create_test_database()?;
        let store = Arc::new(SqliteStore::open(&db_path)?);
        store.write_raw_snapshot("{\"preferences\": [broken")?;

        let catalog = LibraryCatalog::new(sample_library());
        let engine = Engine::new(Arc::new(catalog), store.clone());
        assert_eq!(engine.stats().total_ratings, 0);
        assert_eq!(store.backup_count()?, 1);

        engine.update_with_rating_at("a", Rating::Like, false, true, t0());
        assert!(store.load_state()?.is_some());
        Ok(())
    }

    #[test]
    fn test_undo_removes_logged_rating() -> Result<()> {
        let (_temp_dir, db_path) = create_test_database()?;
        let engine = sqlite_engine(&db_path, PersistenceMode::Immediate)?;

        engine.update_with_rating_at("a", Rating::Like, false, true, t0());
        engine.update_with_rating_at("h", Rating::Like, false, true, t0() + Duration::seconds(5));
        engine.update_with_rating_at("b", Rating::Dislike, false, true, t0() + Duration::seconds(10));
        let top: Vec<String> = engine.top_rated_tracks(50).into_iter().map(|e| e.track_id).collect();
        assert_eq!(top, vec!["h".to_string(), "a".to_string()]);

        engine.update_with_rating_at("h", Rating::Like, true, true, t0() + Duration::seconds(15));
        let top: Vec<String> = engine.top_rated_tracks(50).into_iter().map(|e| e.track_id).collect();
        assert_eq!(top, vec!["a".to_string()]);
        Ok(())
    }

    #[test]
    fn test_reset_all_clears_everything() -> Result<()> {
        let (_temp_dir, db_path) = create_test_database()?;
        {
            let engine = sqlite_engine(&db_path, PersistenceMode::Immediate)?;
            engine.update_with_rating_at("a", Rating::Like, false, true, t0());
            engine.reset_all();
            assert!(engine.snapshot().preferences.genres.is_empty());
            assert!(engine.top_rated_tracks(50).is_empty());
        }

        let engine = sqlite_engine(&db_path, PersistenceMode::Immediate)?;
        assert_eq!(engine.stats().total_ratings, 0);
        assert!(engine.aggregated_genre_scores().is_empty());
        Ok(())
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use std::process::Command;

    fn attune(db_path: &std::path::Path, catalog: &std::path::Path, args: &[&str]) -> std::process::Output {
        Command::new(env!("CARGO_BIN_EXE_attune"))
            .arg("--db")
            .arg(db_path)
            .arg("--catalog")
            .arg(catalog)
            .arg("--seed")
            .arg("5")
            .args(args)
            .env_remove("ATTUNE_DB")
            .env_remove("ATTUNE_CATALOG")
            .output()
            .expect("Failed to run attune")
    }

    #[test]
    fn test_cli_help_displays_correctly() {
        let output = Command::new(env!("CARGO_BIN_EXE_attune"))
            .arg("--help")
            .output()
            .expect("Failed to run help command");
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("attune"));
        assert!(stdout.contains("recommend"));
        assert!(stdout.contains("playlist"));
    }

    #[test]
    fn test_rate_then_stats() -> Result<()> {
        let (temp_dir, db_path) = create_test_database()?;
        let catalog = temp_dir.path().join("library.json");
        std::fs::write(&catalog, serde_json::to_string(&sample_library())?)?;

        let output = attune(&db_path, &catalog, &["rate", "a", "like"]);
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        assert!(String::from_utf8_lossy(&output.stdout).contains("deep house"));

        let output = attune(&db_path, &catalog, &["stats"]);
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("Total ratings:        1"));

        let output = attune(&db_path, &catalog, &["rate", "missing", "like"]);
        assert!(!output.status.success());
        Ok(())
    }

    #[test]
    fn test_completion_generation() {
        let output = Command::new(env!("CARGO_BIN_EXE_attune"))
            .args(["completion", "bash"])
            .output()
            .expect("Failed to run completion command");
        assert!(output.status.success());
        assert!(String::from_utf8_lossy(&output.stdout).contains("attune"));
    }
}
