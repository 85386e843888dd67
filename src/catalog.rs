//! # Catalog Collaborator
//!
//! The engine never talks to a streaming provider directly. It consumes the
//! narrow [`Catalog`] contract below; every method degrades to `None` or an
//! empty collection on failure, so transport errors never cross into the
//! core.
//!
//! [`LibraryCatalog`] is an offline implementation backed by a JSON track
//! library, used by the command-line front end and by the tests.

use crate::features::{FeatureVector, TrackFeatures};
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// A playable candidate as returned by searches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    /// Display artist; also the key for playlist artist caps.
    pub artist: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub album_cover: Option<String>,
}

/// Data-fetching contract of the remote catalog.
///
/// Implementations are called from worker threads, never while the engine
/// state is locked, and own their request timeouts.
pub trait Catalog: Send + Sync {
    /// Features and genre tags for one track.
    fn features(&self, track_id: &str) -> Option<TrackFeatures>;

    /// Features for many tracks; missing tracks are simply absent.
    fn batch_features(&self, track_ids: &[String]) -> HashMap<String, TrackFeatures> {
        track_ids
            .par_iter()
            .filter_map(|id| self.features(id).map(|features| (id.clone(), features)))
            .collect()
    }

    /// Up to `n` tracks for unfiltered discovery.
    fn random_tracks(&self, n: usize) -> Vec<Track>;

    /// Genre tags attached to an artist.
    fn genres_for_artist(&self, artist_id: &str) -> Vec<String>;

    /// Tracks tagged with `genre`, optionally released in `year`.
    fn search_by_genre(&self, genre: &str, year: Option<u16>) -> Vec<Track>;
}

/// One track of an offline library file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub id: String,
    pub name: String,
    pub artist: String,
    #[serde(default)]
    pub artist_id: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub year: Option<u16>,
    /// Absent when the provider has no analysis for the track.
    #[serde(default)]
    pub features: Option<FeatureVector>,
    #[serde(default)]
    pub fallback: bool,
    #[serde(default)]
    pub uri: String,
}

impl LibraryEntry {
    fn track(&self) -> Track {
        Track {
            id: self.id.clone(),
            name: self.name.clone(),
            artist: self.artist.clone(),
            uri: self.uri.clone(),
            album_cover: None,
        }
    }

    fn track_features(&self) -> Option<TrackFeatures> {
        self.features.map(|vector| TrackFeatures {
            track_id: self.id.clone(),
            artist_id: self.artist_id.clone(),
            genres: self.genres.clone(),
            vector,
            fallback: self.fallback,
        })
    }
}

/// Artist-level genre tags of an offline library.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibraryFile {
    pub tracks: Vec<LibraryEntry>,
    #[serde(default)]
    pub artist_genres: HashMap<String, Vec<String>>,
}

/// Offline catalog over an in-memory track list.
#[derive(Debug)]
pub struct LibraryCatalog {
    entries: Vec<LibraryEntry>,
    by_id: HashMap<String, usize>,
    artist_genres: HashMap<String, Vec<String>>,
    rng: Mutex<StdRng>,
}

impl LibraryCatalog {
    #[must_use]
    pub fn new(library: LibraryFile) -> Self {
        let by_id = library
            .tracks
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.id.clone(), idx))
            .collect();
        Self {
            entries: library.tracks,
            by_id,
            artist_genres: library.artist_genres,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Fix the shuffle used by [`Catalog::random_tracks`].
    #[must_use]
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Load a library JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read track library {}", path.display()))?;
        let library: LibraryFile = serde_json::from_str(&content)
            .with_context(|| format!("Track library {} is not valid JSON", path.display()))?;
        log::info!("Loaded {} tracks from {}", library.tracks.len(), path.display());
        Ok(Self::new(library))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Catalog for LibraryCatalog {
    fn features(&self, track_id: &str) -> Option<TrackFeatures> {
        self.by_id
            .get(track_id)
            .and_then(|&idx| self.entries[idx].track_features())
    }

    fn random_tracks(&self, n: usize) -> Vec<Track> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        self.entries
            .choose_multiple(&mut *rng, n)
            .map(LibraryEntry::track)
            .collect()
    }

    fn genres_for_artist(&self, artist_id: &str) -> Vec<String> {
        self.artist_genres.get(artist_id).cloned().unwrap_or_default()
    }

    fn search_by_genre(&self, genre: &str, year: Option<u16>) -> Vec<Track> {
        let needle = genre.to_lowercase();
        self.entries
            .iter()
            .filter(|entry| year.map_or(true, |y| entry.year == Some(y)))
            .filter(|entry| {
                entry.genres.iter().any(|tag| {
                    let tag = tag.to_lowercase();
                    tag == needle
                        || crate::taxonomy::TAXONOMY
                            .parent_of(&tag)
                            .is_some_and(|parent| parent.eq_ignore_ascii_case(&needle))
                })
            })
            .map(LibraryEntry::track)
            .collect()
    }
}
