//! Adaptive music recommendations that learn from explicit likes and dislikes.
//!
//! Core modules:
//! - [`engine`] - The shared learning engine (ratings in, tracks out)
//! - [`preference`] - Long-term genre/artist bandits and feature means
//! - [`session`] - Short-term session state and the exploration controller
//! - [`algorithm`] - Candidate scoring
//! - [`selector`] - Candidate sourcing, ranking and playlist assembly
//! - [`taxonomy`] - Genre hierarchy
//!
//! ### Supporting Modules
//!
//! - [`bandit`] - Beta-distributed arms with bounded history
//! - [`features`] - Audio feature vectors and per-track metadata
//! - [`rating`] - Like/dislike values and rating events
//! - [`catalog`] - Track catalog contract and the offline JSON library
//! - [`db`] - Profile persistence (SQLite, in-memory, background writer)
//! - [`config`] - Data directory and runtime settings
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use attune::catalog::LibraryCatalog;
//! use attune::db::SqliteStore;
//! use attune::engine::Engine;
//! use attune::rating::Rating;
//! use std::collections::HashSet;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let catalog = Arc::new(LibraryCatalog::load(Path::new("library.json"))?);
//! let store = Arc::new(SqliteStore::open(&attune::config::get_db_path()?)?);
//! let engine = Engine::new(catalog, store);
//!
//! engine.update_with_rating("4uLU6hMCjMI75M1A2tKUQC", Rating::Like, false, true);
//!
//! if let Some(track) = engine.recommend(&HashSet::new()) {
//!     println!("Up next: {} by {}", track.name, track.artist);
//! }
//! let playlist = engine.generate_playlist(&HashSet::new(), 25);
//! println!("Playlist of {} tracks", playlist.len());
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## How learning works
//!
//! Every genre and artist gets a Beta(α, β) arm. A like adds to α and a
//! dislike adds to β, scaled by a learning rate that is larger for genres
//! than for artists. Arms decay toward the prior when time passes between
//! ratings, so stale taste fades instead of dominating forever.
//!
//! Candidates are scored as a weighted blend of:
//! - feature similarity to the global, recent and session means
//! - Thompson samples from the genre and artist arms
//! - an exploration bonus scaled by the session's exploration rate
//! - novelty and genre-diversity bonuses, and a mood bonus
//!
//! Two dislikes in a row put the session "under rejection": exploration goes
//! up and the next pick comes from the lower part of the ranking, steering
//! away from what was just rejected.
//!
//! ## Error Handling
//!
//! Fallible setup (opening the store, loading the library) returns
//! `anyhow::Result`. Learning and recommendation calls never fail: catalog
//! gaps give empty results and persistence problems are logged, keeping the
//! in-memory state authoritative.
//!
//! ## Logging
//!
//! All modules log through the `log` facade; the binary installs
//! `env_logger`, so `RUST_LOG=attune=debug` shows sourcing decisions and
//! `RUST_LOG=attune::db=trace` shows every store write.

pub mod algorithm;
pub mod bandit;
pub mod catalog;
pub mod cli;
pub mod completion;
pub mod config;
pub mod db;
pub mod engine;
pub mod features;
pub mod preference;
pub mod rating;
pub mod selector;
pub mod session;
pub mod taxonomy;
