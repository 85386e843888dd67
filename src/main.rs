//! # Attune
//!
//! Adaptive music recommendations that learn from every like and dislike.
//! The binary wires the learning engine to an offline JSON track library and
//! a SQLite profile, then runs one command per invocation.
//!
//! ## Usage
//!
//! ```bash
//! # Next track
//! attune --catalog library.json recommend
//!
//! # Feedback
//! attune --catalog library.json rate <track-id> like
//! attune --catalog library.json rate <track-id> like --undo
//!
//! # Playlist and profile inspection
//! attune --catalog library.json playlist --count 25
//! attune genres
//! attune stats
//! ```

use anyhow::{bail, Result};
use attune::catalog::{LibraryCatalog, LibraryFile};
use attune::cli::{self, Command};
use attune::completion;
use attune::config::RuntimeConfig;
use attune::db;
use attune::engine::{Engine, RatingOutcome};
use attune::rating::Rating;
use attune::taxonomy::TAXONOMY;
use clap::{CommandFactory, Parser};
use log::{debug, info};
use std::collections::HashSet;
use std::sync::Arc;

/// Merge the config file, environment and flags into one configuration.
fn runtime_config(args: &cli::Args) -> Result<RuntimeConfig> {
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    if let Some(db) = &args.db {
        config.db_path = db.clone();
    }
    if let Some(catalog) = &args.catalog {
        config.catalog_path = Some(catalog.clone());
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.absolutize()
}

fn build_engine(config: &RuntimeConfig, needs_catalog: bool) -> Result<Engine> {
    let catalog = match &config.catalog_path {
        Some(path) => LibraryCatalog::load(path)?,
        None if needs_catalog => {
            bail!("No track library configured. Pass --catalog <library.json> or set ATTUNE_CATALOG.")
        }
        None => LibraryCatalog::new(LibraryFile::default()),
    };
    debug!("Catalog holds {} tracks", catalog.len());
    let catalog = match config.seed {
        Some(seed) => catalog.with_seed(seed),
        None => catalog,
    };

    debug!("Opening profile at {}", config.db_path.display());
    let store = db::open_store(&config.db_path, config.persistence)?;
    let engine = Engine::new(Arc::new(catalog), store);
    Ok(match config.seed {
        Some(seed) => engine.with_seed(seed),
        None => engine,
    })
}

/// Main entry point for the Attune application.
///
/// Logging is controlled through `RUST_LOG`:
/// - `RUST_LOG=debug attune recommend` - Enable debug logging
/// - `RUST_LOG=attune::selector=trace attune recommend` - Module-specific logging
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();

    // Commands that never touch the profile
    match &args.command {
        Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(shell), &mut cmd);
            return Ok(());
        }
        Command::CompletionEnhanced => {
            completion::generate_enhanced_fish_completion();
            return Ok(());
        }
        Command::CompleteGenres => {
            completion::print_genre_completions();
            return Ok(());
        }
        Command::Taxonomy { genre } => {
            let info = TAXONOMY.hierarchy_info(genre);
            println!("Genre:            {}", info.original);
            println!("Display name:     {}", info.display_name);
            println!("Parent:           {}", info.parent.unwrap_or("-"));
            println!("Parent category:  {}", if info.is_parent { "yes" } else { "no" });
            println!("Cultural variant: {}", if info.is_cultural_variant { "yes" } else { "no" });
            if info.is_parent {
                println!("Subgenres:        {}", TAXONOMY.subgenres_of(genre).join(", "));
            }
            return Ok(());
        }
        _ => {}
    }

    let config = runtime_config(&args)?;
    let needs_catalog = matches!(
        args.command,
        Command::Recommend { .. } | Command::Rate { .. } | Command::Playlist { .. }
    );
    let engine = build_engine(&config, needs_catalog)?;

    match args.command {
        Command::Recommend { exclude } => {
            let exclude: HashSet<String> = exclude.into_iter().collect();
            match engine.recommend(&exclude) {
                Some(track) => println!("{}\t{} - {}", track.id, track.artist, track.name),
                None => eprintln!("No recommendation available right now"),
            }
        }
        Command::Rate { track_id, rating, undo, no_count } => {
            let rating = Rating::from(rating);
            match engine.update_with_rating(&track_id, rating, undo, !no_count) {
                RatingOutcome::Applied { primary_genre, session_reset } => {
                    if session_reset {
                        info!("Taste shift detected; started a new session");
                    }
                    let verb = if undo { "Undid" } else { "Recorded" };
                    match primary_genre {
                        Some(genre) => println!("{verb} {rating} for {track_id} ({genre})"),
                        None => println!("{verb} {rating} for {track_id}"),
                    }
                }
                RatingOutcome::MissingFeatures => {
                    bail!("Track {track_id} has no audio features in the library; rating ignored")
                }
            }
        }
        Command::Playlist { count, exclude } => {
            let exclude: HashSet<String> = exclude.into_iter().collect();
            let playlist = engine.generate_playlist(&exclude, count);
            if playlist.is_empty() {
                eprintln!("Not enough liked genres or candidates to build a playlist yet");
            }
            for (i, track) in playlist.iter().enumerate() {
                println!("{:>3}. {}\t{} - {}", i + 1, track.id, track.artist, track.name);
            }
        }
        Command::Genres => {
            let mut scores: Vec<_> = engine.aggregated_genre_scores().into_iter().collect();
            scores.sort_by(|a, b| b.1.posterior_mean().total_cmp(&a.1.posterior_mean()));
            if scores.is_empty() {
                println!("No genre preferences learned yet");
            }
            for (name, agg) in scores {
                println!(
                    "{name:<24} {:.3}  (α {:.2}, β {:.2}, {} ratings, {} subgenres)",
                    agg.posterior_mean(),
                    agg.alpha,
                    agg.beta,
                    agg.total_interactions,
                    agg.subgenres.len()
                );
            }
        }
        Command::Stats => {
            let stats = engine.stats();
            println!("Mode:                 {}", stats.mode);
            println!("Total ratings:        {}", stats.total_ratings);
            println!("Session ratings:      {}", stats.session_ratings);
            println!("Exploration rate:     {:.2}", stats.exploration_rate);
            println!("Consecutive dislikes: {}", stats.consecutive_dislikes);
            match stats.mood {
                Some(mood) => println!("Session mood:         {mood}"),
                None => println!("Session mood:         -"),
            }
        }
        Command::Top { limit } => {
            for event in engine.top_rated_tracks(limit) {
                println!(
                    "{}\t{}\t{}",
                    event.timestamp.format("%Y-%m-%d %H:%M"),
                    event.track_id,
                    event.primary_genre.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Reset { yes } => {
            if !yes {
                bail!("Refusing to reset without --yes");
            }
            engine.reset_all();
            println!("Profile reset");
        }
        Command::Completion { .. }
        | Command::CompletionEnhanced
        | Command::CompleteGenres
        | Command::Taxonomy { .. } => {}
    }

    engine.flush();
    Ok(())
}
