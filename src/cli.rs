//! # Command-Line Interface Module
//!
//! Command-line interface for Attune using Clap derive macros.
//!
//! ## Commands
//!
//! - `recommend`: Pick the next track to play
//! - `rate`: Like or dislike a track (optionally undoing an earlier rating)
//! - `playlist`: Assemble a playlist from liked genres
//! - `genres`: Show the aggregated genre leaderboard
//! - `stats`: Show session statistics
//! - `top`: List liked tracks, newest first
//! - `reset`: Forget everything learned so far
//! - `taxonomy`: Explain how a genre tag is classified
//!
//! ## Examples
//!
//! ```bash
//! attune --catalog library.json recommend
//! attune rate 4uLU6hMCjMI75M1A2tKUQC like
//! attune rate 4uLU6hMCjMI75M1A2tKUQC like --undo
//! attune playlist --count 25
//! ```

use crate::engine::TOP_RATED_LIMIT;
use crate::rating::Rating;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Rating value as typed on the command line.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum RatingArg {
    Like,
    Dislike,
}

impl From<RatingArg> for Rating {
    fn from(arg: RatingArg) -> Self {
        match arg {
            RatingArg::Like => Self::Like,
            RatingArg::Dislike => Self::Dislike,
        }
    }
}

/// Main application arguments structure.
///
/// Global options override values read from the config file.
#[derive(Parser, Debug)]
#[command(name = "attune")]
#[command(about = "Attune: adaptive music recommendations that learn from every like & dislike")]
#[command(version)]
pub struct Args {
    /// JSON config file
    #[arg(long, global = true, value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Profile database location
    ///
    /// Defaults to the platform data directory (e.g. ~/.local/share/attune/attune.db).
    #[arg(long, global = true, env = "ATTUNE_DB", value_hint = clap::ValueHint::FilePath)]
    pub db: Option<PathBuf>,

    /// Offline track library (JSON) used as the catalog
    #[arg(long, global = true, env = "ATTUNE_CATALOG", value_hint = clap::ValueHint::FilePath)]
    pub catalog: Option<PathBuf>,

    /// Seed the random number generators for reproducible output
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Enumeration of all available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pick the next track to play
    ///
    /// Searches liked genres when the recent like rate says so, otherwise
    /// explores the catalog at random, then scores the candidates against
    /// the learned profile.
    Recommend {
        /// Track ids to leave out (already queued or just played)
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,
    },

    /// Like or dislike a track
    ///
    /// Updates the genre and artist arms, the feature means and the session
    /// controller. With --undo the earlier rating is reversed exactly.
    Rate {
        /// Catalog track id
        track_id: String,

        /// Rating to apply
        rating: RatingArg,

        /// Reverse a previous rating of this track
        #[arg(long)]
        undo: bool,

        /// Do not count this rating toward the session and total counters
        #[arg(long)]
        no_count: bool,
    },

    /// Assemble a playlist from liked genres
    ///
    /// Candidates are scored once and taken best first. Once five tracks are
    /// in, artists already on the playlist are passed over.
    Playlist {
        /// Number of tracks
        #[arg(long, default_value = "25")]
        count: usize,

        /// Track ids to leave out
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,
    },

    /// Show the genre leaderboard
    ///
    /// Subgenres are folded into their parent category and sorted by
    /// posterior mean.
    Genres,

    /// Show session statistics
    Stats,

    /// List liked tracks, newest first
    Top {
        /// Maximum number of tracks
        #[arg(long, default_value_t = TOP_RATED_LIMIT)]
        limit: usize,
    },

    /// Forget all learned preferences and logged ratings
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },

    /// Explain how a genre tag is classified
    Taxonomy {
        /// Genre tag, e.g. "deep house"
        #[arg(value_hint = clap::ValueHint::Other)]
        genre: String,
    },

    /// Generate shell completions
    ///
    /// Usage: attune completion bash > ~/.local/share/bash-completion/completions/attune
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// Generate fish completions with genre name completion for `taxonomy`
    ///
    /// Usage: attune completion-enhanced > ~/.config/fish/completions/attune.fish
    CompletionEnhanced,

    /// List known genre names for completion (hidden command)
    #[command(hide = true)]
    CompleteGenres,
}
