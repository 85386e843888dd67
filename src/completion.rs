//! # Shell Completion Module
//!
//! Shell completion for Attune:
//! - Generation of completion scripts for various shells
//! - Dynamic completion of genre names for the `taxonomy` command
//!
//! ## Usage
//!
//! ```bash
//! # Generate bash completions
//! attune completion bash > ~/.local/share/bash-completion/completions/attune
//!
//! # Fish with genre completion
//! attune completion-enhanced > ~/.config/fish/completions/attune.fish
//! ```

use crate::taxonomy::TAXONOMY;
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io;

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

/// Generate enhanced fish completion script with genre name completion
pub fn generate_enhanced_fish_completion() {
    println!(r#"# Enhanced Attune completion script for Fish shell with genre name completion
# Install with: attune completion-enhanced > ~/.config/fish/completions/attune.fish

function __attune_complete_genres
    if command -sq attune
        attune complete-genres 2>/dev/null
    end
end

complete -c attune -e

# Global options
complete -c attune -s h -l help -d 'Print help information'
complete -c attune -s V -l version -d 'Print version information'
complete -c attune -l config -r -F -d 'JSON config file'
complete -c attune -l db -r -F -d 'Profile database location'
complete -c attune -l catalog -r -F -d 'Offline track library (JSON)'
complete -c attune -l seed -r -d 'Seed the random number generators'

# Main commands
complete -c attune -f -n '__fish_use_subcommand' -a 'recommend' -d 'Pick the next track to play'
complete -c attune -f -n '__fish_use_subcommand' -a 'rate' -d 'Like or dislike a track'
complete -c attune -f -n '__fish_use_subcommand' -a 'playlist' -d 'Assemble a playlist from liked genres'
complete -c attune -f -n '__fish_use_subcommand' -a 'genres' -d 'Show the genre leaderboard'
complete -c attune -f -n '__fish_use_subcommand' -a 'stats' -d 'Show session statistics'
complete -c attune -f -n '__fish_use_subcommand' -a 'top' -d 'List liked tracks, newest first'
complete -c attune -f -n '__fish_use_subcommand' -a 'reset' -d 'Forget all learned preferences'
complete -c attune -f -n '__fish_use_subcommand' -a 'taxonomy' -d 'Explain how a genre tag is classified'
complete -c attune -f -n '__fish_use_subcommand' -a 'completion' -d 'Generate shell completions'
complete -c attune -f -n '__fish_use_subcommand' -a 'completion-enhanced' -d 'Generate enhanced fish completions'

# rate
complete -c attune -f -n '__fish_seen_subcommand_from rate' -a 'like dislike'
complete -c attune -f -n '__fish_seen_subcommand_from rate' -l undo -d 'Reverse a previous rating'
complete -c attune -f -n '__fish_seen_subcommand_from rate' -l no-count -d 'Do not count this rating'

# recommend / playlist / top / reset
complete -c attune -f -n '__fish_seen_subcommand_from recommend playlist' -l exclude -r -d 'Track ids to leave out'
complete -c attune -f -n '__fish_seen_subcommand_from playlist' -l count -r -d 'Number of tracks'
complete -c attune -f -n '__fish_seen_subcommand_from top' -l limit -r -d 'Maximum number of tracks'
complete -c attune -f -n '__fish_seen_subcommand_from reset' -l yes -d 'Confirm the reset'

# taxonomy - genre names
complete -c attune -f -n '__fish_seen_subcommand_from taxonomy' -a '(__attune_complete_genres)' -d 'Genre'

# completion
complete -c attune -f -n '__fish_seen_subcommand_from completion' -a 'bash zsh fish power-shell elvish'
"#);
}

/// Convert our Shell enum to clap_complete's Shell enum
#[must_use]
pub fn shell_to_completion_shell(shell: &crate::cli::Shell) -> CompletionShell {
    match shell {
        crate::cli::Shell::Bash => CompletionShell::Bash,
        crate::cli::Shell::Zsh => CompletionShell::Zsh,
        crate::cli::Shell::Fish => CompletionShell::Fish,
        crate::cli::Shell::PowerShell => CompletionShell::PowerShell,
        crate::cli::Shell::Elvish => CompletionShell::Elvish,
    }
}

/// Parent categories followed by every leaf, deduplicated and sorted.
#[must_use]
pub fn get_genre_completions() -> Vec<String> {
    let mut completions: Vec<String> = TAXONOMY
        .parents()
        .flat_map(|parent| {
            std::iter::once(parent.to_string())
                .chain(TAXONOMY.subgenres_of(parent).iter().map(|leaf| (*leaf).to_string()))
        })
        .collect();
    completions.sort();
    completions.dedup();
    completions
}

/// Print genre names one per line for shell completion scripts.
pub fn print_genre_completions() {
    for genre in get_genre_completions() {
        println!("{genre}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_conversion() {
        assert_eq!(
            shell_to_completion_shell(&crate::cli::Shell::Bash),
            CompletionShell::Bash
        );
        assert_eq!(
            shell_to_completion_shell(&crate::cli::Shell::Zsh),
            CompletionShell::Zsh
        );
    }

    #[test]
    fn test_genre_completions_include_parents_and_leaves() {
        let genres = get_genre_completions();
        assert!(genres.contains(&"House".to_string()));
        assert!(genres.contains(&"deep house".to_string()));
        assert!(genres.windows(2).all(|w| w[0] < w[1]), "sorted and unique");
    }
}
