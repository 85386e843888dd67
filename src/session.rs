//! # Session Tracking
//!
//! Detects where one listening session ends and the next begins, keeps the
//! fast session-scoped feature mean, the rating counters, the window of
//! recent rating events, and the exploration-rate controller.
//!
//! A session ends when any of these holds:
//! - more than 2 hours passed since the last rating,
//! - 5 or more dislikes in a row,
//! - none of the last 8 ratings was a like.

use crate::features::{FeatureVector, Mood};
use crate::preference::LEARNING_RATES;
use crate::rating::{Rating, RatingEvent};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Rating events kept for diversity and shift checks.
pub const RECENT_CAPACITY: usize = 100;

const SESSION_GAP_HOURS: f64 = 2.0;
const DISLIKE_STREAK_LIMIT: u32 = 5;
const ALL_DISLIKE_WINDOW: usize = 8;

pub const EXPLORATION_FLOOR: f64 = 0.15;
pub const EXPLORATION_CEILING: f64 = 0.7;
pub const DEFAULT_EXPLORATION: f64 = 0.4;
const RESET_BUMP: f64 = 0.1;
const RESET_BUMP_CAP: f64 = 0.5;
const STREAK_BUMP: f64 = 0.15;
const LIKE_NARROWING: f64 = 0.95;
const DISLIKE_NARROWING: f64 = 0.98;

/// Dislikes in a row that count as sustained rejection.
pub const REJECTION_STREAK: u32 = 2;

/// One-word summary of what the controller is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdaptationMode {
    Exploring,
    DialedIn,
    LockedIn,
    Learning,
}

impl fmt::Display for AdaptationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Exploring => "Exploring",
            Self::DialedIn => "Dialed In",
            Self::LockedIn => "Locked In",
            Self::Learning => "Learning",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_ratings: u64,
    pub session_ratings: u64,
    pub exploration_rate: f64,
    pub consecutive_dislikes: u32,
    pub mode: AdaptationMode,
    pub mood: Option<Mood>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTracker {
    pub session_mean: FeatureVector,
    pub exploration_rate: f64,
    pub total_ratings: u64,
    pub session_ratings: u64,
    pub consecutive_dislikes: u32,
    pub last_rating_at: Option<DateTime<Utc>>,
    pub session_started_at: DateTime<Utc>,
    pub recent: VecDeque<RatingEvent>,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl SessionTracker {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            session_mean: FeatureVector::neutral(),
            exploration_rate: DEFAULT_EXPLORATION,
            total_ratings: 0,
            session_ratings: 0,
            consecutive_dislikes: 0,
            last_rating_at: None,
            session_started_at: now,
            recent: VecDeque::with_capacity(RECENT_CAPACITY),
        }
    }

    /// Identifier shared by every rating of the current session.
    #[must_use]
    pub fn session_id(&self) -> String {
        self.session_started_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Hours since the previous rating, 0 before the first one.
    #[must_use]
    pub fn hours_since_last_rating(&self, now: DateTime<Utc>) -> f64 {
        self.last_rating_at.map_or(0.0, |last| {
            #[allow(clippy::cast_precision_loss)]
            let millis = (now - last).num_milliseconds().max(0) as f64;
            millis / 3_600_000.0
        })
    }

    /// Whether the user has moved on to a new session.
    #[must_use]
    pub fn detect_shift(&self, now: DateTime<Utc>) -> bool {
        if self.hours_since_last_rating(now) > SESSION_GAP_HOURS {
            log::debug!("Session shift: idle for more than {SESSION_GAP_HOURS}h");
            return true;
        }
        if self.consecutive_dislikes >= DISLIKE_STREAK_LIMIT {
            log::debug!("Session shift: {} dislikes in a row", self.consecutive_dislikes);
            return true;
        }
        if self.recent.len() >= ALL_DISLIKE_WINDOW
            && self
                .recent
                .iter()
                .rev()
                .take(ALL_DISLIKE_WINDOW)
                .all(|event| !event.rating.is_like())
        {
            log::debug!("Session shift: no likes in the last {ALL_DISLIKE_WINDOW} ratings");
            return true;
        }
        false
    }

    /// Start a fresh session: neutral session mean, zeroed session counters,
    /// and a little more exploration before the model re-converges.
    pub fn reset_session(&mut self, now: DateTime<Utc>) {
        log::info!("Starting a new listening session");
        self.session_mean = FeatureVector::neutral();
        self.session_ratings = 0;
        self.consecutive_dislikes = 0;
        self.session_started_at = now;
        let bumped = (self.exploration_rate + RESET_BUMP).min(RESET_BUMP_CAP);
        self.set_exploration(bumped.max(self.exploration_rate));
    }

    /// Update the dislike streak and the exploration controller for a new rating.
    pub fn record_rating(&mut self, rating: Rating) {
        match rating {
            Rating::Like => self.consecutive_dislikes = 0,
            Rating::Dislike => self.consecutive_dislikes += 1,
        }

        let next = if self.consecutive_dislikes >= REJECTION_STREAK {
            self.exploration_rate + STREAK_BUMP
        } else if rating.is_like() {
            self.exploration_rate * LIKE_NARROWING
        } else {
            self.exploration_rate * DISLIKE_NARROWING
        };
        self.set_exploration(next);
    }

    /// Undo bookkeeping for a retracted rating. A retracted dislike shortens
    /// the streak; the controller is left alone.
    pub fn retract_rating(&mut self, rating: Rating) {
        if !rating.is_like() {
            self.consecutive_dislikes = self.consecutive_dislikes.saturating_sub(1);
        }
    }

    /// Likes pull the session mean toward the track at the session rate.
    ///
    /// The first like of a session takes the track's vector outright, and
    /// undoing the session's only rating returns the mean to neutral. Call
    /// before [`count`](Self::count).
    pub fn update_session_mean(&mut self, vector: &FeatureVector, rating: Rating, is_undo: bool) {
        if !rating.is_like() {
            return;
        }
        if is_undo {
            if self.session_ratings <= 1 {
                self.session_mean = FeatureVector::neutral();
            } else {
                self.session_mean.unblend(vector, LEARNING_RATES.session);
            }
        } else if self.session_ratings == 0 {
            self.session_mean = *vector;
        } else {
            self.session_mean.blend(vector, LEARNING_RATES.session);
        }
    }

    /// Bump (or, for an undo, roll back) the cumulative and session counters.
    pub fn count(&mut self, is_undo: bool) {
        if is_undo {
            self.total_ratings = self.total_ratings.saturating_sub(1);
            self.session_ratings = self.session_ratings.saturating_sub(1);
        } else {
            self.total_ratings += 1;
            self.session_ratings += 1;
        }
    }

    /// Drop earlier events for `track_id` from the recent window.
    pub fn forget(&mut self, track_id: &str) {
        self.recent.retain(|event| event.track_id != track_id);
    }

    /// Append an event, evicting the oldest past capacity.
    pub fn remember(&mut self, event: RatingEvent) {
        self.forget(&event.track_id);
        if self.recent.len() == RECENT_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(event);
    }

    /// The last `n` events, newest first.
    pub fn last_events(&self, n: usize) -> impl Iterator<Item = &RatingEvent> {
        self.recent.iter().rev().take(n)
    }

    /// Share of likes among the last `window` ratings, once that many exist.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn like_rate(&self, window: usize) -> Option<f64> {
        if window == 0 || self.recent.len() < window {
            return None;
        }
        let likes = self.last_events(window).filter(|e| e.rating.is_like()).count();
        Some(likes as f64 / window as f64)
    }

    /// `(global, recent, session)` weights for feature similarity.
    #[must_use]
    pub const fn preference_weights(&self) -> (f64, f64, f64) {
        match self.session_ratings {
            0..=2 => (0.5, 0.4, 0.1),
            3..=9 => (0.4, 0.4, 0.2),
            _ => (0.3, 0.3, 0.4),
        }
    }

    #[must_use]
    pub fn under_rejection(&self) -> bool {
        self.consecutive_dislikes >= REJECTION_STREAK
    }

    #[must_use]
    pub fn mood(&self) -> Option<Mood> {
        (self.session_ratings >= 3).then(|| Mood::describe(&self.session_mean))
    }

    #[must_use]
    pub fn adaptation_mode(&self) -> AdaptationMode {
        if self.under_rejection() {
            AdaptationMode::Exploring
        } else if self.exploration_rate < 0.2 {
            AdaptationMode::DialedIn
        } else if self.session_ratings >= 5 {
            AdaptationMode::LockedIn
        } else {
            AdaptationMode::Learning
        }
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            total_ratings: self.total_ratings,
            session_ratings: self.session_ratings,
            exploration_rate: self.exploration_rate,
            consecutive_dislikes: self.consecutive_dislikes,
            mode: self.adaptation_mode(),
            mood: self.mood(),
        }
    }

    fn set_exploration(&mut self, rate: f64) {
        self.exploration_rate = rate.clamp(EXPLORATION_FLOOR, EXPLORATION_CEILING);
    }
}
