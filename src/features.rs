//! Audio-feature space shared by the preference model, the session tracker
//! and the scorer.
//!
//! Every track is described by a fixed 9-dimensional [`FeatureVector`] that
//! the catalog normalizes to a comparable scale. Running means over this
//! space are moved with [`FeatureVector::blend`], and similarity to a mean is
//! an exponential decay of Euclidean distance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of audio dimensions per track.
pub const FEATURE_DIMS: usize = 9;

/// Value every dimension of a running mean starts at.
pub const NEUTRAL_LEVEL: f64 = 0.5;

/// Dimension names, in vector order.
pub const FEATURE_NAMES: [&str; FEATURE_DIMS] = [
    "danceability",
    "energy",
    "valence",
    "tempo",
    "acousticness",
    "instrumentalness",
    "speechiness",
    "liveness",
    "loudness",
];

/// `[danceability, energy, valence, tempo, acousticness, instrumentalness,
/// speechiness, liveness, loudness]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; FEATURE_DIMS]);

impl Default for FeatureVector {
    fn default() -> Self {
        Self::neutral()
    }
}

impl From<[f64; FEATURE_DIMS]> for FeatureVector {
    fn from(values: [f64; FEATURE_DIMS]) -> Self {
        Self(values)
    }
}

impl FeatureVector {
    /// All dimensions at [`NEUTRAL_LEVEL`].
    #[must_use]
    pub const fn neutral() -> Self {
        Self([NEUTRAL_LEVEL; FEATURE_DIMS])
    }

    #[must_use]
    pub fn values(&self) -> &[f64; FEATURE_DIMS] {
        &self.0
    }

    #[must_use]
    pub fn danceability(&self) -> f64 {
        self.0[0]
    }

    #[must_use]
    pub fn energy(&self) -> f64 {
        self.0[1]
    }

    #[must_use]
    pub fn valence(&self) -> f64 {
        self.0[2]
    }

    #[must_use]
    pub fn acousticness(&self) -> f64 {
        self.0[4]
    }

    #[must_use]
    pub fn instrumentalness(&self) -> f64 {
        self.0[5]
    }

    #[must_use]
    pub fn speechiness(&self) -> f64 {
        self.0[6]
    }

    /// Euclidean distance.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// `exp(-sharpness · distance)`, always in `(0, 1]` for finite input.
    #[must_use]
    pub fn similarity(&self, other: &Self, sharpness: f64) -> f64 {
        let score = (-sharpness * self.distance(other)).exp();
        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Move toward `target` by `rate` (`self += rate · (target - self)`).
    /// A negative rate pushes away from `target`.
    pub fn blend(&mut self, target: &Self, rate: f64) {
        for (mean, value) in self.0.iter_mut().zip(target.0.iter()) {
            *mean += rate * (value - *mean);
        }
    }

    /// Exact inverse of [`blend`](Self::blend) with the same `target` and `rate`.
    pub fn unblend(&mut self, target: &Self, rate: f64) {
        let keep = 1.0 - rate;
        if keep.abs() < f64::EPSILON {
            return;
        }
        for (mean, value) in self.0.iter_mut().zip(target.0.iter()) {
            *mean = (*mean - rate * value) / keep;
        }
    }
}

impl fmt::Display for FeatureVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = FEATURE_NAMES
            .iter()
            .zip(self.0.iter())
            .map(|(name, value)| format!("{name}={value:.2}"))
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Everything the catalog knows about one track's sound and tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackFeatures {
    pub track_id: String,
    #[serde(default)]
    pub artist_id: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    pub vector: FeatureVector,
    /// The provider could not supply real features; `vector` is an estimate.
    #[serde(default)]
    pub fallback: bool,
}

impl TrackFeatures {
    #[must_use]
    pub fn new(track_id: impl Into<String>, vector: FeatureVector) -> Self {
        Self {
            track_id: track_id.into(),
            artist_id: None,
            genres: Vec::new(),
            vector,
            fallback: false,
        }
    }

    #[must_use]
    pub fn with_artist(mut self, artist_id: impl Into<String>) -> Self {
        self.artist_id = Some(artist_id.into());
        self
    }

    #[must_use]
    pub fn with_genres<I, S>(mut self, genres: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.genres = genres.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn as_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }
}

/// Rule-based genre guess for tracks that arrive without any genre tag.
///
/// Fallback vectors are estimates, so nothing is inferred from them.
#[must_use]
pub fn infer_genre(features: &TrackFeatures) -> Option<&'static str> {
    if features.fallback {
        return None;
    }

    let v = &features.vector;
    let (energy, dance, valence) = (v.energy(), v.danceability(), v.valence());
    let (acoustic, instrumental) = (v.acousticness(), v.instrumentalness());

    let genre = if v.speechiness() > 0.33 {
        "hip hop"
    } else if energy > 0.8 && dance > 0.7 {
        "electronic dance"
    } else if energy > 0.7 && acoustic < 0.3 && instrumental < 0.3 {
        "rock"
    } else if dance > 0.7 && energy > 0.6 && valence > 0.6 {
        "pop"
    } else if acoustic > 0.6 {
        "folk"
    } else if instrumental > 0.5 {
        if energy > 0.5 {
            "electronic dance"
        } else {
            "ambient"
        }
    } else if energy < 0.4 && valence < 0.4 {
        "downtempo"
    } else if energy > 0.6 {
        "pop"
    } else {
        "indie rock"
    };
    Some(genre)
}

/// Coarse label for the feel of a session, read off the session mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mood {
    Energetic,
    Intense,
    Chill,
    Melancholic,
    Groovy,
    Balanced,
}

impl Mood {
    #[must_use]
    pub fn describe(mean: &FeatureVector) -> Self {
        let (energy, valence) = (mean.energy(), mean.valence());
        match () {
            _ if energy > 0.7 && valence > 0.6 => Self::Energetic,
            _ if energy > 0.7 && valence < 0.4 => Self::Intense,
            _ if energy < 0.4 && valence > 0.6 => Self::Chill,
            _ if energy < 0.4 && valence < 0.4 => Self::Melancholic,
            _ if mean.danceability() > 0.7 => Self::Groovy,
            _ => Self::Balanced,
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Energetic => "Energetic",
            Self::Intense => "Intense",
            Self::Chill => "Chill",
            Self::Melancholic => "Melancholic",
            Self::Groovy => "Groovy",
            Self::Balanced => "Balanced",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(values: [f64; FEATURE_DIMS]) -> FeatureVector {
        FeatureVector(values)
    }

    #[test]
    fn test_similarity_bounds() {
        let a = FeatureVector::neutral();
        assert!((a.similarity(&a, 2.0) - 1.0).abs() < 1e-12);

        let far = vector([0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, -60.0]);
        let score = a.similarity(&far, 2.0);
        assert!((0.0..=1.0).contains(&score));
        assert!(score < 1e-6);
    }

    #[test]
    fn test_blend_and_unblend_round_trip() {
        let target = vector([0.8, 0.8, 0.8, 0.8, 0.2, 0.1, 0.1, 0.1, -5.0]);
        let mut mean = FeatureVector::neutral();

        mean.blend(&target, 0.05);
        assert!((mean.0[0] - 0.515).abs() < 1e-12);
        assert!((mean.0[8] - (0.5 + 0.05 * (-5.5))).abs() < 1e-12);

        mean.unblend(&target, 0.05);
        for value in mean.0 {
            assert!((value - 0.5).abs() < 1e-12);
        }

        // Negative rate pushes away and is still invertible.
        mean.blend(&target, -0.015);
        assert!(mean.0[0] < 0.5);
        mean.unblend(&target, -0.015);
        assert!((mean.0[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_infer_genre_rules() {
        let speechy = TrackFeatures::new("t", vector([0.5, 0.5, 0.5, 0.5, 0.5, 0.2, 0.5, 0.1, 0.5]));
        assert_eq!(infer_genre(&speechy), Some("hip hop"));

        let dance = TrackFeatures::new("t", vector([0.8, 0.9, 0.5, 0.5, 0.1, 0.1, 0.05, 0.1, 0.5]));
        assert_eq!(infer_genre(&dance), Some("electronic dance"));

        let acoustic = TrackFeatures::new("t", vector([0.3, 0.3, 0.7, 0.5, 0.9, 0.1, 0.05, 0.1, 0.5]));
        assert_eq!(infer_genre(&acoustic), Some("folk"));

        let sad = TrackFeatures::new("t", vector([0.3, 0.2, 0.2, 0.5, 0.4, 0.1, 0.05, 0.1, 0.5]));
        assert_eq!(infer_genre(&sad), Some("downtempo"));

        assert_eq!(infer_genre(&dance.clone().as_fallback()), None);
    }

    #[test]
    fn test_mood_labels() {
        let mut mean = FeatureVector::neutral();
        assert_eq!(Mood::describe(&mean), Mood::Balanced);

        mean.0[1] = 0.9;
        mean.0[2] = 0.8;
        assert_eq!(Mood::describe(&mean), Mood::Energetic);

        mean.0[2] = 0.2;
        assert_eq!(Mood::describe(&mean), Mood::Intense);

        mean.0[1] = 0.5;
        mean.0[2] = 0.5;
        mean.0[0] = 0.9;
        assert_eq!(Mood::describe(&mean), Mood::Groovy);
        assert_eq!(Mood::Groovy.to_string(), "Groovy");
    }
}
