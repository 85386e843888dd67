//! # Genre Taxonomy
//!
//! Two-level genre hierarchy used to fold fine-grained provider tags
//! ("deep house", "liquid dnb", ...) into stable parent categories for the
//! genre leaderboard and for genre-targeted searches.
//!
//! The hierarchy is static and immutable after construction, so a single
//! shared instance ([`TAXONOMY`]) is handed out to every thread without
//! locking.
//!
//! ## Lookup rules
//!
//! 1. Exact, case-insensitive match against every known leaf.
//! 2. Otherwise a permissive substring scan: the first leaf that contains the
//!    query, or is contained in it, wins. Short queries can hit unrelated
//!    leaves ("wave" matches "new wave"-like tags); that noise is accepted.
//! 3. Cultural variants (`k-pop`, `j-rock`, `britpop`, ...) never fold into a
//!    parent so that regional identity survives aggregation.

use std::collections::HashMap;

/// Parent categories and their leaves, in lookup order.
const HIERARCHY: &[(&str, &[&str])] = &[
    ("House", &[
        "deep house", "tech house", "progressive house", "electro house", "future house",
        "tropical house", "bass house", "disco house", "funky house", "soulful house",
        "acid house", "afro house", "melodic house", "minimal house", "microhouse",
        "chicago house", "detroit house", "uk house", "garage house", "jackin house",
        "filter house", "french house", "latin house", "piano house", "vocal house",
    ]),
    ("Techno", &[
        "minimal techno", "detroit techno", "acid techno", "hard techno", "industrial techno",
        "melodic techno", "progressive techno", "dub techno", "tech trance", "peak time techno",
        "hypnotic techno", "raw techno", "berlin techno", "schranz", "ambient techno",
    ]),
    ("Trance", &[
        "progressive trance", "uplifting trance", "psytrance", "goa trance", "vocal trance",
        "tech trance", "hard trance", "acid trance", "balearic trance", "euphoric trance",
        "dream trance", "nitzhonot", "suomisaundi", "psychill", "dark psytrance",
        "forest psytrance", "full-on psytrance", "progressive psytrance",
    ]),
    ("Dubstep", &[
        "brostep", "riddim", "deep dubstep", "melodic dubstep", "drumstep", "chillstep",
        "deathstep", "future dubstep", "tearout", "hybrid trap", "dubstep trap", "uk dubstep",
    ]),
    ("Drum and Bass", &[
        "liquid drum and bass", "neurofunk", "jump up", "jungle", "darkstep", "techstep",
        "drumfunk", "intelligent drum and bass", "atmospheric drum and bass",
        "minimal drum and bass", "dancefloor drum and bass", "halftime drum and bass",
        "crossbreed", "ragga jungle", "breakcore", "dnb", "liquid dnb", "neuro dnb",
    ]),
    ("Trap", &[
        "trap music", "hybrid trap", "festival trap", "future trap", "trapstep", "hard trap",
        "melodic trap", "wave", "rage", "plugg", "latin trap",
    ]),
    ("Bass Music", &[
        "future bass", "melodic bass", "colour bass", "dubstep", "halftime", "breaks",
        "breakbeat", "uk bass", "bass house", "garage", "uk garage", "bassline", "grime", "140",
        "deep dubstep", "space bass",
    ]),
    ("Electronic Dance", &[
        "big room", "electro", "complextro", "moombahton", "moombahcore", "melbourne bounce",
        "hardstyle", "hardcore", "happy hardcore", "uk hardcore", "gabber", "speedcore",
        "rawstyle", "jumpstyle", "hands up",
    ]),
    ("Downtempo", &[
        "chillout", "ambient", "trip hop", "downtempo", "lo-fi", "chillhop", "lo-fi hip hop",
        "lounge", "nu jazz", "acid jazz", "ambient techno", "idm", "glitch", "folktronica",
        "psybient", "chillwave", "vaporwave", "future garage", "organic downtempo",
    ]),
    ("Indie Rock", &[
        "indie rock", "indie pop", "garage rock", "post-punk", "post-punk revival", "noise rock",
        "art rock", "math rock", "shoegaze", "dream pop", "jangle pop", "chamber pop",
        "baroque pop", "indie folk", "folktronica", "lo-fi indie",
    ]),
    ("Alternative Rock", &[
        "alternative rock", "grunge", "britpop", "madchester", "baggy", "college rock",
        "noise pop", "slowcore", "sadcore", "emo", "screamo", "midwest emo", "emo rap",
        "post-grunge",
    ]),
    ("Metal", &[
        "heavy metal", "thrash metal", "death metal", "black metal", "doom metal", "power metal",
        "progressive metal", "metalcore", "deathcore", "djent", "nu metal", "industrial metal",
        "gothic metal", "symphonic metal", "folk metal", "viking metal", "melodic death metal",
        "technical death metal", "brutal death metal", "funeral doom",
    ]),
    ("Hip Hop", &[
        "rap", "trap rap", "boom bap", "conscious hip hop", "gangsta rap", "southern hip hop",
        "east coast hip hop", "west coast hip hop", "midwest hip hop", "dirty south", "crunk",
        "hyphy", "cloud rap", "emo rap", "drill", "grime", "uk hip hop", "abstract hip hop",
        "jazz rap", "g-funk", "memphis rap", "phonk", "pluggnb",
    ]),
    ("R&B", &[
        "r&b", "contemporary r&b", "neo soul", "alternative r&b", "progressive r&b",
        "quiet storm", "new jack swing", "soul", "funk", "p-funk", "boogie", "disco", "nu-disco",
        "future funk",
    ]),
    ("Reggae", &[
        "reggae", "roots reggae", "dub", "reggae fusion", "lovers rock", "dancehall", "ragga",
        "reggaeton", "dembow", "moombahton", "tropical bass", "ska", "rocksteady", "two tone",
    ]),
    ("Latin", &[
        "reggaeton", "latin trap", "bachata", "salsa", "cumbia", "merengue", "banda",
        "regional mexican", "corrido", "mariachi", "ranchera", "tejano", "norteno",
        "duranguense", "grupera", "latin pop", "latin urban", "urbano latino", "perreo",
        "dembow", "mambo", "cha-cha-cha", "son cubano", "timba", "bossa nova", "samba", "mpb",
        "forro", "sertanejo", "pagode", "axe", "tropicalia", "tango", "flamenco",
    ]),
    ("Country", &[
        "country", "country pop", "contemporary country", "traditional country",
        "outlaw country", "alternative country", "alt-country", "americana", "country rock",
        "bluegrass", "honky tonk", "western swing", "country blues", "nashville sound",
        "bakersfield sound", "red dirt", "texas country", "country rap", "bro country",
    ]),
    ("Jazz", &[
        "jazz", "bebop", "hard bop", "cool jazz", "modal jazz", "free jazz", "jazz fusion",
        "smooth jazz", "nu jazz", "acid jazz", "jazz funk", "latin jazz", "afro-cuban jazz",
        "spiritual jazz", "post-bop", "avant-garde jazz", "swing", "big band", "dixieland",
        "ragtime", "gypsy jazz", "jazz blues",
    ]),
    ("Classical", &[
        "classical", "baroque", "romantic", "modern classical", "contemporary classical",
        "minimalism", "neoclassical", "chamber music", "opera", "orchestral", "symphonic",
        "choral", "piano", "string quartet", "avant-garde classical", "impressionist",
        "renaissance", "medieval", "early music", "classical crossover",
    ]),
    ("Folk", &[
        "folk", "traditional folk", "contemporary folk", "indie folk", "folk rock", "folk pop",
        "acoustic folk", "freak folk", "psychedelic folk", "chamber folk", "anti-folk",
        "neofolk", "folk punk", "celtic", "irish folk", "scottish folk", "nordic folk",
        "appalachian folk", "bluegrass", "old-time", "singer-songwriter",
    ]),
    ("Funk", &[
        "funk", "p-funk", "psychedelic funk", "funk rock", "funk metal", "jazz funk", "boogie",
        "go-go", "afrobeat", "afrofunk", "electro-funk", "g-funk", "future funk", "synth-funk",
        "new jack swing",
    ]),
    ("Disco", &[
        "disco", "nu-disco", "disco house", "disco polo", "space disco", "cosmic disco",
        "italo disco", "euro disco", "french disco", "post-disco", "boogie", "electro-disco",
    ]),
    ("Synthwave", &[
        "synthwave", "outrun", "darksynth", "dreamwave", "chillwave", "retrowave", "vaporwave",
        "future funk", "spacewave", "cybersynth", "sovietwave", "mallsoft",
    ]),
];

const CULTURAL_PREFIXES: &[&str] = &["k-", "j-", "c-", "mandopop", "cantopop", "britpop"];

const CULTURAL_GENRES: &[&str] = &[
    "k-pop", "j-pop", "c-pop", "j-rock", "k-indie", "mandopop", "cantopop", "britpop", "j-rap",
    "k-r&b",
];

lazy_static::lazy_static! {
    /// Process-wide taxonomy, built once on first use.
    pub static ref TAXONOMY: GenreTaxonomy = GenreTaxonomy::new();
}

/// Everything the taxonomy knows about a single genre tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenreInfo {
    pub original: String,
    pub parent: Option<&'static str>,
    pub display_name: String,
    pub is_parent: bool,
    pub is_cultural_variant: bool,
    pub should_aggregate: bool,
}

/// Static two-level genre hierarchy with a reverse leaf → parent index.
#[derive(Debug)]
pub struct GenreTaxonomy {
    /// Lower-cased leaves in first-seen order, each with its owning parent.
    leaves: Vec<(String, &'static str)>,
    /// Index into `leaves` for exact lookups.
    index: HashMap<String, usize>,
}

impl Default for GenreTaxonomy {
    fn default() -> Self {
        Self::new()
    }
}

impl GenreTaxonomy {
    /// Build the hierarchy. A leaf listed under several parents belongs to the
    /// first parent that lists it.
    #[must_use]
    pub fn new() -> Self {
        let mut leaves = Vec::new();
        let mut index = HashMap::new();

        for (parent, children) in HIERARCHY {
            for child in *children {
                let key = child.to_lowercase();
                if !index.contains_key(&key) {
                    index.insert(key.clone(), leaves.len());
                    leaves.push((key, *parent));
                }
            }
        }

        log::trace!("Genre taxonomy built with {} distinct leaves", leaves.len());
        Self { leaves, index }
    }

    /// Resolve the parent category of `genre`.
    ///
    /// Exact case-insensitive match first, then the permissive substring scan
    /// over every leaf. Cultural variants and blank tags never resolve.
    #[must_use]
    pub fn parent_of(&self, genre: &str) -> Option<&'static str> {
        let needle = genre.trim().to_lowercase();
        if needle.is_empty() || self.is_cultural_variant(&needle) {
            return None;
        }

        if let Some(&idx) = self.index.get(&needle) {
            return Some(self.leaves[idx].1);
        }

        self.leaves
            .iter()
            .find(|(leaf, _)| leaf.contains(needle.as_str()) || needle.contains(leaf.as_str()))
            .map(|(_, parent)| *parent)
    }

    /// Whether the tag names a regional/cultural scene that must keep its identity.
    #[must_use]
    pub fn is_cultural_variant(&self, genre: &str) -> bool {
        let lower = genre.trim().to_lowercase();
        CULTURAL_PREFIXES.iter().any(|prefix| lower.starts_with(prefix))
            || CULTURAL_GENRES.contains(&lower.as_str())
    }

    /// Leaderboard name for a tag: its parent if one resolves, else the
    /// title-cased tag.
    #[must_use]
    pub fn display_name(&self, genre: &str) -> String {
        match self.parent_of(genre) {
            Some(parent) => parent.to_string(),
            None => title_case(genre.trim()),
        }
    }

    #[must_use]
    pub fn should_aggregate(&self, genre: &str) -> bool {
        self.parent_of(genre).is_some()
    }

    /// Parent category names in hierarchy order.
    pub fn parents(&self) -> impl Iterator<Item = &'static str> {
        HIERARCHY.iter().map(|(parent, _)| *parent)
    }

    /// Leaves listed under `parent` (exact name), empty when unknown.
    #[must_use]
    pub fn subgenres_of(&self, parent: &str) -> &'static [&'static str] {
        HIERARCHY
            .iter()
            .find(|(name, _)| *name == parent)
            .map_or(&[], |(_, children)| *children)
    }

    #[must_use]
    pub fn hierarchy_info(&self, genre: &str) -> GenreInfo {
        let parent = self.parent_of(genre);
        GenreInfo {
            original: genre.to_string(),
            parent,
            display_name: self.display_name(genre),
            is_parent: HIERARCHY.iter().any(|(name, _)| *name == genre),
            is_cultural_variant: self.is_cultural_variant(genre),
            should_aggregate: parent.is_some(),
        }
    }

    /// Pick the tag that represents a track for bandit purposes: a cultural
    /// variant if present, else the first tag with a resolvable parent, else
    /// the first raw tag.
    #[must_use]
    pub fn primary_genre<'a>(&self, genres: &'a [String]) -> Option<&'a str> {
        genres
            .iter()
            .find(|genre| self.is_cultural_variant(genre))
            .or_else(|| genres.iter().find(|genre| self.parent_of(genre).is_some()))
            .or_else(|| genres.first())
            .map(String::as_str)
    }

    /// Number of distinct leaves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}

/// Capitalize every letter that follows a non-letter, lower-case the rest.
#[must_use]
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_is_letter = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if previous_is_letter {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            previous_is_letter = true;
        } else {
            out.push(ch);
            previous_is_letter = false;
        }
    }
    out
}
