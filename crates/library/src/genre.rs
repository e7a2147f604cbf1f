use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;

/// Raw label -> canonical label. Keys match exactly.
static GENRE_FOLDING: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for (raw, canonical) in FOLDING_PAIRS {
        map.insert(*raw, *canonical);
    }
    map
});

static REJECTED_GENRES: Lazy<HashSet<&'static str>> =
    Lazy::new(|| REJECTED.iter().copied().collect());

const FOLDING_PAIRS: &[(&str, &str)] = &[
    ("TECHNO", "Techno"),
    ("techno", "Techno"),
    ("TRANCE", "Trance"),
    ("trance", "Trance"),
    ("HOUSE", "House"),
    ("house", "House"),
    ("POP", "Pop"),
    ("pop", "Pop"),
    ("ROCK", "Rock"),
    ("rock", "Rock"),
    ("OLDIES", "Oldies"),
    ("oldies", "Oldies"),
    ("LATIN", "Latin"),
    ("latin", "Latin"),
    ("GOA", "Goa"),
    ("goa", "Goa"),
    ("JAZZ", "Jazz"),
    ("jazz", "Jazz"),
    ("BLUES", "Blues"),
    ("blues", "Blues"),
    ("CLASSICAL", "Classical"),
    ("classical", "Classical"),
    ("SOUNDTRACK", "Soundtrack"),
    ("soundtrack", "Soundtrack"),
    ("RAP", "Rap"),
    ("rap", "Rap"),
    ("NEWAGE", "New Age"),
    ("newage", "New Age"),
    ("METAL", "Metal"),
    ("metal", "Metal"),
    ("PUNK", "Punk"),
    ("punk", "Punk"),
    ("Hip Hop", "Hip-Hop"),
    ("HipHop", "Hip-Hop"),
    ("hip hop", "Hip-Hop"),
    ("Drum & Bass", "Drum & Bass"),
    ("Drum and Bass", "Drum & Bass"),
    ("DnB", "Drum & Bass"),
    ("D&B", "Drum & Bass"),
    ("Sound Track", "Soundtrack"),
    ("Film Score", "Soundtrack"),
    ("Films/Games; Film Scores", "Soundtrack"),
    ("Rock & Roll", "Rock & Roll"),
    ("Rock and Roll", "Rock & Roll"),
    ("Classic", "Rock"),
    ("Progressive", "Rock"),
    ("General", "Rock"),
    ("Hard Rock", "Rock"),
    ("Synthpop", "Synth Pop"),
    ("Synth-Pop", "Synth Pop"),
    ("Trip-Hop", "Trip Hop"),
    ("Trip Hop", "Trip Hop"),
    ("Gangsta Rap", "Rap"),
    ("Gangsta", "Rap"),
    ("General New Age", "New Age"),
    ("Pop-Folk", "Folk"),
    ("Folk-Pop", "Folk"),
    ("Electro", "Electronic"),
    ("Electronica", "Electronic"),
    ("EDM", "Electronic"),
    ("Dance", "Dance"),
    ("genre", "Unknown"),
    ("Genre", "Unknown"),
    ("default", "Unknown"),
    ("Default", "Unknown"),
    ("Unbekannt", "Unknown"),
    ("unbekannt", "Unknown"),
    ("misc", "Other"),
    ("Misc", "Other"),
    ("Miscellaneous", "Other"),
    ("various", "Other"),
    ("Various", "Other"),
    ("andere", "Other"),
    ("Andere", "Other"),
    ("Psychadelic", "Psychedelic"),
    ("psychadelic", "Psychedelic"),
    ("Humour", "Comedy"),
    ("humour", "Comedy"),
    ("Terror", "Horror"),
    ("terror", "Horror"),
    ("60's", "Oldies"),
    ("70's", "Oldies"),
    ("80's", "80s"),
    ("90's", "90s"),
    ("Patty", "Party"),
    ("patty", "Party"),
];

const REJECTED: &[&str] = &[
    "Other", "Unknown", "Unbekannt", "misc", "default", "genre", "Genre", "various", "andere",
    "Andere", "", "N/A", "n/a", "null", "NULL",
];

/// Maps a raw genre label onto the canonical vocabulary. `None` means the
/// label carries no usable genre.
pub fn normalize_genre(raw: &str) -> Option<String> {
    if let Some(canonical) = fold_exact(raw) {
        return canonical;
    }
    let trimmed = raw.trim();
    if let Some(idx) = trimmed.find(|ch: char| ch == ',' || ch == ';') {
        let head = &trimmed[..idx];
        if let Some(canonical) = fold_exact(head) {
            return canonical;
        }
        return Some(head.trim().to_string());
    }
    Some(trimmed.to_string())
}

/// Steps shared by the whole label and a split-off head: trim, reject,
/// exact fold. `Some(None)` is a definite "no genre", `None` means no rule
/// matched.
fn fold_exact(value: &str) -> Option<Option<String>> {
    let trimmed = value.trim();
    if REJECTED_GENRES.contains(trimmed) {
        return Some(None);
    }
    let mapped = GENRE_FOLDING.get(trimmed)?;
    if REJECTED_GENRES.contains(mapped) {
        Some(None)
    } else {
        Some(Some(mapped.to_string()))
    }
}
