//! Human-readable secrets made of random dictionary words.
//!
//! The sender prints the secret for its operator, who passes it to the
//! receiver out of band. Neither side ever sends it to the relay; both send
//! [`Digest::from_secret`](crate::digest::Digest::from_secret) instead.

use std::path::{Path, PathBuf};

use rand::seq::IndexedRandom;

use crate::error::{RelayError, Result};

/// Default number of words in a generated secret.
pub const DEFAULT_WORDS: usize = 4;
/// System word list consulted before falling back to the built-in one.
pub const DEFAULT_DICTIONARY: &str = "/usr/share/dict/words";

/// Word separator inside a secret.
const SEPARATOR: &str = "-";
/// Dictionary entries longer than this are skipped; they make secrets
/// painful to read aloud.
const MAX_WORD_LEN: usize = 10;
const MIN_WORD_LEN: usize = 3;

const BUILTIN_WORDS: &[&str] = &[
    "acorn", "amber", "anchor", "apple", "arrow", "aspen", "badge", "bamboo", "banjo", "barley",
    "basil", "beacon", "berry", "birch", "bison", "blaze", "bloom", "bonfire", "breeze", "brick",
    "brook", "bucket", "butter", "cabin", "cactus", "camel", "candle", "canyon", "carrot", "castle",
    "cedar", "cello", "cherry", "cider", "cinder", "clover", "cobalt", "comet", "copper", "coral",
    "cotton", "coyote", "crane", "cricket", "crystal", "daisy", "delta", "denim", "desert", "dingo",
    "dolphin", "dragon", "dune", "eagle", "ember", "falcon", "fern", "fiddle", "flint", "forest",
    "fossil", "fox", "garnet", "gecko", "ginger", "glacier", "granite", "gravel", "harbor", "hazel",
    "heron", "hickory", "honey", "husky", "igloo", "indigo", "iris", "island", "ivory", "jasper",
    "juniper", "kayak", "kettle", "kiwi", "lagoon", "lantern", "lemon", "lily", "linen", "llama",
    "lotus", "magnet", "mango", "maple", "marble", "meadow", "melon", "mint", "moose", "mosaic",
    "nectar", "nickel", "nutmeg", "oasis", "olive", "onyx", "orbit", "orchid", "otter", "owl",
    "paddle", "panda", "papaya", "pebble", "pepper", "pigeon", "pine", "plum", "pond", "poppy",
    "prairie", "quartz", "quill", "rabbit", "radish", "raven", "reef", "ribbon", "river", "robin",
    "saddle", "saffron", "salmon", "sapphire", "sequoia", "shadow", "shell", "sierra", "silver",
    "sparrow", "spruce", "squash", "stone", "summit", "sunset", "tango", "thistle", "thunder",
    "tiger", "timber", "topaz", "tulip", "tundra", "turtle", "velvet", "violet", "walnut", "walrus",
    "willow", "winter", "wren", "yarrow", "yonder", "zebra", "zephyr", "zinnia",
];

/// Source of words for secrets.
#[derive(Debug, Clone)]
pub struct Wordlist {
    words: Vec<String>,
}

impl Wordlist {
    /// The word list compiled into the binary.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            words: BUILTIN_WORDS.iter().map(|w| (*w).to_string()).collect(),
        }
    }

    /// Loads a newline-separated dictionary, keeping only short lowercase
    /// ASCII words so secrets stay easy to read aloud and type.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RelayError::io(format!("reading dictionary {}", path.display()), e))?;
        Self::from_text(&text).ok_or_else(|| RelayError::Usage {
            message: format!("dictionary {} has no usable words", path.display()),
        })
    }

    /// Uses `path` when it is readable and non-empty, otherwise the built-in
    /// list.
    #[must_use]
    pub fn load_or_builtin(path: Option<&Path>) -> Self {
        let path = path.map_or_else(|| PathBuf::from(DEFAULT_DICTIONARY), Path::to_path_buf);
        Self::from_file(&path).unwrap_or_else(|_| Self::builtin())
    }

    fn from_text(text: &str) -> Option<Self> {
        let words: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|w| (MIN_WORD_LEN..=MAX_WORD_LEN).contains(&w.len()))
            .filter(|w| w.bytes().all(|b| b.is_ascii_lowercase()))
            .map(str::to_string)
            .collect();
        (!words.is_empty()).then_some(Self { words })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Picks `count` random words and joins them with `-`.
    pub fn generate(&self, count: usize) -> Result<String> {
        if count == 0 {
            return Err(RelayError::Usage {
                message: "a secret needs at least one word".into(),
            });
        }
        let mut rng = rand::rng();
        let picked: Vec<&str> = (0..count)
            .filter_map(|_| self.words.choose(&mut rng).map(String::as_str))
            .collect();
        Ok(picked.join(SEPARATOR))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn when_generating_expect_requested_word_count() {
        let secret = Wordlist::builtin().generate(4).unwrap();
        assert_eq!(secret.split(SEPARATOR).count(), 4);
        assert!(secret.bytes().all(|b| b.is_ascii_lowercase() || b == b'-'));
    }

    #[test]
    fn when_zero_words_requested_expect_usage_error() {
        let err = Wordlist::builtin().generate(0).unwrap_err();
        assert!(matches!(err, RelayError::Usage { .. }));
    }

    #[test]
    fn when_dictionary_has_odd_entries_expect_filtered() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "apple\nZebra\nit's\nab\nsupercalifragilistic\n  river  \n").unwrap();

        let list = Wordlist::from_file(file.path()).unwrap();
        assert_eq!(list.len(), 2);
        let secret = list.generate(8).unwrap();
        assert!(secret.split('-').all(|w| w == "apple" || w == "river"));
    }

    #[test]
    fn when_dictionary_missing_expect_builtin_fallback() {
        let list = Wordlist::load_or_builtin(Some(Path::new("/nonexistent/words")));
        assert_eq!(list.len(), BUILTIN_WORDS.len());
        assert!(!list.is_empty());
    }

    #[test]
    fn when_dictionary_has_no_usable_words_expect_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "A\nB\n").unwrap();
        assert!(Wordlist::from_file(file.path()).is_err());
    }
}
