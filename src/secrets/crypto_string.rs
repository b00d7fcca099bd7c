//! Random strings for passphrases, salts and other generated secrets.

use rand::rngs::OsRng;
use rand::Rng;
use serde::Deserialize;

/// Shortest string ever generated.
pub const MIN_LENGTH: usize = 24;

const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const PUNCTUATION: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Character pool a string is drawn from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Letters, digits and punctuation.
    #[default]
    Default,
    Alphanumeric,
    AlphanumericLower,
    AlphanumericUpper,
    HexLower,
    HexUpper,
}

impl Profile {
    pub fn pool(&self) -> String {
        match self {
            Profile::Default => [LOWER, UPPER, DIGITS, PUNCTUATION].concat(),
            Profile::Alphanumeric => [LOWER, UPPER, DIGITS].concat(),
            Profile::AlphanumericLower => [LOWER, DIGITS].concat(),
            Profile::AlphanumericUpper => [UPPER, DIGITS].concat(),
            Profile::HexLower => "0123456789abcdef".to_string(),
            Profile::HexUpper => "0123456789ABCDEF".to_string(),
        }
    }
}

type CharClass = fn(&char) -> bool;

const CLASSES: [CharClass; 4] = [
    char::is_ascii_uppercase,
    char::is_ascii_lowercase,
    char::is_ascii_digit,
    char::is_ascii_punctuation,
];

/// Generates strings that contain every character class of their pool.
#[derive(Debug, Clone)]
pub struct CryptoString {
    pool: Vec<char>,
}

impl CryptoString {
    pub fn new(profile: Profile) -> Self {
        Self {
            pool: profile.pool().chars().collect(),
        }
    }

    /// A string of `max(length, MIN_LENGTH)` characters drawn from the OS
    /// random source. The whole string is redrawn until it is valid.
    pub fn generate(&self, length: usize) -> String {
        let length = length.max(MIN_LENGTH);
        loop {
            let candidate: String = (0..length)
                .map(|_| self.pool[OsRng.gen_range(0..self.pool.len())])
                .collect();
            if self.is_valid(&candidate) {
                return candidate;
            }
        }
    }

    /// Whether `candidate` has a character from each class the pool offers.
    pub fn is_valid(&self, candidate: &str) -> bool {
        CLASSES
            .iter()
            .filter(|class| self.pool.iter().any(|c| class(c)))
            .all(|class| candidate.chars().any(|c| class(&c)))
    }
}

impl Default for CryptoString {
    fn default() -> Self {
        Self::new(Profile::Default)
    }
}
