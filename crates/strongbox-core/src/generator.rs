//! Random password generation from selectable character classes

use rand::{rngs::OsRng, Rng};
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};

pub const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
pub const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const DIGITS: &str = "0123456789";
pub const SPECIAL: &str = "!@#$%&*_+-=/?";

/// Default ceiling for generated password length
pub const DEFAULT_MAX_LENGTH: usize = 64;

/// Which character classes a generated password may draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharClasses {
    pub lower: bool,
    pub upper: bool,
    pub digit: bool,
    pub special: bool,
}

impl CharClasses {
    pub const LOWER: u8 = 1;
    pub const UPPER: u8 = 1 << 1;
    pub const DIGIT: u8 = 1 << 2;
    pub const SPECIAL: u8 = 1 << 3;

    pub const ALL: CharClasses = CharClasses {
        lower: true,
        upper: true,
        digit: true,
        special: true,
    };

    pub const fn new(lower: bool, upper: bool, digit: bool, special: bool) -> Self {
        Self {
            lower,
            upper,
            digit,
            special,
        }
    }

    /// Build from a bit mask of `LOWER | UPPER | DIGIT | SPECIAL`. Unknown
    /// bits are ignored.
    pub const fn from_mask(mask: u8) -> Self {
        Self {
            lower: mask & Self::LOWER != 0,
            upper: mask & Self::UPPER != 0,
            digit: mask & Self::DIGIT != 0,
            special: mask & Self::SPECIAL != 0,
        }
    }

    pub const fn mask(&self) -> u8 {
        (self.lower as u8) * Self::LOWER
            | (self.upper as u8) * Self::UPPER
            | (self.digit as u8) * Self::DIGIT
            | (self.special as u8) * Self::SPECIAL
    }

    /// Number of enabled classes
    pub fn count(&self) -> usize {
        self.mask().count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    fn alphabets(&self) -> Vec<&'static [u8]> {
        let mut alphabets = Vec::with_capacity(4);
        if self.lower {
            alphabets.push(LOWERCASE.as_bytes());
        }
        if self.upper {
            alphabets.push(UPPERCASE.as_bytes());
        }
        if self.digit {
            alphabets.push(DIGITS.as_bytes());
        }
        if self.special {
            alphabets.push(SPECIAL.as_bytes());
        }
        alphabets
    }
}

/// Generates passwords with the OS CSPRNG.
#[derive(Debug, Clone)]
pub struct PasswordGenerator {
    classes: CharClasses,
    max_length: usize,
}

impl PasswordGenerator {
    pub fn new(classes: CharClasses) -> Self {
        Self {
            classes,
            max_length: DEFAULT_MAX_LENGTH,
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Check `length` against the enabled classes without generating.
    pub fn validate(&self, length: usize) -> VaultResult<()> {
        if self.classes.is_empty() {
            return Err(VaultError::NoClassSelected);
        }
        if length < 1 || length > self.max_length {
            return Err(VaultError::LengthOutOfRange {
                length,
                max: self.max_length,
            });
        }
        let classes = self.classes.count();
        if length < classes {
            return Err(VaultError::LengthTooShort { length, classes });
        }
        Ok(())
    }

    /// Generate a password of `length` characters.
    ///
    /// Each position picks a class uniformly, then a character uniformly
    /// within it. Every enabled class is not guaranteed to appear.
    pub fn generate(&self, length: usize) -> VaultResult<Zeroizing<String>> {
        self.validate(length)?;

        let alphabets = self.classes.alphabets();
        let mut rng = OsRng;
        let mut password = Zeroizing::new(String::with_capacity(length));

        for _ in 0..length {
            let alphabet = alphabets[rng.gen_range(0..alphabets.len())];
            let c = alphabet[rng.gen_range(0..alphabet.len())];
            password.push(char::from(c));
        }

        Ok(password)
    }
}

/// Generate a password with the default length ceiling.
pub fn generate(length: usize, classes: CharClasses) -> VaultResult<Zeroizing<String>> {
    PasswordGenerator::new(classes).generate(length)
}
