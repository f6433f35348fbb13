//! Note and rest durations
//!
//! A duration is a base length (breve .. sixty-fourth) plus 0-2 augmentation
//! dots. Its time value is an exact fraction of a whole note.

use crate::error::{EditorError, Result};
use num_rational::Rational32;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::fmt;

/// Time measured in whole notes
pub type Time = Rational32;

/// Base note length. The discriminant is the LilyPond duration number
/// (breve is 0 since LilyPond spells it `\breve`).
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize_repr, Deserialize_repr)]
pub enum BaseLength {
    Breve = 0,
    Whole = 1,
    Half = 2,
    Quarter = 4,
    Eighth = 8,
    Sixteenth = 16,
    ThirtySecond = 32,
    SixtyFourth = 64,
}

impl BaseLength {
    pub const ALL: [BaseLength; 8] = [
        BaseLength::Breve,
        BaseLength::Whole,
        BaseLength::Half,
        BaseLength::Quarter,
        BaseLength::Eighth,
        BaseLength::Sixteenth,
        BaseLength::ThirtySecond,
        BaseLength::SixtyFourth,
    ];

    /// Length from a LilyPond duration number (1, 2, 4, ... 64)
    pub fn from_number(n: u32) -> Option<Self> {
        match n {
            1 => Some(BaseLength::Whole),
            2 => Some(BaseLength::Half),
            4 => Some(BaseLength::Quarter),
            8 => Some(BaseLength::Eighth),
            16 => Some(BaseLength::Sixteenth),
            32 => Some(BaseLength::ThirtySecond),
            64 => Some(BaseLength::SixtyFourth),
            _ => None,
        }
    }

    /// Undotted time value in whole notes
    pub fn time_value(self) -> Time {
        match self {
            BaseLength::Breve => Time::from_integer(2),
            other => Time::new(1, other as i32),
        }
    }

    /// Stable lower-case name used by the native format
    pub fn name(self) -> &'static str {
        match self {
            BaseLength::Breve => "breve",
            BaseLength::Whole => "whole",
            BaseLength::Half => "half",
            BaseLength::Quarter => "quarter",
            BaseLength::Eighth => "eighth",
            BaseLength::Sixteenth => "sixteenth",
            BaseLength::ThirtySecond => "thirty-second",
            BaseLength::SixtyFourth => "sixty-fourth",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        BaseLength::ALL.iter().copied().find(|l| l.name() == name)
    }
}

/// Duration of a playable element
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Duration {
    pub length: BaseLength,
    /// Number of augmentation dots (0-2)
    pub dots: u8,
}

impl Duration {
    pub const MAX_DOTS: u8 = 2;

    pub const QUARTER: Duration = Duration {
        length: BaseLength::Quarter,
        dots: 0,
    };

    pub fn new(length: BaseLength, dots: u8) -> Result<Self> {
        if dots > Self::MAX_DOTS {
            return Err(EditorError::InvalidValue(format!(
                "{} dots (at most {} allowed)",
                dots,
                Self::MAX_DOTS
            )));
        }
        Ok(Self { length, dots })
    }

    pub fn plain(length: BaseLength) -> Self {
        Self { length, dots: 0 }
    }

    /// Exact time value; each dot adds half of the previously added value
    pub fn time_value(&self) -> Time {
        let base = self.length.time_value();
        let mut total = base;
        let mut added = base;
        for _ in 0..self.dots {
            added /= 2;
            total += added;
        }
        total
    }

    /// LilyPond spelling, e.g. `4.` or `\breve`
    pub fn to_lilypond_string(&self) -> String {
        let base = match self.length {
            BaseLength::Breve => "\\breve".to_string(),
            other => (other as u8).to_string(),
        };
        format!("{}{}", base, ".".repeat(self.dots as usize))
    }
}

impl Default for Duration {
    fn default() -> Self {
        Duration::QUARTER
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_lilypond_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted_values() {
        let quarter = Duration::QUARTER.time_value();
        let dotted = Duration::new(BaseLength::Quarter, 1).unwrap().time_value();
        let double_dotted = Duration::new(BaseLength::Quarter, 2).unwrap().time_value();

        assert_eq!(quarter, Time::new(1, 4));
        assert_eq!(dotted, quarter * Time::new(3, 2));
        assert_eq!(double_dotted, quarter * Time::new(7, 4));
    }

    #[test]
    fn test_breve_and_too_many_dots() {
        assert_eq!(Duration::plain(BaseLength::Breve).time_value(), Time::from_integer(2));
        assert!(Duration::new(BaseLength::Half, 3).is_err());
    }

    #[test]
    fn test_lilypond_spelling() {
        assert_eq!(Duration::new(BaseLength::Eighth, 1).unwrap().to_lilypond_string(), "8.");
        assert_eq!(Duration::plain(BaseLength::Breve).to_lilypond_string(), "\\breve");
        assert_eq!(BaseLength::from_number(16), Some(BaseLength::Sixteenth));
        assert_eq!(BaseLength::from_number(3), None);
    }

    #[test]
    fn test_names_round_trip() {
        for length in BaseLength::ALL {
            assert_eq!(BaseLength::from_name(length.name()), Some(length));
        }
    }
}
