//! Diatonic pitch representation
//!
//! A pitch is a diatonic step (0=C .. 6=B), an accidental in semitones
//! (-2..=2) and an octave in scientific numbering (4 = middle C octave).

use crate::error::{EditorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semitone offset of each diatonic step above C
const STEP_SEMITONES: [i32; 7] = [0, 2, 4, 5, 7, 9, 11];

/// Upper-case step letters, indexed by step
pub const STEP_LETTERS: [char; 7] = ['C', 'D', 'E', 'F', 'G', 'A', 'B'];

/// Musical pitch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pitch {
    /// Scale degree (0=C, 1=D, 2=E, 3=F, 4=G, 5=A, 6=B)
    pub step: u8,

    /// Accidental (-2=double flat, -1=flat, 0=natural, +1=sharp, +2=double sharp)
    pub accidental: i8,

    /// Octave number (4 = middle C octave)
    pub octave: i8,
}

impl Pitch {
    /// Create a new pitch with validation
    pub fn new(step: u8, accidental: i8, octave: i8) -> Result<Self> {
        if step > 6 {
            return Err(EditorError::InvalidValue(format!(
                "invalid step: {} (must be 0-6)",
                step
            )));
        }
        if !(-2..=2).contains(&accidental) {
            return Err(EditorError::InvalidValue(format!(
                "invalid accidental: {} (must be -2 to +2)",
                accidental
            )));
        }
        if !(-1..=9).contains(&octave) {
            return Err(EditorError::InvalidValue(format!(
                "invalid octave: {} (must be -1 to 9)",
                octave
            )));
        }
        Ok(Self {
            step,
            accidental,
            octave,
        })
    }

    /// Middle C
    pub fn middle_c() -> Self {
        Self {
            step: 0,
            accidental: 0,
            octave: 4,
        }
    }

    /// Position on the diatonic scale counted from C of octave 0
    pub fn diatonic_index(&self) -> i32 {
        self.octave as i32 * 7 + self.step as i32
    }

    /// Inverse of [`Pitch::diatonic_index`]
    pub fn from_diatonic_index(index: i32, accidental: i8) -> Result<Self> {
        let octave = index.div_euclid(7);
        let step = index.rem_euclid(7);
        if octave < i8::MIN as i32 || octave > i8::MAX as i32 {
            return Err(EditorError::InvalidValue(format!(
                "octave {} out of range",
                octave
            )));
        }
        Pitch::new(step as u8, accidental, octave as i8)
    }

    /// MIDI key number (middle C = 60)
    pub fn midi_key(&self) -> i32 {
        (self.octave as i32 + 1) * 12 + STEP_SEMITONES[self.step as usize] + self.accidental as i32
    }

    /// The octave-independent part of this pitch
    pub fn class(&self) -> PitchClass {
        PitchClass {
            step: self.step,
            accidental: self.accidental,
        }
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class(), self.octave)
    }
}

/// A step with an accidental but no octave, e.g. the tonic of a key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PitchClass {
    pub step: u8,
    pub accidental: i8,
}

impl PitchClass {
    pub fn new(step: u8, accidental: i8) -> Result<Self> {
        let pitch = Pitch::new(step, accidental, 4)?;
        Ok(pitch.class())
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = STEP_LETTERS[(self.step as usize).min(6)];
        let accidental = match self.accidental {
            -2 => "bb",
            -1 => "b",
            1 => "#",
            2 => "##",
            _ => "",
        };
        write!(f, "{}{}", letter, accidental)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_validation() {
        assert!(Pitch::new(7, 0, 4).is_err());
        assert!(Pitch::new(0, 3, 4).is_err());
        assert!(Pitch::new(0, 0, 10).is_err());
        assert!(Pitch::new(6, -2, 0).is_ok());
    }

    #[test]
    fn test_diatonic_index_round_trip() {
        let b3 = Pitch::new(6, -1, 3).unwrap();
        let index = b3.diatonic_index();
        assert_eq!(index, 27);
        assert_eq!(Pitch::from_diatonic_index(index, -1).unwrap(), b3);
        assert_eq!(Pitch::from_diatonic_index(28, 0).unwrap(), Pitch::middle_c());
    }

    #[test]
    fn test_midi_key() {
        assert_eq!(Pitch::middle_c().midi_key(), 60);
        assert_eq!(Pitch::new(5, 0, 4).unwrap().midi_key(), 69);
        assert_eq!(Pitch::new(0, -1, 4).unwrap().midi_key(), 59);
    }

    #[test]
    fn test_display() {
        assert_eq!(Pitch::new(3, 1, 5).unwrap().to_string(), "F#5");
        assert_eq!(PitchClass::new(6, -1).unwrap().to_string(), "Bb");
    }
}
