//! Sticky state shared by the importer and the exporter
//!
//! LilyPond leaves out what did not change: a note without a duration takes
//! the previous one, and in `\relative` mode a note without octave marks lands
//! nearest to the previous pitch. The importer fills the gaps with these
//! machines; the exporter runs the same machines to decide what it can omit.

use super::pitch_names::PitchLanguage;
use crate::error::Result;
use crate::models::{Duration, KeySignature, NoteStem, Pitch};

/// Octave of a LilyPond note name written without marks in absolute mode
pub(crate) const UNMARKED_OCTAVE: i32 = 3;

/// Reference of `\relative` without an explicit pitch (f below middle C)
pub(crate) fn default_relative_reference() -> Pitch {
    Pitch {
        step: 3,
        accidental: 0,
        octave: 3,
    }
}

/// `\relative` octave resolution
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RelativeOctave {
    last: Pitch,
}

impl RelativeOctave {
    pub fn new(reference: Pitch) -> Self {
        Self { last: reference }
    }

    pub fn set_last(&mut self, pitch: Pitch) {
        self.last = pitch;
    }

    /// Octave of `step` placed at most three diatonic steps from the last
    /// pitch. Accidentals do not count, so F to B goes up and B to F goes down.
    pub fn nearest_octave(&self, step: u8) -> i32 {
        let last = self.last.diatonic_index();
        let mut index = last.div_euclid(7) * 7 + step as i32;
        if index - last > 3 {
            index -= 7;
        } else if last - index > 3 {
            index += 7;
        }
        index.div_euclid(7)
    }

    /// Importer side: a written step, accidental and octave marks to a pitch
    pub fn resolve(&mut self, step: u8, accidental: i8, marks: i32) -> Result<Pitch> {
        let octave = self.nearest_octave(step) + marks;
        let pitch = Pitch::new(step, accidental, clamp_octave(octave))?;
        self.last = pitch;
        Ok(pitch)
    }

    /// Exporter side: octave marks needed to reach `pitch`
    pub fn marks_for(&mut self, pitch: Pitch) -> i32 {
        let marks = pitch.octave as i32 - self.nearest_octave(pitch.step);
        self.last = pitch;
        marks
    }
}

fn clamp_octave(octave: i32) -> i8 {
    octave.clamp(i8::MIN as i32, i8::MAX as i32) as i8
}

/// Duration carried from one note to the next
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct StickyDuration {
    current: Option<Duration>,
}

impl StickyDuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Importer side: an explicit duration becomes current; a missing one
    /// reuses the current duration (a quarter before the first note)
    pub fn resolve(&mut self, written: Option<Duration>) -> Duration {
        if let Some(duration) = written {
            self.current = Some(duration);
        }
        self.current.unwrap_or(Duration::QUARTER)
    }

    /// Exporter side: the duration token to write, `None` if unchanged
    pub fn token(&mut self, duration: Duration) -> Option<String> {
        if self.current == Some(duration) {
            return None;
        }
        self.current = Some(duration);
        Some(duration.to_lilypond_string())
    }
}

/// How octave marks are interpreted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OctaveMode {
    Absolute,
    Relative(RelativeOctave),
    /// `\fixed`: marks count from the reference octave
    Fixed(i8),
}

/// Parser state carried across the token stream
#[derive(Clone, Debug)]
pub(crate) struct MusicState {
    pub duration: StickyDuration,
    pub octave: OctaveMode,
    pub key: KeySignature,
    pub stem: NoteStem,
    pub language: PitchLanguage,
}

impl MusicState {
    pub fn new(language: PitchLanguage) -> Self {
        Self {
            duration: StickyDuration::new(),
            octave: OctaveMode::Absolute,
            key: KeySignature::c_major(),
            stem: NoteStem::Preferred,
            language,
        }
    }

    /// Resolves a written pitch in the current octave mode
    pub fn pitch(&mut self, step: u8, accidental: i8, marks: i32) -> Result<Pitch> {
        match &mut self.octave {
            OctaveMode::Absolute => {
                Pitch::new(step, accidental, clamp_octave(UNMARKED_OCTAVE + marks))
            }
            OctaveMode::Fixed(reference) => {
                Pitch::new(step, accidental, clamp_octave(*reference as i32 + marks))
            }
            OctaveMode::Relative(relative) => relative.resolve(step, accidental, marks),
        }
    }

    /// Octave check (`c='`): the pitch is placed absolutely and becomes the
    /// new reference
    pub fn check_octave(&mut self, pitch: Pitch, marks: i32) -> Result<Pitch> {
        let checked = Pitch::new(
            pitch.step,
            pitch.accidental,
            clamp_octave(UNMARKED_OCTAVE + marks),
        )?;
        if checked != pitch {
            log::warn!("octave check failed: expected {}, found {}", checked, pitch);
        }
        if let OctaveMode::Relative(relative) = &mut self.octave {
            relative.set_last(checked);
        }
        Ok(checked)
    }

    /// After a chord, relative mode continues from its first note
    pub fn end_chord(&mut self, head: Pitch) {
        if let OctaveMode::Relative(relative) = &mut self.octave {
            relative.set_last(head);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BaseLength;

    fn pitch(step: u8, octave: i8) -> Pitch {
        Pitch::new(step, 0, octave).unwrap()
    }

    #[test]
    fn test_nearest_octave() {
        let relative = RelativeOctave::new(pitch(0, 4));
        assert_eq!(relative.nearest_octave(1), 4); // d above
        assert_eq!(relative.nearest_octave(3), 4); // f, a fourth up
        assert_eq!(relative.nearest_octave(4), 3); // g, a fourth down
        assert_eq!(relative.nearest_octave(6), 3); // b below
    }

    #[test]
    fn test_fourth_resolves_by_steps() {
        // F to B is an augmented fourth but only three steps: up
        let relative = RelativeOctave::new(pitch(3, 4));
        assert_eq!(relative.nearest_octave(6), 4);
        // B to F: down
        let relative = RelativeOctave::new(pitch(6, 4));
        assert_eq!(relative.nearest_octave(3), 4);
        let relative = RelativeOctave::new(pitch(6, 3));
        assert_eq!(relative.nearest_octave(3), 3);
    }

    #[test]
    fn test_marks_mirror_resolution() {
        let mut importer = RelativeOctave::new(pitch(0, 4));
        let mut exporter = RelativeOctave::new(pitch(0, 4));
        for target in [pitch(4, 5), pitch(1, 2), pitch(6, 2), pitch(0, 6), pitch(3, 6)] {
            let marks = exporter.marks_for(target);
            assert_eq!(importer.resolve(target.step, 0, marks).unwrap(), target);
        }
    }

    #[test]
    fn test_sticky_duration() {
        let mut sticky = StickyDuration::new();
        assert_eq!(sticky.resolve(None), Duration::QUARTER);
        let eighth = Duration::plain(BaseLength::Eighth);
        assert_eq!(sticky.resolve(Some(eighth)), eighth);
        assert_eq!(sticky.resolve(None), eighth);

        let mut writer = StickyDuration::new();
        assert_eq!(writer.token(Duration::QUARTER).as_deref(), Some("4"));
        assert_eq!(writer.token(Duration::QUARTER), None);
        let dotted = Duration::new(BaseLength::Half, 1).unwrap();
        assert_eq!(writer.token(dotted).as_deref(), Some("2."));
    }

    #[test]
    fn test_octave_modes() {
        let mut state = MusicState::new(PitchLanguage::Nederlands);
        assert_eq!(state.pitch(0, 0, 1).unwrap(), pitch(0, 4));

        state.octave = OctaveMode::Fixed(4);
        assert_eq!(state.pitch(4, 0, 0).unwrap(), pitch(4, 4));

        state.octave = OctaveMode::Relative(RelativeOctave::new(default_relative_reference()));
        // c' after the default reference f is middle C
        assert_eq!(state.pitch(0, 0, 1).unwrap(), pitch(0, 4));
        assert_eq!(state.pitch(6, 0, 0).unwrap(), pitch(6, 3));
        assert!(state.pitch(0, 0, 12).is_err());
    }

    #[test]
    fn test_octave_check_resets_reference() {
        let mut state = MusicState::new(PitchLanguage::Nederlands);
        state.octave = OctaveMode::Relative(RelativeOctave::new(pitch(0, 4)));
        let wrong = state.pitch(6, 0, 0).unwrap();
        let checked = state.check_octave(wrong, 1).unwrap();
        assert_eq!(checked, pitch(6, 4));
        assert_eq!(state.pitch(0, 0, 0).unwrap(), pitch(0, 5));
    }
}
