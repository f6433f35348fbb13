//! Read-only lookups over a document
//!
//! Nothing here is cached. Every query walks the tree, which keeps the
//! results consistent with whatever commands have done to the document.

use super::contexts::{Context, LyricsContext, Voice, VoiceId};
use super::core::{ContextLocation, Document, ElementLocation, Sheet, VoiceLocation};
use super::duration::Time;
use super::elements::{Clef, ElementId, KeySignature, MusicElement, TimeSignature};

pub fn sheet_by_name<'a>(doc: &'a Document, name: &str) -> Option<(usize, &'a Sheet)> {
    doc.sheets.iter().enumerate().find(|(_, s)| s.name == name)
}

pub fn context_by_name(doc: &Document, sheet: usize, name: &str) -> Option<ContextLocation> {
    let sheet_ref = doc.sheets.get(sheet)?;
    sheet_ref
        .context_index(name)
        .map(|context| ContextLocation { sheet, context })
}

pub fn voice_by_id(doc: &Document, id: VoiceId) -> Option<VoiceLocation> {
    if !id.is_assigned() {
        return None;
    }
    doc.sheets.iter().enumerate().find_map(|(si, sheet)| {
        sheet
            .voices()
            .find(|(_, _, v)| v.id == id)
            .map(|(ci, vi, _)| VoiceLocation::new(si, ci, vi))
    })
}

/// Voice with the given LilyPond name in a sheet
pub fn voice_by_name(doc: &Document, sheet: usize, name: &str) -> Option<VoiceLocation> {
    if name.is_empty() {
        return None;
    }
    doc.sheets.get(sheet).and_then(|s| {
        s.voices()
            .find(|(_, _, v)| v.name == name)
            .map(|(ci, vi, _)| VoiceLocation::new(sheet, ci, vi))
    })
}

pub fn element_by_id(doc: &Document, id: ElementId) -> Option<ElementLocation> {
    if !id.is_assigned() {
        return None;
    }
    doc.sheets.iter().enumerate().find_map(|(si, sheet)| {
        sheet.voices().find_map(|(ci, vi, voice)| {
            voice
                .index_of(id)
                .map(|index| VoiceLocation::new(si, ci, vi).element(index))
        })
    })
}

/// Indices of the elements that start exactly at `time`
pub fn elements_at(voice: &Voice, time: Time) -> Vec<usize> {
    voice
        .time_positions()
        .into_iter()
        .enumerate()
        .filter(|(_, t)| *t == time)
        .map(|(i, _)| i)
        .collect()
}

/// Index at which an element starting at `time` is inserted: after every
/// element that starts before it, and before the first playable that starts
/// at or after it.
pub fn element_index_at_time(voice: &Voice, time: Time) -> usize {
    let positions = voice.time_positions();
    voice
        .elements
        .iter()
        .zip(positions)
        .position(|(e, t)| t > time || (t == time && e.is_playable() && !e.is_chorded_note()))
        .unwrap_or(voice.elements.len())
}

/// Last element matching `pick` that starts at or before `time`
fn marker_at<T>(voice: &Voice, time: Time, pick: impl Fn(&MusicElement) -> Option<T>) -> Option<T> {
    voice
        .elements
        .iter()
        .zip(voice.time_positions())
        .take_while(|(_, t)| *t <= time)
        .filter_map(|(e, _)| pick(e))
        .last()
}

pub fn clef_at(voice: &Voice, time: Time) -> Option<Clef> {
    marker_at(voice, time, |e| match e {
        MusicElement::Clef(clef) => Some(*clef),
        _ => None,
    })
}

/// Key in effect at `time`; C major when the voice sets none
pub fn key_signature_at(voice: &Voice, time: Time) -> KeySignature {
    marker_at(voice, time, |e| match e {
        MusicElement::KeySignature(key) => Some(*key),
        _ => None,
    })
    .unwrap_or_default()
}

pub fn time_signature_at(voice: &Voice, time: Time) -> Option<TimeSignature> {
    marker_at(voice, time, |e| match e {
        MusicElement::TimeSignature(ts) => Some(*ts),
        _ => None,
    })
}

/// Lyrics contexts of the sheet that follow the given voice
pub fn lyrics_for_voice(sheet: &Sheet, voice: VoiceId) -> Vec<&LyricsContext> {
    sheet
        .contexts
        .iter()
        .filter_map(|c| match c {
            Context::Lyrics(lyrics) if lyrics.associated_voice == Some(voice) => Some(lyrics),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::contexts::Staff;
    use crate::models::duration::{BaseLength, Duration};
    use crate::models::elements::{ClefKind, KeyMode, Note};
    use crate::models::pitch::{Pitch, PitchClass};

    fn sample() -> Document {
        let mut doc = Document::new();
        let mut voice = Voice::new(1);
        voice.name = "melody".to_string();
        voice.elements = vec![
            MusicElement::Clef(Clef::new(ClefKind::Treble)),
            MusicElement::Note(Note::new(Pitch::middle_c(), Duration::plain(BaseLength::Half))),
            MusicElement::KeySignature(KeySignature::new(
                PitchClass::new(4, 0).unwrap(),
                KeyMode::Major,
            )),
            MusicElement::Clef(Clef::new(ClefKind::Bass)),
            MusicElement::Note(Note::new(Pitch::middle_c(), Duration::QUARTER)),
            MusicElement::Note(Note::chorded(Pitch::new(2, 0, 4).unwrap(), Duration::QUARTER)),
        ];
        doc.assign_voice_ids(&mut voice);

        let mut staff = Staff::new("Staff 1");
        staff.voices.push(voice);
        let mut lyrics = LyricsContext::new("Lyrics 1");
        lyrics.associated_voice = Some(staff.voices[0].id);

        let mut sheet = Sheet::new("Sheet 1");
        sheet.contexts.push(Context::Staff(staff));
        sheet.contexts.push(Context::Lyrics(lyrics));
        doc.sheets.push(sheet);
        doc
    }

    #[test]
    fn test_lookup_by_name_and_id() {
        let doc = sample();
        assert_eq!(sheet_by_name(&doc, "Sheet 1").map(|(i, _)| i), Some(0));
        assert_eq!(
            context_by_name(&doc, 0, "Lyrics 1"),
            Some(ContextLocation { sheet: 0, context: 1 })
        );
        let location = voice_by_name(&doc, 0, "melody").unwrap();
        let voice = doc.voice_at(location).unwrap();
        assert_eq!(voice_by_id(&doc, voice.id), Some(location));

        let id = voice.elements[4].id().unwrap();
        assert_eq!(element_by_id(&doc, id), Some(location.element(4)));
        assert_eq!(lyrics_for_voice(&doc.sheets[0], voice.id).len(), 1);
    }

    #[test]
    fn test_markers_in_effect() {
        let doc = sample();
        let voice = doc.voice_at(VoiceLocation::new(0, 0, 0)).unwrap();
        let half = Time::new(1, 2);

        assert_eq!(clef_at(voice, Time::from_integer(0)).unwrap().kind, ClefKind::Treble);
        assert_eq!(clef_at(voice, half).unwrap().kind, ClefKind::Bass);
        assert_eq!(key_signature_at(voice, Time::from_integer(0)).fifths(), 0);
        assert_eq!(key_signature_at(voice, half).fifths(), 1);
        assert!(time_signature_at(voice, half).is_none());
    }

    #[test]
    fn test_elements_at_time() {
        let doc = sample();
        let voice = doc.voice_at(VoiceLocation::new(0, 0, 0)).unwrap();
        let half = Time::new(1, 2);

        assert_eq!(elements_at(voice, half), vec![2, 3, 4, 5]);
        assert_eq!(element_index_at_time(voice, half), 4);
        assert_eq!(element_index_at_time(voice, Time::from_integer(0)), 1);
        assert_eq!(element_index_at_time(voice, Time::from_integer(5)), 6);
    }
}
