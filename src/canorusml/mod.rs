//! CanorusML, the native XML format
//!
//! Every model value is stored as an attribute so a saved file maps 1:1 onto
//! the document tree. `read(write(doc)) == doc` for every valid document.

mod reader;
mod writer;

use crate::error::{ParseError, Result};
use crate::models::Document;
use reader::CanorusMlReader;
use std::path::Path;
use writer::CanorusMlBuilder;

/// Value of the `version` attribute of the root node
pub const FORMAT_VERSION: &str = "1.0";

/// Serializes a document. Fails only if the document breaks one of its invariants.
pub fn write(doc: &Document) -> Result<String> {
    doc.validate()?;
    let mut builder = CanorusMlBuilder::new();
    builder.write_document(doc);
    let text = builder.finish();
    log::debug!("wrote {} sheet(s), {} bytes of CanorusML", doc.sheets.len(), text.len());
    Ok(text)
}

/// Parses a CanorusML document
pub fn read(text: &str) -> std::result::Result<Document, ParseError> {
    let xml = roxmltree::Document::parse(text).map_err(reader::syntax_error)?;
    let doc = CanorusMlReader::new(&xml).read_document()?;
    log::debug!("read {} sheet(s) of CanorusML", doc.sheets.len());
    Ok(doc)
}

pub fn read_file(path: impl AsRef<Path>) -> Result<Document> {
    let text = std::fs::read_to_string(path.as_ref())?;
    Ok(read(&text)?)
}

pub fn write_file(path: impl AsRef<Path>, doc: &Document) -> Result<()> {
    let text = write(doc)?;
    std::fs::write(path.as_ref(), text)?;
    log::info!("saved {}", path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EditorError;
    use crate::models::*;

    fn pitch(step: u8, accidental: i8, octave: i8) -> Pitch {
        Pitch::new(step, accidental, octave).unwrap()
    }

    fn sample() -> Document {
        let mut doc = Document::new();
        doc.metadata.title = "Sonatina \"in C\"".to_string();
        doc.metadata.composer = "Anon & Co.".to_string();
        doc.metadata.comments = "first line\nsecond\tline".to_string();

        let mut voice = Voice::new(1);
        voice.name = "melody".to_string();
        voice.stem_direction = StemDirection::Up;
        voice.instrument = "flute".to_string();
        voice.midi_channel = 3;
        voice.elements = vec![
            MusicElement::Clef(Clef::new(ClefKind::Treble)),
            MusicElement::KeySignature(KeySignature::new(
                PitchClass::new(4, 0).unwrap(),
                KeyMode::Major,
            )),
            MusicElement::TimeSignature(TimeSignature::new(3, 4)),
            MusicElement::Mark(Mark::Tempo(Tempo {
                text: Some("Allegro".to_string()),
                metronome: Some(Metronome {
                    beat: Duration::new(BaseLength::Quarter, 1).unwrap(),
                    bpm: 96,
                }),
            })),
            MusicElement::Note(Note::new(pitch(4, 0, 4), Duration::plain(BaseLength::Half))),
            MusicElement::Mark(Mark::Dynamic {
                dynamic: DynamicKind::MF,
            }),
            MusicElement::Note(Note::new(pitch(3, 1, 4), Duration::QUARTER)),
            MusicElement::Note(Note::chorded(pitch(5, 0, 4), Duration::QUARTER)),
            MusicElement::Mark(Mark::Text {
                text: "dolce <sempre>".to_string(),
                placement: Placement::Above,
            }),
            MusicElement::Barline(Barline::new(BarlineKind::RepeatOpen { times: 3 })),
            MusicElement::Mark(Mark::Repeat(RepeatMark::Volta { number: 1 })),
            MusicElement::Rest(Rest::new(Duration::new(BaseLength::Eighth, 2).unwrap())),
            MusicElement::Rest(Rest::spacer(Duration::plain(BaseLength::Sixteenth))),
            MusicElement::Mark(Mark::Fingering { finger: 4 }),
            MusicElement::Barline(Barline::new(BarlineKind::End)),
        ];

        let mut staff = Staff::new("Flute");
        staff.voices.push(voice);

        let mut sheet = Sheet::new("First movement");
        sheet.contexts.push(Context::Staff(staff));
        let mut sheet = doc.adopt_sheet(sheet);

        let voice = &mut sheet.contexts[0].as_staff_mut().unwrap().voices[0];
        let (first, second) = (voice.elements[4].id().unwrap(), voice.elements[6].id().unwrap());
        voice.spanners.push(Spanner::new(SpannerKind::Slur, first, second));
        let voice_id = voice.id;

        let mut lyrics = LyricsContext::new("Verse");
        lyrics.associated_voice = Some(voice_id);
        lyrics.stanza = 1;
        lyrics.syllables = vec![
            Syllable {
                text: "Hal".to_string(),
                hyphen: true,
                extender: false,
            },
            Syllable {
                text: "le".to_string(),
                hyphen: false,
                extender: true,
            },
        ];
        sheet.contexts.push(Context::Lyrics(lyrics));

        let mut functions = FunctionMarkingContext::new("Harmony");
        functions.associated_voice = Some(voice_id);
        functions.markings = vec![
            FunctionMarking::new(FunctionName::T, Duration::plain(BaseLength::Half)),
            FunctionMarking {
                function: FunctionName::D,
                key: Some("a".to_string()),
                minor: true,
                duration: Duration::QUARTER,
            },
        ];
        sheet.contexts.push(Context::FunctionMarking(functions));

        doc.sheets.push(sheet);
        doc
    }

    #[test]
    fn test_round_trip() {
        let doc = sample();
        let text = write(&doc).unwrap();
        let back = read(&text).unwrap();
        assert_eq!(back, doc);
        // Writing again is stable
        assert_eq!(write(&back).unwrap(), text);
    }

    #[test]
    fn test_special_characters_are_escaped() {
        let text = write(&sample()).unwrap();
        assert!(text.contains("Sonatina &quot;in C&quot;"));
        assert!(text.contains("Anon &amp; Co."));
        assert!(text.contains("first line&#10;second&#9;line"));
        assert!(text.contains("dolce &lt;sempre&gt;"));
    }

    #[test]
    fn test_unknown_attributes_survive() {
        let text = r#"<?xml version="1.0"?>
<canorus version="1.0">
  <document title="T" colour="blue">
    <sheet name="S" zoom="2">
      <staff name="Staff" number-of-lines="5" hidden="no">
        <voice number="1" tag="x">
          <note step="0" accidental="0" octave="4" length="quarter" dots="0" tint="red"/>
        </voice>
      </staff>
    </sheet>
  </document>
</canorus>"#;
        let doc = read(text).unwrap();
        assert_eq!(doc.extra.get("colour").map(String::as_str), Some("blue"));
        assert_eq!(doc.sheets[0].extra.get("zoom").map(String::as_str), Some("2"));

        let staff = doc.sheets[0].contexts[0].as_staff().unwrap();
        assert_eq!(staff.extra.get("hidden").map(String::as_str), Some("no"));
        assert_eq!(staff.voices[0].extra.get("tag").map(String::as_str), Some("x"));
        match &staff.voices[0].elements[0] {
            MusicElement::Note(note) => {
                assert_eq!(note.extra.get("tint").map(String::as_str), Some("red"));
                assert!(note.id.is_assigned());
            }
            other => panic!("expected a note, got {:?}", other),
        }
        assert!(staff.voices[0].id.is_assigned());

        let again = write(&doc).unwrap();
        assert!(again.contains("colour=\"blue\""));
        assert!(again.contains("tint=\"red\""));
    }

    #[test]
    fn test_extra_keys_that_are_not_xml_names_are_skipped() {
        let mut doc = Document::new();
        doc.extra.insert("bad key".to_string(), "1".to_string());
        doc.extra.insert("a=b".to_string(), "2".to_string());
        doc.extra.insert("xmlns".to_string(), "urn:x".to_string());
        doc.extra.insert("layout-hint".to_string(), "wide".to_string());

        let text = write(&doc).unwrap();
        let back = read(&text).expect("written file reads back");
        assert_eq!(back.extra.len(), 1);
        assert_eq!(back.extra.get("layout-hint").map(String::as_str), Some("wide"));
    }

    #[test]
    fn test_unknown_children_are_dropped() {
        let text = r#"<canorus version="1.0">
  <document>
    <sheet name="S">
      <staff name="Staff">
        <voice number="1">
          <glissando/>
          <rest length="whole" dots="0"/>
        </voice>
      </staff>
      <chord-names name="C"/>
    </sheet>
  </document>
</canorus>"#;
        let doc = read(text).unwrap();
        assert_eq!(doc.sheets[0].contexts.len(), 1);
        let voice = &doc.sheets[0].contexts[0].as_staff().unwrap().voices[0];
        assert_eq!(voice.elements.len(), 1);
        assert!(matches!(voice.elements[0], MusicElement::Rest(_)));
    }

    #[test]
    fn test_parse_error_position() {
        let text = "<canorus version=\"1.0\">\n  <document>\n    <sheet/>\n  </document>\n</canorus>";
        let err = read(text).unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(err.column, 5);
        assert!(err.message.contains("name"));
    }

    #[test]
    fn test_malformed_xml() {
        let err = read("<canorus><document></canorus>").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_wrong_root() {
        let err = read("<score/>").unwrap_err();
        assert!(err.message.contains("canorus"));
    }

    #[test]
    fn test_invalid_document_is_not_written() {
        let mut doc = Document::new();
        doc.sheets.push(Sheet::new("A"));
        doc.sheets.push(Sheet::new("A"));
        assert!(matches!(write(&doc), Err(EditorError::StructuralViolation(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("score.can");
        let doc = sample();
        write_file(&path, &doc).unwrap();
        assert_eq!(read_file(&path).unwrap(), doc);
        assert!(matches!(
            read_file(dir.path().join("missing.can")),
            Err(EditorError::Io(_))
        ));
    }
}
