// Test CanorusML save/load of documents built by import and by edit commands

use canorus_core::canorusml;
use canorus_core::lilypond;
use canorus_core::models::*;
use canorus_core::undo::{Command, EditSession};
use canorus_core::EditorError;

const DUET: &str = r#"\header { title = "Duet" poet = "Anon" }
\score {
  <<
    \new Staff = "Upper" <<
      \new Voice = "one" \relative c'' { \voiceOne e4 d c2 }
      \new Voice = "two" \relative c' { \voiceTwo c4 b c2 }
    >>
    \new Lyrics \lyricsto "one" { Ah -- men __ }
    \new Staff = "Lower" { \clef bass \time 2/4 c4 r \bar "||" }
  >>
}"#;

#[test]
fn test_imported_document_survives_save_and_load() {
    let doc = lilypond::import(DUET).expect("duet imports");
    let text = canorusml::write(&doc).expect("valid document saves");
    assert!(text.starts_with("<?xml"));
    assert!(text.contains("<canorus version=\"1.0\""));

    let loaded = canorusml::read(&text).expect("saved text loads");
    assert_eq!(loaded, doc);

    let upper = loaded.sheets[0].contexts[0].as_staff().unwrap();
    assert_eq!(upper.voices.len(), 2);
    assert_eq!(upper.voices[0].stem_direction, StemDirection::Up);
    assert_eq!(upper.voices[1].stem_direction, StemDirection::Down);
}

#[test]
fn test_loaded_document_is_editable() {
    let doc = lilypond::import(DUET).expect("duet imports");
    let loaded = canorusml::read(&canorusml::write(&doc).unwrap()).unwrap();

    let mut session = EditSession::new(loaded);
    let note = MusicElement::Note(Note::new(Pitch::new(1, 0, 4).unwrap(), Duration::QUARTER));
    session
        .execute(Command::insert_element(VoiceLocation::new(0, 0, 0), 0, note))
        .expect("insert into the first voice");
    // The loaded id allocator hands out ids above every id in the file
    session.document().validate().expect("no id collision after load");
}

#[test]
fn test_file_save_and_load() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("duet.can");
    let doc = lilypond::import(DUET).expect("duet imports");

    canorusml::write_file(&path, &doc).expect("file saves");
    let loaded = canorusml::read_file(&path).expect("file loads");
    assert_eq!(loaded, doc);

    let lily = dir.path().join("duet.ly");
    lilypond::export_file(&lily, &loaded).expect("LilyPond file written");
    let again = lilypond::import_file(&lily).expect("LilyPond file reads back");
    assert_eq!(again.metadata.title, "Duet");
    assert_eq!(again.sheets[0].voices().count(), 3);
}

#[test]
fn test_truncated_file_reports_position() {
    let doc = lilypond::import(DUET).expect("duet imports");
    let text = canorusml::write(&doc).unwrap();
    let truncated = &text[..text.len() / 2];
    let error = canorusml::read(truncated).expect_err("truncated xml is rejected");
    assert!(error.line >= 1);

    let as_editor_error: EditorError = error.into();
    assert!(matches!(as_editor_error, EditorError::Parse(_)));
}
