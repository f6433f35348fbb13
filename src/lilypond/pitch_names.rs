//! Note name tables of the LilyPond input languages

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// LilyPond note-name language, as selected with `\language "..."`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PitchLanguage {
    #[default]
    Nederlands,
    English,
    Deutsch,
    Italiano,
}

type NameTable = HashMap<String, (u8, i8)>;

const LETTERS: [&str; 7] = ["c", "d", "e", "f", "g", "a", "b"];
const SOLFEGE: [&str; 7] = ["do", "re", "mi", "fa", "sol", "la", "si"];

/// Suffixes for accidentals -2..=2 in Dutch-derived languages
const DUTCH_SUFFIXES: [(&str, i8); 5] = [("eses", -2), ("es", -1), ("", 0), ("is", 1), ("isis", 2)];

static NEDERLANDS: Lazy<NameTable> = Lazy::new(|| {
    let mut table = suffixed(&LETTERS, &DUTCH_SUFFIXES);
    // Contracted flats of e and a
    table.insert("es".into(), (2, -1));
    table.insert("eses".into(), (2, -2));
    table.insert("as".into(), (5, -1));
    table.insert("ases".into(), (5, -2));
    table
});

static ENGLISH: Lazy<NameTable> = Lazy::new(|| {
    suffixed(
        &LETTERS,
        &[
            ("ff", -2),
            ("flatflat", -2),
            ("-flatflat", -2),
            ("f", -1),
            ("flat", -1),
            ("-flat", -1),
            ("", 0),
            ("s", 1),
            ("sharp", 1),
            ("-sharp", 1),
            ("ss", 2),
            ("x", 2),
            ("sharpsharp", 2),
            ("-sharpsharp", 2),
        ],
    )
});

static DEUTSCH: Lazy<NameTable> = Lazy::new(|| {
    let letters = ["c", "d", "e", "f", "g", "a", "h"];
    let mut table = suffixed(&letters, &DUTCH_SUFFIXES);
    table.remove("hes");
    table.remove("heses");
    table.insert("b".into(), (6, -1));
    table.insert("heses".into(), (6, -2));
    table.insert("es".into(), (2, -1));
    table.insert("eses".into(), (2, -2));
    table.insert("as".into(), (5, -1));
    table.insert("ases".into(), (5, -2));
    table
});

static ITALIANO: Lazy<NameTable> = Lazy::new(|| {
    suffixed(&SOLFEGE, &[("bb", -2), ("b", -1), ("", 0), ("d", 1), ("dd", 2)])
});

fn suffixed(bases: &[&str; 7], suffixes: &[(&str, i8)]) -> NameTable {
    let mut table = NameTable::new();
    for (step, base) in bases.iter().enumerate() {
        for (suffix, accidental) in suffixes {
            table.insert(format!("{}{}", base, suffix), (step as u8, *accidental));
        }
    }
    table
}

impl PitchLanguage {
    pub const ALL: [PitchLanguage; 4] = [
        PitchLanguage::Nederlands,
        PitchLanguage::English,
        PitchLanguage::Deutsch,
        PitchLanguage::Italiano,
    ];

    /// Name used by `\language`
    pub fn name(self) -> &'static str {
        match self {
            PitchLanguage::Nederlands => "nederlands",
            PitchLanguage::English => "english",
            PitchLanguage::Deutsch => "deutsch",
            PitchLanguage::Italiano => "italiano",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        PitchLanguage::ALL.iter().copied().find(|l| l.name() == name)
    }

    fn table(self) -> &'static NameTable {
        match self {
            PitchLanguage::Nederlands => &NEDERLANDS,
            PitchLanguage::English => &ENGLISH,
            PitchLanguage::Deutsch => &DEUTSCH,
            PitchLanguage::Italiano => &ITALIANO,
        }
    }

    /// Step and accidental of a note name
    pub fn lookup(self, name: &str) -> Option<(u8, i8)> {
        self.table().get(name).copied()
    }

    /// Canonical spelling of a step with an accidental
    pub fn spell(self, step: u8, accidental: i8) -> String {
        let step = (step as usize).min(6);
        match self {
            PitchLanguage::Nederlands => match (step, accidental) {
                (2, -1) => "es".to_string(),
                (2, -2) => "eses".to_string(),
                (5, -1) => "as".to_string(),
                (5, -2) => "ases".to_string(),
                _ => format!("{}{}", LETTERS[step], dutch_suffix(accidental)),
            },
            PitchLanguage::English => {
                let suffix = match accidental {
                    -2 => "ff",
                    -1 => "f",
                    1 => "s",
                    2 => "ss",
                    _ => "",
                };
                format!("{}{}", LETTERS[step], suffix)
            }
            PitchLanguage::Deutsch => match (step, accidental) {
                (6, -1) => "b".to_string(),
                (6, -2) => "heses".to_string(),
                (6, _) => format!("h{}", dutch_suffix(accidental)),
                (2, -1) => "es".to_string(),
                (2, -2) => "eses".to_string(),
                (5, -1) => "as".to_string(),
                (5, -2) => "ases".to_string(),
                _ => format!("{}{}", LETTERS[step], dutch_suffix(accidental)),
            },
            PitchLanguage::Italiano => {
                let suffix = match accidental {
                    -2 => "bb",
                    -1 => "b",
                    1 => "d",
                    2 => "dd",
                    _ => "",
                };
                format!("{}{}", SOLFEGE[step], suffix)
            }
        }
    }
}

fn dutch_suffix(accidental: i8) -> &'static str {
    match accidental {
        -2 => "eses",
        -1 => "es",
        1 => "is",
        2 => "isis",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(PitchLanguage::Nederlands.lookup("fis"), Some((3, 1)));
        assert_eq!(PitchLanguage::Nederlands.lookup("es"), Some((2, -1)));
        assert_eq!(PitchLanguage::Nederlands.lookup("ees"), Some((2, -1)));
        assert_eq!(PitchLanguage::English.lookup("bf"), Some((6, -1)));
        assert_eq!(PitchLanguage::English.lookup("c-sharp"), Some((0, 1)));
        assert_eq!(PitchLanguage::Deutsch.lookup("h"), Some((6, 0)));
        assert_eq!(PitchLanguage::Deutsch.lookup("b"), Some((6, -1)));
        assert_eq!(PitchLanguage::Italiano.lookup("solb"), Some((4, -1)));
        assert_eq!(PitchLanguage::Nederlands.lookup("h"), None);
        assert_eq!(PitchLanguage::Nederlands.lookup("r"), None);
    }

    #[test]
    fn test_spelling_reads_back() {
        for language in PitchLanguage::ALL {
            for step in 0..7u8 {
                for accidental in -2..=2i8 {
                    let name = language.spell(step, accidental);
                    assert_eq!(
                        language.lookup(&name),
                        Some((step, accidental)),
                        "{:?} {}",
                        language,
                        name
                    );
                }
            }
        }
    }
}
