use crate::error::IngestError;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

const TATWEEL: char = '\u{0640}';

/// Common Arabic function words dropped from page text before storage.
const BUILTIN_STOP_WORDS: &[&str] = &[
    "التي", "الذي", "الذين", "اللذان", "اللتان", "اللواتي", "هذا", "هذه", "ذلك", "تلك",
    "هؤلاء", "أولئك", "على", "إلى", "الى", "عن", "في", "من", "مع", "عند", "لدى", "حتى",
    "إذا", "اذا", "إذ", "ثم", "أو", "او", "أم", "بل", "لكن", "كان", "كانت", "يكون",
    "تكون", "ليس", "ليست", "قد", "لقد", "كل", "بعض", "غير", "بين", "حيث", "كما", "لما",
    "مما", "عليه", "عليها", "فيه", "فيها", "منه", "منها", "إليه", "إليها", "وفي", "وقد",
    "وهو", "وهي", "هو", "هي", "هم", "هن", "نحن", "أنت", "أنا", "أي", "أيضا", "بعد", "قبل",
    "دون", "ضمن", "خلال", "عدة", "وذلك", "ولا", "وما", "وإن", "أن", "إن", "ان", "لم", "لن",
];

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Harakat, shadda and sukun (U+064B..=U+0652).
pub fn is_tashkeel(ch: char) -> bool {
    ('\u{064B}'..='\u{0652}').contains(&ch)
}

pub fn strip_tashkeel(text: &str) -> String {
    text.chars().filter(|ch| !is_tashkeel(*ch)).collect()
}

pub fn strip_tatweel(text: &str) -> String {
    text.chars().filter(|ch| *ch != TATWEEL).collect()
}

/// Canonical form used for both index storage and queries.
///
/// Folds alef variants to bare alef, alef maqsura and yeh-with-hamza to yeh,
/// waw-with-hamza to waw and ta marbuta to heh, then drops diacritics,
/// combining maddah/hamza marks and tatweel. None of the produced characters
/// is itself rewritten, so applying it twice changes nothing.
pub fn normalize_arabic(text: &str) -> String {
    text.chars()
        .filter_map(|ch| match ch {
            'أ' | 'إ' | 'آ' | 'ٱ' => Some('ا'),
            'ى' | 'ئ' => Some('ي'),
            'ؤ' => Some('و'),
            'ة' => Some('ه'),
            '\u{0653}' | '\u{0654}' | '\u{0655}' | TATWEEL => None,
            other if is_tashkeel(other) => None,
            other => Some(other),
        })
        .collect()
}

/// Turns raw OCR output into the word list stored per page: symbols, digits,
/// diacritics, stop words and words outside the length window are removed.
#[derive(Debug, Clone)]
pub struct TextCleaner {
    symbols: Regex,
    digits: Regex,
    stop_words: HashSet<String>,
    min_chars: usize,
    max_chars: usize,
}

impl TextCleaner {
    pub fn new(min_chars: usize, max_chars: usize) -> Result<Self, IngestError> {
        if min_chars > max_chars {
            return Err(IngestError::InvalidArgument(format!(
                "word length window {min_chars}..={max_chars} is empty"
            )));
        }

        Ok(Self {
            symbols: Regex::new(r"[^\w\s\x{0600}-\x{06FF}]")?,
            digits: Regex::new(r"[0-9\x{0660}-\x{0669}]")?,
            stop_words: BUILTIN_STOP_WORDS
                .iter()
                .map(|word| word.to_string())
                .collect(),
            min_chars,
            max_chars,
        })
    }

    /// Adds one word per line from each file (stop-word lists, Quran word
    /// lists and the like).
    pub fn with_word_lists(mut self, files: &[PathBuf]) -> Result<Self, IngestError> {
        for file in files {
            let raw = fs::read_to_string(file)?;
            let before = self.stop_words.len();
            self.stop_words.extend(
                raw.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            );
            debug!(
                file = %file.display(),
                added = self.stop_words.len() - before,
                "loaded word list"
            );
        }
        Ok(self)
    }

    pub fn clean(&self, text: &str) -> String {
        let without_symbols = self.symbols.replace_all(text, "");
        let without_digits = self.digits.replace_all(&without_symbols, "");
        let stripped = strip_tatweel(&strip_tashkeel(&without_digits));

        stripped
            .split_whitespace()
            .filter(|word| !self.stop_words.contains(*word))
            .filter(|word| {
                let length = word.chars().count();
                length >= self.min_chars && length <= self.max_chars
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "المادةُ (١٢): يُعاقَبُ كلُّ مَنْ أَخلَّ بأحكامِ هذا القانونِ — رقم 45 لسنة ٢٠١٠ ـــ مسؤولية الإدارة";

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        let normalized = normalize_whitespace(input);
        assert_eq!(normalized, "A lot of spacing");
    }

    #[test]
    fn arabic_normalization_folds_letter_variants() {
        assert_eq!(normalize_arabic("أحمد إلى آخر"), "احمد الي اخر");
        assert_eq!(normalize_arabic("مسؤولية الشركة"), "مسووليه الشركه");
        assert_eq!(normalize_arabic("قَانُونٌ"), "قانون");
        assert_eq!(normalize_arabic("ٱلله"), "الله");
    }

    #[test]
    fn arabic_normalization_is_idempotent() {
        let samples = [
            SAMPLE,
            "ٱلْحَمْدُ لِلَّهِ رَبِّ ٱلْعَـٰلَمِينَ",
            "Mixed نصٌّ with Latin and أرقام 123",
            "ا\u{0654}\u{0655}\u{0653}ئؤة",
            "",
        ];
        for sample in samples {
            let once = normalize_arabic(sample);
            assert_eq!(normalize_arabic(&once), once, "sample: {sample}");
        }
    }

    #[test]
    fn cleaning_drops_digits_symbols_diacritics_and_short_words() -> Result<(), IngestError> {
        let cleaner = TextCleaner::new(3, 10)?;
        let cleaned = cleaner.clean(SAMPLE);

        assert!(!cleaned.contains('١'));
        assert!(!cleaned.contains("45"));
        assert!(!cleaned.contains('('));
        assert!(!cleaned.contains('\u{064F}'));
        assert!(!cleaned.contains(TATWEEL));
        assert!(!cleaned.split(' ').any(|word| word == "هذا"));
        assert!(cleaned.contains("يعاقب"));
        assert!(cleaned.contains("القانون"));
        Ok(())
    }

    #[test]
    fn cleaning_is_idempotent() -> Result<(), IngestError> {
        let cleaner = TextCleaner::new(3, 10)?;
        for sample in [SAMPLE, "  كلمة    أخرى\n\nسطر_جديد ٣٣ ", ""] {
            let once = cleaner.clean(sample);
            assert_eq!(cleaner.clean(&once), once);
        }
        Ok(())
    }

    #[test]
    fn word_lists_extend_stop_words() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let list = dir.path().join("extra.txt");
        std::fs::write(&list, "المحكمة\n\n  الدعوى \n")?;

        let cleaner = TextCleaner::new(3, 10)?.with_word_lists(&[list])?;
        assert_eq!(cleaner.clean("المحكمة نظرت الدعوى"), "نظرت");
        Ok(())
    }
}
