use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};

/// Lowercase hex SHA-512 of a file's full byte content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub const HEX_LEN: usize = 128;

    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Ok(Self::from_hex(hex))
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContent {
    pub page: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub word: String,
    pub score: f64,
}

/// Keywords in ranked order, persisted as a `{word: score}` object whose
/// keys keep that order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WordCloud(Vec<Keyword>);

impl WordCloud {
    pub fn new(keywords: Vec<Keyword>) -> Self {
        Self(keywords)
    }

    pub fn keywords(&self) -> &[Keyword] {
        &self.0
    }

    pub fn contains(&self, word: &str) -> bool {
        self.0.iter().any(|keyword| keyword.word == word)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for WordCloud {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|keyword| (&keyword.word, keyword.score)))
    }
}

impl<'de> Deserialize<'de> for WordCloud {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct WordCloudVisitor;

        impl<'de> Visitor<'de> for WordCloudVisitor {
            type Value = WordCloud;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object of word scores")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut keywords = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((word, score)) = map.next_entry::<String, f64>()? {
                    keywords.push(Keyword { word, score });
                }
                Ok(WordCloud(keywords))
            }
        }

        deserializer.deserialize_map(WordCloudVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntityKind {
    #[serde(rename = "PERS")]
    Person,
    #[serde(rename = "ORG")]
    Organization,
    #[serde(rename = "LOC")]
    Location,
    #[serde(rename = "MISC")]
    Other,
}

impl EntityKind {
    /// Maps a model tag, with or without a `B-`/`I-` prefix, to a kind.
    /// Unrecognised tags become [`EntityKind::Other`].
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim_start_matches("B-").trim_start_matches("I-") {
            "PERS" | "PER" => Self::Person,
            "ORG" => Self::Organization,
            "LOC" => Self::Location,
            _ => Self::Other,
        }
    }
}

impl<'de> Deserialize<'de> for EntityKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from_tag(&tag))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedEntity {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub score: f64,
}

/// The persisted JSON document stored next to each archived PDF.
///
/// Fields only ever get added over a record's lifetime; keys this type does
/// not know about are carried through `extra` so a rewrite never drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    #[serde(default)]
    pub sha512: ContentDigest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_name: Option<String>,
    #[serde(default)]
    pub contents: Vec<PageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wordcloud_data: Option<WordCloud>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_info: Option<Vec<NamedEntity>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DocumentRecord {
    pub fn new(sha512: ContentDigest, contents: Vec<PageContent>) -> Self {
        Self {
            sha512,
            book_name: None,
            contents,
            wordcloud_data: None,
            book_info: None,
            extra: Map::new(),
        }
    }

    /// Applies every field the patch carries. Absent patch fields leave the
    /// record untouched, so merging can never remove data.
    pub fn merge(&mut self, patch: RecordPatch) {
        if let Some(book_name) = patch.book_name {
            self.book_name = Some(book_name);
        }
        if let Some(keywords) = patch.wordcloud_data {
            self.wordcloud_data = Some(WordCloud::new(keywords));
        }
        if let Some(entities) = patch.book_info {
            self.book_info = Some(entities);
        }
    }

    pub fn joined_text(&self, max_pages: usize) -> String {
        self.contents
            .iter()
            .take(max_pages)
            .map(|page| page.text.as_str())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Keywords ordered by descending score.
    pub fn ranked_keywords(&self) -> Vec<Keyword> {
        let mut ranked: Vec<Keyword> = self
            .wordcloud_data
            .as_ref()
            .map(|cloud| cloud.keywords().to_vec())
            .unwrap_or_default();
        ranked.sort_by(|left, right| right.score.total_cmp(&left.score));
        ranked
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub book_name: Option<String>,
    pub wordcloud_data: Option<Vec<Keyword>>,
    pub book_info: Option<Vec<NamedEntity>>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        self.book_name.is_none() && self.wordcloud_data.is_none() && self.book_info.is_none()
    }
}

/// A record together with where its files live inside the archive.
#[derive(Debug, Clone)]
pub struct ArchivedDocument {
    pub record: DocumentRecord,
    pub record_path: PathBuf,
    pub pdf_path: PathBuf,
    pub image_path: Option<PathBuf>,
}

impl ArchivedDocument {
    pub fn digest(&self) -> &ContentDigest {
        &self.record.sha512
    }

    pub fn title(&self) -> String {
        match &self.record.book_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => file_name_of(&self.record_path),
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Archived(Box<ArchivedDocument>),
    Duplicate { digest: ContentDigest },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub archive_dir: PathBuf,
    pub index_dir: PathBuf,
    pub shard_capacity: usize,
    pub workers: usize,
    pub ocr_language: String,
    pub dpi: u32,
    pub stop_word_files: Vec<PathBuf>,
    pub min_word_chars: usize,
    pub max_word_chars: usize,
    pub keyword_count: usize,
    pub keyword_min_chars: usize,
    pub entity_count: usize,
    pub entity_min_chars: usize,
    pub entity_pages: usize,
    pub thumbnail_width: u32,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            archive_dir: PathBuf::from("PDF_JSON"),
            index_dir: PathBuf::from("indexdir"),
            shard_capacity: 200,
            workers: 2,
            ocr_language: "ara".to_string(),
            dpi: 300,
            stop_word_files: Vec::new(),
            min_word_chars: 3,
            max_word_chars: 10,
            keyword_count: 10,
            keyword_min_chars: 3,
            entity_count: 5,
            entity_min_chars: 4,
            entity_pages: 5,
            thumbnail_width: 600,
        }
    }
}

impl ArchiveConfig {
    /// Reads a JSON config file; keys missing from the file keep their defaults.
    pub fn load(path: &Path) -> Result<Self, crate::IngestError> {
        let raw = std::fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub limit: usize,
    /// Join terms with OR instead of requiring all of them.
    pub match_any: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub pdf_path: String,
    pub page: u64,
    pub image_path: Option<String>,
    pub excerpt: String,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_survive_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let raw = r#"{"sha512":" ABC\n","contents":[{"page":1,"text":"نص"}],"reviewed_by":"x"}"#;
        let record: DocumentRecord = serde_json::from_str(raw)?;
        assert_eq!(record.sha512.as_str(), "abc");
        assert_eq!(record.extra.get("reviewed_by"), Some(&Value::from("x")));

        let written = serde_json::to_value(&record)?;
        assert_eq!(written["reviewed_by"], "x");
        assert!(written.get("book_name").is_none());
        Ok(())
    }

    #[test]
    fn merge_only_adds_fields() {
        let mut record = DocumentRecord::new(ContentDigest::from_hex("aa"), Vec::new());
        record.merge(RecordPatch {
            book_name: Some("قانون العمل".to_string()),
            ..RecordPatch::default()
        });
        record.merge(RecordPatch {
            wordcloud_data: Some(vec![Keyword {
                word: "العمل".to_string(),
                score: 0.5,
            }]),
            ..RecordPatch::default()
        });

        assert_eq!(record.book_name.as_deref(), Some("قانون العمل"));
        assert_eq!(record.ranked_keywords().len(), 1);
    }

    #[test]
    fn word_cloud_keeps_ranked_order_on_disk() -> Result<(), Box<dyn std::error::Error>> {
        let mut record = DocumentRecord::new(ContentDigest::from_hex("aa"), Vec::new());
        record.merge(RecordPatch {
            wordcloud_data: Some(vec![
                Keyword {
                    word: "قانون".to_string(),
                    score: 0.8,
                },
                Keyword {
                    word: "العمل".to_string(),
                    score: 0.6,
                },
            ]),
            ..RecordPatch::default()
        });

        let raw = serde_json::to_string(&record)?;
        let first = raw.find("قانون").ok_or("missing first keyword")?;
        let second = raw.find("العمل").ok_or("missing second keyword")?;
        assert!(first < second);

        let reread: DocumentRecord = serde_json::from_str(&raw)?;
        assert_eq!(reread.wordcloud_data, record.wordcloud_data);
        let words: Vec<String> = reread
            .ranked_keywords()
            .into_iter()
            .map(|keyword| keyword.word)
            .collect();
        assert_eq!(words, vec!["قانون", "العمل"]);
        Ok(())
    }

    #[test]
    fn entity_tags_use_wire_names() -> Result<(), Box<dyn std::error::Error>> {
        let raw = r#"[{"text":"وزارة العدل","type":"ORG","score":0.9},{"text":"x","type":"B-XYZ","score":0.1}]"#;
        let entities: Vec<NamedEntity> = serde_json::from_str(raw)?;
        assert_eq!(entities[0].kind, EntityKind::Organization);
        assert_eq!(entities[1].kind, EntityKind::Other);
        Ok(())
    }

    #[test]
    fn config_file_fills_missing_keys_with_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"shard_capacity": 50}"#)?;

        let config = ArchiveConfig::load(&path)?;
        assert_eq!(config.shard_capacity, 50);
        assert_eq!(config.ocr_language, "ara");
        Ok(())
    }
}
