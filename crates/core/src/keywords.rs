use crate::error::IngestError;
use crate::models::{EntityKind, Keyword, NamedEntity};
use crate::normalize::strip_tashkeel;
use crate::traits::{EntityExtractor, KeywordExtractor};
use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Term weighting over a single document: raw counts scaled to unit L2
/// norm, which is what TF-IDF reduces to when the corpus is one document.
#[derive(Debug, Clone)]
pub struct TfIdfKeywords {
    non_arabic: Regex,
}

impl TfIdfKeywords {
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self {
            non_arabic: Regex::new(r"[^\x{0600}-\x{06FF}\s]")?,
        })
    }
}

impl KeywordExtractor for TfIdfKeywords {
    fn top_keywords(&self, text: &str, min_chars: usize, max_count: usize) -> Vec<Keyword> {
        let arabic_only = strip_tashkeel(&self.non_arabic.replace_all(text, ""));
        let min_chars = min_chars.max(2);

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for word in arabic_only
            .split(|ch: char| !ch.is_alphabetic())
            .filter(|word| word.chars().count() >= min_chars)
        {
            *counts.entry(word).or_default() += 1;
        }

        let norm = counts
            .values()
            .map(|count| (*count as f64).powi(2))
            .sum::<f64>()
            .sqrt();
        if norm == 0.0 {
            return Vec::new();
        }

        let mut keywords: Vec<Keyword> = counts
            .into_iter()
            .map(|(word, count)| Keyword {
                word: word.to_string(),
                score: count as f64 / norm,
            })
            .collect();

        keywords.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.word.cmp(&right.word))
        });
        keywords.truncate(max_count);
        keywords
    }
}

/// Used when no entity model is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEntities;

impl EntityExtractor for NoEntities {
    fn entities(
        &self,
        _text: &str,
        _max_count: usize,
        _min_chars: usize,
    ) -> Result<Vec<NamedEntity>, IngestError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone)]
pub struct NerEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct NerRequest<'a> {
    inputs: &'a str,
}

/// One span as emitted by a token-classification pipeline with
/// aggregation enabled.
#[derive(Debug, Clone, Deserialize)]
struct NerSpan {
    word: String,
    entity_group: String,
    score: f64,
}

/// Named-entity recognition served over HTTP. Text is sent in chunks so a
/// long document never exceeds the model's input window, and requests stop
/// once enough entities have been collected.
#[derive(Debug, Clone)]
pub struct HttpEntityExtractor {
    config: NerEndpointConfig,
    chunk_chars: usize,
}

impl HttpEntityExtractor {
    pub fn new(config: NerEndpointConfig) -> Self {
        Self {
            config,
            chunk_chars: 1_500,
        }
    }

    fn request(&self, client: &Client, chunk: &str) -> Result<Vec<NerSpan>, IngestError> {
        let mut request = client
            .post(&self.config.endpoint)
            .json(&NerRequest { inputs: chunk });
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(IngestError::InvalidArgument(format!(
                "entity request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        Ok(response.json()?)
    }
}

impl EntityExtractor for HttpEntityExtractor {
    fn entities(
        &self,
        text: &str,
        max_count: usize,
        min_chars: usize,
    ) -> Result<Vec<NamedEntity>, IngestError> {
        let mut collected = Vec::new();
        if text.trim().is_empty() || max_count == 0 {
            return Ok(collected);
        }

        let client = Client::new();
        for chunk in char_chunks(text, self.chunk_chars) {
            let spans = self.request(&client, &chunk)?;
            collected.extend(spans_to_entities(spans, min_chars));
            if collected.len() >= max_count {
                break;
            }
        }

        collected.truncate(max_count);
        Ok(collected)
    }
}

fn spans_to_entities(spans: Vec<NerSpan>, min_chars: usize) -> Vec<NamedEntity> {
    spans
        .into_iter()
        .filter_map(|span| {
            let text = span.word.trim().to_string();
            if text.chars().count() < min_chars {
                return None;
            }
            Some(NamedEntity {
                text,
                kind: EntityKind::from_tag(&span.entity_group),
                score: (span.score * 1000.0).round() / 1000.0,
            })
        })
        .collect()
}

fn char_chunks(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_rank_by_frequency() -> Result<(), IngestError> {
        let extractor = TfIdfKeywords::new()?;
        let text = "العقد العقد العقد الطرف الطرف التزام abc 123 من";
        let keywords = extractor.top_keywords(text, 3, 10);

        let words: Vec<&str> = keywords.iter().map(|item| item.word.as_str()).collect();
        assert_eq!(words, vec!["العقد", "الطرف", "التزام"]);

        let norm: f64 = keywords.iter().map(|item| item.score * item.score).sum();
        assert!((norm - 1.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn keywords_respect_limits() -> Result<(), IngestError> {
        let extractor = TfIdfKeywords::new()?;
        assert!(extractor.top_keywords("", 3, 10).is_empty());
        assert!(extractor.top_keywords("English only text", 3, 10).is_empty());
        assert_eq!(extractor.top_keywords("اول ثاني ثالث رابع", 3, 2).len(), 2);
        Ok(())
    }

    #[test]
    fn spans_are_filtered_and_tagged() {
        let spans = vec![
            NerSpan {
                word: " محمد علي ".to_string(),
                entity_group: "PERS".to_string(),
                score: 0.98765,
            },
            NerSpan {
                word: "مصر".to_string(),
                entity_group: "LOC".to_string(),
                score: 0.9,
            },
            NerSpan {
                word: "وزارة العدل".to_string(),
                entity_group: "B-ORG".to_string(),
                score: 0.5,
            },
        ];

        let entities = spans_to_entities(spans, 4);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].text, "محمد علي");
        assert_eq!(entities[0].kind, EntityKind::Person);
        assert_eq!(entities[0].score, 0.988);
        assert_eq!(entities[1].kind, EntityKind::Organization);
    }

    #[test]
    fn chunks_split_on_characters() {
        let chunks = char_chunks("أبجدهوز", 3);
        assert_eq!(chunks, vec!["أبج", "دهو", "ز"]);
    }

    #[test]
    fn no_entities_is_empty() -> Result<(), IngestError> {
        assert!(NoEntities.entities("نص", 5, 1)?.is_empty());
        Ok(())
    }
}
