//! Facts record and the normalizer that asks the generative service to fill it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ai::{GenerationRequest, TextGenerator};
use crate::classifier::FileCategory;
use crate::error::{PipelineError, PipelineResult};
use crate::extract::Extraction;
use crate::models::ReportFile;

pub const DEFAULT_INPUT_BUDGET: usize = 8000;
const FACTS_TEMPERATURE: f32 = 0.3;

const FACTS_PROMPT: &str = r#"Extract the following information from the documents above and return it as JSON:

{
  "activity_name": "nama kegiatan",
  "activity_purpose": "tujuan kegiatan",
  "location": "lokasi kegiatan",
  "date_start": "YYYY-MM-DD",
  "date_end": "YYYY-MM-DD",
  "unit": "unit/instansi penyelenggara",
  "organizer": "penyelenggara",
  "participants": [
    {"name": "nama", "role": "jabatan", "organization": "instansi"}
  ],
  "agenda": [
    {"time": "HH:MM", "activity": "kegiatan", "speaker": "pembicara", "location": "tempat"}
  ],
  "activity_summary": "ringkasan kegiatan",
  "key_outcomes": ["hasil 1", "hasil 2"]
}

Extract as much information as possible. If a field is not found, use null.
Return ONLY valid JSON, no other text."#;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Facts {
    #[serde(deserialize_with = "lenient_string")]
    pub activity_name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub activity_purpose: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub location: Option<String>,
    #[serde(deserialize_with = "lenient_date")]
    pub date_start: Option<NaiveDate>,
    #[serde(deserialize_with = "lenient_date")]
    pub date_end: Option<NaiveDate>,
    #[serde(deserialize_with = "lenient_string")]
    pub unit: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub organizer: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub participants: Vec<ParticipantFact>,
    #[serde(deserialize_with = "lenient_list")]
    pub agenda: Vec<AgendaItem>,
    #[serde(deserialize_with = "lenient_string")]
    pub activity_summary: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub key_outcomes: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub attachments: Vec<AttachmentFact>,
    pub raw_extractions: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantFact {
    pub name: String,
    pub role: Option<String>,
    pub organization: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgendaItem {
    pub time: Option<String>,
    pub activity: String,
    pub speaker: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentFact {
    pub file_id: Uuid,
    pub kind: FileCategory,
    pub filename: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub page_reference: Option<i32>,
}

impl Facts {
    fn normalize(&mut self) {
        self.participants.retain(|p| !p.name.trim().is_empty());
        self.agenda.retain(|item| !item.activity.trim().is_empty());
        self.key_outcomes.retain(|outcome| !outcome.trim().is_empty());
    }
}

/// Strings pass through; any other JSON type becomes `None`.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => Some(text),
        _ => None,
    })
}

/// Accepts `YYYY-MM-DD`, a datetime with that prefix, `null` or garbage (as `None`).
fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(Value::as_str).and_then(|raw| {
        let raw = raw.trim();
        raw.get(..10)
            .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
    }))
}

/// `null` becomes empty; items that do not fit the element shape are dropped.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let items = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

/// Parses the generative service's answer: the whole response as JSON first, then the
/// first fenced code block.
pub fn parse_facts_response(response: &str) -> PipelineResult<Facts> {
    let trimmed = response.trim();
    let mut facts = match serde_json::from_str::<Facts>(trimmed) {
        Ok(facts) => facts,
        Err(direct_err) => {
            let fenced = fenced_block(trimmed).ok_or_else(|| {
                PipelineError::FactsParse(format!("{direct_err}; no fenced JSON block found"))
            })?;
            serde_json::from_str::<Facts>(fenced)
                .map_err(|err| PipelineError::FactsParse(format!("fenced block: {err}")))?
        }
    };
    facts.normalize();
    Ok(facts)
}

fn fenced_block(text: &str) -> Option<&str> {
    let (_, rest) = text
        .split_once("```json")
        .or_else(|| text.split_once("```"))?;
    let (block, _) = rest.split_once("```")?;
    Some(block.trim())
}

/// File-tagged text of every extraction, in upload order, cut to `budget` characters.
pub fn aggregate_text(
    extractions: &BTreeMap<Uuid, Extraction>,
    files: &[ReportFile],
    budget: usize,
) -> String {
    let mut parts = Vec::new();
    for file in files {
        let Some(extraction) = extractions.get(&file.id) else {
            continue;
        };
        if extraction.has_text() {
            parts.push(format!("=== File {} ===\n{}\n", file.id, extraction.full_text));
        }
        for table in &extraction.tables {
            match serde_json::to_string(table) {
                Ok(json) => parts.push(format!("Table: {json}\n")),
                Err(err) => tracing::debug!(file_id = %file.id, error = %err, "skipping table"),
            }
        }
    }
    parts.join("\n").chars().take(budget).collect()
}

pub fn build_attachments(files: &[ReportFile]) -> Vec<AttachmentFact> {
    files
        .iter()
        .map(|file| AttachmentFact {
            file_id: file.id,
            kind: file
                .kind
                .as_deref()
                .map(FileCategory::parse)
                .unwrap_or(FileCategory::Lainnya),
            filename: file.filename.clone(),
            caption: None,
            page_reference: None,
        })
        .collect()
}

pub struct FactsBuilder {
    generator: Arc<dyn TextGenerator>,
    input_budget: usize,
}

impl FactsBuilder {
    pub fn new(generator: Arc<dyn TextGenerator>, input_budget: usize) -> Self {
        Self {
            generator,
            input_budget,
        }
    }

    pub async fn build_facts(
        &self,
        extractions: &BTreeMap<Uuid, Extraction>,
        files: &[ReportFile],
    ) -> PipelineResult<Facts> {
        let text = aggregate_text(extractions, files, self.input_budget);
        tracing::debug!(chars = text.chars().count(), "requesting facts");

        let request = GenerationRequest::new(FACTS_PROMPT)
            .with_context(text)
            .temperature(FACTS_TEMPERATURE);
        let response = self
            .generator
            .generate(request)
            .await
            .map_err(|err| PipelineError::service("facts", err))?;

        let mut facts = parse_facts_response(&response)?;
        facts.attachments = build_attachments(files);
        facts.raw_extractions = extractions
            .iter()
            .map(|(file_id, extraction)| {
                serde_json::to_value(extraction).map(|value| (file_id.to_string(), value))
            })
            .collect::<Result<_, _>>()?;
        Ok(facts)
    }
}
