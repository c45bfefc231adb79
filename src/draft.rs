//! Draft model, template schema, section prompts and the section-wise draft generator.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ai::{GenerationRequest, TextGenerator};
use crate::error::{PipelineError, PipelineResult};
use crate::facts::Facts;
use crate::retrieval::{ContextProvider, RetrievedContext};

pub const DEFAULT_TEMPLATE_ID: &str = "default";
const SECTION_TEMPERATURE: f32 = 0.7;
pub const SECTION_MAX_TOKENS: u32 = 2048;
const QUOTE_CHARS: usize = 200;
const DEFAULT_ACTIVITY_NAME: &str = "Kegiatan";
const TITLE_PREFIX: &str = "Laporan Perjalanan Dinas";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub template_id: String,
    pub title: String,
    pub meta: DraftMeta,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftMeta {
    pub activity_name: String,
    pub location: String,
    pub date_start: String,
    pub date_end: String,
    pub unit: String,
    pub participants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub key: String,
    pub title: String,
    pub content: Option<String>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub subsections: Vec<Subsection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<BTreeMap<String, Vec<Attachment>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subsection {
    pub key: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub table: Option<Vec<TableRow>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub file_id: Uuid,
    pub page: Option<i32>,
    pub quote: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_id: Uuid,
    pub caption: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSpec {
    pub key: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateSchema {
    pub template_id: String,
    pub sections: Vec<SectionSpec>,
}

#[derive(Debug, Deserialize)]
struct RawTemplateSchema {
    #[serde(default)]
    template_id: Option<String>,
    #[serde(default)]
    sections: Option<Vec<SectionSpec>>,
}

impl TemplateSchema {
    pub fn default_schema() -> Self {
        let section = |key: &str, title: &str| SectionSpec {
            key: key.to_string(),
            title: title.to_string(),
        };
        Self {
            template_id: DEFAULT_TEMPLATE_ID.to_string(),
            sections: vec![
                section("introduction", "Pendahuluan"),
                section("execution", "Pelaksanaan Kegiatan"),
                section("results", "Hasil dan Pembahasan"),
                section("closing", "Penutup"),
            ],
        }
    }

    /// Reads a stored schema document. A schema without sections yields `None`.
    pub fn from_json(value: Value, fallback_id: &str) -> PipelineResult<Option<Self>> {
        let raw: RawTemplateSchema = serde_json::from_value(value)
            .map_err(|err| PipelineError::TemplateSchema(err.to_string()))?;

        let sections: Vec<SectionSpec> = raw
            .sections
            .unwrap_or_default()
            .into_iter()
            .map(|mut spec| {
                spec.key = spec.key.trim().to_string();
                if spec.title.trim().is_empty() {
                    spec.title = spec.key.clone();
                }
                spec
            })
            .collect();
        if sections.iter().any(|spec| spec.key.is_empty()) {
            return Err(PipelineError::TemplateSchema(
                "section without a key".to_string(),
            ));
        }
        if sections.is_empty() {
            return Ok(None);
        }

        Ok(Some(Self {
            template_id: raw
                .template_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| fallback_id.to_string()),
            sections,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Introduction,
    Execution,
    Results,
    Closing,
    Attachments,
    Other,
}

impl SectionKind {
    pub fn from_key(key: &str) -> Self {
        match key.trim().to_ascii_lowercase().as_str() {
            "introduction" | "pendahuluan" => SectionKind::Introduction,
            "execution" | "pelaksanaan" => SectionKind::Execution,
            "results" | "hasil" => SectionKind::Results,
            "closing" | "penutup" => SectionKind::Closing,
            "attachments" | "lampiran" => SectionKind::Attachments,
            _ => SectionKind::Other,
        }
    }
}

/// Prompt template per section kind. Placeholders are `{title}`, `{activity_name}`,
/// `{activity_purpose}`, `{location}`, `{date_start}`, `{date_end}`, `{activity_summary}`,
/// `{key_outcomes}` and `{attachments}`.
pub const SECTION_PROMPTS: [(SectionKind, &str); 5] = [
    (
        SectionKind::Introduction,
        "Tulis bagian Pendahuluan untuk laporan perjalanan dinas.\n\
         Kegiatan: {activity_name}\n\
         Tujuan: {activity_purpose}\n\
         Lokasi: {location}\n\
         Tanggal: {date_start} s/d {date_end}\n\n\
         Tulis 2-3 paragraf yang menjelaskan latar belakang dan tujuan kegiatan.",
    ),
    (
        SectionKind::Execution,
        "Tulis bagian Pelaksanaan Kegiatan.\n\
         Ringkasan: {activity_summary}\n\n\
         Jelaskan bagaimana kegiatan dilaksanakan, siapa yang terlibat, dan apa yang dilakukan.",
    ),
    (
        SectionKind::Results,
        "Tulis bagian Hasil dan Pembahasan.\n\
         Hasil utama: {key_outcomes}\n\n\
         Jelaskan hasil yang dicapai dari kegiatan ini.",
    ),
    (
        SectionKind::Closing,
        "Tulis bagian Penutup/Kesimpulan.\n\
         Buat kesimpulan singkat dan saran tindak lanjut.",
    ),
    (
        SectionKind::Attachments,
        "Tulis pengantar singkat untuk bagian {title}.\n\
         Dokumen terlampir: {attachments}",
    ),
];

pub const GENERIC_PROMPT: &str = "Tulis bagian {title} untuk laporan.";

pub fn prompt_template(kind: SectionKind) -> &'static str {
    SECTION_PROMPTS
        .iter()
        .find(|(candidate, _)| *candidate == kind)
        .map_or(GENERIC_PROMPT, |(_, template)| *template)
}

pub fn render_prompt(template: &str, facts: &Facts, title: &str) -> String {
    let or_dash = |value: Option<&str>| -> String {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("-")
            .to_string()
    };
    let date = |value: Option<chrono::NaiveDate>| {
        value.map_or_else(|| "-".to_string(), |d| d.format("%Y-%m-%d").to_string())
    };
    let attachments = facts
        .attachments
        .iter()
        .map(|a| format!("{} ({})", a.filename, a.kind.display_name()))
        .collect::<Vec<_>>()
        .join(", ");

    let values = [
        ("{title}", title.to_string()),
        ("{activity_name}", or_dash(facts.activity_name.as_deref())),
        ("{activity_purpose}", or_dash(facts.activity_purpose.as_deref())),
        ("{location}", or_dash(facts.location.as_deref())),
        ("{date_start}", date(facts.date_start)),
        ("{date_end}", date(facts.date_end)),
        ("{activity_summary}", or_dash(facts.activity_summary.as_deref())),
        ("{key_outcomes}", or_dash(Some(facts.key_outcomes.join(", ").as_str()))),
        ("{attachments}", or_dash(Some(attachments.as_str()))),
    ];

    values
        .iter()
        .fold(template.to_string(), |prompt, (placeholder, value)| {
            prompt.replace(placeholder, value)
        })
}

pub fn build_meta(facts: &Facts) -> DraftMeta {
    let text = |value: &Option<String>| value.clone().unwrap_or_default();
    let date = |value: Option<chrono::NaiveDate>| {
        value.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default()
    };
    DraftMeta {
        activity_name: facts
            .activity_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ACTIVITY_NAME.to_string()),
        location: text(&facts.location),
        date_start: date(facts.date_start),
        date_end: date(facts.date_end),
        unit: text(&facts.unit),
        participants: facts.participants.iter().map(|p| p.name.clone()).collect(),
    }
}

/// Agenda rendered as a table, independent of the generated prose.
pub fn agenda_subsection(facts: &Facts) -> Option<Subsection> {
    if facts.agenda.is_empty() {
        return None;
    }
    let rows = facts
        .agenda
        .iter()
        .map(|item| TableRow {
            data: BTreeMap::from([
                ("time".to_string(), item.time.clone().unwrap_or_default()),
                ("activity".to_string(), item.activity.clone()),
                ("speaker".to_string(), item.speaker.clone().unwrap_or_default()),
            ]),
        })
        .collect();
    Some(Subsection {
        key: "agenda".to_string(),
        title: Some("Agenda Kegiatan".to_string()),
        content: None,
        table: Some(rows),
    })
}

/// Attachments grouped by category slot.
pub fn group_attachments(facts: &Facts) -> BTreeMap<String, Vec<Attachment>> {
    let mut grouped: BTreeMap<String, Vec<Attachment>> = BTreeMap::new();
    for attachment in &facts.attachments {
        grouped
            .entry(attachment.kind.as_str().to_string())
            .or_default()
            .push(Attachment {
                file_id: attachment.file_id,
                caption: attachment
                    .caption
                    .clone()
                    .or_else(|| Some(attachment.filename.clone())),
                note: Some(attachment.kind.display_name().to_string()),
            });
    }
    grouped
}

fn citations(context: &RetrievedContext) -> Vec<Citation> {
    context
        .sources
        .iter()
        .filter_map(|chunk| {
            Some(Citation {
                file_id: chunk.file_id?,
                page: chunk.page_number,
                quote: Some(chunk.content.chars().take(QUOTE_CHARS).collect()),
            })
        })
        .collect()
}

pub struct DraftGenerator {
    generator: Arc<dyn TextGenerator>,
    context: Option<Arc<dyn ContextProvider>>,
    context_max_tokens: usize,
}

impl DraftGenerator {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        context: Option<Arc<dyn ContextProvider>>,
        context_max_tokens: usize,
    ) -> Self {
        Self {
            generator,
            context,
            context_max_tokens,
        }
    }

    /// Generates every section in schema order. The first failing section fails the draft.
    pub async fn generate_draft(
        &self,
        facts: &Facts,
        schema: &TemplateSchema,
        report_id: Uuid,
    ) -> PipelineResult<Draft> {
        let mut sections = Vec::with_capacity(schema.sections.len());
        for spec in &schema.sections {
            sections.push(self.generate_section(spec, facts, report_id).await?);
        }

        let title = format!(
            "{TITLE_PREFIX} {}",
            facts.activity_name.as_deref().unwrap_or_default()
        )
        .trim_end()
        .to_string();

        Ok(Draft {
            template_id: schema.template_id.clone(),
            title,
            meta: build_meta(facts),
            sections,
        })
    }

    async fn generate_section(
        &self,
        spec: &SectionSpec,
        facts: &Facts,
        report_id: Uuid,
    ) -> PipelineResult<Section> {
        let kind = SectionKind::from_key(&spec.key);

        let context = match &self.context {
            Some(provider) => {
                let query = format!("Informasi untuk bagian {}", spec.title);
                provider
                    .build_context(&query, report_id, self.context_max_tokens)
                    .await?
            }
            None => RetrievedContext::default(),
        };

        let mut prompt = render_prompt(prompt_template(kind), facts, &spec.title);
        if !context.is_empty() {
            prompt.push_str("\n\nReferensi dari dokumen:\n");
            prompt.push_str(&context.text);
        }
        tracing::debug!(section = %spec.key, prompt_chars = prompt.len(), "generating section");

        let content = self
            .generator
            .generate(
                GenerationRequest::new(prompt)
                    .temperature(SECTION_TEMPERATURE)
                    .max_tokens(SECTION_MAX_TOKENS),
            )
            .await
            .map_err(|err| PipelineError::service("draft", err))?;

        let subsections = match kind {
            SectionKind::Execution => agenda_subsection(facts).into_iter().collect(),
            _ => Vec::new(),
        };
        let attachments = match kind {
            SectionKind::Attachments => Some(group_attachments(facts)),
            _ => None,
        };

        Ok(Section {
            key: spec.key.clone(),
            title: spec.title.clone(),
            content: Some(content.trim().to_string()),
            citations: citations(&context),
            subsections,
            attachments,
        })
    }
}
