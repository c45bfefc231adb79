//! File classification: filename keywords, then MIME type, then content scoring.
//!
//! Every function here is total. Anything without a signal is [`FileCategory::Lainnya`].

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SAMPLE_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    Kak,
    Agenda,
    Tiket,
    Undangan,
    DaftarHadir,
    Foto,
    Lainnya,
}

impl FileCategory {
    /// Fixed enumeration order; content-score ties go to the earliest entry.
    pub const ALL: [FileCategory; 7] = [
        FileCategory::Kak,
        FileCategory::Agenda,
        FileCategory::Tiket,
        FileCategory::Undangan,
        FileCategory::DaftarHadir,
        FileCategory::Foto,
        FileCategory::Lainnya,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Kak => "kak",
            FileCategory::Agenda => "agenda",
            FileCategory::Tiket => "tiket",
            FileCategory::Undangan => "undangan",
            FileCategory::DaftarHadir => "daftar_hadir",
            FileCategory::Foto => "foto",
            FileCategory::Lainnya => "lainnya",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FileCategory::Kak => "KAK/TOR",
            FileCategory::Agenda => "Susunan Acara/Agenda",
            FileCategory::Tiket => "Tiket Perjalanan",
            FileCategory::Undangan => "Undangan",
            FileCategory::DaftarHadir => "Daftar Hadir/Peserta",
            FileCategory::Foto => "Foto Dokumentasi",
            FileCategory::Lainnya => "Lainnya",
        }
    }

    /// Lenient parse of a stored `kind`; unknown labels (and `other`) map to `Lainnya`.
    pub fn parse(value: &str) -> Self {
        let value = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == value)
            .unwrap_or(FileCategory::Lainnya)
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const FILENAME_KEYWORDS: [(FileCategory, &[&str]); 6] = [
    (FileCategory::Kak, &["kak", "tor", "kerangka"]),
    (FileCategory::Agenda, &["agenda", "susunan", "rundown"]),
    (FileCategory::Tiket, &["tiket", "ticket", "boarding"]),
    (FileCategory::Undangan, &["undangan", "invitation"]),
    (
        FileCategory::DaftarHadir,
        &["daftar", "hadir", "peserta", "attendance"],
    ),
    (FileCategory::Foto, &["foto", "photo", "img", "dokumentasi"]),
];

const CONTENT_PATTERNS: [(FileCategory, &[&str]); 5] = [
    (
        FileCategory::Kak,
        &[
            r"kerangka\s+acuan\s+kerja",
            r"\bkak\b",
            r"term\s+of\s+reference",
            r"\btor\b",
            r"latar\s+belakang",
            r"tujuan\s+kegiatan",
            r"sasaran",
        ],
    ),
    (
        FileCategory::Agenda,
        &[
            r"susunan\s+acara",
            r"agenda\s+kegiatan",
            r"rundown",
            r"jadwal\s+kegiatan",
            r"timeline",
        ],
    ),
    (
        FileCategory::Tiket,
        &[
            r"boarding\s+pass",
            r"tiket\s+pesawat",
            r"tiket\s+kereta",
            r"e-ticket",
            r"booking\s+code",
            r"garuda",
            r"lion\s+air",
            r"kai\s+access",
        ],
    ),
    (
        FileCategory::Undangan,
        &[
            r"undangan",
            r"invitation",
            r"mengundang",
            r"hadir\s+dalam",
            r"acara\s+.*\s+pada",
        ],
    ),
    (
        FileCategory::DaftarHadir,
        &[
            r"daftar\s+hadir",
            r"daftar\s+peserta",
            r"attendance\s+list",
            r"participant\s+list",
            r"nama\s+.*\s+tanda\s+tangan",
        ],
    ),
];

static CONTENT_RULES: Lazy<Vec<(FileCategory, Vec<Regex>)>> = Lazy::new(|| {
    CONTENT_PATTERNS
        .iter()
        .map(|(category, patterns)| {
            let compiled = patterns
                .iter()
                .filter_map(|pattern| match Regex::new(&format!("(?i){pattern}")) {
                    Ok(regex) => Some(regex),
                    Err(err) => {
                        tracing::error!(pattern, error = %err, "invalid classifier pattern");
                        None
                    }
                })
                .collect();
            (*category, compiled)
        })
        .collect()
});

pub fn classify(filename: &str, mime_type: &str, text_content: Option<&str>) -> FileCategory {
    classify_with_sample(filename, mime_type, text_content, DEFAULT_SAMPLE_CHARS)
}

/// First signal wins: filename keywords, then `image/*` MIME, then content scoring.
pub fn classify_with_sample(
    filename: &str,
    mime_type: &str,
    text_content: Option<&str>,
    sample_chars: usize,
) -> FileCategory {
    classify_by_filename(filename)
        .or_else(|| classify_by_mime(mime_type))
        .or_else(|| text_content.and_then(|text| classify_by_content(text, sample_chars)))
        .unwrap_or(FileCategory::Lainnya)
}

pub fn classify_by_filename(filename: &str) -> Option<FileCategory> {
    let name = filename.to_lowercase();
    FILENAME_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| name.contains(keyword)))
        .map(|(category, _)| *category)
}

pub fn classify_by_mime(mime_type: &str) -> Option<FileCategory> {
    mime_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("image/")
        .then_some(FileCategory::Foto)
}

/// Counts pattern hits per category in the first `max_chars` characters. Only a strictly
/// positive maximum produces a label.
pub fn classify_by_content(text: &str, max_chars: usize) -> Option<FileCategory> {
    let sample: String = text.chars().take(max_chars).collect();
    if sample.trim().is_empty() {
        return None;
    }

    let mut best: Option<(FileCategory, usize)> = None;
    for (category, patterns) in CONTENT_RULES.iter() {
        let score: usize = patterns
            .iter()
            .map(|regex| regex.find_iter(&sample).count())
            .sum();
        if score > 0 && best.map_or(true, |(_, top)| score > top) {
            best = Some((*category, score));
        }
    }
    best.map(|(category, _)| category)
}
