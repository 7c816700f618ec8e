use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// The eight visual axes a sweep can vary. `Style` is special: it may only be
/// sourced from an image reference, never from free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Outfit,
    OverOutfit,
    Style,
    HairStyle,
    HairColor,
    Makeup,
    Expression,
    Accessories,
}

impl ComponentKind {
    /// Slot iteration order for the sweep product (subjects are handled
    /// separately, outermost; variations innermost).
    pub const ALL: [ComponentKind; 8] = [
        ComponentKind::Outfit,
        ComponentKind::OverOutfit,
        ComponentKind::Style,
        ComponentKind::HairStyle,
        ComponentKind::HairColor,
        ComponentKind::Makeup,
        ComponentKind::Expression,
        ComponentKind::Accessories,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::Outfit => "outfit",
            ComponentKind::OverOutfit => "over_outfit",
            ComponentKind::Style => "visual_style",
            ComponentKind::HairStyle => "hair_style",
            ComponentKind::HairColor => "hair_color",
            ComponentKind::Makeup => "makeup",
            ComponentKind::Expression => "expression",
            ComponentKind::Accessories => "accessories",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ComponentKind::Outfit => "Outfit",
            ComponentKind::OverOutfit => "Over-outfit",
            ComponentKind::Style => "Style",
            ComponentKind::HairStyle => "Hair style",
            ComponentKind::HairColor => "Hair color",
            ComponentKind::Makeup => "Makeup",
            ComponentKind::Expression => "Expression",
            ComponentKind::Accessories => "Accessories",
        }
    }

    /// The analyzer (and cache namespace) a slot's images run through. The
    /// over-outfit is a complete outfit and reuses the outfit analyzer.
    pub fn analysis_kind(self) -> ComponentKind {
        match self {
            ComponentKind::OverOutfit => ComponentKind::Outfit,
            kind => kind,
        }
    }

    /// Per-kind cache directory, relative to the workspace root.
    pub fn cache_dir(self) -> &'static str {
        match self.analysis_kind() {
            ComponentKind::Outfit => "outfits/.cache",
            ComponentKind::Style => "styles/.cache",
            ComponentKind::HairStyle => "hair-style/.cache",
            ComponentKind::HairColor => "hair-color/.cache",
            ComponentKind::Makeup => "makeup/.cache",
            ComponentKind::Expression => "expressions/.cache",
            ComponentKind::Accessories => "accessories/.cache",
            ComponentKind::OverOutfit => unreachable!("normalized by analysis_kind"),
        }
    }

    pub fn accepts_text(self) -> bool {
        !matches!(self, ComponentKind::Style)
    }

    pub fn parse(value: &str) -> Option<ComponentKind> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "outfit" => Some(ComponentKind::Outfit),
            "over_outfit" => Some(ComponentKind::OverOutfit),
            "style" | "visual_style" => Some(ComponentKind::Style),
            "hair_style" => Some(ComponentKind::HairStyle),
            "hair_color" => Some(ComponentKind::HairColor),
            "makeup" => Some(ComponentKind::Makeup),
            "expression" => Some(ComponentKind::Expression),
            "accessories" | "accessory" => Some(ComponentKind::Accessories),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceSource {
    Image(PathBuf),
    Text(String),
    Unset,
}

/// One concrete input to one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub kind: ComponentKind,
    pub source: ReferenceSource,
    pub display_name: String,
}

pub fn display_name_for_path(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string())
}

fn slug_for_text(text: &str) -> String {
    let slug: String = text
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '-' })
        .collect();
    let mut compact = String::new();
    for ch in slug.chars() {
        if ch == '-' && compact.ends_with('-') {
            continue;
        }
        compact.push(ch);
    }
    let trimmed = compact.trim_matches('-');
    if trimmed.is_empty() {
        "text".to_string()
    } else {
        trimmed.chars().take(32).collect::<String>().trim_end_matches('-').to_string()
    }
}

impl Reference {
    pub fn unset(kind: ComponentKind) -> Self {
        Reference {
            kind,
            source: ReferenceSource::Unset,
            display_name: "default".to_string(),
        }
    }

    pub fn image(kind: ComponentKind, path: PathBuf) -> Self {
        let display_name = display_name_for_path(&path);
        Reference {
            kind,
            source: ReferenceSource::Image(path),
            display_name,
        }
    }

    pub fn text(kind: ComponentKind, text: String) -> Self {
        let display_name = slug_for_text(&text);
        Reference {
            kind,
            source: ReferenceSource::Text(text),
            display_name,
        }
    }

    pub fn is_set(&self) -> bool {
        !matches!(self.source, ReferenceSource::Unset)
    }

    pub fn image_path(&self) -> Option<&Path> {
        match &self.source {
            ReferenceSource::Image(path) => Some(path),
            _ => None,
        }
    }
}

pub const ANALYSIS_SCHEMA_VERSION: u32 = 1;

/// Canonical per-reference analysis: the oracle's structured JSON plus the
/// derived prose description.
#[derive(Debug, Clone)]
pub struct AnalysisRecord {
    pub kind: ComponentKind,
    pub schema_version: u32,
    pub identity: String,
    pub timestamp: DateTime<Utc>,
    pub structured: Value,
    pub description: String,
}

impl AnalysisRecord {
    pub fn from_text(kind: ComponentKind, text: &str) -> Self {
        AnalysisRecord {
            kind,
            schema_version: ANALYSIS_SCHEMA_VERSION,
            identity: String::new(),
            timestamp: Utc::now(),
            structured: Value::Object(serde_json::Map::new()),
            description: text.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationKnobs {
    pub temperature: f32,
    pub top_k: i32,
    pub top_p: f32,
}

impl GenerationKnobs {
    pub const ANALYSIS: GenerationKnobs = GenerationKnobs {
        temperature: 0.1,
        top_k: 20,
        top_p: 0.95,
    };

    pub const GENERATION: GenerationKnobs = GenerationKnobs {
        temperature: 0.8,
        top_k: 40,
        top_p: 0.95,
    };
}

#[derive(Debug, Clone)]
pub struct ImageBlob {
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// The fully-composed generation input for one plan entry.
#[derive(Debug, Clone)]
pub struct Directive {
    pub subject: ImageBlob,
    pub companions: Vec<ImageBlob>,
    pub prose: String,
    pub knobs: GenerationKnobs,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunCounts {
    pub subjects: usize,
    pub outfits: usize,
    pub styles: usize,
    pub variations: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepResult {
    Analysis {
        kind: &'static str,
        name: String,
    },
    Generation {
        output_path: PathBuf,
        subject: String,
        outfit: String,
        style: String,
        variation: usize,
    },
    Failure {
        label: String,
        error: String,
    },
}

#[derive(Debug, Serialize)]
pub struct RunResult {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub steps: Vec<StepResult>,
    pub counts: RunCounts,
    pub generated: usize,
    pub failed: usize,
    /// True when the user declined the cost confirmation: a clean exit with
    /// nothing generated.
    pub cancelled: bool,
    pub output_dir: Option<PathBuf>,
}
