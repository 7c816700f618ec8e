use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::llm::{media, Oracle};
use crate::pipeline::cache::{file_identity, Cache};
use crate::pipeline::component::{
    AnalysisRecord, ComponentKind, GenerationKnobs, Reference, ReferenceSource,
    ANALYSIS_SCHEMA_VERSION,
};
use crate::pipeline::describe;

const WEAPON_TERMS: [&str; 21] = [
    "gun", "pistol", "rifle", "firearm", "weapon", "holster", "ammunition", "ammo", "bullet",
    "cartridge", "magazine", "revolver", "shotgun", "carbine", "assault", "tactical", "knife",
    "blade", "dagger", "sword", "machete",
];

const BEAUTY_TERMS: [&str; 19] = [
    "makeup", "lipstick", "eyeshadow", "mascara", "foundation", "blush", "concealer", "eyeliner",
    "bronzer", "highlighter", "tattoo", "tattoos", "ink", "body art", "piercing", "nail polish",
    "nail art", "manicure", "pedicure",
];

const ENVIRONMENT_TERMS: [&str; 19] = [
    "neon", "lighting", "backdrop", "background", "environment", "atmosphere", "moody",
    "dark room", "bright room", "urban", "street", "nightlife", "cyberpunk", "synthwave", "noir",
    "futuristic", "retro-futurism", "rave", "club",
];

const MATERIAL_QUALIFIERS: [&str; 4] = ["faux", "vegan", "synthetic", "imitation"];
const GENUINE_MATERIALS: [&str; 3] = ["leather", "fur", "suede"];

/// Slots supplied separately are excluded from the outfit analysis so
/// components never bleed into each other.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExcludeOptions {
    pub hair: bool,
    pub makeup: bool,
    pub accessories: bool,
}

fn contains_excluded_term(text: &str) -> bool {
    let lower = text.to_lowercase();
    WEAPON_TERMS
        .iter()
        .chain(BEAUTY_TERMS.iter())
        .chain(ENVIRONMENT_TERMS.iter())
        .any(|term| lower.contains(term))
}

/// "faux leather" and friends become the genuine material name. Matching is
/// case-insensitive; replacement keeps the surrounding text untouched.
fn normalize_materials(text: &str) -> String {
    let mut out = text.to_string();
    for qualifier in MATERIAL_QUALIFIERS {
        for material in GENUINE_MATERIALS {
            let needle = format!("{qualifier} {material}");
            loop {
                let lowered = out.to_lowercase();
                if lowered.len() != out.len() {
                    // Unicode case folding shifted byte offsets; exact-case
                    // replacement is the safe fallback.
                    out = out.replace(&needle, material);
                    break;
                }
                match lowered.find(&needle) {
                    Some(pos) => out.replace_range(pos..pos + needle.len(), material),
                    None => break,
                }
            }
        }
    }
    out
}

fn filter_sentences(text: &str) -> String {
    if !contains_excluded_term(text) {
        return text.to_string();
    }
    let kept: Vec<&str> = text
        .split(". ")
        .filter(|sentence| !contains_excluded_term(sentence))
        .collect();
    let mut joined = kept.join(". ");
    while joined.ends_with("..") {
        joined.pop();
    }
    if !joined.is_empty() && !joined.ends_with('.') {
        joined.push('.');
    }
    joined
}

fn scrub_string_list<F>(value: &mut Value, key: &str, keep: F)
where
    F: Fn(&str) -> bool,
{
    if let Some(items) = value.get_mut(key).and_then(Value::as_array_mut) {
        items.retain(|item| match item.as_str() {
            Some(text) => keep(text),
            // Object-shaped entries are kept; only their text is normalized.
            None => true,
        });
        for item in items.iter_mut() {
            match item {
                Value::String(text) => *text = normalize_materials(text),
                Value::Object(map) => {
                    for field in ["description", "item", "material"] {
                        if let Some(Value::String(text)) = map.get_mut(field) {
                            *text = normalize_materials(text);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// Deterministic post-processing of an outfit analysis: the prompt asks the
/// oracle to omit weapons, cosmetics and environment terms, but compliance
/// is not guaranteed, so the same policy is enforced here.
pub fn scrub_outfit_analysis(mut structured: Value) -> Value {
    scrub_string_list(&mut structured, "clothing", |text| {
        !contains_excluded_term(text)
    });
    scrub_string_list(&mut structured, "accessories", |text| {
        text.to_lowercase().contains("earring") || !contains_excluded_term(text)
    });

    if let Some(colors) = structured.get_mut("colors").and_then(Value::as_array_mut) {
        colors.retain(|color| {
            color
                .as_str()
                .map(|text| !contains_excluded_term(text))
                .unwrap_or(false)
        });
        for color in colors.iter_mut() {
            if let Value::String(text) = color {
                // Parenthetical lighting notes get trimmed off the color.
                if let Some(idx) = text.find('(') {
                    if idx > 0 {
                        *text = text[..idx].trim().to_string();
                    }
                }
            }
        }
    }

    for key in ["overall", "style"] {
        if let Some(Value::String(text)) = structured.get_mut(key) {
            *text = filter_sentences(&normalize_materials(text));
        }
    }

    structured
}

/// Remove the ```json fences the model wraps around its output.
pub fn strip_code_fences(text: &str) -> &str {
    let mut cleaned = text.trim();
    for prefix in ["```json", "```"] {
        if let Some(stripped) = cleaned.strip_prefix(prefix) {
            cleaned = stripped;
            break;
        }
    }
    cleaned.strip_suffix("```").unwrap_or(cleaned).trim()
}

fn schema_prompt(body: &str, focus: &str) -> String {
    format!(
        "Analyze {focus} in this image with precision and detail. \
         Return ONLY a JSON object, no commentary, with this structure:\n{body}\n\
         Every field is a string unless the structure above shows a list. \
         Leave a field empty when the image gives no evidence for it."
    )
}

fn outfit_prompt(exclude: &ExcludeOptions) -> String {
    let mut parts = vec![
        "Analyze the outfit in this image with extreme precision, as for fashion designers \
         who need every garment detail for accurate recreation."
            .to_string(),
    ];
    if exclude.hair {
        parts.push("Do NOT include any hair information.".to_string());
    }
    if exclude.makeup {
        parts.push("Do NOT analyze or mention makeup.".to_string());
    }
    if exclude.accessories {
        parts.push(
            "Do NOT include accessories (jewelry, bags, belts, watches, hats).".to_string(),
        );
    }

    parts.push(
        r#"Return ONLY a JSON object with this structure:
{
  "clothing": [each item as an object: {"type", "description", "main_body_color", "collar_color", "cuff_color", "trim_color", "button_color"} - state the color of the main body, collar, cuffs, trim and buttons wherever present],
  "style": "clothing style only: fashion genre, formality, garment styling - no environment, lighting or background",
  "colors": [colors of the actual clothing in fashion terminology, e.g. "midnight navy", "oxblood red" - never lighting or background colors],"#
            .to_string(),
    );
    if !exclude.accessories {
        parts.push(
            r#"  "accessories": [detailed descriptions of watches, jewelry, belts, bags, scarves, hats - never glasses or weapon-related items],"#
                .to_string(),
        );
    }
    parts.push(
        r#"  "overall": "garment interaction, proportions, layering and overall aesthetic""#
            .to_string(),
    );
    if !exclude.hair {
        parts.push(
            r#"  ,"hair": {"color", "style", "length", "texture", "details": [strings], "styling"}"#
                .to_string(),
        );
    }
    parts.push("}".to_string());
    parts.push(
        "Describe all materials as genuine: say \"leather\" not \"faux leather\", \"fur\" not \
         \"vegan fur\". Never mention weapons, weapon accessories, cosmetics, tattoos, piercings \
         (earrings are fine), or any environmental, lighting or location description."
            .to_string(),
    );
    parts.join("\n")
}

fn prompt_for(kind: ComponentKind, exclude: &ExcludeOptions) -> String {
    match kind.analysis_kind() {
        ComponentKind::Outfit => outfit_prompt(exclude),
        ComponentKind::Style => schema_prompt(
            r#"{
  "composition", "framing", "pose", "body_position", "lighting",
  "color_palette": [strings], "color_grading", "mood", "background",
  "photographic_style", "artistic_style", "film_grain", "image_quality",
  "era_aesthetic", "camera_angle", "depth_of_field", "post_processing"
}"#,
            "ONLY the photographic style, composition and framing (ignore the person's identity and clothing details)",
        ),
        ComponentKind::HairStyle => schema_prompt(
            r#"{
  "style", "length", "texture", "volume", "layers", "parting",
  "styling_technique", "front_styling", "accessories", "overall"
}"#,
            "ONLY the hair style, cut and structure - NEVER hair color",
        ),
        ComponentKind::HairColor => schema_prompt(
            r#"{
  "base_color", "undertones", "highlights", "lowlights", "technique",
  "dimension", "roots", "shine", "special_effects", "overall"
}"#,
            "ONLY the hair color and coloring technique - NEVER the cut or style",
        ),
        ComponentKind::Makeup => schema_prompt(
            r#"{
  "complexion": {"foundation", "concealer", "powder", "blush", "bronzer", "highlighter", "contour"},
  "eyes": {"eyeshadow", "eyeliner", "mascara", "lashes", "brows"},
  "lips": {"color", "liner", "finish", "shape"},
  "style", "overall"
}"#,
            "ONLY the makeup application (ignore facial structure, hair and clothing)",
        ),
        ComponentKind::Expression => schema_prompt(
            r#"{
  "primary_emotion", "intensity",
  "facial_features": {"eyes", "mouth", "brows", "overall_tension"},
  "gaze": {"direction", "quality"},
  "mood", "energy", "authenticity", "overall"
}"#,
            "ONLY the facial expression and emotional state (never physical appearance)",
        ),
        ComponentKind::Accessories => schema_prompt(
            r#"{
  "jewelry": {"earrings", "necklaces", "bracelets", "rings", "other"},
  "bags", "belts", "scarves", "hats", "watches", "eyewear", "gloves",
  "other": [strings], "materials", "style", "overall"
}"#,
            "ONLY the accessories worn or carried",
        ),
        ComponentKind::OverOutfit => unreachable!("normalized by analysis_kind"),
    }
}

/// Strategy table binding each component kind to its prompt, knobs and
/// post-processing, with the per-kind cache in front of the oracle.
pub struct AnalyzerRegistry {
    oracle: Arc<dyn Oracle>,
    caches: HashMap<ComponentKind, Cache>,
    enable_cache: bool,
}

impl AnalyzerRegistry {
    pub fn new(oracle: Arc<dyn Oracle>, root: &Path, ttl: Duration) -> Self {
        let mut caches = HashMap::new();
        for kind in ComponentKind::ALL {
            let kind = kind.analysis_kind();
            caches
                .entry(kind)
                .or_insert_with(|| Cache::for_kind(root, kind, ttl));
        }
        AnalyzerRegistry {
            oracle,
            caches,
            enable_cache: true,
        }
    }

    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.enable_cache = enabled;
    }

    fn cache_for(&self, kind: ComponentKind) -> &Cache {
        &self.caches[&kind.analysis_kind()]
    }

    /// Analyze one reference. Text references bypass the cache and the
    /// oracle entirely; image references are memoized per kind and identity.
    pub async fn analyze(
        &self,
        reference: &Reference,
        exclude: &ExcludeOptions,
    ) -> Result<AnalysisRecord> {
        let path = match &reference.source {
            ReferenceSource::Text(text) => {
                return Ok(AnalysisRecord::from_text(reference.kind, text));
            }
            ReferenceSource::Unset => {
                return Err(AppError::validation(format!(
                    "cannot analyze unset {} slot",
                    reference.kind.as_str()
                )));
            }
            ReferenceSource::Image(path) => path,
        };

        if self.enable_cache {
            if let Some(mut record) = self.cache_for(reference.kind).get(reference.kind, path) {
                info!(
                    "Using cached {} analysis for {}",
                    reference.kind.analysis_kind().as_str(),
                    reference.display_name
                );
                if record.description.trim().is_empty() {
                    record.description = describe::describe(reference.kind, &record.structured, false);
                }
                return Ok(record);
            }
        }

        let image = media::load_image(path)?;
        let prompt = prompt_for(reference.kind, exclude);
        let knobs = GenerationKnobs::ANALYSIS;

        let mut structured = None;
        let mut last_raw = String::new();
        // One retry with the same prompt before giving up on the JSON shape.
        for _ in 0..2 {
            let text = self.oracle.analyze(&image, &prompt, &knobs).await?;
            let cleaned = strip_code_fences(&text);
            match serde_json::from_str::<Value>(cleaned) {
                Ok(value) if value.is_object() => {
                    structured = Some(value);
                    break;
                }
                _ => {
                    warn!(
                        "Oracle returned non-JSON {} analysis, retrying",
                        reference.kind.as_str()
                    );
                    last_raw = text;
                }
            }
        }

        let structured = structured.ok_or_else(|| {
            AppError::analysis(
                format!(
                    "oracle returned unparseable {} analysis",
                    reference.kind.as_str()
                ),
                Some(last_raw),
            )
        })?;

        let structured = if reference.kind.analysis_kind() == ComponentKind::Outfit {
            scrub_outfit_analysis(structured)
        } else {
            structured
        };

        let record = AnalysisRecord {
            kind: reference.kind.analysis_kind(),
            schema_version: ANALYSIS_SCHEMA_VERSION,
            identity: file_identity(path)?,
            timestamp: Utc::now(),
            description: describe::describe(reference.kind, &structured, false),
            structured,
        };

        if self.enable_cache {
            if let Err(err) = self.cache_for(reference.kind).set(reference.kind, path, &record) {
                // Non-fatal: the analysis is simply recomputed next time.
                warn!("Failed to cache {} analysis: {err}", reference.kind.as_str());
            }
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::MockOracle;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn image_ref(dir: &Path, name: &str) -> Reference {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"image-bytes").unwrap();
        Reference::image(ComponentKind::Outfit, path)
    }

    #[test]
    fn fence_stripping() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn scrub_removes_weapon_items_keeps_earrings() {
        let scrubbed = scrub_outfit_analysis(json!({
            "clothing": [
                "black leather moto jacket",
                "thigh holster with pistol",
            ],
            "accessories": [
                "silver drop earrings with pierced setting",
                "tactical belt pouch",
            ],
            "colors": ["jet black", "electric blue (neon glow)"],
            "overall": "Sleek biker silhouette. The neon backdrop adds drama. Clean tailoring throughout."
        }));

        let clothing: Vec<&str> = scrubbed["clothing"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(clothing, vec!["black leather moto jacket"]);

        let accessories: Vec<&str> = scrubbed["accessories"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(accessories, vec!["silver drop earrings with pierced setting"]);

        let colors: Vec<&str> = scrubbed["colors"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(colors, vec!["jet black"]);

        let overall = scrubbed["overall"].as_str().unwrap();
        assert!(overall.contains("Sleek biker silhouette"));
        assert!(overall.contains("Clean tailoring"));
        assert!(!overall.contains("neon"));
    }

    #[test]
    fn scrub_normalizes_faux_materials() {
        let scrubbed = scrub_outfit_analysis(json!({
            "clothing": [
                "faux leather skirt",
                {"type": "coat", "description": "long vegan fur coat", "main_body_color": "cream"}
            ],
            "overall": "Pairs synthetic suede boots with the skirt."
        }));

        assert_eq!(scrubbed["clothing"][0], "leather skirt");
        assert_eq!(scrubbed["clothing"][1]["description"], "long fur coat");
        assert!(scrubbed["overall"].as_str().unwrap().contains("suede boots"));
        assert!(!scrubbed["overall"].as_str().unwrap().contains("synthetic"));
    }

    #[tokio::test]
    async fn text_reference_bypasses_oracle_and_cache() {
        let tmp = TempDir::new().unwrap();
        let oracle = Arc::new(MockOracle::new());
        let registry = AnalyzerRegistry::new(oracle.clone(), tmp.path(), Duration::days(7));

        let reference = Reference::text(ComponentKind::Makeup, "bold red lipstick".to_string());
        let record = registry
            .analyze(&reference, &ExcludeOptions::default())
            .await
            .unwrap();

        assert_eq!(record.description, "bold red lipstick");
        assert!(record.structured.as_object().unwrap().is_empty());
        assert_eq!(oracle.analyze_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_analysis_hits_cache() {
        let tmp = TempDir::new().unwrap();
        let oracle = Arc::new(
            MockOracle::new().with_default_analysis(
                r#"{"clothing": ["navy blazer"], "overall": "Business casual"}"#,
            ),
        );
        let registry = AnalyzerRegistry::new(oracle.clone(), tmp.path(), Duration::days(7));
        let reference = image_ref(tmp.path(), "outfits/blazer.png");

        let first = registry
            .analyze(&reference, &ExcludeOptions::default())
            .await
            .unwrap();
        let second = registry
            .analyze(&reference, &ExcludeOptions::default())
            .await
            .unwrap();

        assert_eq!(oracle.analyze_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(first.description, second.description);
        assert_eq!(first.identity, second.identity);
    }

    #[tokio::test]
    async fn invalid_json_retried_once_then_fails() {
        let tmp = TempDir::new().unwrap();
        let oracle = Arc::new(MockOracle::new());
        oracle.queue_analysis(Ok("not json at all".to_string()));
        oracle.queue_analysis(Ok("still not json".to_string()));
        let registry = AnalyzerRegistry::new(oracle.clone(), tmp.path(), Duration::days(7));
        let reference = image_ref(tmp.path(), "outfits/odd.png");

        let err = registry
            .analyze(&reference, &ExcludeOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Analysis { .. }));
        assert_eq!(oracle.analyze_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fenced_json_is_accepted_after_one_bad_reply() {
        let tmp = TempDir::new().unwrap();
        let oracle = Arc::new(MockOracle::new());
        oracle.queue_analysis(Ok("I think this outfit is lovely".to_string()));
        oracle.queue_analysis(Ok(
            "```json\n{\"clothing\": [\"red coat\"], \"overall\": \"Warm\"}\n```".to_string(),
        ));
        let registry = AnalyzerRegistry::new(oracle.clone(), tmp.path(), Duration::days(7));
        let reference = image_ref(tmp.path(), "outfits/coat.png");

        let record = registry
            .analyze(&reference, &ExcludeOptions::default())
            .await
            .unwrap();
        assert!(record.description.contains("red coat"));
        assert_eq!(oracle.analyze_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn outfit_prompt_reflects_exclusions() {
        let full = prompt_for(ComponentKind::Outfit, &ExcludeOptions::default());
        assert!(full.contains("\"hair\""));
        assert!(full.contains("\"accessories\""));

        let excluded = prompt_for(
            ComponentKind::Outfit,
            &ExcludeOptions {
                hair: true,
                makeup: true,
                accessories: true,
            },
        );
        assert!(!excluded.contains("\"hair\""));
        assert!(!excluded.contains("\"accessories\""));
        assert!(excluded.contains("Do NOT include any hair information."));
    }
}
