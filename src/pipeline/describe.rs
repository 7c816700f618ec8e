use serde_json::Value;

use crate::pipeline::component::ComponentKind;

/// Garment classes that count as an outer layer when a base outfit is
/// supplied separately.
const OUTER_LAYER_TYPES: [&str; 11] = [
    "jacket", "coat", "overcoat", "blazer", "cardigan", "bomber", "trench", "parka", "vest",
    "shawl", "cape",
];

/// Gaze phrasings scrubbed from expression text when a style reference
/// governs camera and gaze.
const GAZE_PHRASES: [&str; 10] = [
    ", with the gaze directly engaging the viewer in this moment of astonishment",
    ", with the gaze directly engaging the viewer",
    " with the gaze directly engaging the viewer",
    ", gazing directly at the camera",
    " gazing directly at the camera",
    ", looking directly at the viewer",
    " looking directly at the viewer",
    ", eyes locked on the camera",
    " eyes locked on the camera",
    ", staring into the lens",
];

/// Some cached or hand-edited entries nest the payload under "analysis".
fn unwrap_analysis(structured: &Value) -> &Value {
    structured.get("analysis").unwrap_or(structured)
}

fn get_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn push_labeled(parts: &mut Vec<String>, value: &Value, key: &str, label: &str) {
    if let Some(text) = get_str(value, key) {
        parts.push(format!("{label}: {text}"));
    }
}

fn join_or(parts: Vec<String>, fallback: &str) -> String {
    if parts.is_empty() {
        fallback.to_string()
    } else {
        parts.join(". ")
    }
}

/// Render one clothing or accessory item, which may be a plain string or an
/// object with color call-outs.
fn format_item(item: &Value) -> Option<String> {
    match item {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Object(_) => {
            let mut out = get_str(item, "description")
                .or_else(|| get_str(item, "item"))
                .or_else(|| get_str(item, "type"))?
                .to_string();
            for (key, phrasing) in [
                ("main_body_color", " with {} main body"),
                ("collar_color", ", {} collar"),
                ("cuff_color", ", {} cuffs"),
                ("trim_color", ", {} trim"),
                ("button_color", ", {} buttons"),
            ] {
                if let Some(color) = get_str(item, key).filter(|c| *c != "none") {
                    out.push_str(&phrasing.replace("{}", color));
                }
            }
            Some(out)
        }
        _ => None,
    }
}

fn item_matches_outer_layer(item: &Value) -> bool {
    let haystack = match item {
        Value::String(text) => text.to_lowercase(),
        Value::Object(_) => {
            let mut text = String::new();
            for key in ["type", "item", "description"] {
                if let Some(value) = get_str(item, key) {
                    text.push_str(&value.to_lowercase());
                    text.push(' ');
                }
            }
            text
        }
        _ => return false,
    };
    OUTER_LAYER_TYPES
        .iter()
        .any(|garment| haystack.contains(garment))
}

pub fn outfit_description(structured: &Value) -> String {
    let analysis = unwrap_analysis(structured);
    let mut out = String::from("wearing exactly: ");
    let mut wrote_items = false;

    if let Some(clothing) = analysis.get("clothing").and_then(Value::as_array) {
        let items: Vec<String> = clothing.iter().filter_map(format_item).collect();
        if !items.is_empty() {
            out.push_str(&items.join("; "));
            wrote_items = true;
        }
    }

    if let Some(colors) = analysis.get("colors").and_then(Value::as_array) {
        let colors: Vec<&str> = colors.iter().filter_map(Value::as_str).collect();
        if !colors.is_empty() {
            out.push_str(". CRITICAL COLOR REQUIREMENTS: ");
            out.push_str(&colors.join(", "));
        }
    }

    if let Some(accessories) = analysis.get("accessories").and_then(Value::as_array) {
        let items: Vec<String> = accessories.iter().filter_map(format_item).collect();
        if !items.is_empty() {
            out.push_str(". Accessories: ");
            out.push_str(&items.join(", "));
        }
    }

    if let Some(overall) = get_str(analysis, "overall") {
        out.push_str(". Overall styling: ");
        out.push_str(overall);
    }

    if let Some(style) = get_str(analysis, "style") {
        out.push_str(". Style notes: ");
        out.push_str(style);
    }

    if !wrote_items && out == "wearing exactly: " {
        return "wearing the same outfit as shown in the reference image".to_string();
    }
    out
}

/// Narrow an outfit analysis to jacket/coat-class garments only. Returns
/// `None` when nothing qualifies, in which case the over-outfit stands in as
/// the complete outfit.
pub fn outer_layer_description(structured: &Value) -> Option<String> {
    let analysis = unwrap_analysis(structured);
    let clothing = analysis.get("clothing").and_then(Value::as_array)?;

    let items: Vec<String> = clothing
        .iter()
        .filter(|item| item_matches_outer_layer(item))
        .filter_map(format_item)
        .collect();

    if items.is_empty() {
        None
    } else {
        Some(items.join("; "))
    }
}

pub fn style_description(structured: &Value) -> String {
    let analysis = unwrap_analysis(structured);
    let mut parts = Vec::new();

    push_labeled(&mut parts, analysis, "composition", "Composition");
    push_labeled(&mut parts, analysis, "framing", "Framing");
    push_labeled(&mut parts, analysis, "camera_angle", "Camera angle");
    push_labeled(&mut parts, analysis, "pose", "Pose");
    push_labeled(&mut parts, analysis, "body_position", "Body position");
    push_labeled(&mut parts, analysis, "lighting", "Lighting");
    push_labeled(&mut parts, analysis, "color_grading", "Color grading");
    if let Some(palette) = analysis.get("color_palette").and_then(Value::as_array) {
        let colors: Vec<&str> = palette.iter().filter_map(Value::as_str).collect();
        if !colors.is_empty() {
            parts.push(format!("Color palette: {}", colors.join(", ")));
        }
    }
    push_labeled(&mut parts, analysis, "mood", "Mood");
    push_labeled(&mut parts, analysis, "background", "Background");
    push_labeled(&mut parts, analysis, "photographic_style", "Photographic style");
    push_labeled(&mut parts, analysis, "depth_of_field", "Depth of field");
    push_labeled(&mut parts, analysis, "era_aesthetic", "Era aesthetic");
    if let Some(overall) = get_str(analysis, "overall_style").or_else(|| get_str(analysis, "overall")) {
        parts.push(overall.to_string());
    }

    join_or(parts, "Natural photographic style")
}

/// Hair structure only; color never leaks out of this reducer.
pub fn hair_style_description(structured: &Value) -> String {
    let analysis = unwrap_analysis(structured);
    let mut parts = Vec::new();

    if let Some(style) = get_str(analysis, "style") {
        parts.push(style.to_string());
    }
    push_labeled(&mut parts, analysis, "length", "Length");
    push_labeled(&mut parts, analysis, "texture", "Texture");
    push_labeled(&mut parts, analysis, "volume", "Volume");
    push_labeled(&mut parts, analysis, "layers", "Layers");
    push_labeled(&mut parts, analysis, "parting", "Parting");
    push_labeled(&mut parts, analysis, "styling_technique", "Styling technique");
    push_labeled(&mut parts, analysis, "front_styling", "Front styling");
    if let Some(overall) = get_str(analysis, "overall") {
        parts.push(overall.to_string());
    }

    join_or(parts, "Natural hairstyle")
}

/// Hair color only; structural details never leak out of this reducer.
pub fn hair_color_description(structured: &Value) -> String {
    let analysis = unwrap_analysis(structured);
    let mut parts = Vec::new();

    push_labeled(&mut parts, analysis, "base_color", "Base color");
    push_labeled(&mut parts, analysis, "undertones", "Undertones");
    push_labeled(&mut parts, analysis, "highlights", "Highlights");
    push_labeled(&mut parts, analysis, "lowlights", "Lowlights");
    push_labeled(&mut parts, analysis, "technique", "Coloring technique");
    push_labeled(&mut parts, analysis, "dimension", "Dimension");
    push_labeled(&mut parts, analysis, "roots", "Roots");
    push_labeled(&mut parts, analysis, "shine", "Shine");
    if let Some(overall) = get_str(analysis, "overall") {
        parts.push(overall.to_string());
    }

    join_or(parts, "Natural hair color")
}

pub fn makeup_description(structured: &Value) -> String {
    let analysis = unwrap_analysis(structured);
    let mut parts = Vec::new();

    if let Some(complexion) = analysis.get("complexion") {
        let mut section = Vec::new();
        push_labeled(&mut section, complexion, "foundation", "Foundation");
        push_labeled(&mut section, complexion, "concealer", "Concealer");
        push_labeled(&mut section, complexion, "powder", "Powder");
        push_labeled(&mut section, complexion, "blush", "Blush");
        push_labeled(&mut section, complexion, "bronzer", "Bronzer");
        push_labeled(&mut section, complexion, "highlighter", "Highlighter");
        push_labeled(&mut section, complexion, "contour", "Contour");
        if !section.is_empty() {
            parts.push(format!("Complexion: {}", section.join(", ")));
        }
    }

    if let Some(eyes) = analysis.get("eyes") {
        let mut section = Vec::new();
        push_labeled(&mut section, eyes, "eyeshadow", "Eyeshadow");
        push_labeled(&mut section, eyes, "eyeliner", "Eyeliner");
        push_labeled(&mut section, eyes, "mascara", "Mascara");
        push_labeled(&mut section, eyes, "lashes", "Lashes");
        push_labeled(&mut section, eyes, "brows", "Brows");
        if !section.is_empty() {
            parts.push(format!("Eyes: {}", section.join(", ")));
        }
    }

    if let Some(lips) = analysis.get("lips") {
        let mut section = Vec::new();
        for key in ["color", "liner", "finish", "shape"] {
            if let Some(text) = get_str(lips, key) {
                section.push(text.to_string());
            }
        }
        if !section.is_empty() {
            parts.push(format!("Lips: {}", section.join(", ")));
        }
    }

    push_labeled(&mut parts, analysis, "style", "Overall style");
    if let Some(overall) = get_str(analysis, "overall") {
        parts.push(overall.to_string());
    }

    join_or(parts, "Natural makeup")
}

/// `exclude_gaze` is set whenever a style reference is present for the run:
/// the style governs camera and gaze, so direction information is dropped
/// from both the structured field and the prose.
pub fn expression_description(structured: &Value, exclude_gaze: bool) -> String {
    let analysis = unwrap_analysis(structured);
    let mut parts = Vec::new();

    push_labeled(&mut parts, analysis, "primary_emotion", "Primary emotion");
    push_labeled(&mut parts, analysis, "intensity", "Intensity");

    if let Some(features) = analysis.get("facial_features") {
        push_labeled(&mut parts, features, "eyes", "Eyes");
        push_labeled(&mut parts, features, "mouth", "Mouth");
        push_labeled(&mut parts, features, "brows", "Brows");
    }

    if !exclude_gaze {
        if let Some(gaze) = analysis.get("gaze") {
            push_labeled(&mut parts, gaze, "direction", "Gaze");
        }
    }

    push_labeled(&mut parts, analysis, "mood", "Mood");

    if let Some(overall) = get_str(analysis, "overall") {
        let mut overall = overall.to_string();
        if exclude_gaze {
            for phrase in GAZE_PHRASES {
                overall = overall.replace(phrase, "");
            }
        }
        parts.push(overall);
    }

    join_or(parts, "Natural expression")
}

pub fn accessories_description(structured: &Value) -> String {
    let analysis = unwrap_analysis(structured);
    let mut parts = Vec::new();

    if let Some(jewelry) = analysis.get("jewelry") {
        let mut section = Vec::new();
        push_labeled(&mut section, jewelry, "earrings", "Earrings");
        push_labeled(&mut section, jewelry, "necklaces", "Necklaces");
        push_labeled(&mut section, jewelry, "bracelets", "Bracelets");
        push_labeled(&mut section, jewelry, "rings", "Rings");
        push_labeled(&mut section, jewelry, "other", "Other jewelry");
        if !section.is_empty() {
            parts.push(format!("Jewelry: {}", section.join(", ")));
        }
    }

    push_labeled(&mut parts, analysis, "bags", "Bags");
    push_labeled(&mut parts, analysis, "belts", "Belts");
    push_labeled(&mut parts, analysis, "scarves", "Scarves");
    push_labeled(&mut parts, analysis, "hats", "Hats");
    push_labeled(&mut parts, analysis, "watches", "Watches");
    push_labeled(&mut parts, analysis, "eyewear", "Eyewear");
    push_labeled(&mut parts, analysis, "gloves", "Gloves");
    if let Some(other) = analysis.get("other").and_then(Value::as_array) {
        let items: Vec<&str> = other.iter().filter_map(Value::as_str).collect();
        if !items.is_empty() {
            parts.push(format!("Other: {}", items.join(", ")));
        }
    }
    push_labeled(&mut parts, analysis, "materials", "Materials");
    push_labeled(&mut parts, analysis, "style", "Style");
    if let Some(overall) = get_str(analysis, "overall") {
        parts.push(overall.to_string());
    }

    join_or(parts, "No accessories")
}

/// Canonical reducer used when a record's description is missing.
pub fn describe(kind: ComponentKind, structured: &Value, exclude_gaze: bool) -> String {
    match kind.analysis_kind() {
        ComponentKind::Outfit => outfit_description(structured),
        ComponentKind::Style => style_description(structured),
        ComponentKind::HairStyle => hair_style_description(structured),
        ComponentKind::HairColor => hair_color_description(structured),
        ComponentKind::Makeup => makeup_description(structured),
        ComponentKind::Expression => expression_description(structured, exclude_gaze),
        ComponentKind::Accessories => accessories_description(structured),
        ComponentKind::OverOutfit => unreachable!("normalized by analysis_kind"),
    }
}
