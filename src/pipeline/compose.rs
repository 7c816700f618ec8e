use crate::pipeline::component::{Directive, GenerationKnobs, ImageBlob};

/// Style descriptions containing any of these markers switch the directive
/// into first-person framing.
const POV_MARKERS: [&str; 4] = [
    "first-person",
    "first person",
    "pov",
    "extreme close-up on the subject's hands",
];

/// Final per-kind descriptions for one plan entry. Outer-layer extraction
/// and gaze redaction have already been applied by the extractor, so this
/// layer only decides presence and ordering.
#[derive(Debug, Default, Clone)]
pub struct ComponentDescriptions {
    pub outfit: Option<String>,
    pub over_outfit: Option<String>,
    pub style: Option<String>,
    pub hair_style: Option<String>,
    pub hair_color: Option<String>,
    pub makeup: Option<String>,
    pub expression: Option<String>,
    pub accessories: Option<String>,
}

pub fn is_pov_style(style_description: &str) -> bool {
    let lower = style_description.to_lowercase();
    POV_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Assemble the generation prose. Section order is fixed so the downstream
/// model always receives the same shape; given identical descriptions the
/// output is byte-identical.
pub fn compose_prose(components: &ComponentDescriptions) -> String {
    let mut parts: Vec<String> = Vec::new();
    let is_pov = components
        .style
        .as_deref()
        .map(is_pov_style)
        .unwrap_or(false);

    // 1. Identity preservation, always first and non-overridable.
    parts.push("CRITICAL IDENTITY INSTRUCTION:".into());
    parts.push(
        "The person in the generated image MUST be the EXACT SAME INDIVIDUAL from the source portrait."
            .into(),
    );
    parts.push(
        "This is not about creating someone similar. It must be THEM, recognizable as the same person."
            .into(),
    );
    parts.push("Preserve their exact facial features, bone structure, and identity throughout.".into());
    parts.push(String::new());

    // 2. Framing preamble.
    if is_pov {
        parts.push("THIS IS A FIRST-PERSON POV SHOT. CRITICAL INSTRUCTIONS:".into());
        parts.push("1. FRAMING: create a first-person perspective exactly as shown in the style reference.".into());
        parts.push("2. The camera IS the subject's eyes. Shoot FROM their viewpoint, not AT them.".into());
        parts.push("3. Copy the exact framing from the style description.".into());
        parts.push("Their hands or arms in frame are the subject's own hands reaching forward.".into());
        parts.push("If there is a mirror, it must reflect the subject's EXACT facial features.".into());
        parts.push("Apply the outfit to whatever body parts are visible in the POV framing.".into());
    } else if components.style.is_some() {
        parts.push(
            "CRITICAL INSTRUCTION: generate an image of THIS EXACT PERSON with the framing described below."
                .into(),
        );
        parts.push("The subject's facial features and identity MUST be preserved exactly.".into());
        parts.push(
            "DO NOT create a portrait or full-body shot unless the style explicitly describes one."
                .into(),
        );
        parts.push(
            "If the style shows only part of a body, show only that part, but it is still this person."
                .into(),
        );
        parts.push("The style description below controls framing, but this remains the SAME PERSON.".into());
    } else {
        parts.push(
            "Generate a professional 9:16 portrait photograph with the following specifications:"
                .into(),
        );
    }
    parts.push(String::new());

    // 3. Outfit and over-outfit combination.
    match (&components.outfit, &components.over_outfit) {
        (Some(outer), Some(base)) => {
            parts.push("LAYERED OUTFIT:".into());
            parts.push(String::new());
            parts.push("COMPLETE BASE OUTFIT (all clothing worn underneath):".into());
            parts.push(base.clone());
            parts.push(String::new());
            parts.push("OUTER LAYER ONLY (jacket/coat worn over the base outfit):".into());
            parts.push(outer.clone());
            parts.push(String::new());
            parts.push(
                "IMPORTANT: The base outfit is complete on its own, with the outer layer worn over it. \
                 Parts of the base outfit stay visible where the outer layer is open or does not cover \
                 (shirt collar, sleeves, skirt or trousers)."
                    .into(),
            );
            parts.push(String::new());
        }
        (Some(outfit), None) => {
            parts.push("OUTFIT:".into());
            parts.push(outfit.clone());
            parts.push(String::new());
        }
        (None, Some(base)) => {
            parts.push("OUTFIT:".into());
            parts.push(base.clone());
            parts.push(String::new());
        }
        (None, None) => {}
    }

    // 4. Hair style, with color preservation when no hair color is set.
    if let Some(hair_style) = &components.hair_style {
        if components.hair_color.is_none() {
            parts.push("CRITICAL HAIR COLOR PRESERVATION:".into());
            parts.push(
                "DO NOT change the subject's hair color. Preserve the original hair color from the source portrait EXACTLY."
                    .into(),
            );
            parts.push(String::new());
        }

        parts.push("HAIR STYLE (STRUCTURE/CUT/SHAPE ONLY, NOT COLOR):".into());
        parts.push(hair_style.clone());

        if components.hair_color.is_none() {
            parts.push(
                "REMINDER: apply only the hairstyle structure, cut, shape and styling from the description above. \
                 Keep the subject's ORIGINAL hair color from the source image."
                    .into(),
            );
        }
        parts.push(String::new());
    }

    // 5. Hair color.
    if let Some(hair_color) = &components.hair_color {
        parts.push("HAIR COLOR:".into());
        parts.push(hair_color.clone());
        parts.push(String::new());
    }

    // 6. Makeup.
    if let Some(makeup) = &components.makeup {
        parts.push("MAKEUP (COSMETIC APPLICATION ONLY):".into());
        parts.push(makeup.clone());
        parts.push(
            "CRITICAL: apply makeup as a SURFACE LAYER ONLY. Do NOT alter facial bone structure, \
             face shape, eye shape, nose shape, lip shape, or any anatomical features."
                .into(),
        );
        parts.push(String::new());
    }

    // 7. Expression.
    if let Some(expression) = &components.expression {
        parts.push("FACIAL EXPRESSION (EMOTION ONLY, NOT GAZE DIRECTION):".into());
        parts.push(expression.clone());
        if components.style.is_some() {
            parts.push(
                "IMPORTANT: the PHOTOGRAPHIC STYLE section below governs gaze direction and camera angle. \
                 Apply only the emotional expression from above."
                    .into(),
            );
        }
        parts.push(String::new());
    }

    // 8. Accessories.
    if let Some(accessories) = &components.accessories {
        parts.push("ACCESSORIES:".into());
        parts.push(accessories.clone());
        parts.push(String::new());
    }

    // 9. Style last: the authoritative framing directive.
    if let Some(style) = &components.style {
        parts.push("==================================================".into());
        if is_pov {
            parts.push("FIRST-PERSON POV STYLE. THIS IS YOUR PRIMARY INSTRUCTION.".into());
        } else {
            parts.push("PHOTOGRAPHIC STYLE. THIS IS YOUR PRIMARY INSTRUCTION.".into());
        }
        parts.push("It supersedes any framing stated earlier.".into());
        parts.push("==================================================".into());
        parts.push(String::new());
        parts.push("RECREATE THIS EXACT COMPOSITION:".into());
        parts.push(style.clone());
        parts.push(String::new());
        parts.push("ABSOLUTE REQUIREMENTS:".into());
        if is_pov {
            parts.push("1. This is POV: shoot FROM the subject's eyes, not AT them.".into());
            parts.push("2. Hands or arms in the foreground are the subject's OWN hands, matching their skin tone.".into());
            parts.push("3. Any mirror reflection shows the subject's EXACT face.".into());
            parts.push("4. Apply outfit details to the body parts visible in the POV framing.".into());
        } else {
            parts.push("1. Match the framing EXACTLY as described above.".into());
            parts.push("2. If the style shows only part of a body, show only that part.".into());
            parts.push("3. The subject image provided earlier supplies identity and outfit details only.".into());
            parts.push("4. DO NOT default to a portrait unless the style explicitly describes one.".into());
        }
        parts.push(String::new());
    }

    // 10. Technical requirements.
    parts.push("TECHNICAL REQUIREMENTS:".into());
    parts.push("- CRITICAL: preserve the EXACT identity of the person from the source portrait.".into());
    parts.push("- Keep their exact facial features: eyes, nose, mouth, face shape, bone structure.".into());
    if components.makeup.is_some() {
        parts.push("- PRESERVE facial bone structure and all anatomical features; makeup is cosmetic only.".into());
    }
    if components.hair_style.is_some() && components.hair_color.is_none() {
        parts.push("- CRITICAL: preserve the subject's original hair color exactly as shown in the source portrait.".into());
        parts.push("- Apply only the hair CUT/STYLE/SHAPE, never the color.".into());
    }
    if components.style.is_none() {
        parts.push("- Professional 9:16 vertical portrait format.".into());
        parts.push("- Waist-up framing showing outfit details.".into());
        parts.push("- Natural, professional pose.".into());
    }
    parts.push("- High quality, detailed rendering.".into());
    parts.push(String::new());
    parts.push(
        "IMPORTANT: each component specified above is applied independently without influencing the others."
            .into(),
    );

    parts.join("\n")
}

pub fn build_directive(
    subject: ImageBlob,
    companions: Vec<ImageBlob>,
    components: &ComponentDescriptions,
) -> Directive {
    Directive {
        subject,
        companions,
        prose: compose_prose(components),
        knobs: GenerationKnobs::GENERATION,
    }
}
