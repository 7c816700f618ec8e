use crate::config::CostConfig;
use crate::error::{AppError, Result};
use crate::pipeline::component::{ComponentKind, Reference, RunCounts};
use crate::pipeline::resolver::Subject;

/// Resolved reference lists, one per slot. Every list holds at least the
/// unset sentinel so the product always multiplies by one.
#[derive(Debug, Clone)]
pub struct ResolvedSlots {
    pub outfit: Vec<Reference>,
    pub over_outfit: Vec<Reference>,
    pub style: Vec<Reference>,
    pub hair_style: Vec<Reference>,
    pub hair_color: Vec<Reference>,
    pub makeup: Vec<Reference>,
    pub expression: Vec<Reference>,
    pub accessories: Vec<Reference>,
}

impl ResolvedSlots {
    pub fn list(&self, kind: ComponentKind) -> &[Reference] {
        match kind {
            ComponentKind::Outfit => &self.outfit,
            ComponentKind::OverOutfit => &self.over_outfit,
            ComponentKind::Style => &self.style,
            ComponentKind::HairStyle => &self.hair_style,
            ComponentKind::HairColor => &self.hair_color,
            ComponentKind::Makeup => &self.makeup,
            ComponentKind::Expression => &self.expression,
            ComponentKind::Accessories => &self.accessories,
        }
    }
}

/// The slot assignment of one plan entry.
#[derive(Debug, Clone)]
pub struct SlotSet {
    pub outfit: Reference,
    pub over_outfit: Reference,
    pub style: Reference,
    pub hair_style: Reference,
    pub hair_color: Reference,
    pub makeup: Reference,
    pub expression: Reference,
    pub accessories: Reference,
}

impl SlotSet {
    pub fn get(&self, kind: ComponentKind) -> &Reference {
        match kind {
            ComponentKind::Outfit => &self.outfit,
            ComponentKind::OverOutfit => &self.over_outfit,
            ComponentKind::Style => &self.style,
            ComponentKind::HairStyle => &self.hair_style,
            ComponentKind::HairColor => &self.hair_color,
            ComponentKind::Makeup => &self.makeup,
            ComponentKind::Expression => &self.expression,
            ComponentKind::Accessories => &self.accessories,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub index: usize,
    pub subject: Subject,
    pub slots: SlotSet,
    /// 1-based variation index within this slot combination.
    pub variation: usize,
}

#[derive(Debug)]
pub struct Plan {
    pub entries: Vec<PlanEntry>,
    pub counts: RunCounts,
}

/// Enumerate the full Cartesian product in the fixed order: subjects
/// outermost, then outfit, over-outfit, style, hair-style, hair-color,
/// makeup, expression, accessories, variation innermost. Reruns with
/// identical inputs enumerate identically.
pub fn build_plan(subjects: &[Subject], slots: &ResolvedSlots, variations: usize) -> Result<Plan> {
    if variations < 1 {
        return Err(AppError::validation("variation count must be at least 1"));
    }
    if subjects.is_empty() {
        return Err(AppError::validation("at least one subject is required"));
    }

    let mut entries = Vec::new();
    let mut index = 0usize;

    for subject in subjects {
        for outfit in &slots.outfit {
            for over_outfit in &slots.over_outfit {
                for style in &slots.style {
                    for hair_style in &slots.hair_style {
                        for hair_color in &slots.hair_color {
                            for makeup in &slots.makeup {
                                for expression in &slots.expression {
                                    for accessories in &slots.accessories {
                                        for variation in 1..=variations {
                                            entries.push(PlanEntry {
                                                index,
                                                subject: subject.clone(),
                                                slots: SlotSet {
                                                    outfit: outfit.clone(),
                                                    over_outfit: over_outfit.clone(),
                                                    style: style.clone(),
                                                    hair_style: hair_style.clone(),
                                                    hair_color: hair_color.clone(),
                                                    makeup: makeup.clone(),
                                                    expression: expression.clone(),
                                                    accessories: accessories.clone(),
                                                },
                                                variation,
                                            });
                                            index += 1;
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    let counts = RunCounts {
        subjects: subjects.len(),
        outfits: slots.outfit.len(),
        styles: slots.style.len(),
        variations,
    };

    Ok(Plan { entries, counts })
}

/// Pre-dispatch cost verdict. Over the hard maximum is fatal; over the
/// confirmation threshold requires an explicit go-ahead.
#[derive(Debug, PartialEq)]
pub enum CostVerdict {
    Proceed,
    NeedsConfirmation { total_cost: f64 },
    OverMaximum { total_cost: f64 },
}

pub fn check_cost(cost: &CostConfig, image_count: usize) -> CostVerdict {
    let total_cost = cost.total_cost(image_count);
    if cost.exceeds_maximum(image_count) {
        CostVerdict::OverMaximum { total_cost }
    } else if cost.requires_confirmation(image_count) {
        CostVerdict::NeedsConfirmation { total_cost }
    } else {
        CostVerdict::Proceed
    }
}
