use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use tracing::{info, warn};

use crate::config::{CostConfig, CONFIG};
use crate::error::{AppError, Result};
use crate::llm::limiter::RateLimiter;
use crate::llm::{media, Oracle};
use crate::pipeline::analyzer::{AnalyzerRegistry, ExcludeOptions};
use crate::pipeline::component::{
    AnalysisRecord, ComponentKind, ImageBlob, Reference, ReferenceSource, RunResult, StepResult,
};
use crate::pipeline::compose::{build_directive, ComponentDescriptions};
use crate::pipeline::describe;
use crate::pipeline::dispatch::{CancellationFlag, Dispatcher, GenerationJob};
use crate::pipeline::output::OutputWriter;
use crate::pipeline::plan::{build_plan, check_cost, CostVerdict, PlanEntry, ResolvedSlots};
use crate::pipeline::resolver::Resolver;

/// User inputs for one sweep, as handed over by the CLI.
#[derive(Debug, Default, Clone)]
pub struct SweepConfig {
    pub outfit: Option<String>,
    pub over_outfit: Option<String>,
    pub style: Option<String>,
    pub hair_style: Option<String>,
    pub hair_color: Option<String>,
    pub makeup: Option<String>,
    pub expression: Option<String>,
    pub accessories: Option<String>,
    pub subjects: Option<String>,
    pub variations: usize,
    pub send_original: bool,
    pub skip_confirmation: bool,
    pub debug: bool,
}

type ConfirmFn = Box<dyn Fn(usize, f64) -> bool + Send + Sync>;

/// Top-level sequencing: resolve, plan, cost-gate, then per-entry
/// analyze/compose/dispatch/write. Per-entry failures are counted, never
/// fatal.
pub struct Orchestrator {
    oracle: Arc<dyn Oracle>,
    root: PathBuf,
    cost: CostConfig,
    analyzers: AnalyzerRegistry,
    cancel: CancellationFlag,
    max_in_flight: usize,
    pacing: Duration,
    confirm: ConfirmFn,
}

impl Orchestrator {
    pub fn new(oracle: Arc<dyn Oracle>, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let ttl = chrono::Duration::days(CONFIG.cache_ttl_days);
        Orchestrator {
            analyzers: AnalyzerRegistry::new(oracle.clone(), &root, ttl),
            oracle,
            root,
            cost: CostConfig::from_env(),
            cancel: CancellationFlag::new(),
            max_in_flight: RateLimiter::new(CONFIG.requests_per_second).burst_capacity(),
            pacing: Duration::from_millis(1500),
            confirm: Box::new(|image_count, total_cost| {
                crate::prompt::confirm_expensive_operation(
                    &format!("This sweep will generate {image_count} images"),
                    &CostConfig::format_cost(total_cost),
                )
            }),
        }
    }

    pub fn with_cost(mut self, cost: CostConfig) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_confirm(mut self, confirm: ConfirmFn) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.analyzers.set_cache_enabled(enabled);
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Analyze a single reference outside a sweep (the `analyze` command).
    pub async fn analyze_reference(
        &self,
        kind: ComponentKind,
        input: &str,
    ) -> Result<AnalysisRecord> {
        let resolver = Resolver::new(&self.root);
        let references = resolver.resolve_slot(kind, Some(input))?;
        let reference = references.first().ok_or_else(|| {
            AppError::validation(format!("no reference resolved from '{input}'"))
        })?;
        self.analyzers
            .analyze(reference, &ExcludeOptions::default())
            .await
    }

    fn resolve_all(&self, config: &SweepConfig) -> Result<ResolvedSlots> {
        let resolver = Resolver::new(&self.root);
        Ok(ResolvedSlots {
            outfit: resolver.resolve_slot(ComponentKind::Outfit, config.outfit.as_deref())?,
            over_outfit: resolver
                .resolve_slot(ComponentKind::OverOutfit, config.over_outfit.as_deref())?,
            style: resolver.resolve_slot(ComponentKind::Style, config.style.as_deref())?,
            hair_style: resolver
                .resolve_slot(ComponentKind::HairStyle, config.hair_style.as_deref())?,
            hair_color: resolver
                .resolve_slot(ComponentKind::HairColor, config.hair_color.as_deref())?,
            makeup: resolver.resolve_slot(ComponentKind::Makeup, config.makeup.as_deref())?,
            expression: resolver
                .resolve_slot(ComponentKind::Expression, config.expression.as_deref())?,
            accessories: resolver
                .resolve_slot(ComponentKind::Accessories, config.accessories.as_deref())?,
        })
    }

    /// Build the final per-entry descriptions, applying the composition
    /// rules that depend on which slots are present together.
    async fn describe_components(
        &self,
        entry: &PlanEntry,
        exclude: &ExcludeOptions,
        steps: &mut Vec<StepResult>,
        analyzed: &mut HashSet<(ComponentKind, String)>,
    ) -> Result<ComponentDescriptions> {
        let slots = &entry.slots;
        let style_present = slots.style.is_set();

        let mut records: HashMap<ComponentKind, AnalysisRecord> = HashMap::new();
        for kind in ComponentKind::ALL {
            let reference = slots.get(kind);
            if !reference.is_set() {
                continue;
            }
            let record = self.analyzers.analyze(reference, exclude).await?;
            if analyzed.insert((kind, reference.display_name.clone())) {
                steps.push(StepResult::Analysis {
                    kind: kind.as_str(),
                    name: reference.display_name.clone(),
                });
            }
            records.insert(kind, record);
        }

        // Text references carry their description verbatim; image references
        // re-derive where redaction depends on run context.
        let plain = |records: &HashMap<ComponentKind, AnalysisRecord>, kind: ComponentKind| {
            records.get(&kind).map(|record| record.description.clone())
        };

        let over_outfit = records
            .get(&ComponentKind::OverOutfit)
            .map(|record| record.description.clone());

        // With a base outfit underneath, the outfit slot narrows to its
        // jacket/coat layer; nothing qualifying collapses the slot entirely.
        let outfit = match records.get(&ComponentKind::Outfit) {
            Some(record) if over_outfit.is_some() => {
                if matches!(slots.outfit.source, ReferenceSource::Text(_)) {
                    Some(record.description.clone())
                } else {
                    match describe::outer_layer_description(&record.structured) {
                        Some(outer) => Some(outer),
                        None => {
                            info!(
                                "No outer layer found in {}, using over-outfit as the complete outfit",
                                slots.outfit.display_name
                            );
                            None
                        }
                    }
                }
            }
            Some(record) => Some(record.description.clone()),
            None => None,
        };

        let expression = records.get(&ComponentKind::Expression).map(|record| {
            if style_present && !matches!(slots.expression.source, ReferenceSource::Text(_)) {
                describe::expression_description(&record.structured, true)
            } else {
                record.description.clone()
            }
        });

        Ok(ComponentDescriptions {
            outfit,
            over_outfit,
            style: plain(&records, ComponentKind::Style),
            hair_style: plain(&records, ComponentKind::HairStyle),
            hair_color: plain(&records, ComponentKind::HairColor),
            makeup: plain(&records, ComponentKind::Makeup),
            expression,
            accessories: plain(&records, ComponentKind::Accessories),
        })
    }

    fn companion_blobs(&self, entry: &PlanEntry) -> Vec<ImageBlob> {
        let mut companions = Vec::new();
        for kind in ComponentKind::ALL {
            if let Some(path) = entry.slots.get(kind).image_path() {
                match media::load_image(path) {
                    Ok(blob) => companions.push(blob),
                    Err(err) => warn!(
                        "Skipping companion image {} for request: {err}",
                        path.display()
                    ),
                }
            }
        }
        companions
    }

    pub async fn run_sweep(&self, config: SweepConfig) -> Result<RunResult> {
        let started_at = Utc::now();

        // Resolve every slot, then enumerate the product.
        let resolver = Resolver::new(&self.root);
        let subjects = resolver.resolve_subjects(config.subjects.as_deref())?;
        let slots = self.resolve_all(&config)?;
        let plan = build_plan(&subjects, &slots, config.variations)?;

        let image_count = plan.entries.len();
        info!(
            "Sweep plan: {} subjects x {} outfits x {} styles x {} variations = {} images",
            plan.counts.subjects,
            plan.counts.outfits,
            plan.counts.styles,
            plan.counts.variations,
            image_count
        );
        println!("Cost breakdown: {}", self.cost.breakdown(image_count));

        let mut component_lines = Vec::new();
        for kind in ComponentKind::ALL {
            let names: Vec<&str> = slots
                .list(kind)
                .iter()
                .filter(|reference| reference.is_set())
                .map(|reference| reference.display_name.as_str())
                .collect();
            if !names.is_empty() {
                component_lines.push(format!("  {}: {}", kind.label(), names.join(", ")));
            }
        }
        if !component_lines.is_empty() {
            println!("Components to apply:");
            for line in &component_lines {
                println!("{line}");
            }
        }

        // Cost gate runs before any analysis or generation.
        match check_cost(&self.cost, image_count) {
            CostVerdict::OverMaximum { total_cost } => {
                return Err(AppError::validation(format!(
                    "sweep cost ({}) exceeds maximum allowed ({})",
                    CostConfig::format_cost(total_cost),
                    CostConfig::format_cost(self.cost.maximum_cost)
                )));
            }
            CostVerdict::NeedsConfirmation { total_cost } if !config.skip_confirmation => {
                if !(self.confirm)(image_count, total_cost) {
                    info!("Sweep cancelled by user at the confirmation prompt");
                    return Ok(RunResult {
                        started_at,
                        ended_at: Utc::now(),
                        steps: Vec::new(),
                        counts: plan.counts,
                        generated: 0,
                        failed: 0,
                        cancelled: true,
                        output_dir: None,
                    });
                }
            }
            _ => {
                if image_count > 10 {
                    crate::prompt::show_cost_estimate(
                        &format!("This sweep will generate {image_count} images"),
                        &CostConfig::format_cost(self.cost.total_cost(image_count)),
                    );
                }
            }
        }

        let exclude = ExcludeOptions {
            hair: slots.hair_style.iter().any(Reference::is_set)
                || slots.hair_color.iter().any(Reference::is_set),
            makeup: slots.makeup.iter().any(Reference::is_set),
            accessories: slots.accessories.iter().any(Reference::is_set),
        };

        let writer = Arc::new(OutputWriter::create(&self.root)?);
        let mut steps: Vec<StepResult> = Vec::new();
        let mut analyzed: HashSet<(ComponentKind, String)> = HashSet::new();
        let mut subject_blobs: HashMap<PathBuf, ImageBlob> = HashMap::new();
        let mut jobs: Vec<GenerationJob> = Vec::new();
        let mut failed = 0usize;

        for entry in &plan.entries {
            if self.cancel.is_cancelled() {
                break;
            }

            let components = match self
                .describe_components(entry, &exclude, &mut steps, &mut analyzed)
                .await
            {
                Ok(components) => components,
                Err(err) => {
                    let err = err.in_step("analyze");
                    warn!(
                        "Skipping entry {} ({} / {}): {err}",
                        entry.index, entry.subject.display_name, entry.slots.outfit.display_name
                    );
                    steps.push(StepResult::Failure {
                        label: format!(
                            "{}/{}/{}",
                            entry.subject.display_name,
                            entry.slots.outfit.display_name,
                            entry.slots.style.display_name
                        ),
                        error: err.to_string(),
                    });
                    failed += 1;
                    continue;
                }
            };

            let subject_blob = match subject_blobs.get(&entry.subject.path) {
                Some(blob) => blob.clone(),
                None => match media::load_image(&entry.subject.path) {
                    Ok(blob) => {
                        subject_blobs.insert(entry.subject.path.clone(), blob.clone());
                        blob
                    }
                    Err(err) => {
                        let err = err.in_step("load-subject");
                        steps.push(StepResult::Failure {
                            label: entry.subject.display_name.clone(),
                            error: err.to_string(),
                        });
                        failed += 1;
                        continue;
                    }
                },
            };

            let companions = if config.send_original {
                self.companion_blobs(entry)
            } else {
                Vec::new()
            };

            let directive = build_directive(subject_blob, companions, &components);
            if config.debug {
                println!("\n=== Generation directive (entry {}) ===", entry.index);
                println!("{}", directive.prose);
                println!("=== end directive ===\n");
            }

            jobs.push(GenerationJob {
                entry_index: entry.index,
                directive,
                subject: entry.subject.display_name.clone(),
                outfit: entry.slots.outfit.display_name.clone(),
                style: entry.slots.style.display_name.clone(),
                variation: entry.variation,
            });
        }

        let dispatcher = Dispatcher::new(
            self.oracle.clone(),
            self.max_in_flight,
            self.pacing,
            self.cancel.clone(),
        );
        let outcomes = dispatcher.run(jobs, writer.clone()).await;

        let mut generated = 0usize;
        for outcome in outcomes {
            match outcome.result {
                Ok(output_path) => {
                    generated += 1;
                    steps.push(StepResult::Generation {
                        output_path,
                        subject: outcome.subject,
                        outfit: outcome.outfit,
                        style: outcome.style,
                        variation: outcome.variation,
                    });
                }
                Err(err) => {
                    failed += 1;
                    steps.push(StepResult::Failure {
                        label: format!(
                            "{}/{}/{}",
                            outcome.subject, outcome.outfit, outcome.style
                        ),
                        error: err.in_step("generate").to_string(),
                    });
                }
            }
        }

        Ok(RunResult {
            started_at,
            ended_at: Utc::now(),
            steps,
            counts: plan.counts,
            generated,
            failed,
            cancelled: self.cancel.is_cancelled(),
            output_dir: Some(writer.run_dir().to_path_buf()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::MockOracle;
    use std::fs;
    use tempfile::TempDir;

    fn workspace() -> TempDir {
        let tmp = TempDir::new().unwrap();
        for (dir, name) in [
            ("subjects", "jaimee.png"),
            ("outfits", "jacket.png"),
        ] {
            let path = tmp.path().join(dir).join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, format!("{dir}-{name}").as_bytes()).unwrap();
        }
        tmp
    }

    fn orchestrator(oracle: Arc<MockOracle>, root: &Path) -> Orchestrator {
        Orchestrator::new(oracle, root)
            .with_cost(CostConfig::default())
            .with_pacing(Duration::ZERO)
    }

    fn base_config() -> SweepConfig {
        SweepConfig {
            outfit: Some("outfits/jacket.png".to_string()),
            subjects: Some("jaimee".to_string()),
            variations: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn single_entry_sweep_writes_one_artifact() {
        let tmp = workspace();
        let oracle = Arc::new(MockOracle::new().with_default_analysis(
            r#"{"clothing": ["black biker jacket"], "overall": "Punk staple"}"#,
        ));
        let orchestrator = orchestrator(oracle.clone(), tmp.path());

        let result = orchestrator.run_sweep(base_config()).await.unwrap();

        assert!(!result.cancelled);
        assert_eq!(result.generated, 1);
        assert_eq!(result.failed, 0);
        assert_eq!(result.counts.subjects, 1);
        assert_eq!(result.counts.outfits, 1);
        assert_eq!(oracle.analyze_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(oracle.generate_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let artifact = result
            .steps
            .iter()
            .find_map(|step| match step {
                StepResult::Generation { output_path, .. } => Some(output_path.clone()),
                _ => None,
            })
            .expect("generation step recorded");
        let name = artifact.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("jacket_default_jaimee_"));
        assert!(name.ends_with(".png"));
        assert!(artifact.exists());
    }

    #[tokio::test]
    async fn second_run_reuses_cached_analysis() {
        let tmp = workspace();
        let oracle = Arc::new(MockOracle::new().with_default_analysis(
            r#"{"clothing": ["black biker jacket"], "overall": "Punk staple"}"#,
        ));
        let orchestrator = orchestrator(oracle.clone(), tmp.path());

        orchestrator.run_sweep(base_config()).await.unwrap();
        orchestrator.run_sweep(base_config()).await.unwrap();

        // One analysis across both runs; generation still happens per run.
        assert_eq!(oracle.analyze_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(oracle.generate_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn declining_confirmation_cancels_cleanly() {
        let tmp = workspace();
        let oracle = Arc::new(MockOracle::new());
        let orchestrator = orchestrator(oracle.clone(), tmp.path())
            .with_cost(CostConfig {
                cost_per_image: 0.04,
                confirmation_threshold: 0.01,
                maximum_cost: 50.0,
            })
            .with_confirm(Box::new(|_, _| false));

        let result = orchestrator.run_sweep(base_config()).await.unwrap();

        assert!(result.cancelled);
        assert_eq!(result.generated, 0);
        assert!(result.steps.is_empty());
        assert!(result.output_dir.is_none());
        assert_eq!(oracle.generate_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        // No analysis either: the gate runs before any oracle work.
        assert_eq!(oracle.analyze_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(!tmp.path().join("output").exists());
    }

    #[tokio::test]
    async fn cost_over_maximum_is_fatal_before_dispatch() {
        let tmp = workspace();
        let oracle = Arc::new(MockOracle::new());
        let orchestrator = orchestrator(oracle.clone(), tmp.path()).with_cost(CostConfig {
            cost_per_image: 0.04,
            confirmation_threshold: 0.01,
            maximum_cost: 0.02,
        });

        let err = orchestrator.run_sweep(base_config()).await.unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(oracle.generate_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn layered_outfit_extracts_outer_layer() {
        let tmp = workspace();
        let dress = tmp.path().join("outfits/dress.png");
        fs::write(&dress, b"dress-bytes").unwrap();

        let oracle = Arc::new(MockOracle::new());
        // Slot order analyzes the outfit first, then the over-outfit.
        oracle.queue_analysis(Ok(r#"{
            "clothing": [
                {"type": "jacket", "description": "studded punk leather jacket"},
                "white band t-shirt",
                "ripped black jeans"
            ],
            "overall": "Punk layering"
        }"#
        .to_string()));
        oracle.queue_analysis(Ok(r#"{
            "clothing": ["red silk slip dress"],
            "overall": "Evening wear"
        }"#
        .to_string()));

        let orchestrator = orchestrator(oracle.clone(), tmp.path());
        let config = SweepConfig {
            over_outfit: Some("outfits/dress.png".to_string()),
            ..base_config()
        };
        let result = orchestrator.run_sweep(config).await.unwrap();
        assert_eq!(result.generated, 1);

        let prose = oracle.last_prose.lock().unwrap().clone();
        assert!(prose.contains("LAYERED OUTFIT:"));
        assert!(prose.contains("red silk slip dress"));
        assert!(prose.contains("studded punk leather jacket"));
        assert!(!prose.contains("t-shirt"));
        assert!(!prose.contains("jeans"));
    }

    #[tokio::test]
    async fn pov_style_suppresses_gaze() {
        let tmp = workspace();
        for name in ["styles/pov-mirror.png", "expressions/wow.png"] {
            let path = tmp.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, name.as_bytes()).unwrap();
        }

        let oracle = Arc::new(MockOracle::new());
        // Slot order: outfit, style, expression.
        oracle.queue_analysis(Ok(r#"{"clothing": ["hoodie"], "overall": "Casual"}"#.to_string()));
        oracle.queue_analysis(Ok(r#"{
            "framing": "first-person view of hands holding a phone toward a mirror",
            "lighting": "soft bathroom light"
        }"#
        .to_string()));
        oracle.queue_analysis(Ok(r#"{
            "primary_emotion": "surprise",
            "gaze": {"direction": "direct at camera"},
            "overall": "Wide-eyed astonishment, gazing directly at the camera"
        }"#
        .to_string()));

        let orchestrator = orchestrator(oracle.clone(), tmp.path());
        let config = SweepConfig {
            style: Some("styles/pov-mirror.png".to_string()),
            expression: Some("expressions/wow.png".to_string()),
            ..base_config()
        };
        let result = orchestrator.run_sweep(config).await.unwrap();
        assert_eq!(result.generated, 1);

        let prose = oracle.last_prose.lock().unwrap().clone();
        assert!(prose.contains("FIRST-PERSON POV SHOT"));
        assert!(!prose.contains("direct at camera"));
        assert!(!prose.contains("gazing directly at the camera"));
        assert!(prose.contains("Primary emotion: surprise"));
    }

    #[tokio::test]
    async fn per_entry_failures_do_not_abort_the_sweep() {
        let tmp = workspace();
        fs::write(tmp.path().join("subjects/kat.png"), b"kat-bytes").unwrap();

        let oracle = Arc::new(MockOracle::new().with_default_analysis(
            r#"{"clothing": ["jacket"], "overall": "Fine"}"#,
        ));
        // First generation fails, the second succeeds.
        oracle.queue_generation(Err(AppError::api(Some(400), "bad request")));

        let orchestrator = orchestrator(oracle.clone(), tmp.path());
        let config = SweepConfig {
            subjects: Some("jaimee kat".to_string()),
            ..base_config()
        };
        let result = orchestrator.run_sweep(config).await.unwrap();

        assert_eq!(result.generated, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(oracle.generate_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(result
            .steps
            .iter()
            .any(|step| matches!(step, StepResult::Failure { .. })));
    }

    #[tokio::test]
    async fn free_text_slots_skip_analysis() {
        let tmp = workspace();
        let oracle = Arc::new(MockOracle::new().with_default_analysis(
            r#"{"clothing": ["jacket"], "overall": "Fine"}"#,
        ));
        let orchestrator = orchestrator(oracle.clone(), tmp.path());

        let config = SweepConfig {
            hair_color: Some("platinum blonde".to_string()),
            makeup: Some("bold red lipstick".to_string()),
            ..base_config()
        };
        orchestrator.run_sweep(config).await.unwrap();

        // Only the outfit image was analyzed; text slots went straight in.
        assert_eq!(oracle.analyze_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        let prose = oracle.last_prose.lock().unwrap().clone();
        assert!(prose.contains("platinum blonde"));
        assert!(prose.contains("bold red lipstick"));
    }
}
