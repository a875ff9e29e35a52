//! One slash command from template to persisted artifact.
//!
//! ```text
//! guard → load template → render → dispatch → write → next
//! ```
//!
//! Commands that are not workflow steps (the code-flow commands, for
//! example) are rendered and dispatched without a guard, and whatever the
//! agent writes itself is reported as-is.

use crate::artifact::{ArtifactWriter, WriteMode, WriteOutcome};
use crate::config::Config;
use crate::dispatch::{self, AgentDispatcher, DispatchRequest, FanOutOptions};
use crate::error::{FlowError, Result};
use crate::feature::{self, Feature};
use crate::io;
use crate::markdown;
use crate::paths::{self, display_relative, PathResolver};
use crate::substitute::{self, Arguments, RenderContext, Rendered, SubstitutionMode};
use crate::template::{Template, TemplateStore};
use crate::types::{ArtifactKind, Step, TemplateKind};
use crate::workflow::{Suggestion, WorkflowEngine};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

pub const MOCKUP_COMMAND: &str = "mockup-product";

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// A project root with its effective config, path resolver and templates.
pub struct Workspace {
    pub root: PathBuf,
    pub config: Config,
    pub resolver: PathResolver,
    pub templates: TemplateStore,
}

impl Workspace {
    pub fn open(root: &Path, plugin_roots: Vec<PathBuf>) -> Result<Self> {
        let config = Config::load(root, &plugin_roots)?;
        Ok(Self::with_config(root, config, plugin_roots))
    }

    pub fn with_config(root: &Path, config: Config, plugin_roots: Vec<PathBuf>) -> Self {
        let resolver = PathResolver::new(root, config.path_config());
        Self {
            root: root.to_path_buf(),
            config,
            resolver,
            templates: TemplateStore::new(plugin_roots),
        }
    }

    pub fn workflow(&self) -> WorkflowEngine<'_> {
        WorkflowEngine::new(&self.resolver)
    }

    pub fn substitution_mode(&self, strict: bool) -> SubstitutionMode {
        if strict || self.config.engine.strict_substitution {
            SubstitutionMode::Strict
        } else {
            SubstitutionMode::Forgiving
        }
    }

    /// Path tokens plus per-run values for a render.
    pub fn render_context(
        &self,
        arguments: Arguments,
        feature: Option<&str>,
        today: NaiveDate,
    ) -> Result<RenderContext> {
        let mut ctx = RenderContext::new(arguments).with_tokens(self.resolver.as_context());
        ctx.set("DATE", today.format("%Y-%m-%d").to_string());
        if let Some(id) = feature {
            let dir = self.resolver.feature_dir(id)?;
            ctx.set("FEATURE_ID", id);
            ctx.set("FEATURE_DIR", display_relative(&self.root, &dir));
            if let Some((_, name)) = id.split_once('-') {
                ctx.set("FEATURE_NAME", name);
            }
        }
        Ok(ctx)
    }

    /// Load and render any template. Used for previews; no guard runs.
    pub fn render(
        &self,
        kind: TemplateKind,
        name: &str,
        arguments: Arguments,
        strict: bool,
    ) -> Result<(Arc<Template>, Rendered)> {
        let template = self.templates.load(kind, name)?;
        let feature = arguments
            .get(1)
            .filter(|a| paths::validate_feature_id(a).is_ok())
            .map(str::to_string);
        let ctx = self.render_context(arguments, feature.as_deref(), Local::now().date_naive())?;
        let rendered = substitute::render(&template.body, &ctx, self.substitution_mode(strict))?;
        Ok((template, rendered))
    }

    /// Create the product layout and a starter config. Existing files are
    /// left alone. Returns the project-relative paths that were created.
    pub fn init(&self) -> Result<Vec<String>> {
        let mut created = Vec::new();
        for token in [paths::PRODUCT_ROOT, paths::FEATURES, paths::ADR, paths::MOCKUPS] {
            let dir = self.resolver.resolve(token)?;
            if !dir.is_dir() {
                io::ensure_dir(&dir)?;
                created.push(display_relative(&self.root, &dir));
            }
        }
        let config = paths::config_path(&self.root);
        if io::write_if_missing(&config, Config::starter_document().as_bytes())? {
            created.push(display_relative(&self.root, &config));
        }
        Ok(created)
    }
}

// ---------------------------------------------------------------------------
// Requests and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub command: String,
    pub arguments: Arguments,
    pub model: Option<String>,
    pub strict: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// update-feature found nothing newer than feature.md; no agent ran.
    NothingToSync,
}

#[derive(Debug, Clone, Serialize)]
pub struct WrittenArtifact {
    pub path: String,
    #[serde(flatten)]
    pub outcome: WriteOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    pub status: RunStatus,
    pub written: Vec<WrittenArtifact>,
    /// Files the agent reported writing on its own.
    pub agent_files: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mockups: Option<MockupReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<Suggestion>,
}

/// A mockup batch. `variants: None` uses `engine.mockup_variants`.
#[derive(Debug, Clone, Default)]
pub struct MockupRequest {
    pub arguments: Arguments,
    pub variants: Option<usize>,
    pub model: Option<String>,
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedVariant {
    pub variant: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MockupReport {
    pub written: Vec<String>,
    pub failed: Vec<FailedVariant>,
}

impl MockupReport {
    pub fn all_failed(&self) -> bool {
        self.written.is_empty() && !self.failed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    workspace: Workspace,
    writer: ArtifactWriter,
    dispatcher: Arc<dyn AgentDispatcher>,
}

impl Pipeline {
    pub fn new(workspace: Workspace, dispatcher: Arc<dyn AgentDispatcher>) -> Self {
        Self {
            workspace,
            writer: ArtifactWriter::new(),
            dispatcher,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    fn timeout(&self) -> Option<Duration> {
        self.workspace
            .config
            .engine
            .dispatch_timeout_secs
            .map(Duration::from_secs)
    }

    fn model_for(&self, request_model: Option<&str>, template: &Template) -> String {
        request_model
            .map(str::to_string)
            .or_else(|| template.frontmatter.model.clone())
            .unwrap_or_else(|| self.workspace.config.engine.default_model.clone())
    }

    /// Run one slash command end to end.
    pub async fn run(&self, request: RunRequest) -> Result<RunReport> {
        let name = request.command.trim().trim_start_matches('/').to_string();
        let step = Step::from_str(&name).ok();

        if step == Some(Step::MockupProduct) {
            return self
                .mockup(MockupRequest {
                    arguments: request.arguments,
                    variants: None,
                    model: request.model,
                    strict: request.strict,
                })
                .await;
        }

        let ws = &self.workspace;
        let today = Local::now().date_naive();
        let feature = self.resolve_feature(step, &request.arguments)?;
        let arguments = match (&feature, step) {
            (Some(id), Some(s)) if s.is_feature_scoped() => {
                request.arguments.clone().with_positional(1, id)
            }
            _ => request.arguments.clone(),
        };
        let mut warnings = Vec::new();

        if let Some(step) = step {
            let validation = ws.workflow().guard(step, feature.as_deref())?;
            warnings.extend(
                validation
                    .warnings
                    .iter()
                    .map(|w| format!("{} (run {})", w.reason, w.remedy)),
            );
        }

        if step == Some(Step::UpdateFeature) {
            if let Some(id) = feature.as_deref() {
                if request.arguments.len() <= 1 && self.nothing_to_sync(id)? {
                    tracing::info!(feature = %id, "nothing to sync");
                    return Ok(RunReport {
                        command: name,
                        step,
                        feature,
                        status: RunStatus::NothingToSync,
                        written: vec![],
                        agent_files: vec![],
                        warnings,
                        mockups: None,
                        next: None,
                    });
                }
            }
        }

        let template = ws.templates.load(TemplateKind::Command, &name)?;
        let ctx = ws.render_context(arguments, feature.as_deref(), today)?;
        let rendered = substitute::render(&template.body, &ctx, ws.substitution_mode(request.strict))?;
        warnings.extend(
            rendered
                .warnings
                .iter()
                .map(|w| format!("unresolved placeholder {} on line {}", w.token, w.line)),
        );

        let dispatch_request = DispatchRequest {
            label: name.clone(),
            prompt: rendered.text,
            allowed_tools: template.frontmatter.allowed_tools.clone(),
            model: Some(self.model_for(request.model.as_deref(), &template)),
        };
        tracing::info!(command = %name, feature = ?feature, "dispatching");
        let result =
            dispatch::dispatch_with_timeout(self.dispatcher.as_ref(), dispatch_request, self.timeout())
                .await?;

        let agent_files: Vec<PathBuf> = result
            .files_written
            .iter()
            .map(|p| self.absolute(p))
            .collect();

        let mut written = Vec::new();
        if let Some((path, mode)) = self.target(step, feature.as_deref(), today)? {
            if agent_files.contains(&path) {
                tracing::debug!(path = %path.display(), "agent wrote target itself");
            } else if result.text.trim().is_empty() {
                warnings.push(format!(
                    "agent returned no content; {} not written",
                    display_relative(&ws.root, &path)
                ));
            } else if mode == WriteMode::MergeSections
                && path.exists()
                && markdown::top_level(&result.text).is_none()
            {
                // Chat replies such as "no changes needed" carry no sections.
                warnings.push(format!(
                    "agent reply has no sections to merge; {} left as is",
                    display_relative(&ws.root, &path)
                ));
            } else {
                let outcome = self.writer.write(&path, &ensure_trailing_newline(&result.text), mode)?;
                written.push(WrittenArtifact {
                    path: display_relative(&ws.root, &path),
                    outcome,
                });
            }
        }

        let next = match step {
            Some(_) => Some(ws.workflow().next(feature.as_deref())?),
            None => None,
        };

        Ok(RunReport {
            command: name,
            step,
            feature,
            status: RunStatus::Completed,
            written,
            agent_files: agent_files
                .iter()
                .map(|p| display_relative(&ws.root, p))
                .collect(),
            warnings,
            mockups: None,
            next,
        })
    }

    /// Feature-scoped steps take the feature id (or a unique prefix) as `$1`.
    /// add-feature allocates the next id from the name in `$1`.
    fn resolve_feature(&self, step: Option<Step>, args: &Arguments) -> Result<Option<String>> {
        let resolver = &self.workspace.resolver;
        match step {
            Some(s) if s.is_feature_scoped() => {
                let query = args.get(1).ok_or_else(|| {
                    FlowError::InvalidFeatureId(format!(
                        "(none given; usage: {} <feature-id>)",
                        s.command_line(None)
                    ))
                })?;
                Ok(Some(feature::find(resolver, query)?.id))
            }
            Some(Step::AddFeature) => {
                let name = args.get(1).ok_or_else(|| {
                    FlowError::InvalidFeatureId("(none given; usage: /add-feature <name>)".into())
                })?;
                Ok(Some(feature::allocate_id(resolver, name)?))
            }
            _ => Ok(None),
        }
    }

    /// Where a step's output goes and how it is written.
    fn target(
        &self,
        step: Option<Step>,
        feature: Option<&str>,
        today: NaiveDate,
    ) -> Result<Option<(PathBuf, WriteMode)>> {
        let r = &self.workspace.resolver;
        let artifact = |kind| -> Result<PathBuf> {
            let id = feature.ok_or_else(|| FlowError::InvalidFeatureId(String::new()))?;
            r.feature_artifact(id, kind)
        };
        let target = match step {
            Some(Step::DefineProduct) => (r.product_doc()?, WriteMode::OverwriteWhole),
            Some(Step::DefineArchitecture) => (r.architecture_doc()?, WriteMode::OverwriteWhole),
            Some(Step::AddFeature) => (artifact(ArtifactKind::Feature)?, WriteMode::CreateOnly),
            Some(Step::PlanFeature) => (artifact(ArtifactKind::Plan)?, WriteMode::OverwriteWhole),
            Some(Step::ImplementFeature) => (artifact(ArtifactKind::Plan)?, WriteMode::MergeSections),
            Some(Step::ReviewFeature) => (artifact(ArtifactKind::Review)?, WriteMode::OverwriteWhole),
            Some(Step::UpdateFeature) => (artifact(ArtifactKind::Feature)?, WriteMode::MergeSections),
            Some(Step::RecordDecision) => (r.adr_path(today)?, WriteMode::MergeSections),
            Some(Step::MockupProduct) | None => return Ok(None),
        };
        Ok(Some(target))
    }

    /// True if neither product.md nor any input file of the feature is newer
    /// than its feature.md. A feature.md still missing its Acceptance
    /// Criteria always has something to sync, since planning waits on it.
    fn nothing_to_sync(&self, id: &str) -> Result<bool> {
        let f = Feature::load(&self.workspace.resolver, id)?;
        if !f.has_acceptance_criteria {
            return Ok(false);
        }
        let Some(feature_mtime) = io::modified(&f.artifact(ArtifactKind::Feature))? else {
            return Ok(false);
        };
        let product_mtime = io::modified(&self.workspace.resolver.product_doc()?)?;
        let newest_input = f.newest_input()?;
        Ok(not_newer(product_mtime, feature_mtime) && not_newer(newest_input, feature_mtime))
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            paths::normalize(path)
        } else {
            paths::normalize(&self.workspace.root.join(path))
        }
    }

    // -----------------------------------------------------------------------
    // Mockups
    // -----------------------------------------------------------------------

    /// Dispatch one mockup request per variant concurrently and write each
    /// successful one to `{{MOCKUPS}}/variant-N.html`. A failed variant is
    /// reported and never aborts the others.
    ///
    /// Every variant renders the same arguments; only `{{VARIANT}}` and
    /// `{{MOCKUP_FILE}}` differ between them.
    pub async fn mockup(&self, request: MockupRequest) -> Result<RunReport> {
        let ws = &self.workspace;
        let validation = ws.workflow().guard(Step::MockupProduct, None)?;
        let mut warnings: Vec<String> = validation
            .warnings
            .iter()
            .map(|w| format!("{} (run {})", w.reason, w.remedy))
            .collect();

        let template = ws.templates.load(TemplateKind::Command, MOCKUP_COMMAND)?;
        let today = Local::now().date_naive();
        let variants = request
            .variants
            .unwrap_or(ws.config.engine.mockup_variants)
            .max(1);
        let model = self.model_for(request.model.as_deref(), &template);
        let strict = request.strict;

        let mut requests = Vec::with_capacity(variants);
        for n in 1..=variants {
            let mut ctx = ws.render_context(request.arguments.clone(), None, today)?;
            ctx.set("VARIANT", n.to_string());
            ctx.set("VARIANT_COUNT", variants.to_string());
            ctx.set(
                "MOCKUP_FILE",
                display_relative(&ws.root, &ws.resolver.mockup_path(&variant_file(n))?),
            );
            let rendered = substitute::render(&template.body, &ctx, ws.substitution_mode(strict))?;
            if n == 1 {
                warnings.extend(rendered.warnings.iter().map(|w| {
                    format!("unresolved placeholder {} on line {}", w.token, w.line)
                }));
            }
            requests.push(DispatchRequest {
                label: format!("variant-{n}"),
                prompt: rendered.text,
                allowed_tools: template.frontmatter.allowed_tools.clone(),
                model: Some(model.clone()),
            });
        }

        let options = FanOutOptions {
            max_parallel: ws.config.engine.max_parallel_agents,
            timeout: self.timeout(),
        };
        let items = dispatch::fan_out(Arc::clone(&self.dispatcher), requests, options).await;

        let mut report = MockupReport::default();
        let mut written = Vec::new();
        let mut agent_files = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            let n = i + 1;
            let path = ws.resolver.mockup_path(&variant_file(n))?;
            let rel = display_relative(&ws.root, &path);
            let result = match item.result {
                Ok(result) => result,
                Err(e) => {
                    report.failed.push(FailedVariant {
                        variant: n,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            let files: Vec<PathBuf> = result.files_written.iter().map(|p| self.absolute(p)).collect();
            agent_files.extend(files.iter().map(|p| display_relative(&ws.root, p)));
            if files.contains(&path) {
                report.written.push(rel);
                continue;
            }
            if result.text.trim().is_empty() {
                report.failed.push(FailedVariant {
                    variant: n,
                    error: "agent returned no content".to_string(),
                });
                continue;
            }
            match self.writer.write(&path, &result.text, WriteMode::OverwriteWhole) {
                Ok(outcome) => {
                    written.push(WrittenArtifact {
                        path: rel.clone(),
                        outcome,
                    });
                    report.written.push(rel);
                }
                Err(e) => report.failed.push(FailedVariant {
                    variant: n,
                    error: e.to_string(),
                }),
            }
        }

        tracing::info!(
            written = report.written.len(),
            failed = report.failed.len(),
            "mockup batch finished"
        );

        Ok(RunReport {
            command: MOCKUP_COMMAND.to_string(),
            step: Some(Step::MockupProduct),
            feature: None,
            status: RunStatus::Completed,
            written,
            agent_files,
            warnings,
            mockups: Some(report),
            next: Some(ws.workflow().next(None)?),
        })
    }
}

fn variant_file(n: usize) -> String {
    format!("variant-{n}.html")
}

fn ensure_trailing_newline(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}

fn not_newer(time: Option<SystemTime>, than: SystemTime) -> bool {
    time.map_or(true, |t| t <= than)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
