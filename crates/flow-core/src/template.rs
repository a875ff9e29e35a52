//! Template discovery and loading.
//!
//! A plugin root holds three kinds of markdown templates:
//!
//! ```text
//! <plugin>/commands/<name>.md         slash commands
//! <plugin>/agents/<name>.md           agent personas
//! <plugin>/skills/<name>/SKILL.md     skills (may bundle scripts/)
//! ```
//!
//! Each file opens with YAML frontmatter. The schema is checked per kind:
//! `description` is always required, skills also require `name`. Unknown
//! keys are ignored so newer plugins keep loading.

use crate::error::{FlowError, Result};
use crate::markdown;
use crate::types::TemplateKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

pub const SKILL_FILE: &str = "SKILL.md";

// ---------------------------------------------------------------------------
// Frontmatter
// ---------------------------------------------------------------------------

/// `allowed-tools` appears both as `Read, Write, Bash(git:*)` and as a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ToolList {
    Csv(String),
    List(Vec<String>),
}

impl ToolList {
    fn into_vec(self) -> Vec<String> {
        match self {
            ToolList::List(v) => v.into_iter().map(|s| s.trim().to_string()).collect(),
            ToolList::Csv(s) => split_tools(&s),
        }
    }
}

/// Split a comma-separated tool list, keeping commas inside parentheses
/// (`Bash(git add:*, git commit:*)`) together.
fn split_tools(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                out.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    out.push(current);
    out.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[derive(Debug, Deserialize)]
struct RawFrontmatter {
    name: Option<String>,
    description: Option<String>,
    #[serde(rename = "argument-hint", alias = "argument_hint")]
    argument_hint: Option<String>,
    #[serde(rename = "allowed-tools", alias = "allowed_tools")]
    allowed_tools: Option<ToolList>,
    /// Agent files spell the tool list `tools`.
    tools: Option<ToolList>,
    model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frontmatter {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argument_hint: Option<String>,
    pub allowed_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Template {
    pub name: String,
    pub kind: TemplateKind,
    pub frontmatter: Frontmatter,
    pub body: String,
    pub path: PathBuf,
    /// Files under a skill's `scripts/` directory, relative to the skill.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<String>,
}

/// Discovery entry for `list_commands`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandInfo {
    pub name: String,
    pub description: String,
    pub arg_hint: Option<String>,
}

/// Parse one template file's content.
///
/// `fallback_name` is the file stem (or skill directory name) used when the
/// frontmatter does not carry a `name`.
pub fn parse_template(
    kind: TemplateKind,
    fallback_name: &str,
    path: &Path,
    content: &str,
) -> Result<Template> {
    let malformed = |reason: String| FlowError::MalformedTemplate {
        path: path.to_path_buf(),
        reason,
    };

    let (yaml, body) = markdown::split_frontmatter(content)
        .ok_or_else(|| malformed("missing YAML frontmatter (--- ... ---)".to_string()))?;

    let raw: RawFrontmatter = if yaml.trim().is_empty() {
        return Err(malformed("frontmatter is empty".to_string()));
    } else {
        serde_yaml::from_str(yaml).map_err(|e| malformed(e.to_string()))?
    };

    let description = raw
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| malformed("required key 'description' is missing".to_string()))?;

    let name = match (kind, raw.name.filter(|n| !n.trim().is_empty())) {
        (TemplateKind::Skill, None) => {
            return Err(malformed("required key 'name' is missing".to_string()))
        }
        (_, Some(n)) => n.trim().to_string(),
        (_, None) => fallback_name.to_string(),
    };

    let tools = match kind {
        TemplateKind::Agent => raw.tools.or(raw.allowed_tools),
        _ => raw.allowed_tools.or(raw.tools),
    };

    Ok(Template {
        name,
        kind,
        frontmatter: Frontmatter {
            description,
            argument_hint: raw.argument_hint,
            allowed_tools: tools.map(ToolList::into_vec).unwrap_or_default(),
            model: raw.model.filter(|m| !m.trim().is_empty() && m != "inherit"),
        },
        body: body.to_string(),
        path: path.to_path_buf(),
        scripts: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// TemplateStore
// ---------------------------------------------------------------------------

struct CacheEntry {
    modified: SystemTime,
    template: Arc<Template>,
}

/// Loads templates from an ordered list of plugin roots.
///
/// Parsed templates are cached per file and keyed by modification time. A
/// changed file replaces only its own entry, so other commands holding an
/// `Arc<Template>` keep the version they started with.
pub struct TemplateStore {
    roots: Vec<PathBuf>,
    cache: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl TemplateStore {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Load a template by name; the first plugin root that has it wins.
    pub fn load(&self, kind: TemplateKind, name: &str) -> Result<Arc<Template>> {
        let name = name.trim().trim_start_matches('/');
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(FlowError::TemplateNotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            });
        }
        for root in &self.roots {
            let path = template_path(root, kind, name);
            if path.is_file() {
                return self.load_path(kind, name, &path);
            }
        }
        Err(FlowError::TemplateNotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        })
    }

    /// Every loadable template of `kind`, sorted by name. Malformed files are
    /// skipped with a warning; I/O errors on the directories propagate.
    pub fn list(&self, kind: TemplateKind) -> Result<Vec<Arc<Template>>> {
        let mut seen = std::collections::BTreeMap::new();
        for root in &self.roots {
            for (name, path) in discover(root, kind)? {
                if seen.contains_key(&name) {
                    continue;
                }
                match self.load_path(kind, &name, &path) {
                    Ok(t) => {
                        seen.insert(name, t);
                    }
                    Err(FlowError::MalformedTemplate { path, reason }) => {
                        tracing::warn!(path = %path.display(), %reason, "skipping malformed template");
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(seen.into_values().collect())
    }

    pub fn list_commands(&self) -> Result<Vec<CommandInfo>> {
        Ok(self
            .list(TemplateKind::Command)?
            .iter()
            .map(|t| CommandInfo {
                name: t.name.clone(),
                description: t.frontmatter.description.clone(),
                arg_hint: t.frontmatter.argument_hint.clone(),
            })
            .collect())
    }

    fn load_path(&self, kind: TemplateKind, name: &str, path: &Path) -> Result<Arc<Template>> {
        let modified = std::fs::metadata(path)?.modified()?;

        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = cache.get(path) {
                if entry.modified == modified {
                    tracing::debug!(path = %path.display(), "template cache hit");
                    return Ok(Arc::clone(&entry.template));
                }
            }
        }

        let content = std::fs::read_to_string(path)?;
        let mut template = parse_template(kind, name, path, &content)?;
        if kind == TemplateKind::Skill {
            if let Some(dir) = path.parent() {
                template.scripts = list_scripts(dir)?;
            }
        }
        let template = Arc::new(template);

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(
            path.to_path_buf(),
            CacheEntry {
                modified,
                template: Arc::clone(&template),
            },
        );
        Ok(template)
    }

    /// Number of cached templates.
    pub fn cached(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn template_path(root: &Path, kind: TemplateKind, name: &str) -> PathBuf {
    let dir = root.join(kind.dir_name());
    match kind {
        TemplateKind::Skill => dir.join(name).join(SKILL_FILE),
        _ => dir.join(format!("{name}.md")),
    }
}

/// `(name, path)` pairs for every candidate file of `kind` under `root`.
fn discover(root: &Path, kind: TemplateKind) -> Result<Vec<(String, PathBuf)>> {
    let dir = root.join(kind.dir_name());
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy().into_owned();
        match kind {
            TemplateKind::Skill => {
                let skill = path.join(SKILL_FILE);
                if entry.file_type()?.is_dir() && skill.is_file() {
                    found.push((file_name, skill));
                }
            }
            _ => {
                if let Some(stem) = file_name.strip_suffix(".md") {
                    if entry.file_type()?.is_file() {
                        found.push((stem.to_string(), path));
                    }
                }
            }
        }
    }
    found.sort();
    Ok(found)
}

fn list_scripts(skill_dir: &Path) -> Result<Vec<String>> {
    let scripts_dir = skill_dir.join("scripts");
    let mut out = Vec::new();
    if !scripts_dir.is_dir() {
        return Ok(out);
    }
    let mut stack = vec![scripts_dir];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                stack.push(path);
            } else if let Ok(rel) = path.strip_prefix(skill_dir) {
                out.push(crate::paths::display_relative(Path::new(""), rel));
            }
        }
    }
    out.sort();
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
