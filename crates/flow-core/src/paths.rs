use crate::error::{FlowError, Result};
use crate::types::ArtifactKind;
use chrono::NaiveDate;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Token names
// ---------------------------------------------------------------------------

pub const PRODUCT_ROOT: &str = "PRODUCT_ROOT";
pub const PRODUCT_DOC: &str = "PRODUCT_DOC";
pub const ARCHITECTURE: &str = "ARCHITECTURE";
pub const FEATURES: &str = "FEATURES";
pub const ADR: &str = "ADR";
pub const OUTPUTS: &str = "OUTPUTS";
pub const MOCKUPS: &str = "MOCKUPS";

/// Built-in tokens that must resolve inside `PRODUCT_ROOT` whatever their
/// override says.
pub const PRODUCT_TOKENS: [&str; 4] = [PRODUCT_DOC, ARCHITECTURE, FEATURES, ADR];

// ---------------------------------------------------------------------------
// Fixed locations
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = ".claude/lib/config.md";
/// Config shipped inside a plugin directory.
pub const PLUGIN_CONFIG_FILE: &str = "lib/config.md";
pub const MOCKUPS_SUBDIR: &str = "mockups";

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn plugin_config_path(plugin_root: &Path) -> PathBuf {
    plugin_root.join(PLUGIN_CONFIG_FILE)
}

// ---------------------------------------------------------------------------
// PathConfig
// ---------------------------------------------------------------------------

/// Token → relative path template. Values may reference other tokens as
/// `{{NAME}}`; they are expanded on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathConfig {
    tokens: BTreeMap<String, String>,
}

impl PathConfig {
    pub fn new(tokens: BTreeMap<String, String>) -> Self {
        let tokens = tokens
            .into_iter()
            .map(|(k, v)| (bare_token(&k).to_string(), v))
            .collect();
        Self { tokens }
    }

    /// Built-in layout. Derived tokens are written once, in terms of their
    /// base token.
    pub fn defaults() -> Self {
        let pairs = [
            (PRODUCT_ROOT, "product"),
            (PRODUCT_DOC, "{{PRODUCT_ROOT}}/product.md"),
            (ARCHITECTURE, "{{PRODUCT_ROOT}}/architecture.md"),
            (FEATURES, "{{PRODUCT_ROOT}}/features"),
            (ADR, "{{PRODUCT_ROOT}}/adr"),
            (OUTPUTS, "outputs"),
            (MOCKUPS, "{{OUTPUTS}}/mockups"),
        ];
        Self {
            tokens: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.tokens.get(bare_token(token)).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tokens.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// `{{FEATURES}}` and `FEATURES` name the same token.
pub fn bare_token(token: &str) -> &str {
    let t = token.trim();
    t.strip_prefix("{{")
        .and_then(|s| s.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(t)
}

static REF_RE: OnceLock<Regex> = OnceLock::new();

fn ref_re() -> &'static Regex {
    REF_RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap())
}

// ---------------------------------------------------------------------------
// PathResolver
// ---------------------------------------------------------------------------

/// Resolves logical path tokens against a project root.
///
/// Overrides win over defaults. Every result is lexically normalised and
/// must stay inside the project root. The product documents, and any token
/// expanded from `PRODUCT_ROOT` or from them, must also stay inside the
/// product directory.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    defaults: PathConfig,
    overrides: PathConfig,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>, overrides: PathConfig) -> Self {
        Self {
            root: root.into(),
            defaults: PathConfig::defaults(),
            overrides,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, token: &str) -> Result<PathBuf> {
        let name = bare_token(token);
        let mut stack = Vec::new();
        let rel = self.expand(name, &mut stack)?;
        let path = normalize(&self.root.join(&rel));

        let root = normalize(&self.root);
        if !path.starts_with(&root) {
            return Err(FlowError::PathEscapesRoot {
                token: name.to_string(),
                path,
            });
        }
        if name != PRODUCT_ROOT && self.is_product_scoped(name) {
            let product = normalize(&self.root.join(self.expand(PRODUCT_ROOT, &mut Vec::new())?));
            if !path.starts_with(&product) {
                return Err(FlowError::PathEscapesRoot {
                    token: name.to_string(),
                    path,
                });
            }
        }
        Ok(path)
    }

    fn template(&self, name: &str) -> Option<&str> {
        self.overrides.get(name).or_else(|| self.defaults.get(name))
    }

    fn expand(&self, name: &str, stack: &mut Vec<String>) -> Result<String> {
        if stack.iter().any(|s| s == name) {
            return Err(FlowError::TokenCycle(name.to_string()));
        }
        let template = self
            .template(name)
            .ok_or_else(|| FlowError::UnknownToken(name.to_string()))?;

        stack.push(name.to_string());
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in ref_re().captures_iter(template) {
            let Some(m) = caps.get(0) else { continue };
            out.push_str(&template[last..m.start()]);
            out.push_str(&self.expand(&caps[1], stack)?);
            last = m.end();
        }
        out.push_str(&template[last..]);
        stack.pop();
        Ok(out)
    }

    /// A token is product-scoped when it is one of [`PRODUCT_TOKENS`] or its
    /// expansion chain starts at `PRODUCT_ROOT` or one of them.
    fn is_product_scoped(&self, name: &str) -> bool {
        let mut current = name.to_string();
        let mut seen = Vec::new();
        while let Some(template) = self.template(&current) {
            if PRODUCT_TOKENS.contains(&current.as_str()) {
                return true;
            }
            if seen.contains(&current) {
                return false;
            }
            seen.push(current.clone());
            let leading = ref_re()
                .captures(template)
                .filter(|c| c.get(0).map(|m| m.start()) == Some(0))
                .map(|c| c[1].to_string());
            match leading {
                Some(next) if next == PRODUCT_ROOT => return true,
                Some(next) => current = next,
                None => return false,
            }
        }
        false
    }

    /// Every known token name, overrides and defaults merged.
    pub fn tokens(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .defaults
            .names()
            .chain(self.overrides.names())
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// All tokens that resolve cleanly, as `NAME → path` for substitution.
    pub fn as_context(&self) -> HashMap<String, String> {
        self.tokens()
            .into_iter()
            .filter_map(|name| {
                self.resolve(&name)
                    .ok()
                    .map(|p| (name, display_relative(&self.root, &p)))
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Layout helpers
    // -----------------------------------------------------------------------

    pub fn product_root(&self) -> Result<PathBuf> {
        self.resolve(PRODUCT_ROOT)
    }

    pub fn product_doc(&self) -> Result<PathBuf> {
        self.resolve(PRODUCT_DOC)
    }

    pub fn architecture_doc(&self) -> Result<PathBuf> {
        self.resolve(ARCHITECTURE)
    }

    pub fn features_dir(&self) -> Result<PathBuf> {
        self.resolve(FEATURES)
    }

    pub fn feature_dir(&self, id: &str) -> Result<PathBuf> {
        validate_feature_id(id)?;
        Ok(self.features_dir()?.join(id))
    }

    pub fn feature_artifact(&self, id: &str, kind: ArtifactKind) -> Result<PathBuf> {
        Ok(self.feature_dir(id)?.join(kind.filename()))
    }

    pub fn feature_mockups_dir(&self, id: &str) -> Result<PathBuf> {
        Ok(self.feature_dir(id)?.join(MOCKUPS_SUBDIR))
    }

    pub fn adr_path(&self, date: NaiveDate) -> Result<PathBuf> {
        Ok(self
            .resolve(ADR)?
            .join(format!("adr-{}.md", date.format("%Y-%m-%d"))))
    }

    pub fn mockup_path(&self, file_name: &str) -> Result<PathBuf> {
        validate_file_name(file_name)?;
        Ok(self.resolve(MOCKUPS)?.join(file_name))
    }
}

/// `root`-relative display form with forward slashes.
pub fn display_relative(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Lexical normalisation: drops `.` and folds `..` without touching the
/// filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Feature id validation
// ---------------------------------------------------------------------------

static FEATURE_ID_RE: OnceLock<Regex> = OnceLock::new();

fn feature_id_re() -> &'static Regex {
    FEATURE_ID_RE.get_or_init(|| {
        Regex::new(r"^F(\d{3,})-([A-Za-z0-9][A-Za-z0-9\-]*[A-Za-z0-9]|[A-Za-z0-9])$").unwrap()
    })
}

pub fn validate_feature_id(id: &str) -> Result<()> {
    if id.len() > 96 || !feature_id_re().is_match(id) {
        return Err(FlowError::InvalidFeatureId(id.to_string()));
    }
    Ok(())
}

/// Numeric part of a feature id (`F010-Login` → 10).
pub fn feature_number(id: &str) -> Option<u32> {
    feature_id_re()
        .captures(id)
        .and_then(|c| c[1].parse().ok())
}

/// Build a feature id from a number and a free-form name.
///
/// Whitespace and underscores become hyphens; other punctuation is dropped.
pub fn make_feature_id(number: u32, name: &str) -> Result<String> {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() || c == '_' { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    let mut collapsed = String::with_capacity(cleaned.len());
    for c in cleaned.chars() {
        if c == '-' && collapsed.ends_with('-') {
            continue;
        }
        collapsed.push(c);
    }
    let id = format!("F{number:03}-{}", collapsed.trim_matches('-'));
    validate_feature_id(&id)?;
    Ok(id)
}

fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.contains('\0')
    {
        return Err(FlowError::InvalidConfig(format!(
            "invalid file name '{name}'"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
