use crate::error::{FlowError, Result};
use crate::markdown;
use crate::paths::{self, PathConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fail rendering on unresolved placeholders instead of warning.
    #[serde(default)]
    pub strict_substitution: bool,
    /// Upper bound on concurrent agent dispatches during fan-out.
    #[serde(default = "default_max_parallel")]
    pub max_parallel_agents: usize,
    /// Per-dispatch timeout. `None` waits for the host indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch_timeout_secs: Option<u64>,
    /// Model used when a template does not name one.
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_mockup_variants")]
    pub mockup_variants: usize,
}

fn default_max_parallel() -> usize {
    3
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_mockup_variants() -> usize {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict_substitution: false,
            max_parallel_agents: default_max_parallel(),
            dispatch_timeout_secs: None,
            default_model: default_model(),
            mockup_variants: default_mockup_variants(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config layers
// ---------------------------------------------------------------------------

/// One config file as written on disk. Every field is optional so layers
/// can be stacked field by field.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigLayer {
    #[serde(default)]
    paths: BTreeMap<String, String>,
    #[serde(default)]
    engine: EngineLayer,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EngineLayer {
    strict_substitution: Option<bool>,
    max_parallel_agents: Option<usize>,
    dispatch_timeout_secs: Option<u64>,
    default_model: Option<String>,
    mockup_variants: Option<usize>,
}

impl ConfigLayer {
    /// Parse a `config.md`: YAML frontmatter, or else the first fenced
    /// `yaml` block. A file with neither is an empty layer.
    fn parse(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        let yaml = match markdown::split_frontmatter(content) {
            Some((fm, _)) => fm.to_string(),
            None => markdown::first_yaml_block(content).unwrap_or_default(),
        };
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&yaml)
    }

    fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        let layer = Self::parse(&data).map_err(|e| {
            FlowError::InvalidConfig(format!("{}: {e}", path.display()))
        })?;
        Ok(Some(layer))
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct Config {
    /// Path token overrides, already merged across layers.
    pub paths: BTreeMap<String, String>,
    pub engine: EngineConfig,
    /// Files that contributed, lowest priority first.
    pub sources: Vec<PathBuf>,
}

impl Config {
    /// Load the effective config for `root`.
    ///
    /// Layers, lowest priority first: built-in defaults, each plugin's
    /// `lib/config.md` (later plugins lose to earlier ones), then the
    /// project's `.claude/lib/config.md`. Missing files are skipped.
    pub fn load(root: &Path, plugin_roots: &[PathBuf]) -> Result<Self> {
        let mut cfg = Config::default();
        let local = paths::config_path(root);
        for plugin in plugin_roots.iter().rev() {
            let path = paths::plugin_config_path(plugin);
            // A project's own .claude directory doubles as a plugin root.
            if path == local {
                continue;
            }
            if let Some(layer) = ConfigLayer::read(&path)? {
                cfg.apply(layer, path);
            }
        }
        if let Some(layer) = ConfigLayer::read(&local)? {
            cfg.apply(layer, local);
        }
        Ok(cfg)
    }

    /// Parse a single config document on top of the defaults.
    pub fn from_markdown(content: &str) -> Result<Self> {
        let layer = ConfigLayer::parse(content)
            .map_err(|e| FlowError::InvalidConfig(e.to_string()))?;
        let mut cfg = Config::default();
        cfg.apply(layer, PathBuf::new());
        cfg.sources.clear();
        Ok(cfg)
    }

    fn apply(&mut self, layer: ConfigLayer, source: PathBuf) {
        self.paths.extend(layer.paths);
        let e = layer.engine;
        if let Some(v) = e.strict_substitution {
            self.engine.strict_substitution = v;
        }
        if let Some(v) = e.max_parallel_agents {
            self.engine.max_parallel_agents = v;
        }
        if let Some(v) = e.dispatch_timeout_secs {
            self.engine.dispatch_timeout_secs = Some(v);
        }
        if let Some(v) = e.default_model {
            self.engine.default_model = v;
        }
        if let Some(v) = e.mockup_variants {
            self.engine.mockup_variants = v;
        }
        self.sources.push(source);
    }

    pub fn path_config(&self) -> PathConfig {
        PathConfig::new(self.paths.clone())
    }

    /// Contents written by `flow init` when no project config exists.
    pub fn starter_document() -> &'static str {
        r#"# Product Flow configuration

Path tokens and engine settings for this project. Delete a key to fall back
to the plugin default.

```yaml
paths:
  PRODUCT_ROOT: product
  OUTPUTS: outputs
engine:
  strict_substitution: false
  max_parallel_agents: 3
  mockup_variants: 3
```
"#
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for (token, value) in &self.paths {
            let name = paths::bare_token(token);
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
            {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "path token '{token}' should be UPPER_SNAKE_CASE to be usable as {{{{{name}}}}}"
                    ),
                });
            }
            if Path::new(value).is_absolute() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("path token '{token}' must be relative, got '{value}'"),
                });
            } else if value.split('/').any(|seg| seg == "..") {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "path token '{token}' uses '..'; it fails to resolve if it leaves the project"
                    ),
                });
            }
        }

        if self.engine.max_parallel_agents == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "engine.max_parallel_agents must be at least 1".to_string(),
            });
        }
        if self.engine.mockup_variants == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "engine.mockup_variants must be at least 1".to_string(),
            });
        }
        if self.engine.dispatch_timeout_secs == Some(0) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "engine.dispatch_timeout_secs is 0; every dispatch will time out"
                    .to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn missing_config_means_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path(), &[]).unwrap();
        assert!(cfg.paths.is_empty());
        assert_eq!(cfg.engine, EngineConfig::default());
        assert!(cfg.sources.is_empty());
    }

    #[test]
    fn frontmatter_config() {
        let cfg = Config::from_markdown(
            "---\npaths:\n  PRODUCT_ROOT: docs\nengine:\n  strict_substitution: true\n---\n# notes\n",
        )
        .unwrap();
        assert_eq!(cfg.paths.get("PRODUCT_ROOT").map(String::as_str), Some("docs"));
        assert!(cfg.engine.strict_substitution);
        assert_eq!(cfg.engine.max_parallel_agents, 3);
    }

    #[test]
    fn fenced_yaml_config() {
        let cfg = Config::from_markdown(Config::starter_document()).unwrap();
        assert_eq!(cfg.paths.get("OUTPUTS").map(String::as_str), Some("outputs"));
        assert_eq!(cfg.engine.mockup_variants, 3);
    }

    #[test]
    fn prose_only_document_is_empty_layer() {
        let cfg = Config::from_markdown("# Nothing configured yet\n").unwrap();
        assert!(cfg.paths.is_empty());
    }

    #[test]
    fn local_overrides_plugin_default() {
        let dir = TempDir::new().unwrap();
        let plugin = dir.path().join("plugin");
        write(
            &plugin.join("lib/config.md"),
            "```yaml\npaths:\n  PRODUCT_ROOT: plugin-product\n  ADR: '{{PRODUCT_ROOT}}/decisions'\nengine:\n  default_model: opus\n```\n",
        );
        write(
            &dir.path().join(".claude/lib/config.md"),
            "```yaml\npaths:\n  PRODUCT_ROOT: local-product\n```\n",
        );

        let cfg = Config::load(dir.path(), &[plugin.clone()]).unwrap();
        assert_eq!(cfg.paths["PRODUCT_ROOT"], "local-product");
        assert_eq!(cfg.paths["ADR"], "{{PRODUCT_ROOT}}/decisions");
        assert_eq!(cfg.engine.default_model, "opus");
        assert_eq!(cfg.sources.len(), 2);
    }

    #[test]
    fn first_plugin_wins_over_later_plugins() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        write(&a.join("lib/config.md"), "---\nengine:\n  max_parallel_agents: 5\n---\n");
        write(&b.join("lib/config.md"), "---\nengine:\n  max_parallel_agents: 9\n---\n");
        let cfg = Config::load(dir.path(), &[a, b]).unwrap();
        assert_eq!(cfg.engine.max_parallel_agents, 5);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        write(
            &dir.path().join(".claude/lib/config.md"),
            "---\nengine: [not, a, map\n---\n",
        );
        assert!(matches!(
            Config::load(dir.path(), &[]),
            Err(FlowError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validate_flags_bad_values() {
        let mut cfg = Config::default();
        cfg.paths.insert("PRODUCT_ROOT".into(), "/abs/product".into());
        cfg.paths.insert("lower".into(), "x".into());
        cfg.engine.max_parallel_agents = 0;
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("must be relative")));
        assert!(warnings.iter().any(|w| w.message.contains("UPPER_SNAKE_CASE")));
        assert!(warnings.iter().any(|w| w.message.contains("max_parallel_agents")));
    }

    #[test]
    fn local_dir_as_plugin_root_is_read_once() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join(".claude");
        write(&local.join("lib/config.md"), "```yaml\npaths:\n  OUTPUTS: out\n```\n");
        let cfg = Config::load(dir.path(), &[local]).unwrap();
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.paths.get("OUTPUTS").map(String::as_str), Some("out"));
    }

    #[test]
    fn default_config_has_no_warnings() {
        assert!(Config::default().validate().is_empty());
    }
}
