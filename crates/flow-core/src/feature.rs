//! Features as they exist on disk.
//!
//! A feature is a directory `{{FEATURES}}/F###-Name/` holding `feature.md`,
//! `plan.md`, `review.md` and an optional `mockups/` directory. There is no
//! index file: the directory listing is the index and every query re-reads
//! the artifacts.

use crate::artifact::{ArtifactWriter, WriteMode, WriteOutcome};
use crate::error::{FlowError, Result};
use crate::markdown;
use crate::paths::{self, PathResolver};
use crate::types::ArtifactKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

pub const ACCEPTANCE_CRITERIA: &str = "Acceptance Criteria";
pub const IMPLEMENTATION_NOTES: &str = "Implementation Notes";
pub const SUPERSEDED: &str = "Superseded";

/// True if a plan records finished work: an `Implementation Notes` section,
/// or at least one task checkbox with every checkbox ticked.
pub fn plan_is_implemented(plan: &str) -> bool {
    markdown::has_section(plan, IMPLEMENTATION_NOTES) || markdown::checklist(plan).is_complete()
}

#[derive(Debug, Default, Deserialize)]
struct FeatureMeta {
    epic: Option<String>,
}

static SUPERSEDED_BY_RE: OnceLock<Regex> = OnceLock::new();

fn superseded_by_re() -> &'static Regex {
    SUPERSEDED_BY_RE.get_or_init(|| Regex::new(r"\bF\d{3,}-[A-Za-z0-9][A-Za-z0-9\-]*").unwrap())
}

// ---------------------------------------------------------------------------
// Feature
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Feature {
    pub id: String,
    pub number: u32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epic: Option<String>,
    pub dir: PathBuf,
    pub has_feature: bool,
    pub has_plan: bool,
    pub has_review: bool,
    pub has_acceptance_criteria: bool,
    pub implemented: bool,
    /// plan.md modified no earlier than feature.md.
    pub plan_fresh: bool,
    pub mockups: usize,
    pub superseded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
}

impl Feature {
    /// Read the feature directory for `id`. The directory must exist.
    pub fn load(resolver: &PathResolver, id: &str) -> Result<Self> {
        let dir = resolver.feature_dir(id)?;
        if !dir.is_dir() {
            return Err(FlowError::FeatureNotFound(id.to_string()));
        }
        Self::from_dir(id, dir)
    }

    fn from_dir(id: &str, dir: PathBuf) -> Result<Self> {
        let number = paths::feature_number(id)
            .ok_or_else(|| FlowError::InvalidFeatureId(id.to_string()))?;
        let name = id
            .split_once('-')
            .map(|(_, n)| n.to_string())
            .unwrap_or_default();

        let feature_path = dir.join(ArtifactKind::Feature.filename());
        let plan_path = dir.join(ArtifactKind::Plan.filename());
        let feature_md = crate::io::read_optional(&feature_path)?;
        let plan_md = crate::io::read_optional(&plan_path)?;

        let (epic, has_ac, superseded, superseded_by) = match &feature_md {
            Some(text) => {
                let (superseded, by) = superseded_section(text);
                (
                    parse_epic(&feature_path, text),
                    markdown::has_section(text, ACCEPTANCE_CRITERIA),
                    superseded,
                    by,
                )
            }
            None => (None, false, false, None),
        };

        let plan_fresh = match (
            crate::io::modified(&plan_path)?,
            crate::io::modified(&feature_path)?,
        ) {
            (Some(plan), Some(feature)) => plan >= feature,
            (Some(_), None) => true,
            _ => false,
        };

        let mockups_dir = dir.join(paths::MOCKUPS_SUBDIR);
        let mockups = if mockups_dir.is_dir() {
            std::fs::read_dir(&mockups_dir)?
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .count()
        } else {
            0
        };

        Ok(Self {
            id: id.to_string(),
            number,
            name,
            epic,
            has_feature: feature_md.is_some(),
            has_plan: plan_md.is_some(),
            has_review: dir.join(ArtifactKind::Review.filename()).is_file(),
            has_acceptance_criteria: has_ac,
            implemented: plan_md.as_deref().is_some_and(plan_is_implemented),
            plan_fresh,
            mockups,
            superseded,
            superseded_by,
            dir,
        })
    }

    pub fn artifact(&self, kind: ArtifactKind) -> PathBuf {
        self.dir.join(kind.filename())
    }

    /// Newest modification time among the feature's input files: anything
    /// in the feature directory or its `mockups/` other than feature.md,
    /// plan.md and review.md.
    pub fn newest_input(&self) -> Result<Option<SystemTime>> {
        let generated = [
            ArtifactKind::Feature.filename(),
            ArtifactKind::Plan.filename(),
            ArtifactKind::Review.filename(),
        ];
        let mut newest: Option<SystemTime> = None;
        let mut dirs = vec![self.dir.clone()];
        while let Some(dir) = dirs.pop() {
            if !dir.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    if dir == self.dir && entry.file_name() == paths::MOCKUPS_SUBDIR {
                        dirs.push(entry.path());
                    }
                    continue;
                }
                let name = entry.file_name();
                if dir == self.dir && generated.iter().any(|g| name == *g) {
                    continue;
                }
                let modified = entry.metadata()?.modified()?;
                newest = match newest {
                    Some(n) if n >= modified => Some(n),
                    _ => Some(modified),
                };
            }
        }
        Ok(newest)
    }
}

fn parse_epic(path: &Path, text: &str) -> Option<String> {
    let (yaml, _) = markdown::split_frontmatter(text)?;
    match serde_yaml::from_str::<FeatureMeta>(yaml) {
        Ok(meta) => meta.epic.filter(|e| !e.trim().is_empty()),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable feature frontmatter");
            None
        }
    }
}

fn superseded_section(text: &str) -> (bool, Option<String>) {
    let wanted = markdown::normalize_title(SUPERSEDED);
    let sections = markdown::split_sections(text, 6);
    let Some(section) = sections
        .iter()
        .find(|s| s.heading.as_ref().is_some_and(|h| h.key() == wanted))
    else {
        return (false, None);
    };
    let by = superseded_by_re()
        .find(section.text)
        .map(|m| m.as_str().to_string());
    (true, by)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Every feature directory, ordered by number. Directories whose names are
/// not feature ids are skipped.
pub fn list(resolver: &PathResolver) -> Result<Vec<Feature>> {
    let dir = resolver.features_dir()?;
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut features = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if paths::validate_feature_id(&name).is_err() {
            tracing::debug!(dir = %name, "skipping non-feature directory");
            continue;
        }
        features.push(Feature::from_dir(&name, entry.path())?);
    }
    features.sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.id.cmp(&b.id)));
    Ok(features)
}

/// Find a feature by exact id or unique prefix (`F002` → `F002-Checkout`).
/// Matching is case-insensitive.
pub fn find(resolver: &PathResolver, query: &str) -> Result<Feature> {
    let query = query.trim();
    let features = list(resolver)?;
    if let Some(f) = features.iter().find(|f| f.id == query) {
        return Ok(f.clone());
    }
    let lower = query.to_lowercase();
    let mut matches: Vec<Feature> = features
        .into_iter()
        .filter(|f| !lower.is_empty() && f.id.to_lowercase().starts_with(&lower))
        .collect();
    match matches.len() {
        0 => Err(FlowError::FeatureNotFound(query.to_string())),
        1 => Ok(matches.remove(0)),
        _ => Err(FlowError::AmbiguousFeature {
            prefix: query.to_string(),
            matches: matches
                .iter()
                .map(|f| f.id.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}

pub fn next_number(resolver: &PathResolver) -> Result<u32> {
    Ok(list(resolver)?
        .iter()
        .map(|f| f.number)
        .max()
        .map_or(1, |n| n + 1))
}

/// Pick the id for a new feature named `name`. A feature with the same name
/// (ignoring case) is reported as `FeatureExists`.
pub fn allocate_id(resolver: &PathResolver, name: &str) -> Result<String> {
    let features = list(resolver)?;
    let next = features.iter().map(|f| f.number).max().map_or(1, |n| n + 1);
    let id = paths::make_feature_id(next, name)?;
    let wanted = id
        .split_once('-')
        .map(|(_, n)| n.to_lowercase())
        .unwrap_or_default();
    if let Some(existing) = features.iter().find(|f| f.name.to_lowercase() == wanted) {
        return Err(FlowError::FeatureExists(existing.id.clone()));
    }
    Ok(id)
}

/// Mark `id` superseded by appending (or replacing) a `## Superseded`
/// section in its feature.md. Features are never deleted.
pub fn supersede(
    resolver: &PathResolver,
    writer: &ArtifactWriter,
    id: &str,
    by: Option<&str>,
    note: Option<&str>,
) -> Result<WriteOutcome> {
    let feature = find(resolver, id)?;
    if !feature.has_feature {
        return Err(FlowError::FeatureNotFound(feature.id));
    }
    let replacement = match by {
        Some(q) => {
            let other = find(resolver, q)?;
            if other.id == feature.id {
                return Err(FlowError::InvalidConfig(format!(
                    "{} cannot supersede itself",
                    feature.id
                )));
            }
            Some(other.id)
        }
        None => None,
    };

    let mut section = format!("## {SUPERSEDED}\n\n");
    match &replacement {
        Some(other) => section.push_str(&format!("Superseded by {other}.\n")),
        None => section.push_str("This feature is no longer planned.\n"),
    }
    if let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) {
        section.push_str(&format!("\n{note}\n"));
    }

    let outcome = writer.write(
        &feature.artifact(ArtifactKind::Feature),
        &section,
        WriteMode::MergeSections,
    )?;
    tracing::info!(feature = %feature.id, by = ?replacement, outcome = outcome.label(), "feature superseded");
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::PathConfig;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathResolver) {
        let dir = TempDir::new().unwrap();
        let resolver = PathResolver::new(dir.path(), PathConfig::default());
        (dir, resolver)
    }

    fn add(resolver: &PathResolver, id: &str, feature_md: &str) {
        let dir = resolver.feature_dir(id).unwrap();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("feature.md"), feature_md).unwrap();
    }

    #[test]
    fn implemented_detection() {
        assert!(plan_is_implemented("# Plan\n## Implementation Notes\ndone\n"));
        assert!(plan_is_implemented("- [x] a\n- [X] b\n"));
        assert!(!plan_is_implemented("- [x] a\n- [ ] b\n"));
        assert!(!plan_is_implemented("# Plan\nno tasks\n"));
    }

    #[test]
    fn list_orders_by_number_and_skips_strays() {
        let (_dir, r) = setup();
        add(&r, "F010-Login", "# Login\n");
        add(&r, "F002-Checkout", "# Checkout\n");
        std::fs::create_dir_all(r.features_dir().unwrap().join("drafts")).unwrap();

        let ids: Vec<_> = list(&r).unwrap().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["F002-Checkout", "F010-Login"]);
        assert_eq!(next_number(&r).unwrap(), 11);
    }

    #[test]
    fn find_by_prefix() {
        let (_dir, r) = setup();
        add(&r, "F002-Checkout", "# Checkout\n");
        add(&r, "F010-Login", "# Login\n");
        add(&r, "F011-Logout", "# Logout\n");

        assert_eq!(find(&r, "F002").unwrap().id, "F002-Checkout");
        assert_eq!(find(&r, "f010").unwrap().id, "F010-Login");
        assert!(matches!(
            find(&r, "F01"),
            Err(FlowError::AmbiguousFeature { .. })
        ));
        assert!(matches!(find(&r, "F999"), Err(FlowError::FeatureNotFound(_))));
    }

    #[test]
    fn snapshot_reads_epic_and_sections() {
        let (_dir, r) = setup();
        add(
            &r,
            "F010-Login",
            "---\nepic: Accounts\n---\n# Login\n\n## Acceptance Criteria\n- [ ] works\n",
        );
        let f = Feature::load(&r, "F010-Login").unwrap();
        assert_eq!(f.epic.as_deref(), Some("Accounts"));
        assert_eq!(f.name, "Login");
        assert_eq!(f.number, 10);
        assert!(f.has_acceptance_criteria);
        assert!(!f.has_plan);
        assert!(!f.plan_fresh);
        assert!(!f.superseded);
    }

    #[test]
    fn allocate_next_id_and_reject_duplicate_names() {
        let (_dir, r) = setup();
        assert_eq!(allocate_id(&r, "user login").unwrap(), "F001-user-login");
        add(&r, "F001-Login", "# Login\n");
        assert_eq!(allocate_id(&r, "Checkout").unwrap(), "F002-Checkout");
        assert!(matches!(
            allocate_id(&r, "login"),
            Err(FlowError::FeatureExists(id)) if id == "F001-Login"
        ));
    }

    #[test]
    fn supersede_marks_feature_and_is_idempotent() {
        let (_dir, r) = setup();
        add(&r, "F002-Checkout", "# Checkout\n\n## Acceptance Criteria\n- pays\n");
        add(&r, "F007-Checkout-v2", "# Checkout v2\n");
        let w = ArtifactWriter::new();

        let first = supersede(&r, &w, "F002", Some("F007"), None).unwrap();
        assert!(matches!(first, WriteOutcome::Merged { .. }));
        let f = Feature::load(&r, "F002-Checkout").unwrap();
        assert!(f.superseded);
        assert_eq!(f.superseded_by.as_deref(), Some("F007-Checkout-v2"));
        assert!(f.has_acceptance_criteria);

        let again = supersede(&r, &w, "F002", Some("F007"), None).unwrap();
        assert_eq!(again, WriteOutcome::Unchanged);
        assert!(supersede(&r, &w, "F002", Some("F002"), None).is_err());
    }
}
