//! Line-oriented markdown helpers: frontmatter, ATX headings, task
//! checklists and heading-delimited sections.
//!
//! Everything here works on byte-exact slices of the input so that callers
//! can rebuild a document without disturbing the parts they did not touch.
//! Fenced code blocks (``` or ~~~) are skipped when looking for headings.

use regex::Regex;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Frontmatter
// ---------------------------------------------------------------------------

/// Split `---`-delimited YAML frontmatter from the body.
///
/// Returns `None` when the content does not open with a frontmatter block or
/// the closing delimiter is missing.
pub fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix('\u{feff}').unwrap_or(content);
    let rest = rest.strip_prefix("---")?;
    let rest = if let Some(r) = rest.strip_prefix('\n') {
        r
    } else if let Some(r) = rest.strip_prefix("\r\n") {
        r
    } else {
        return None;
    };

    // An empty block closes immediately.
    if let Some(body) = rest.strip_prefix("---") {
        return Some(("", body.trim_start_matches(['\r', '\n'])));
    }

    let end = rest.find("\n---")?;
    let yaml = &rest[..end];
    let after = &rest[end + "\n---".len()..];
    let body = match after.find('\n') {
        Some(pos) => &after[pos + 1..],
        None => "",
    };
    Some((yaml, body))
}

/// Contents of the first fenced block tagged `yaml` or `yml`.
pub fn first_yaml_block(content: &str) -> Option<String> {
    let mut inside = false;
    let mut buf = String::new();
    for line in content.lines() {
        let trimmed = line.trim_start();
        if !inside {
            if let Some(info) = trimmed.strip_prefix("```") {
                let info = info.trim();
                if info == "yaml" || info == "yml" {
                    inside = true;
                }
            }
        } else if trimmed.starts_with("```") {
            return Some(buf);
        } else {
            buf.push_str(line);
            buf.push('\n');
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Headings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: usize,
    pub title: String,
}

impl Heading {
    /// Title normalised for comparisons: lowercase, single-spaced.
    pub fn key(&self) -> String {
        normalize_title(&self.title)
    }
}

pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Parse an ATX heading (`## Title ##`). Setext headings are not recognised.
pub fn parse_heading(line: &str) -> Option<Heading> {
    let line = line.trim_end_matches(['\r', '\n']);
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let level = rest.len() - rest.trim_start_matches('#').len();
    if level == 0 || level > 6 {
        return None;
    }
    let after = &rest[level..];
    if !after.is_empty() && !after.starts_with([' ', '\t']) {
        return None;
    }
    let title = after.trim().trim_end_matches('#').trim_end().to_string();
    Some(Heading { level, title })
}

/// Tracks whether a line sits inside a fenced code block.
#[derive(Default)]
struct FenceState {
    open: Option<(char, usize)>,
}

impl FenceState {
    /// Feed one line; returns true if the line is part of a fence
    /// (delimiters included) and must not be treated as markdown structure.
    fn feed(&mut self, line: &str) -> bool {
        let trimmed = line.trim_start_matches(' ');
        let marker = trimmed.chars().next();
        let run = |c: char| trimmed.len() - trimmed.trim_start_matches(c).len();
        match (self.open, marker) {
            (None, Some(c @ ('`' | '~'))) if run(c) >= 3 => {
                self.open = Some((c, run(c)));
                true
            }
            (Some((c, len)), Some(m)) if m == c && run(c) >= len => {
                if trimmed.trim_start_matches(c).trim().is_empty() {
                    self.open = None;
                }
                true
            }
            (Some(_), _) => true,
            (None, _) => false,
        }
    }
}

/// All headings outside fenced code blocks, in document order.
pub fn headings(content: &str) -> Vec<Heading> {
    let mut fence = FenceState::default();
    content
        .lines()
        .filter(|line| !fence.feed(line))
        .filter_map(parse_heading)
        .collect()
}

/// True if the document has a heading whose title matches `title`
/// (case-insensitive, whitespace-normalised), at any level.
pub fn has_section(content: &str, title: &str) -> bool {
    let wanted = normalize_title(title);
    headings(content).iter().any(|h| h.key() == wanted)
}

// ---------------------------------------------------------------------------
// Checklists
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checklist {
    pub total: usize,
    pub checked: usize,
}

impl Checklist {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.checked == self.total
    }
}

static CHECKBOX_RE: OnceLock<Regex> = OnceLock::new();

fn checkbox_re() -> &'static Regex {
    CHECKBOX_RE.get_or_init(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+\[([ xX])\]").unwrap())
}

pub fn checklist(content: &str) -> Checklist {
    let mut fence = FenceState::default();
    let mut list = Checklist::default();
    for line in content.lines() {
        if fence.feed(line) {
            continue;
        }
        if let Some(caps) = checkbox_re().captures(line) {
            list.total += 1;
            if &caps[1] != " " {
                list.checked += 1;
            }
        }
    }
    list
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// A byte-exact slice of a document. `heading` is `None` only for the
/// preamble before the first boundary heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section<'a> {
    pub heading: Option<Heading>,
    pub text: &'a str,
}

/// Split `content` at every heading of level `<= level` outside fences.
///
/// The first element is always the preamble (possibly empty). Concatenating
/// the `text` of all sections reproduces `content` exactly.
pub fn split_sections(content: &str, level: usize) -> Vec<Section<'_>> {
    let mut sections = Vec::new();
    let mut fence = FenceState::default();
    let mut start = 0;
    let mut current: Option<Heading> = None;
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let in_fence = fence.feed(line);
        if !in_fence {
            if let Some(h) = parse_heading(line).filter(|h| h.level <= level) {
                sections.push(Section {
                    heading: current.take(),
                    text: &content[start..offset],
                });
                start = offset;
                current = Some(h);
            }
        }
        offset += line.len();
    }
    sections.push(Section {
        heading: current,
        text: &content[start..],
    });
    sections
}

/// Smallest heading level used outside fences, if any.
pub fn top_level(content: &str) -> Option<usize> {
    headings(content).iter().map(|h| h.level).min()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontmatter_split() {
        let doc = "---\ndescription: Plan a feature\n---\n# Body\n";
        let (fm, body) = split_frontmatter(doc).unwrap();
        assert_eq!(fm, "description: Plan a feature");
        assert_eq!(body, "# Body\n");
    }

    #[test]
    fn frontmatter_missing_close_is_none() {
        assert!(split_frontmatter("---\ndescription: x\n# no close\n").is_none());
        assert!(split_frontmatter("# plain markdown\n").is_none());
    }

    #[test]
    fn yaml_block_extracted() {
        let doc = "# Config\n\nSome prose.\n\n```yaml\npaths:\n  PRODUCT_ROOT: docs\n```\n";
        assert_eq!(
            first_yaml_block(doc).as_deref(),
            Some("paths:\n  PRODUCT_ROOT: docs\n")
        );
        assert!(first_yaml_block("```toml\na = 1\n```\n").is_none());
    }

    #[test]
    fn heading_parsing() {
        assert_eq!(
            parse_heading("## Acceptance Criteria ##"),
            Some(Heading {
                level: 2,
                title: "Acceptance Criteria".into()
            })
        );
        assert!(parse_heading("#hashtag").is_none());
        assert!(parse_heading("    # indented code").is_none());
        assert!(parse_heading("####### too deep").is_none());
    }

    #[test]
    fn headings_skip_fenced_code() {
        let doc = "# Real\n```md\n## Fake\n```\n## Also Real\n";
        let titles: Vec<_> = headings(doc).into_iter().map(|h| h.title).collect();
        assert_eq!(titles, vec!["Real", "Also Real"]);
    }

    #[test]
    fn section_lookup_is_case_insensitive() {
        let doc = "# Login\n\n## acceptance   criteria\n- works\n";
        assert!(has_section(doc, "Acceptance Criteria"));
        assert!(!has_section(doc, "Out of Scope"));
    }

    #[test]
    fn checklist_counts() {
        let doc = "- [x] one\n- [ ] two\n* [X] three\n```\n- [ ] fenced\n```\n";
        let list = checklist(doc);
        assert_eq!(list.total, 3);
        assert_eq!(list.checked, 2);
        assert!(!list.is_complete());
        assert!(!Checklist::default().is_complete());
    }

    #[test]
    fn sections_reassemble_exactly() {
        let doc = "intro\n# T\n## A\na\n```\n## not a heading\n```\n## B\nb\n";
        let sections = split_sections(doc, 2);
        let joined: String = sections.iter().map(|s| s.text).collect();
        assert_eq!(joined, doc);
        let titles: Vec<_> = sections
            .iter()
            .map(|s| s.heading.as_ref().map(|h| h.title.as_str()))
            .collect();
        assert_eq!(titles, vec![None, Some("T"), Some("A"), Some("B")]);
    }
}
