#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn flow(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("flow").unwrap();
    cmd.current_dir(dir.path())
        .env("FLOW_ROOT", dir.path())
        .env("FLOW_PLUGIN_DIRS", dir.path().join("plugin"))
        .env_remove("FLOW_AGENT_BIN")
        .env_remove("RUST_LOG");
    cmd
}

fn write(dir: &TempDir, rel: &str, content: &str) {
    let path = dir.path().join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn read(dir: &TempDir, rel: &str) -> String {
    std::fs::read_to_string(dir.path().join(rel)).unwrap()
}

fn command_template(dir: &TempDir, name: &str, body: &str) {
    write(
        dir,
        &format!("plugin/commands/{name}.md"),
        &format!(
            "---\ndescription: {name} command\nargument-hint: <arg>\nallowed-tools: Read, Write\n---\n{body}"
        ),
    );
}

/// A project with product.md and one feature that has no acceptance criteria.
fn project_with_feature(dir: &TempDir) {
    write(dir, "product/product.md", "# Shop\n\n## Vision\nSell things.\n");
    write(
        dir,
        "product/features/F001-Login/feature.md",
        "# Login\n\n## Summary\nUsers sign in.\n",
    );
}

fn json_of(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).expect("valid JSON on stdout")
}

// ---------------------------------------------------------------------------
// flow init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_layout_and_config() {
    let dir = TempDir::new().unwrap();
    flow(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created product/features"));

    assert!(dir.path().join("product/features").is_dir());
    assert!(dir.path().join("product/adr").is_dir());
    assert!(dir.path().join("outputs/mockups").is_dir());
    assert!(dir.path().join(".claude/lib/config.md").is_file());
}

#[test]
fn init_is_idempotent_and_keeps_config() {
    let dir = TempDir::new().unwrap();
    write(&dir, ".claude/lib/config.md", "```yaml\nengine:\n  mockup_variants: 5\n```\n");
    flow(&dir).arg("init").assert().success();
    flow(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Already initialized"));
    assert!(read(&dir, ".claude/lib/config.md").contains("mockup_variants: 5"));
}

// ---------------------------------------------------------------------------
// flow resolve / config
// ---------------------------------------------------------------------------

#[test]
fn resolve_prints_relative_path() {
    let dir = TempDir::new().unwrap();
    flow(&dir)
        .args(["resolve", "{{FEATURES}}"])
        .assert()
        .success()
        .stdout("product/features\n");
}

#[test]
fn resolve_honours_config_override() {
    let dir = TempDir::new().unwrap();
    write(&dir, ".claude/lib/config.md", "---\npaths:\n  PRODUCT_ROOT: docs/product\n---\n");
    flow(&dir)
        .args(["resolve", "ADR"])
        .assert()
        .success()
        .stdout("docs/product/adr\n");
}

#[test]
fn resolve_unknown_token_fails() {
    let dir = TempDir::new().unwrap();
    flow(&dir)
        .args(["resolve", "NOPE"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown path token: NOPE"));
}

#[test]
fn config_validate_rejects_absolute_override() {
    let dir = TempDir::new().unwrap();
    write(&dir, ".claude/lib/config.md", "---\npaths:\n  OUTPUTS: /tmp/out\n---\n");
    flow(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("must be relative"));
}

#[test]
fn config_show_json_lists_engine_defaults() {
    let dir = TempDir::new().unwrap();
    let out = flow(&dir)
        .args(["--json", "config", "show"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v = json_of(&out);
    assert_eq!(v["engine"]["max_parallel_agents"], 3);
    assert_eq!(v["paths"]["MOCKUPS"], "outputs/mockups");
}

// ---------------------------------------------------------------------------
// flow commands / render
// ---------------------------------------------------------------------------

#[test]
fn commands_lists_plugin_commands() {
    let dir = TempDir::new().unwrap();
    command_template(&dir, "define-product", "Define $ARGUMENTS\n");
    command_template(&dir, "add-feature", "Add $1\n");
    write(&dir, "plugin/commands/broken.md", "no frontmatter here\n");

    let out = flow(&dir)
        .args(["--json", "commands"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v = json_of(&out);
    let names: Vec<&str> = v
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["add-feature", "define-product"]);
    assert_eq!(v[0]["arg_hint"], "<arg>");
}

#[test]
fn render_substitutes_arguments_and_tokens() {
    let dir = TempDir::new().unwrap();
    command_template(
        &dir,
        "plan-feature",
        "Plan {{FEATURE_ID}} from {{FEATURES}}/$1/feature.md\n",
    );
    flow(&dir)
        .args(["render", "plan-feature", "F001-Login"])
        .assert()
        .success()
        .stdout("Plan F001-Login from product/features/F001-Login/feature.md\n");
}

#[test]
fn render_leaves_unknown_placeholders_and_warns() {
    let dir = TempDir::new().unwrap();
    command_template(&dir, "define-product", "Idea: $ARGUMENTS {{AUDIENCE}}\n");
    flow(&dir)
        .args(["render", "define-product", "a", "shop"])
        .assert()
        .success()
        .stdout("Idea: a shop {{AUDIENCE}}\n")
        .stderr(predicate::str::contains("{{AUDIENCE}}"));
}

#[test]
fn render_strict_fails_on_unknown_placeholder() {
    let dir = TempDir::new().unwrap();
    command_template(&dir, "define-product", "Idea: {{AUDIENCE}}\n");
    flow(&dir)
        .args(["render", "define-product", "--strict"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unresolved template tokens"));
}

#[test]
fn render_missing_template_fails() {
    let dir = TempDir::new().unwrap();
    flow(&dir)
        .args(["render", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("template not found"));
}

// ---------------------------------------------------------------------------
// flow check / status / next
// ---------------------------------------------------------------------------

#[test]
fn check_plan_without_acceptance_criteria_names_remedy() {
    let dir = TempDir::new().unwrap();
    project_with_feature(&dir);
    flow(&dir)
        .args(["check", "plan-feature", "F001"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("feature.md"))
        .stdout(predicate::str::contains("/update-feature F001-Login"));
}

#[test]
fn check_passes_once_criteria_exist() {
    let dir = TempDir::new().unwrap();
    project_with_feature(&dir);
    write(
        &dir,
        "product/features/F001-Login/feature.md",
        "# Login\n\n## Acceptance Criteria\n- [ ] user can sign in\n",
    );
    flow(&dir)
        .args(["check", "plan-feature", "F001-Login"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ok: plan-feature"));
}

#[test]
fn next_on_empty_project_suggests_define_product() {
    let dir = TempDir::new().unwrap();
    let out = flow(&dir)
        .args(["--json", "next"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v = json_of(&out);
    assert_eq!(v["command"], "/define-product");
    assert_eq!(v["phase"], "not_started");
}

#[test]
fn status_shows_feature_phase() {
    let dir = TempDir::new().unwrap();
    project_with_feature(&dir);
    let out = flow(&dir)
        .args(["--json", "status"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v = json_of(&out);
    assert_eq!(v["product_defined"], true);
    assert_eq!(v["features"][0]["id"], "F001-Login");
    assert_eq!(v["features"][0]["phase"], "features_defined");
    assert_eq!(v["features"][0]["next"]["command"], "/update-feature F001-Login");
}

// ---------------------------------------------------------------------------
// flow feature
// ---------------------------------------------------------------------------

#[test]
fn feature_show_resolves_prefix() {
    let dir = TempDir::new().unwrap();
    project_with_feature(&dir);
    flow(&dir)
        .args(["feature", "show", "F001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Feature:      F001-Login"))
        .stdout(predicate::str::contains("Phase:        features_defined"));
}

#[test]
fn feature_supersede_records_section() {
    let dir = TempDir::new().unwrap();
    project_with_feature(&dir);
    write(&dir, "product/features/F002-Login-v2/feature.md", "# Login v2\n");
    flow(&dir)
        .args(["feature", "supersede", "F001", "--by", "F002"])
        .assert()
        .success()
        .stdout(predicate::str::contains("F001-Login superseded by F002-Login-v2"));

    let content = read(&dir, "product/features/F001-Login/feature.md");
    assert!(content.contains("## Summary"));
    assert!(content.contains("## Superseded"));
    assert!(dir.path().join("product/features/F001-Login").is_dir());
}

#[test]
fn feature_show_unknown_fails() {
    let dir = TempDir::new().unwrap();
    flow(&dir)
        .args(["feature", "show", "F404"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("feature not found"));
}

// ---------------------------------------------------------------------------
// flow write
// ---------------------------------------------------------------------------

#[test]
fn write_create_refuses_existing_file() {
    let dir = TempDir::new().unwrap();
    flow(&dir)
        .args(["write", "{{PRODUCT_DOC}}"])
        .write_stdin("# Shop\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("created product/product.md"));
    flow(&dir)
        .args(["write", "product/product.md"])
        .write_stdin("# Other\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    assert_eq!(read(&dir, "product/product.md"), "# Shop\n");
}

#[test]
fn write_merge_replaces_only_matching_section() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "product/product.md",
        "# Shop\n\n## Vision\nOld vision.\n\n## Users\nEveryone.\n",
    );
    flow(&dir)
        .args(["write", "product/product.md", "--mode", "merge"])
        .write_stdin("## Vision\nNew vision.\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("merged"));

    let content = read(&dir, "product/product.md");
    assert!(content.contains("New vision."));
    assert!(!content.contains("Old vision."));
    assert!(content.contains("## Users\nEveryone."));
    assert!(content.find("## Vision").unwrap() < content.find("## Users").unwrap());
}

#[test]
fn write_outside_root_is_rejected() {
    let dir = TempDir::new().unwrap();
    flow(&dir)
        .args(["write", "../escape.md"])
        .write_stdin("x")
        .assert()
        .failure()
        .stderr(predicate::str::contains("outside the project root"));
}

// ---------------------------------------------------------------------------
// flow run / mockup (agent replaced by a shell script)
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn fake_agent(dir: &TempDir, script: &str) -> Vec<String> {
    write(dir, "fake-agent.sh", script);
    let path: &Path = &dir.path().join("fake-agent.sh");
    vec![
        "--agent-bin".into(),
        "/bin/sh".into(),
        "--agent-arg".into(),
        path.display().to_string(),
    ]
}

#[cfg(unix)]
#[test]
fn run_define_product_writes_agent_output() {
    let dir = TempDir::new().unwrap();
    command_template(&dir, "define-product", "Define the product: $ARGUMENTS\n");
    let agent = fake_agent(
        &dir,
        "cat > /dev/null\nprintf '%s\\n' '{\"is_error\":false,\"result\":\"# Shop\\n\\n## Vision\\nSell things.\"}'\n",
    );

    flow(&dir)
        .args(["run", "define-product"])
        .args(&agent)
        .args(["an online shop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("product/product.md"));

    assert_eq!(
        read(&dir, "product/product.md"),
        "# Shop\n\n## Vision\nSell things.\n"
    );
}

#[cfg(unix)]
#[test]
fn run_blocked_by_guard_never_starts_agent() {
    let dir = TempDir::new().unwrap();
    project_with_feature(&dir);
    command_template(&dir, "plan-feature", "Plan $1\n");
    let agent = fake_agent(&dir, "touch agent-ran\ncat > /dev/null\n");

    flow(&dir)
        .args(["run", "plan-feature"])
        .args(&agent)
        .arg("F001")
        .assert()
        .failure()
        .stderr(predicate::str::contains("/update-feature F001-Login"));

    assert!(!dir.path().join("agent-ran").exists());
    assert!(!dir.path().join("product/features/F001-Login/plan.md").exists());
}

#[cfg(unix)]
#[test]
fn run_surfaces_agent_failure() {
    let dir = TempDir::new().unwrap();
    command_template(&dir, "define-product", "Define $ARGUMENTS\n");
    let agent = fake_agent(&dir, "cat > /dev/null\necho 'quota exceeded' >&2\nexit 2\n");

    flow(&dir)
        .args(["run", "define-product"])
        .args(&agent)
        .assert()
        .failure()
        .stderr(predicate::str::contains("quota exceeded"));
    assert!(!dir.path().join("product/product.md").exists());
}

#[cfg(unix)]
#[test]
fn mockup_reports_failed_variant_and_keeps_others() {
    let dir = TempDir::new().unwrap();
    write(&dir, "product/product.md", "# Shop\n");
    command_template(&dir, "mockup-product", "Mockup {{VARIANT}} to {{MOCKUP_FILE}}\n");
    let agent = fake_agent(
        &dir,
        r#"input=$(cat)
case "$input" in
  *"Mockup 2 "*) echo 'render crashed' >&2; exit 1 ;;
esac
printf '%s\n' '{"is_error":false,"result":"<html></html>"}'
"#,
    );

    let out = flow(&dir)
        .args(["--json", "mockup", "--variants", "3"])
        .args(&agent)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v = json_of(&out);
    assert_eq!(v["mockups"]["written"].as_array().unwrap().len(), 2);
    assert_eq!(v["mockups"]["failed"][0]["variant"], 2);

    assert!(dir.path().join("outputs/mockups/variant-1.html").is_file());
    assert!(!dir.path().join("outputs/mockups/variant-2.html").exists());
    assert!(dir.path().join("outputs/mockups/variant-3.html").is_file());
}

#[cfg(unix)]
#[test]
fn mockup_passes_arguments_to_every_variant() {
    let dir = TempDir::new().unwrap();
    write(&dir, "product/product.md", "# Shop\n");
    command_template(&dir, "mockup-product", "Mockup for: $1 (variant {{VARIANT}})\n");
    // Echo the prompt back as the mockup body.
    let agent = fake_agent(
        &dir,
        "input=$(cat)\nprintf '{\"is_error\":false,\"result\":\"%s\"}\\n' \"$input\"\n",
    );

    flow(&dir)
        .args(["mockup", "--variants", "2"])
        .args(&agent)
        .arg("dark theme")
        .assert()
        .success();

    assert_eq!(
        read(&dir, "outputs/mockups/variant-1.html"),
        "Mockup for: dark theme (variant 1)"
    );
    assert_eq!(
        read(&dir, "outputs/mockups/variant-2.html"),
        "Mockup for: dark theme (variant 2)"
    );
}
