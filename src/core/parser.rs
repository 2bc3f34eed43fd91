//! Recipe (YAML) and job spec (JSON) parsing.
//!
//! Both documents are walked key by key instead of being deserialized straight
//! into structs: every unknown or retired key must be reported by name, and a
//! field of the wrong type has to point at the field, not at a serde position.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

use crate::core::file_edit::{content_has_delimiter, normalize_relative};
use crate::error::ConfigurationError;
use crate::models::{Config, FileEdit, JobMode, JobSpec, Recipe, Stage, WorkspaceLayout};

/// Only recipe schema this runner understands
pub const RECIPE_SCHEMA_VERSION: u64 = 1;

/// Job spec file inside a job directory
pub const JOB_SPEC_FILE: &str = "job.json";

/// Recipe document inside a job directory
pub const RECIPE_FILE: &str = "recipe.yaml";

const RECIPE_KEYS: &[&str] = &[
    "schema_version",
    "id",
    "display_name",
    "description",
    "machine",
    "workdir",
    "clone_block",
    "init_block",
    "modify_block",
    "build_block",
    "file_edits",
    "edit_in_build_only",
];

const RETIRED_RECIPE_KEYS: &[(&str, &str)] = &[
    ("file_appends", "use file_edits with action ensure_lines"),
    ("artifacts", "images are collected from the deploy directory"),
    ("run_clone", "stages are selected by the job mode"),
    ("run_edit", "stages are selected by the job mode"),
    ("run_init", "stages are selected by the job mode"),
    ("run_build", "stages are selected by the job mode"),
];

const RETIRED_SPEC_KEYS: &[&str] = &["run_clone", "run_edit", "run_init", "run_build"];

fn safe_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("identifier pattern is valid"))
}

/// Identifiers become directory and file names, so they must be a single
/// harmless path component.
fn is_safe_id(id: &str) -> bool {
    safe_id_re().is_match(id) && !id.starts_with('.') && !id.contains("..")
}

pub fn validate_job_id(id: &str) -> Result<(), ConfigurationError> {
    if is_safe_id(id) {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidJobId(id.to_string()))
    }
}

pub fn validate_codebase_id(id: &str) -> Result<(), ConfigurationError> {
    if is_safe_id(id) {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidCodebaseId(id.to_string()))
    }
}

/// A `file_edits` entry before per-action validation
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFileEdit {
    action: String,
    path: String,
    #[serde(default)]
    lines: Option<Vec<String>>,
    #[serde(default)]
    marker: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

impl RawFileEdit {
    fn validate(self, source: &Path, field: &str) -> Result<FileEdit, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidField {
            path: source.to_path_buf(),
            field: field.to_string(),
            reason,
        };

        let relative = normalize_relative(&self.path)?;
        if relative.as_os_str().is_empty() {
            return Err(invalid("path does not name a file".to_string()));
        }

        match self.action.as_str() {
            "ensure_lines" => {
                if self.marker.is_some() || self.content.is_some() {
                    return Err(invalid("ensure_lines takes `lines`, not `marker`/`content`".to_string()));
                }
                let lines = self.lines.unwrap_or_default();
                if lines.is_empty() {
                    return Err(invalid("ensure_lines needs a non-empty `lines` list".to_string()));
                }
                if lines.iter().any(|line| line.contains('\n')) {
                    return Err(invalid("each entry of `lines` must be a single line".to_string()));
                }
                Ok(FileEdit::EnsureLines {
                    path: self.path,
                    lines,
                })
            }
            "ensure_block" => {
                if self.lines.is_some() {
                    return Err(invalid("ensure_block takes `marker` and `content`, not `lines`".to_string()));
                }
                let marker = self.marker.unwrap_or_default();
                let marker = marker.trim();
                if marker.is_empty() || marker.contains('\n') {
                    return Err(invalid("ensure_block needs a single-line `marker`".to_string()));
                }
                let content = self
                    .content
                    .ok_or_else(|| invalid("ensure_block needs `content`".to_string()))?;
                if content_has_delimiter(marker, &content) {
                    return Err(invalid(format!(
                        "`content` may not contain a `# BEGIN {0}` or `# END {0}` line",
                        marker
                    )));
                }
                Ok(FileEdit::EnsureBlock {
                    path: self.path,
                    marker: marker.to_string(),
                    content,
                })
            }
            "append" | "replace" => Err(ConfigurationError::RetiredField {
                path: source.to_path_buf(),
                field: format!("{}.action={}", field, self.action),
                hint: "use ensure_lines or ensure_block",
            }),
            other => Err(invalid(format!("unknown action `{}`", other))),
        }
    }
}

/// Parse and validate a recipe document
pub fn parse_recipe(source: &Path, text: &str) -> Result<Recipe, ConfigurationError> {
    let document: YamlValue = serde_yaml::from_str(text)
        .map_err(|e| ConfigurationError::Syntax(source.to_path_buf(), e.to_string()))?;
    let mapping = match document {
        YamlValue::Mapping(mapping) => mapping,
        _ => {
            return Err(ConfigurationError::Syntax(
                source.to_path_buf(),
                "recipe must be a mapping".to_string(),
            ))
        }
    };

    let invalid = |field: &str, reason: &str| ConfigurationError::InvalidField {
        path: source.to_path_buf(),
        field: field.to_string(),
        reason: reason.to_string(),
    };

    let mut recipe = Recipe::default();
    for (key, value) in mapping {
        let key = match key {
            YamlValue::String(key) => key,
            other => return Err(invalid(&format!("{:?}", other), "keys must be strings")),
        };

        if let Some((_, hint)) = RETIRED_RECIPE_KEYS.iter().find(|(k, _)| *k == key) {
            return Err(ConfigurationError::RetiredField {
                path: source.to_path_buf(),
                field: key,
                hint: *hint,
            });
        }
        if !RECIPE_KEYS.contains(&key.as_str()) {
            return Err(ConfigurationError::UnsupportedField {
                path: source.to_path_buf(),
                field: key,
            });
        }

        match key.as_str() {
            "schema_version" => match value.as_u64() {
                Some(RECIPE_SCHEMA_VERSION) => {}
                _ => return Err(invalid(&key, "only schema_version 1 is supported")),
            },
            "id" => recipe.id = yaml_identifier(&value).map_err(|r| invalid(&key, r))?,
            "display_name" => recipe.display_name = yaml_string(&value).map_err(|r| invalid(&key, r))?,
            "description" => {
                yaml_string(&value).map_err(|r| invalid(&key, r))?;
            }
            "machine" => {
                recipe.machine = yaml_string(&value).map_err(|r| invalid(&key, r))?;
                if let Some(machine) = &recipe.machine {
                    if !is_safe_id(machine) {
                        return Err(invalid(&key, "must be a plain name like qemuarm64"));
                    }
                }
            }
            "workdir" => {
                let raw = yaml_string(&value).map_err(|r| invalid(&key, r))?;
                recipe.workdir = match raw {
                    Some(raw) => Some(normalize_relative(&raw)?).filter(|p| !p.as_os_str().is_empty()),
                    None => None,
                };
            }
            "clone_block" => recipe.clone_lines = stage_lines(&value).map_err(|r| invalid(&key, r))?,
            "init_block" => recipe.init_lines = stage_lines(&value).map_err(|r| invalid(&key, r))?,
            "modify_block" => recipe.modify_lines = stage_lines(&value).map_err(|r| invalid(&key, r))?,
            "build_block" => recipe.build_lines = stage_lines(&value).map_err(|r| invalid(&key, r))?,
            "edit_in_build_only" => match value {
                YamlValue::Null => {}
                YamlValue::Bool(flag) => recipe.edit_in_build_only = Some(flag),
                _ => return Err(invalid(&key, "must be true or false")),
            },
            "file_edits" => recipe.file_edits = yaml_file_edits(source, value)?,
            _ => unreachable!("key list and match arms cover the same keys"),
        }
    }

    debug!(
        "Parsed recipe {}: {} clone, {} init, {} modify, {} build lines, {} file edits",
        source.display(),
        recipe.clone_lines.len(),
        recipe.init_lines.len(),
        recipe.modify_lines.len(),
        recipe.build_lines.len(),
        recipe.file_edits.len()
    );
    Ok(recipe)
}

fn yaml_string(value: &YamlValue) -> Result<Option<String>, &'static str> {
    match value {
        YamlValue::Null => Ok(None),
        YamlValue::String(s) => Ok(Some(s.trim().to_string()).filter(|s| !s.is_empty())),
        _ => Err("must be a string"),
    }
}

fn yaml_identifier(value: &YamlValue) -> Result<Option<String>, &'static str> {
    match value {
        YamlValue::Number(n) => Ok(Some(n.to_string())),
        other => yaml_string(other),
    }
}

/// A stage block: `{lines: [...]}`, `{lines: "..."}`, a bare list, or a bare string
fn stage_lines(value: &YamlValue) -> Result<Vec<String>, &'static str> {
    match value {
        YamlValue::Mapping(mapping) => {
            let mut lines = Vec::new();
            for (key, inner) in mapping {
                match (key.as_str(), inner) {
                    (Some("lines"), YamlValue::Mapping(_)) => {
                        return Err("`lines` must be a list of strings or a single string")
                    }
                    (Some("lines"), inner) => lines = stage_lines(inner)?,
                    _ => return Err("a stage block only supports the `lines` key"),
                }
            }
            Ok(lines)
        }
        YamlValue::Sequence(items) => {
            let mut lines = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    YamlValue::String(line) => lines.push(line.trim().to_string()),
                    _ => return Err("every command line must be a string"),
                }
            }
            lines.retain(|line| !line.is_empty());
            Ok(lines)
        }
        YamlValue::String(line) => Ok(Some(line.trim().to_string())
            .filter(|line| !line.is_empty())
            .into_iter()
            .collect()),
        YamlValue::Null => Ok(Vec::new()),
        _ => Err("must be a list of command strings"),
    }
}

fn yaml_file_edits(source: &Path, value: YamlValue) -> Result<Vec<FileEdit>, ConfigurationError> {
    let items = match value {
        YamlValue::Null => return Ok(Vec::new()),
        YamlValue::Sequence(items) => items,
        _ => {
            return Err(ConfigurationError::InvalidField {
                path: source.to_path_buf(),
                field: "file_edits".to_string(),
                reason: "must be a list".to_string(),
            })
        }
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let field = format!("file_edits[{}]", i);
            let raw: RawFileEdit = serde_yaml::from_value(item).map_err(|e| ConfigurationError::InvalidField {
                path: source.to_path_buf(),
                field: field.clone(),
                reason: e.to_string(),
            })?;
            raw.validate(source, &field)
        })
        .collect()
}

/// Job spec fields the runner consumes; everything else belongs to collaborators
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobDocument {
    pub job_id: Option<String>,
    pub owner: Option<String>,
    pub mode: JobMode,
    pub codebase_id: Option<String>,
    pub recipe_id: Option<String>,
    pub note: Option<String>,
    pub machine: Option<String>,
    pub file_edits: Vec<FileEdit>,
    pub edit_in_build_only: Option<bool>,
    /// Recipe YAML snapshot carried on the spec
    pub recipe_yaml: Option<String>,
}

/// Parse the job spec document
pub fn parse_job_document(source: &Path, text: &str) -> Result<JobDocument, ConfigurationError> {
    let value: JsonValue = serde_json::from_str(text)
        .map_err(|e| ConfigurationError::Syntax(source.to_path_buf(), e.to_string()))?;
    let JsonValue::Object(map) = value else {
        return Err(ConfigurationError::Syntax(
            source.to_path_buf(),
            "job spec must be a JSON object".to_string(),
        ));
    };

    if let Some(key) = RETIRED_SPEC_KEYS.iter().find(|k| map.contains_key(**k)) {
        return Err(ConfigurationError::RetiredField {
            path: source.to_path_buf(),
            field: key.to_string(),
            hint: "stages are selected by the job mode",
        });
    }

    let field = |key: &str| map.get(key).filter(|v| !v.is_null());
    let text_field = |key: &str| -> Result<Option<String>, ConfigurationError> {
        match field(key) {
            None => Ok(None),
            Some(JsonValue::String(s)) => Ok(Some(s.trim().to_string()).filter(|s| !s.is_empty())),
            Some(JsonValue::Number(n)) => Ok(Some(n.to_string())),
            Some(_) => Err(ConfigurationError::InvalidField {
                path: source.to_path_buf(),
                field: key.to_string(),
                reason: "must be a string".to_string(),
            }),
        }
    };

    let mode = match text_field("mode")? {
        Some(mode) => mode.parse()?,
        None => JobMode::default(),
    };

    let edit_in_build_only = match field("edit_in_build_only") {
        None => None,
        Some(JsonValue::Bool(flag)) => Some(*flag),
        Some(_) => {
            return Err(ConfigurationError::InvalidField {
                path: source.to_path_buf(),
                field: "edit_in_build_only".to_string(),
                reason: "must be true or false".to_string(),
            })
        }
    };

    let edits_key = if field("file_edits").is_some() {
        "file_edits"
    } else {
        "file_patches"
    };
    let file_edits = match field(edits_key) {
        None => Vec::new(),
        Some(JsonValue::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let label = format!("{}[{}]", edits_key, i);
                let raw: RawFileEdit =
                    serde_json::from_value(item.clone()).map_err(|e| ConfigurationError::InvalidField {
                        path: source.to_path_buf(),
                        field: label.clone(),
                        reason: e.to_string(),
                    })?;
                raw.validate(source, &label)
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(ConfigurationError::InvalidField {
                path: source.to_path_buf(),
                field: edits_key.to_string(),
                reason: "must be a list".to_string(),
            })
        }
    };

    let (snapshot_id, recipe_yaml) = match field("recipe") {
        None => (None, None),
        Some(JsonValue::Object(recipe)) => {
            let id = match recipe.get("id") {
                Some(JsonValue::String(s)) => Some(s.clone()),
                Some(JsonValue::Number(n)) => Some(n.to_string()),
                _ => None,
            };
            let yaml = recipe.get("yaml").and_then(JsonValue::as_str).map(str::to_string);
            (id, yaml)
        }
        Some(_) => {
            return Err(ConfigurationError::InvalidField {
                path: source.to_path_buf(),
                field: "recipe".to_string(),
                reason: "must be an object with `id` and `yaml`".to_string(),
            })
        }
    };

    Ok(JobDocument {
        job_id: text_field("job_id")?,
        owner: text_field("owner")?.or(text_field("created_by")?),
        mode,
        codebase_id: text_field("codebase_id")?,
        recipe_id: text_field("recipe_id")?.or(snapshot_id),
        note: text_field("note")?,
        machine: text_field("machine")?,
        file_edits,
        edit_in_build_only,
        recipe_yaml,
    })
}

/// Combine the two documents into a validated job
pub fn build_job_spec(
    job_id: &str,
    document: JobDocument,
    recipe: Recipe,
    config: &Config,
) -> Result<JobSpec, ConfigurationError> {
    validate_job_id(job_id)?;

    let owner = document.owner.ok_or(ConfigurationError::MissingOwner)?;
    if !is_safe_id(&owner) {
        return Err(ConfigurationError::InvalidField {
            path: PathBuf::from(JOB_SPEC_FILE),
            field: "owner".to_string(),
            reason: format!("`{}` is not a valid user name", owner),
        });
    }
    if let Some(codebase_id) = &document.codebase_id {
        validate_codebase_id(codebase_id)?;
    }
    if let Some(machine) = &document.machine {
        if !is_safe_id(machine) {
            return Err(ConfigurationError::InvalidField {
                path: PathBuf::from(JOB_SPEC_FILE),
                field: "machine".to_string(),
                reason: "must be a plain name like qemuarm64".to_string(),
            });
        }
    }

    let mode = document.mode;
    let edit_in_build_only = document
        .edit_in_build_only
        .or(recipe.edit_in_build_only)
        .unwrap_or(config.workspace.edit_in_build_only);
    let plan = mode.plan(edit_in_build_only);

    for stage in [Stage::Clone, Stage::Build] {
        if plan.runs(stage) && recipe.lines(stage).is_empty() {
            return Err(ConfigurationError::MissingStageLines {
                mode: mode.to_string(),
                stage: stage.block_key(),
            });
        }
    }

    if mode.reuses_workspace()
        && document.codebase_id.is_none()
        && config.workspace.layout == WorkspaceLayout::Shared
    {
        return Err(ConfigurationError::CodebaseRequired {
            mode: mode.to_string(),
        });
    }

    let mut file_edits = recipe.file_edits.clone();
    file_edits.extend(document.file_edits);

    if mode == JobMode::EditOnly && file_edits.is_empty() && recipe.modify_lines.is_empty() {
        return Err(ConfigurationError::NothingToEdit);
    }

    Ok(JobSpec {
        job_id: job_id.to_string(),
        owner,
        mode,
        codebase_id: document.codebase_id,
        recipe_id: document.recipe_id.or_else(|| recipe.id.clone()),
        note: document.note,
        machine: document.machine,
        recipe,
        file_edits,
        edit_in_build_only,
    })
}

/// Read `job.json` and the recipe from a job directory and validate them together
pub fn load_job(config: &Config, job_id: &str) -> Result<JobSpec, ConfigurationError> {
    validate_job_id(job_id)?;
    let job_dir = config.job_dir(job_id);

    let spec_path = job_dir.join(JOB_SPEC_FILE);
    let spec_text = read_document(&spec_path, "job spec")?;
    let document = parse_job_document(&spec_path, &spec_text)?;
    if let Some(declared) = &document.job_id {
        if declared != job_id {
            return Err(ConfigurationError::InvalidField {
                path: spec_path,
                field: "job_id".to_string(),
                reason: format!("declares `{}` but the runner was asked for `{}`", declared, job_id),
            });
        }
    }

    let recipe_path = job_dir.join(RECIPE_FILE);
    let recipe = match fs::read_to_string(&recipe_path) {
        Ok(text) => parse_recipe(&recipe_path, &text)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => match &document.recipe_yaml {
            Some(text) => {
                debug!("No {}; using the recipe snapshot in {}", RECIPE_FILE, JOB_SPEC_FILE);
                parse_recipe(&spec_path, text)?
            }
            None => {
                return Err(ConfigurationError::MissingDocument {
                    what: "recipe",
                    path: recipe_path,
                })
            }
        },
        Err(e) => return Err(ConfigurationError::ReadError(recipe_path, e)),
    };

    build_job_spec(job_id, document, recipe, config)
}

fn read_document(path: &Path, what: &'static str) -> Result<String, ConfigurationError> {
    fs::read_to_string(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            ConfigurationError::MissingDocument {
                what,
                path: path.to_path_buf(),
            }
        } else {
            ConfigurationError::ReadError(path.to_path_buf(), e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DEMO_RECIPE: &str = r#"
schema_version: 1
id: demo-image
display_name: Demo image
workdir: ./onetree
machine: qemuarm64
clone_block:
  lines:
    - "  git clone https://example.com/poky.git onetree  "
    - ""
init_block:
  lines: source oe-init-build-env build
modify_block: [echo patched]
build_block: bitbake core-image-minimal
file_edits:
  - action: ensure_lines
    path: build/conf/local.conf
    lines: ['BB_NUMBER_THREADS = "8"']
  - action: ensure_block
    path: build/conf/local.conf
    marker: cache
    content: |
      DL_DIR = "/srv/cache/downloads"
"#;

    fn src() -> &'static Path {
        Path::new("recipe.yaml")
    }

    #[test]
    fn test_parse_full_recipe() {
        let recipe = parse_recipe(src(), DEMO_RECIPE).unwrap();

        assert_eq!(recipe.id.as_deref(), Some("demo-image"));
        assert_eq!(recipe.workdir, Some(PathBuf::from("onetree")));
        assert_eq!(recipe.machine.as_deref(), Some("qemuarm64"));
        assert_eq!(recipe.clone_lines, vec!["git clone https://example.com/poky.git onetree"]);
        assert_eq!(recipe.init_lines, vec!["source oe-init-build-env build"]);
        assert_eq!(recipe.modify_lines, vec!["echo patched"]);
        assert_eq!(recipe.build_lines, vec!["bitbake core-image-minimal"]);
        assert_eq!(recipe.file_edits.len(), 2);
        assert!(matches!(&recipe.file_edits[1], FileEdit::EnsureBlock { marker, .. } if marker == "cache"));
    }

    #[test]
    fn test_parse_is_deterministic() {
        let first = parse_recipe(src(), DEMO_RECIPE).unwrap();
        let second = parse_recipe(src(), DEMO_RECIPE).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unsupported_key_rejected() {
        let err = parse_recipe(src(), "build_block: [make]\npost_build: [echo]\n").unwrap_err();
        assert!(matches!(err, ConfigurationError::UnsupportedField { field, .. } if field == "post_build"));
    }

    #[test]
    fn test_retired_key_rejected_with_hint() {
        let err = parse_recipe(src(), "file_appends: []\n").unwrap_err();
        assert!(matches!(err, ConfigurationError::RetiredField { ref field, .. } if field == "file_appends"));
        assert!(err.to_string().contains("ensure_lines"));
    }

    #[test]
    fn test_stage_lines_must_be_strings() {
        let err = parse_recipe(src(), "build_block:\n  lines: [make, 3]\n").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidField { field, .. } if field == "build_block"));

        let nested = parse_recipe(src(), "build_block:\n  lines:\n    cmd: make\n").unwrap_err();
        assert!(matches!(nested, ConfigurationError::InvalidField { .. }));

        let extra = parse_recipe(src(), "build_block:\n  lines: [make]\n  retries: 2\n").unwrap_err();
        assert!(matches!(extra, ConfigurationError::InvalidField { .. }));
    }

    #[test]
    fn test_malformed_yaml_is_syntax_error() {
        let err = parse_recipe(src(), "build_block: [unclosed\n").unwrap_err();
        assert!(matches!(err, ConfigurationError::Syntax(..)));
        assert!(matches!(
            parse_recipe(src(), "- just\n- a list\n").unwrap_err(),
            ConfigurationError::Syntax(..)
        ));
    }

    #[test]
    fn test_schema_version_must_be_one() {
        assert!(parse_recipe(src(), "schema_version: 1\n").is_ok());
        assert!(matches!(
            parse_recipe(src(), "schema_version: 2\n").unwrap_err(),
            ConfigurationError::InvalidField { field, .. } if field == "schema_version"
        ));
    }

    #[test]
    fn test_workdir_escape_rejected() {
        let err = parse_recipe(src(), "workdir: ../outside\n").unwrap_err();
        assert!(matches!(err, ConfigurationError::UnsafePath { .. }));
        assert!(parse_recipe(src(), "workdir: /abs\n").is_err());
        assert_eq!(parse_recipe(src(), "workdir: .\n").unwrap().workdir, None);
    }

    #[test]
    fn test_file_edit_validation() {
        let escape = "file_edits:\n  - action: ensure_lines\n    path: ../../etc/passwd\n    lines: [x]\n";
        assert!(matches!(
            parse_recipe(src(), escape).unwrap_err(),
            ConfigurationError::UnsafePath { .. }
        ));

        let unknown_key = "file_edits:\n  - action: ensure_lines\n    path: a\n    lines: [x]\n    mode: 644\n";
        assert!(matches!(
            parse_recipe(src(), unknown_key).unwrap_err(),
            ConfigurationError::InvalidField { .. }
        ));

        let retired = "file_edits:\n  - action: append\n    path: a\n    lines: [x]\n";
        assert!(matches!(
            parse_recipe(src(), retired).unwrap_err(),
            ConfigurationError::RetiredField { .. }
        ));

        let missing_content = "file_edits:\n  - action: ensure_block\n    path: a\n    marker: m\n";
        assert!(parse_recipe(src(), missing_content).is_err());

        let mixed = "file_edits:\n  - action: ensure_block\n    path: a\n    marker: m\n    content: x\n    lines: [y]\n";
        assert!(parse_recipe(src(), mixed).is_err());
    }

    #[test]
    fn test_block_content_with_own_delimiter_rejected() {
        let nested = "file_edits:\n  - action: ensure_block\n    path: a\n    marker: m\n    content: \"A = 1\\n# END m\\nB = 2\"\n";
        let err = parse_recipe(src(), nested).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidField { ref reason, .. } if reason.contains("# END m")));

        let other_marker = "file_edits:\n  - action: ensure_block\n    path: a\n    marker: m\n    content: \"# END n\"\n";
        assert!(parse_recipe(src(), other_marker).is_ok());
    }

    #[test]
    fn test_parse_job_document() {
        let json = r#"{
            "job_id": 42,
            "created_by": "alice",
            "mode": "build_only",
            "codebase_id": "demo",
            "file_patches": [{"action": "ensure_lines", "path": "conf/local.conf", "lines": ["X = \"1\""]}],
            "recipe": {"id": 7, "yaml": "build_block: [make]"},
            "snapshot": {"status": "queued"}
        }"#;
        let doc = parse_job_document(Path::new("job.json"), json).unwrap();

        assert_eq!(doc.job_id.as_deref(), Some("42"));
        assert_eq!(doc.owner.as_deref(), Some("alice"));
        assert_eq!(doc.mode, JobMode::BuildOnly);
        assert_eq!(doc.recipe_id.as_deref(), Some("7"));
        assert_eq!(doc.file_edits.len(), 1);
        assert_eq!(doc.recipe_yaml.as_deref(), Some("build_block: [make]"));
    }

    #[test]
    fn test_job_document_rejects_retired_and_bad_mode() {
        let retired = parse_job_document(Path::new("job.json"), r#"{"run_build": false}"#).unwrap_err();
        assert!(matches!(retired, ConfigurationError::RetiredField { .. }));

        let mode = parse_job_document(Path::new("job.json"), r#"{"mode": "turbo"}"#).unwrap_err();
        assert!(matches!(mode, ConfigurationError::InvalidMode(m) if m == "turbo"));
    }

    #[test]
    fn test_identifier_validation() {
        for ok in ["demo", "demo_2", "a.b-c", "17"] {
            assert!(validate_codebase_id(ok).is_ok(), "{ok}");
        }
        for bad in ["", "..", "a/b", "../x", ".locks", "a..b", "sp ace"] {
            assert!(validate_codebase_id(bad).is_err(), "{bad}");
        }
        assert!(matches!(validate_job_id("x/y"), Err(ConfigurationError::InvalidJobId(_))));
    }

    fn document(mode: JobMode, codebase: Option<&str>) -> JobDocument {
        JobDocument {
            owner: Some("alice".to_string()),
            mode,
            codebase_id: codebase.map(str::to_string),
            ..Default::default()
        }
    }

    fn recipe(clone: &[&str], build: &[&str]) -> Recipe {
        Recipe {
            clone_lines: clone.iter().map(|s| s.to_string()).collect(),
            build_lines: build.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_mode_consistency() {
        let config = Config::default();

        let ok = build_job_spec("1", document(JobMode::Full, Some("demo")), recipe(&["git"], &["make"]), &config);
        assert!(ok.is_ok());

        let no_build = build_job_spec("1", document(JobMode::Full, Some("demo")), recipe(&["git"], &[]), &config);
        assert!(matches!(
            no_build.unwrap_err(),
            ConfigurationError::MissingStageLines { stage: "build_block", .. }
        ));

        let no_clone = build_job_spec("1", document(JobMode::CloneOnly, None), recipe(&[], &[]), &config);
        assert!(matches!(
            no_clone.unwrap_err(),
            ConfigurationError::MissingStageLines { stage: "clone_block", .. }
        ));

        let no_codebase = build_job_spec("1", document(JobMode::BuildOnly, None), recipe(&[], &["make"]), &config);
        assert!(matches!(no_codebase.unwrap_err(), ConfigurationError::CodebaseRequired { .. }));

        let nothing = build_job_spec("1", document(JobMode::EditOnly, Some("demo")), recipe(&[], &[]), &config);
        assert!(matches!(nothing.unwrap_err(), ConfigurationError::NothingToEdit));

        let bad_id = build_job_spec("1", document(JobMode::Full, Some("../x")), recipe(&["a"], &["b"]), &config);
        assert!(matches!(bad_id.unwrap_err(), ConfigurationError::InvalidCodebaseId(_)));
    }

    #[test]
    fn test_owner_required() {
        let mut doc = document(JobMode::Full, None);
        doc.owner = None;
        let err = build_job_spec("1", doc, recipe(&["a"], &["b"]), &Config::default()).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingOwner));
    }

    #[test]
    fn test_edit_in_build_only_precedence() {
        let mut config = Config::default();
        config.workspace.edit_in_build_only = true;

        let mut r = recipe(&[], &["make"]);
        r.edit_in_build_only = Some(false);
        let spec = build_job_spec("1", document(JobMode::BuildOnly, Some("demo")), r.clone(), &config).unwrap();
        assert!(!spec.edit_in_build_only);

        let mut doc = document(JobMode::BuildOnly, Some("demo"));
        doc.edit_in_build_only = Some(true);
        let spec = build_job_spec("1", doc, r, &config).unwrap();
        assert!(spec.edit_in_build_only);
    }

    #[test]
    fn test_spec_edits_follow_recipe_edits() {
        let mut r = recipe(&["a"], &["b"]);
        r.file_edits.push(FileEdit::EnsureLines {
            path: "first".to_string(),
            lines: vec!["x".to_string()],
        });
        let mut doc = document(JobMode::Full, Some("demo"));
        doc.file_edits.push(FileEdit::EnsureLines {
            path: "second".to_string(),
            lines: vec!["y".to_string()],
        });

        let spec = build_job_spec("1", doc, r, &Config::default()).unwrap();
        let paths: Vec<_> = spec.file_edits.iter().map(|e| e.path()).collect();
        assert_eq!(paths, vec!["first", "second"]);
    }

    #[test]
    fn test_load_job_falls_back_to_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.jobs_root = temp_dir.path().to_path_buf();
        let job_dir = temp_dir.path().join("5");
        fs::create_dir_all(&job_dir).unwrap();
        fs::write(
            job_dir.join(JOB_SPEC_FILE),
            r#"{"owner": "alice", "mode": "clone_only", "recipe": {"yaml": "clone_block: [echo hi]"}}"#,
        )
        .unwrap();

        let spec = load_job(&config, "5").unwrap();
        assert_eq!(spec.recipe.clone_lines, vec!["echo hi"]);

        fs::write(job_dir.join(RECIPE_FILE), "clone_block: [echo from file]\n").unwrap();
        let spec = load_job(&config, "5").unwrap();
        assert_eq!(spec.recipe.clone_lines, vec!["echo from file"]);
    }

    #[test]
    fn test_load_job_missing_documents() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.jobs_root = temp_dir.path().to_path_buf();

        assert!(matches!(
            load_job(&config, "9").unwrap_err(),
            ConfigurationError::MissingDocument { what: "job spec", .. }
        ));

        fs::create_dir_all(temp_dir.path().join("9")).unwrap();
        fs::write(temp_dir.path().join("9").join(JOB_SPEC_FILE), r#"{"owner": "alice"}"#).unwrap();
        assert!(matches!(
            load_job(&config, "9").unwrap_err(),
            ConfigurationError::MissingDocument { what: "recipe", .. }
        ));
    }

    #[test]
    fn test_load_job_rejects_mismatched_id() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.jobs_root = temp_dir.path().to_path_buf();
        let job_dir = temp_dir.path().join("5");
        fs::create_dir_all(&job_dir).unwrap();
        fs::write(job_dir.join(JOB_SPEC_FILE), r#"{"job_id": "6", "owner": "alice"}"#).unwrap();
        fs::write(job_dir.join(RECIPE_FILE), "clone_block: [a]\nbuild_block: [b]\n").unwrap();

        assert!(matches!(
            load_job(&config, "5").unwrap_err(),
            ConfigurationError::InvalidField { field, .. } if field == "job_id"
        ));
    }
}
