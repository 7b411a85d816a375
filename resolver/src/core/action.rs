//! Typed file-level actions and validation of raw planner records.
//!
//! The planner hands back loosely structured JSON records. They are converted
//! into [`Action`] here, once, so that unknown kinds and missing fields are
//! rejected at construction and every later `match` is exhaustive.

use std::fmt;
use std::path::{Component, Path};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::InvalidActionError;

/// One planned file-level mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Action {
    Create {
        filename: String,
    },
    Modify {
        filename: String,
    },
    Rename {
        old_filename: String,
        new_filename: String,
    },
    Copy {
        old_filename: String,
        new_filename: String,
    },
    Delete {
        filename: String,
    },
    Download {
        source_url: String,
        target_filename: String,
    },
    Execute {
        filename: String,
    },
}

/// Tag of an [`Action`], parsed from the record's `action` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Create,
    Modify,
    Rename,
    Copy,
    Delete,
    Download,
    Execute,
}

impl ActionKind {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "create" => Some(Self::Create),
            "modify" => Some(Self::Modify),
            "rename" => Some(Self::Rename),
            "copy" => Some(Self::Copy),
            "delete" => Some(Self::Delete),
            "download" => Some(Self::Download),
            "execute" => Some(Self::Execute),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Rename => "rename",
            Self::Copy => "copy",
            Self::Delete => "delete",
            Self::Download => "download",
            Self::Execute => "execute",
        }
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Create { .. } => ActionKind::Create,
            Self::Modify { .. } => ActionKind::Modify,
            Self::Rename { .. } => ActionKind::Rename,
            Self::Copy { .. } => ActionKind::Copy,
            Self::Delete { .. } => ActionKind::Delete,
            Self::Download { .. } => ActionKind::Download,
            Self::Execute { .. } => ActionKind::Execute,
        }
    }

    pub fn is_download(&self) -> bool {
        matches!(self, Self::Download { .. })
    }

    /// Every repository path the action touches.
    pub fn filenames(&self) -> Vec<&str> {
        match self {
            Self::Create { filename }
            | Self::Modify { filename }
            | Self::Delete { filename }
            | Self::Execute { filename } => vec![filename.as_str()],
            Self::Rename {
                old_filename,
                new_filename,
            }
            | Self::Copy {
                old_filename,
                new_filename,
            } => vec![old_filename.as_str(), new_filename.as_str()],
            Self::Download {
                target_filename, ..
            } => vec![target_filename.as_str()],
        }
    }

    /// Build a validated action from a raw planner record.
    ///
    /// Fails when the record is not an object, the tag is unknown, a required
    /// field is missing, a path is malformed, a download URL is not http(s),
    /// or any path falls under the protected prefix.
    pub fn from_record(record: &Value, guard: &ProtectedPrefix) -> Result<Self, InvalidActionError> {
        let Some(fields) = record.as_object() else {
            return Err(InvalidActionError::NotAnObject(record.to_string()));
        };
        let tag = fields
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| InvalidActionError::MissingField {
                kind: "unknown".to_string(),
                field: "action",
            })?;
        let kind =
            ActionKind::parse(tag).ok_or_else(|| InvalidActionError::UnknownKind(tag.to_string()))?;

        let path = |field: &'static str| -> Result<String, InvalidActionError> {
            let raw = required_field(fields, kind, field)?;
            let normalized = normalize_filename(raw)?;
            guard.check(&normalized)?;
            Ok(normalized)
        };

        let action = match kind {
            ActionKind::Create => Self::Create {
                filename: path("filename")?,
            },
            ActionKind::Modify => Self::Modify {
                filename: path("filename")?,
            },
            ActionKind::Delete => Self::Delete {
                filename: path("filename")?,
            },
            ActionKind::Execute => Self::Execute {
                filename: path("filename")?,
            },
            ActionKind::Rename => Self::Rename {
                old_filename: path("old_filename")?,
                new_filename: path("new_filename")?,
            },
            ActionKind::Copy => Self::Copy {
                old_filename: path("old_filename")?,
                new_filename: path("new_filename")?,
            },
            ActionKind::Download => Self::Download {
                source_url: validate_url(required_field(fields, kind, "source_url")?)?,
                target_filename: path("target_filename")?,
            },
        };
        Ok(action)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create { filename }
            | Self::Modify { filename }
            | Self::Delete { filename }
            | Self::Execute { filename } => write!(f, "{} {}", self.kind().as_str(), filename),
            Self::Rename {
                old_filename,
                new_filename,
            }
            | Self::Copy {
                old_filename,
                new_filename,
            } => write!(
                f,
                "{} {} -> {}",
                self.kind().as_str(),
                old_filename,
                new_filename
            ),
            Self::Download {
                source_url,
                target_filename,
            } => write!(f, "download {source_url} -> {target_filename}"),
        }
    }
}

/// Path-prefix predicate for the automation-configuration directory.
///
/// The check is component-wise: with prefix `.github`, `.github/workflows/ci.yml`
/// is protected while `.githubx/ci.yml` and `docs/.github/ci.yml` are not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedPrefix {
    prefix: String,
}

impl ProtectedPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.prefix
    }

    pub fn is_protected(&self, path: &str) -> bool {
        let prefix: Vec<_> = normal_components(Path::new(&self.prefix)).collect();
        if prefix.is_empty() {
            return false;
        }
        let mut components = normal_components(Path::new(path));
        prefix
            .iter()
            .all(|expected| components.next() == Some(*expected))
    }

    pub fn check(&self, path: &str) -> Result<(), InvalidActionError> {
        if self.is_protected(path) {
            return Err(InvalidActionError::ProtectedPath {
                path: path.to_string(),
                prefix: self.prefix.clone(),
            });
        }
        Ok(())
    }
}

fn normal_components(path: &Path) -> impl Iterator<Item = &std::ffi::OsStr> {
    path.components().filter_map(|component| match component {
        Component::Normal(name) => Some(name),
        _ => None,
    })
}

/// Normalize a repository-relative filename.
///
/// Trims whitespace, drops a leading `./` and surrounding slashes, and rejects
/// empty names and names that climb out of the repository.
pub fn normalize_filename(raw: &str) -> Result<String, InvalidActionError> {
    let mut name = raw.trim();
    while let Some(rest) = name.strip_prefix("./") {
        name = rest;
    }
    let name = name.trim_matches('/');
    if name.is_empty() {
        return Err(InvalidActionError::InvalidPath(raw.to_string()));
    }
    if Path::new(name)
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(InvalidActionError::InvalidPath(raw.to_string()));
    }
    Ok(name.to_string())
}

fn required_field<'a>(
    fields: &'a Map<String, Value>,
    kind: ActionKind,
    field: &'static str,
) -> Result<&'a str, InvalidActionError> {
    fields
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| InvalidActionError::MissingField {
            kind: kind.as_str().to_string(),
            field,
        })
}

fn validate_url(raw: &str) -> Result<String, InvalidActionError> {
    let trimmed = raw.trim();
    let parsed = url::Url::parse(trimmed).map_err(|err| InvalidActionError::InvalidUrl {
        url: trimmed.to_string(),
        reason: err.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(trimmed.to_string()),
        other => Err(InvalidActionError::InvalidUrl {
            url: trimmed.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn guard() -> ProtectedPrefix {
        ProtectedPrefix::new(".github")
    }

    #[test]
    fn parses_create_and_strips_slashes() {
        let action = Action::from_record(
            &json!({"action": "create", "filename": "/src/report.py/"}),
            &guard(),
        )
        .expect("valid");
        assert_eq!(
            action,
            Action::Create {
                filename: "src/report.py".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_with_both_paths() {
        let action = Action::from_record(
            &json!({"action": "rename", "old_filename": "a.py", "new_filename": "./b.py"}),
            &guard(),
        )
        .expect("valid");
        assert_eq!(action.filenames(), vec!["a.py", "b.py"]);
        assert_eq!(action.to_string(), "rename a.py -> b.py");
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = Action::from_record(&json!({"action": "move", "filename": "a"}), &guard())
            .unwrap_err();
        assert_eq!(err, InvalidActionError::UnknownKind("move".to_string()));
    }

    #[test]
    fn rejects_missing_field() {
        let err = Action::from_record(&json!({"action": "copy", "old_filename": "a"}), &guard())
            .unwrap_err();
        assert_eq!(
            err,
            InvalidActionError::MissingField {
                kind: "copy".to_string(),
                field: "new_filename"
            }
        );
    }

    #[test]
    fn rejects_missing_tag_and_non_objects() {
        assert!(matches!(
            Action::from_record(&json!({"filename": "a"}), &guard()),
            Err(InvalidActionError::MissingField {
                field: "action",
                ..
            })
        ));
        assert!(matches!(
            Action::from_record(&json!("create a.py"), &guard()),
            Err(InvalidActionError::NotAnObject(_))
        ));
    }

    #[test]
    fn rejects_protected_target_of_rename() {
        let err = Action::from_record(
            &json!({"action": "rename", "old_filename": "ci.yml", "new_filename": ".github/workflows/ci.yml"}),
            &guard(),
        )
        .unwrap_err();
        assert!(matches!(err, InvalidActionError::ProtectedPath { .. }));
    }

    #[test]
    fn protection_is_component_wise() {
        let guard = guard();
        assert!(guard.is_protected(".github"));
        assert!(guard.is_protected(".github/workflows/ci.yml"));
        assert!(!guard.is_protected(".githubx/ci.yml"));
        assert!(!guard.is_protected("docs/.github/ci.yml"));
    }

    #[test]
    fn rejects_parent_dir_and_empty_names() {
        assert!(normalize_filename("../secret").is_err());
        assert!(normalize_filename("a/../../b").is_err());
        assert!(normalize_filename(" / ").is_err());
        assert_eq!(normalize_filename("./a/b.txt").expect("ok"), "a/b.txt");
    }

    #[test]
    fn download_requires_http_url() {
        let ok = Action::from_record(
            &json!({"action": "download", "source_url": "https://example.org/data.csv", "target_filename": "data/data.csv"}),
            &guard(),
        )
        .expect("valid");
        assert!(ok.is_download());

        let err = Action::from_record(
            &json!({"action": "download", "source_url": "file:///etc/passwd", "target_filename": "p"}),
            &guard(),
        )
        .unwrap_err();
        assert!(matches!(err, InvalidActionError::InvalidUrl { .. }));
    }

    #[test]
    fn serializes_with_action_tag() {
        let action = Action::Execute {
            filename: "demo.ipynb".to_string(),
        };
        let value = serde_json::to_value(&action).expect("serialize");
        assert_eq!(value, json!({"action": "execute", "filename": "demo.ipynb"}));
    }
}
