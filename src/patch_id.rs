// src/patch_id.rs
//
// Patch identifiers: `<project>_<bug_id>_<file_path>_<start_line>_<end_line>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PatchIdError {
    #[error("patch identifier '{0}' has fewer than 5 '_'-separated fields")]
    TooFewFields(String),

    #[error("patch identifier '{raw}' has a non-numeric {field}: '{value}'")]
    BadLine {
        raw: String,
        field: &'static str,
        value: String,
    },

    #[error("patch identifier '{0}' has an empty project, bug id or path")]
    EmptyField(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PatchId {
    pub project: String,
    pub bug_id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
}

impl PatchId {
    /// `<project>_<bug_id>`, the key every per-bug resource is named after.
    pub fn bug_key(&self) -> String {
        format!("{}_{}", self.project, self.bug_id)
    }
}

impl FromStr for PatchId {
    type Err = PatchIdError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = raw.split('_').collect();
        if parts.len() < 5 {
            return Err(PatchIdError::TooFewFields(raw.to_string()));
        }

        // paths may themselves contain '_', so only the outer fields are fixed
        let n = parts.len();
        let project = parts[0];
        let bug_id = parts[1];
        let file_path = parts[2..n - 2].join("_");

        let line = |field: &'static str, value: &str| {
            value.parse::<usize>().map_err(|_| PatchIdError::BadLine {
                raw: raw.to_string(),
                field,
                value: value.to_string(),
            })
        };
        let start_line = line("start line", parts[n - 2])?;
        let end_line = line("end line", parts[n - 1])?;

        if project.is_empty() || bug_id.is_empty() || file_path.is_empty() {
            return Err(PatchIdError::EmptyField(raw.to_string()));
        }

        Ok(Self {
            project: project.to_string(),
            bug_id: bug_id.to_string(),
            file_path,
            start_line,
            end_line,
        })
    }
}

impl TryFrom<String> for PatchId {
    type Error = PatchIdError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<PatchId> for String {
    fn from(id: PatchId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}_{}",
            self.project, self.bug_id, self.file_path, self.start_line, self.end_line
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_identifier() {
        let id: PatchId = "Lang_10_src/main/java/Foo.java_12_14".parse().unwrap();
        assert_eq!(id.project, "Lang");
        assert_eq!(id.bug_id, "10");
        assert_eq!(id.file_path, "src/main/java/Foo.java");
        assert_eq!(id.start_line, 12);
        assert_eq!(id.end_line, 14);
        assert_eq!(id.bug_key(), "Lang_10");
    }

    #[test]
    fn keeps_underscores_inside_path() {
        let raw = "Closure_3_src/com/google/javascript/jscomp/Flow_Sensitive.java_7_7";
        let id: PatchId = raw.parse().unwrap();
        assert_eq!(id.file_path, "src/com/google/javascript/jscomp/Flow_Sensitive.java");
        assert_eq!(id.to_string(), raw);
    }

    #[test]
    fn rejects_short_and_non_numeric() {
        assert!(matches!(
            "Lang_10_Foo.java_12".parse::<PatchId>(),
            Err(PatchIdError::TooFewFields(_))
        ));
        assert!(matches!(
            "Lang_10_Foo.java_x_12".parse::<PatchId>(),
            Err(PatchIdError::BadLine { field: "start line", .. })
        ));
        assert!(matches!(
            "_10_Foo.java_1_2".parse::<PatchId>(),
            Err(PatchIdError::EmptyField(_))
        ));
    }
}
