//! Task targets of the form `project:target[:configuration]`.
use std::{fmt, str::FromStr};

use crate::error::HarnessError;

/// Identifies an external task in the host workspace. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// Project owning the task.
    pub project: String,
    /// Task name within the project.
    pub task: String,
    /// Optional configuration of the task.
    pub configuration: Option<String>,
}

impl Target {
    /// Parses a target string.
    ///
    /// Full command lines (`npx nx serve web:serve:dev`) are accepted: the first
    /// whitespace-separated token that contains a colon is used.
    pub fn parse(input: &str) -> Result<Self, HarnessError> {
        let trimmed = input.trim();
        let candidate = if trimmed.contains(char::is_whitespace) {
            trimmed
                .split_whitespace()
                .find(|part| part.contains(':'))
                .ok_or_else(|| HarnessError::TargetParse(input.to_string()))?
        } else {
            trimmed
        };

        let mut parts = candidate.split(':');
        let project = parts.next().unwrap_or_default();
        let task = parts.next().unwrap_or_default();
        let configuration = parts.next();

        if project.is_empty() || task.is_empty() || parts.next().is_some() {
            return Err(HarnessError::TargetParse(input.to_string()));
        }

        let configuration = match configuration {
            Some("") => return Err(HarnessError::TargetParse(input.to_string())),
            Some(value) => Some(value.to_string()),
            None => None,
        };

        Ok(Self {
            project: project.to_string(),
            task: task.to_string(),
            configuration,
        })
    }
}

impl FromStr for Target {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.configuration {
            Some(configuration) => {
                write!(f, "{}:{}:{}", self.project, self.task, configuration)
            }
            None => write!(f, "{}:{}", self.project, self.task),
        }
    }
}
