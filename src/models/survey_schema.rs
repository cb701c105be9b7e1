use crate::error::AppError;
use serde::{Deserialize, Serialize};

/// Required fields of each wizard step
///
/// ```toml
/// [[steps]]
/// title = "Site"
///
/// [[steps.required]]
/// path = "site.address"
/// message = "Address is required"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveySchema {
    pub steps: Vec<StepSchema>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepSchema {
    pub title: String,
    pub required: Vec<FieldRequirement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRequirement {
    /// Dot-separated path into the form data; numeric segments index arrays
    pub path: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl FieldRequirement {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: None,
        }
    }

    pub fn message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| format!("{} is required", self.path))
    }
}

impl SurveySchema {
    pub fn from_toml(s: &str) -> Result<Self, AppError> {
        Ok(toml::from_str(s)?)
    }

    pub fn step(&self, index: usize) -> Option<&StepSchema> {
        self.steps.get(index)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_from_toml() {
        let schema = SurveySchema::from_toml(
            r#"
            [[steps]]
            title = "Site"

            [[steps.required]]
            path = "site.address"
            message = "Address is required"

            [[steps]]
            title = "Hazards"

            [[steps.required]]
            path = "hazards.asbestos"
            "#,
        )
        .unwrap();

        assert_eq!(schema.step_count(), 2);
        assert_eq!(schema.steps[0].required[0].message(), "Address is required");
        assert_eq!(
            schema.steps[1].required[0].message(),
            "hazards.asbestos is required"
        );
        assert!(schema.step(2).is_none());
    }
}
