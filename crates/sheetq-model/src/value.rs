use serde::{Deserialize, Serialize};

/// A raw cell value as stored by the workbook backend.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum ScalarValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Error literal such as `#DIV/0!` or `#VALUE!`.
    Error(String),
}

impl ScalarValue {
    pub fn is_empty(&self) -> bool {
        match self {
            ScalarValue::Empty => true,
            ScalarValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Unformatted textual form (`1.5`, `TRUE`, `#N/A`).
    pub fn raw_text(&self) -> String {
        match self {
            ScalarValue::Empty => String::new(),
            ScalarValue::Text(s) => s.clone(),
            ScalarValue::Number(n) => n.to_string(),
            ScalarValue::Bool(true) => "TRUE".to_string(),
            ScalarValue::Bool(false) => "FALSE".to_string(),
            ScalarValue::Error(e) => e.clone(),
        }
    }
}

/// A cell as handed out by a [`crate::Worksheet`]: the stored value plus whatever display text
/// the backend computed for it (number formats, dates, ...).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetCell {
    pub value: ScalarValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
}

impl SheetCell {
    pub fn new(value: ScalarValue) -> Self {
        Self {
            value,
            formatted: None,
        }
    }

    pub fn with_formatted(value: ScalarValue, formatted: impl Into<String>) -> Self {
        Self {
            value,
            formatted: Some(formatted.into()),
        }
    }

    /// Display text: the backend's formatted text when present, else the raw value.
    pub fn display_text(&self) -> String {
        match &self.formatted {
            Some(text) => text.clone(),
            None => self.value.raw_text(),
        }
    }
}

impl From<&str> for SheetCell {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            SheetCell::default()
        } else {
            SheetCell::new(ScalarValue::Text(value.to_string()))
        }
    }
}

impl From<f64> for SheetCell {
    fn from(value: f64) -> Self {
        SheetCell::new(ScalarValue::Number(value))
    }
}
