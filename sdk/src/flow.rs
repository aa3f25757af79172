//! Results returned by the steps of a setup, re-authentication or options flow.

use indexmap::IndexMap;
use serde::Serialize;

/// What the host should do after a flow step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    /// Show (or re-show) a form to the user.
    Form {
        step_id: String,
        /// Field name (or `"base"`) to error key.
        errors: IndexMap<String, String>,
        description_placeholders: IndexMap<String, String>,
    },
    /// Send the user to an external page, e.g. an OAuth consent screen.
    ExternalStep { step_id: String, url: String },
    /// The flow ended without creating anything.
    Abort { reason: String },
    /// A config entry was created.
    CreateEntry { entry_id: String, title: String },
}

impl FlowResult {
    pub fn abort(reason: impl Into<String>) -> Self {
        Self::Abort {
            reason: reason.into(),
        }
    }

    pub fn form(step_id: impl Into<String>) -> Self {
        Self::Form {
            step_id: step_id.into(),
            errors: IndexMap::new(),
            description_placeholders: IndexMap::new(),
        }
    }

    /// Adds a field error to a [`FlowResult::Form`]. Other variants are returned unchanged.
    pub fn with_error(mut self, field: impl Into<String>, error: impl Into<String>) -> Self {
        if let Self::Form { errors, .. } = &mut self {
            errors.insert(field.into(), error.into());
        }
        self
    }

    /// Adds a description placeholder to a [`FlowResult::Form`].
    pub fn with_placeholder(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Self::Form {
            description_placeholders,
            ..
        } = &mut self
        {
            description_placeholders.insert(key.into(), value.into());
        }
        self
    }

    pub fn is_abort_with(&self, reason: &str) -> bool {
        matches!(self, Self::Abort { reason: r } if r == reason)
    }

    pub fn form_error(&self, field: &str) -> Option<&str> {
        match self {
            Self::Form { errors, .. } => errors.get(field).map(String::as_str),
            _ => None,
        }
    }
}
