//! Request metadata carried alongside the correlation id.

use serde::{Deserialize, Serialize};

/// Language and culture code installed at the edge when a caller sends none.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Per-call metadata bundle shared by every hop of a logical call.
///
/// Every field is optional so that "absent" and "empty string" stay distinct
/// across the wire. The value is immutable once built; the `with_*` methods
/// consume `self` and return a new payload.
///
/// Serializes to `MsgPack` with named camelCase fields via `rmp-serde`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPayload {
    /// Language used for display strings.
    ui_language: Option<String>,
    /// Culture used for number and date formatting.
    culture_code: Option<String>,
    /// Fallback display language.
    #[serde(rename = "defaultUILanguage")]
    default_ui_language: Option<String>,
    /// Caller identity. May be empty.
    user_id: Option<String>,
}

impl ContextPayload {
    /// A payload with every field absent.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            ui_language: None,
            culture_code: None,
            default_ui_language: None,
            user_id: None,
        }
    }

    /// Builds a payload with the given language, culture and user, and the
    /// default fallback language.
    #[must_use]
    pub fn new(
        ui_language: impl Into<String>,
        culture_code: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            ui_language: Some(ui_language.into()),
            culture_code: Some(culture_code.into()),
            default_ui_language: Some(DEFAULT_LANGUAGE.to_string()),
            user_id: Some(user_id.into()),
        }
    }

    /// Replaces the display language.
    #[must_use]
    pub fn with_ui_language(mut self, value: Option<String>) -> Self {
        self.ui_language = value;
        self
    }

    /// Replaces the formatting culture.
    #[must_use]
    pub fn with_culture_code(mut self, value: Option<String>) -> Self {
        self.culture_code = value;
        self
    }

    /// Replaces the fallback display language.
    #[must_use]
    pub fn with_default_ui_language(mut self, value: Option<String>) -> Self {
        self.default_ui_language = value;
        self
    }

    /// Replaces the caller identity.
    #[must_use]
    pub fn with_user_id(mut self, value: Option<String>) -> Self {
        self.user_id = value;
        self
    }

    /// Display language, if one was sent.
    #[must_use]
    pub fn ui_language(&self) -> Option<&str> {
        self.ui_language.as_deref()
    }

    /// Formatting culture, if one was sent.
    #[must_use]
    pub fn culture_code(&self) -> Option<&str> {
        self.culture_code.as_deref()
    }

    /// Fallback display language, if one was sent.
    #[must_use]
    pub fn default_ui_language(&self) -> Option<&str> {
        self.default_ui_language.as_deref()
    }

    /// Caller identity, if one was sent.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Display language, falling back to `default_ui_language` and then to
    /// [`DEFAULT_LANGUAGE`].
    #[must_use]
    pub fn effective_ui_language(&self) -> &str {
        self.ui_language()
            .filter(|lang| !lang.is_empty())
            .or_else(|| self.default_ui_language().filter(|lang| !lang.is_empty()))
            .unwrap_or(DEFAULT_LANGUAGE)
    }
}

impl Default for ContextPayload {
    /// The edge default: `en` / `en`, fallback `en`, empty user id.
    fn default() -> Self {
        Self::new(DEFAULT_LANGUAGE, DEFAULT_LANGUAGE, "")
    }
}
