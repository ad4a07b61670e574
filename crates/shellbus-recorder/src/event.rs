//! Recorded interaction events.

use serde::{Deserialize, Serialize};

/// Default maximum length of captured element text.
pub const DEFAULT_INNER_TEXT_LIMIT: usize = 50;

const ELLIPSIS: &str = "...";

/// Kind of user interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordedEventType {
    Navigate,
    Click,
    Dblclick,
    Contextmenu,
    Input,
    Submit,
    Scroll,
    Copy,
    Paste,
    Keydown,
    Selection,
    TabCreated,
    TabSwitched,
}

/// An event as reported by a producer, before the recorder stamps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedEvent {
    #[serde(rename = "type")]
    pub kind: RecordedEventType,
    pub tab_id: i64,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_x: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_y: Option<i64>,
}

impl CapturedEvent {
    /// Create an event with only the required fields set.
    #[must_use]
    pub fn new(kind: RecordedEventType, tab_id: i64, url: impl Into<String>) -> Self {
        Self {
            kind,
            tab_id,
            url: url.into(),
            title: None,
            selector: None,
            tag_name: None,
            inner_text: None,
            value: None,
            scroll_x: None,
            scroll_y: None,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the element the interaction targeted.
    #[must_use]
    pub fn with_element(mut self, selector: impl Into<String>, tag_name: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self.tag_name = Some(tag_name.into());
        self
    }

    #[must_use]
    pub fn with_inner_text(mut self, text: impl Into<String>) -> Self {
        self.inner_text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_scroll(mut self, x: i64, y: i64) -> Self {
        self.scroll_x = Some(x);
        self.scroll_y = Some(y);
        self
    }

    /// Apply the inner-text limit to whatever the producer sent.
    #[must_use]
    pub fn normalized(mut self, inner_text_limit: usize) -> Self {
        self.inner_text = self
            .inner_text
            .as_deref()
            .and_then(|text| truncate_text(text, inner_text_limit));
        self
    }
}

/// Trim `text`; drop it if empty; cut it to `limit` characters ending in
/// an ellipsis if longer. The result never exceeds `limit` characters.
#[must_use]
pub fn truncate_text(text: &str, limit: usize) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text.chars().count() <= limit {
        return Some(text.to_string());
    }
    if limit < ELLIPSIS.len() {
        // No room for the ellipsis; a plain cut still honours the limit.
        let cut: String = text.chars().take(limit).collect();
        return (!cut.is_empty()).then_some(cut);
    }
    let keep = limit - ELLIPSIS.len();
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    Some(out)
}

/// An event stamped with identity and time. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub id: String,
    /// Unix epoch milliseconds.
    pub timestamp: u64,
    #[serde(flatten)]
    pub event: CapturedEvent,
}

impl RecordedEvent {
    #[must_use]
    pub const fn kind(&self) -> RecordedEventType {
        self.event.kind
    }
}
