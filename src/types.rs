use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Optional typed hints carried in a `/process` request's `context`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnHints {
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Base64 voice payload; transcribed when `message` is empty.
    #[serde(default)]
    pub voice_b64: Option<String>,
}

/// One inline button on an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Rows of inline buttons, as the transport renders them.
pub type Keyboard = Vec<Vec<Button>>;

/// Output strategy chosen by the dispatcher for a turn's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    FinalText,
    RenderTable,
    AskClarification,
}

/// The envelope returned from `/process` and `/callback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    pub success: bool,
    pub response_type: ResponseType,
    /// HTML string restricted to the `<b> <i> <code> <pre>` subset.
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buttons: Option<Keyboard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TurnResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            success: true,
            response_type: ResponseType::FinalText,
            text: text.into(),
            items: None,
            set_id: None,
            buttons: None,
            error: None,
        }
    }

    pub fn table(text: impl Into<String>, items: Vec<serde_json::Value>, set_id: Uuid) -> Self {
        Self {
            success: true,
            response_type: ResponseType::RenderTable,
            text: text.into(),
            items: Some(items),
            set_id: Some(set_id),
            buttons: None,
            error: None,
        }
    }

    pub fn clarification(text: impl Into<String>) -> Self {
        Self {
            success: true,
            response_type: ResponseType::AskClarification,
            text: text.into(),
            items: None,
            set_id: None,
            buttons: None,
            error: None,
        }
    }

    pub fn failure(text: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            response_type: ResponseType::FinalText,
            text: text.into(),
            items: None,
            set_id: None,
            buttons: None,
            error: Some(error.into()),
        }
    }

    pub fn with_buttons(mut self, buttons: Keyboard) -> Self {
        self.buttons = Some(buttons);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ResponseType::RenderTable).unwrap(),
            "\"render_table\""
        );
        assert_eq!(
            serde_json::to_string(&ResponseType::AskClarification).unwrap(),
            "\"ask_clarification\""
        );
    }

    #[test]
    fn empty_optionals_are_omitted() {
        let json = serde_json::to_value(TurnResponse::text("Готово!")).unwrap();
        assert!(json.get("items").is_none());
        assert!(json.get("set_id").is_none());
        assert!(json.get("buttons").is_none());
        assert!(json.get("error").is_none());
        assert_eq!(json["response_type"], "final_text");
    }
}
