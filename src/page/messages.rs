//! Typed messages crossing the page boundary in both directions.
//!
//! Commands go to the page as JSON data for a fixed interpreter script, and
//! page-originated messages come back as JSON objects tagged by `type`.

use serde::{Deserialize, Serialize};

use super::PageError;
use crate::perception::structural::RawPageData;

/// Identifies the session and step a command belongs to.
///
/// The epoch changes when a session starts or stops; the token changes every
/// time the agent moves on to a new trigger. Page messages echo the ticket of
/// the command that caused them so late ones can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Ticket {
    pub epoch: u64,
    pub token: u64,
}

/// Messages posted by the page-side interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
    SnapshotData {
        #[serde(default)]
        ticket: Option<Ticket>,
        payload: RawPageData,
    },
    GuidePrompt {
        #[serde(default)]
        ticket: Option<Ticket>,
        message: String,
    },
    UserActionCompleted {
        #[serde(default)]
        ticket: Option<Ticket>,
    },
    ElementNotFound {
        #[serde(default)]
        ticket: Option<Ticket>,
    },
    /// Carries the ticket of the last interaction the page performed, if any.
    DomMutated {
        #[serde(default)]
        ticket: Option<Ticket>,
    },
}

impl PageMessage {
    /// Parse a raw message payload.
    pub fn parse(raw: &str) -> Result<Self, PageError> {
        serde_json::from_str(raw).map_err(|e| PageError::InvalidMessage(e.to_string()))
    }

    pub fn ticket(&self) -> Option<Ticket> {
        match self {
            PageMessage::SnapshotData { ticket, .. }
            | PageMessage::GuidePrompt { ticket, .. }
            | PageMessage::UserActionCompleted { ticket }
            | PageMessage::ElementNotFound { ticket }
            | PageMessage::DomMutated { ticket } => *ticket,
        }
    }
}

/// Back/forward availability and the current address.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NavigationState {
    pub url: String,
    pub can_go_back: bool,
    pub can_go_forward: bool,
}

/// Events emitted by a page surface.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    LoadStart,
    LoadEnd,
    Navigation(NavigationState),
    Message(PageMessage),
}

/// Commands understood by the page-side interpreter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PageCommand {
    /// Enumerate candidate elements and post them back as `SNAPSHOT_DATA`.
    CollectElements { ticket: Ticket },
    /// Locate an element and act on it, or guide the user to it.
    Interact(InteractCommand),
    /// Install the DOM mutation observer (idempotent per document).
    WatchMutations,
    /// Remove any guided highlight, marker and pending user-action listener.
    ClearGuidance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractCommand {
    pub ticket: Ticket,
    pub locator: Locator,
    pub action: InteractKind,
    /// Present in guided mode: highlight and wait instead of acting.
    pub guidance: Option<Guidance>,
    /// Delay before a synthesized interaction, in milliseconds.
    pub settle_ms: u64,
}

/// How the interpreter finds the element.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Locator {
    /// CSS selector, with visible text to search for if the selector misses.
    Selector {
        selector: String,
        text_fallback: Option<String>,
    },
    /// Viewport pixel coordinates for a hit test.
    Point { x: f64, y: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InteractKind {
    Click,
    Type { value: String, submit: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Guidance {
    /// Localized instruction shown to the user.
    pub instruction: String,
    /// Draw a dot at the hit-test point.
    pub marker: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_message_taxonomy() {
        let msg = PageMessage::parse(
            r#"{"type":"ELEMENT_NOT_FOUND","ticket":{"epoch":2,"token":7}}"#,
        )
        .unwrap();
        assert_eq!(
            msg.ticket(),
            Some(Ticket {
                epoch: 2,
                token: 7
            })
        );

        let msg = PageMessage::parse(r#"{"type":"GUIDE_PROMPT","message":"Tap here"}"#).unwrap();
        assert_eq!(
            msg,
            PageMessage::GuidePrompt {
                ticket: None,
                message: "Tap here".to_string()
            }
        );

        assert_eq!(
            PageMessage::parse(r#"{"type":"DOM_MUTATED"}"#).unwrap(),
            PageMessage::DomMutated { ticket: None }
        );
        assert_eq!(
            PageMessage::parse(r#"{"type":"DOM_MUTATED","ticket":{"epoch":4,"token":1}}"#)
                .unwrap()
                .ticket(),
            Some(Ticket { epoch: 4, token: 1 })
        );
        assert!(matches!(
            PageMessage::parse(r#"{"type":"USER_ACTION_COMPLETED"}"#).unwrap(),
            PageMessage::UserActionCompleted { ticket: None }
        ));
    }

    #[test]
    fn test_parse_snapshot_data() {
        let raw = json!({
            "type": "SNAPSHOT_DATA",
            "ticket": {"epoch": 1, "token": 3},
            "payload": {
                "url": "https://example.com/",
                "title": "Example",
                "viewportHeight": 800.0,
                "elements": [
                    {"tag": "A", "text": "More", "id": "", "className": "", "width": 40.0, "height": 20.0, "top": 100.0}
                ]
            }
        });
        let msg = PageMessage::parse(&raw.to_string()).unwrap();
        match msg {
            PageMessage::SnapshotData { payload, .. } => {
                assert_eq!(payload.url, "https://example.com/");
                assert_eq!(payload.elements.len(), 1);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_message() {
        assert!(PageMessage::parse(r#"{"type":"SOMETHING_ELSE"}"#).is_err());
        assert!(PageMessage::parse("not json").is_err());
    }

    #[test]
    fn test_command_serializes_as_data() {
        let command = PageCommand::Interact(InteractCommand {
            ticket: Ticket { epoch: 1, token: 2 },
            locator: Locator::Selector {
                selector: "input#q".to_string(),
                text_fallback: None,
            },
            action: InteractKind::Type {
                value: "it's \"quoted\"</script>".to_string(),
                submit: true,
            },
            guidance: None,
            settle_ms: 500,
        });
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value["command"], "interact");
        assert_eq!(value["locator"]["by"], "selector");
        assert_eq!(value["action"]["kind"], "type");
        assert_eq!(value["action"]["value"], "it's \"quoted\"</script>");
        assert_eq!(value["ticket"]["token"], 2);

        let value = serde_json::to_value(PageCommand::WatchMutations).unwrap();
        assert_eq!(value, json!({"command": "watch_mutations"}));

        let value = serde_json::to_value(PageCommand::ClearGuidance).unwrap();
        assert_eq!(value, json!({"command": "clear_guidance"}));
    }
}
