use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// A PNG capture of the current viewport.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub png: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl Screenshot {
    pub fn new(png: Vec<u8>) -> Self {
        Self {
            png,
            captured_at: Utc::now(),
        }
    }

    /// Inline `data:` URL accepted by the model's image input.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.png)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One part of an input message sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputPart {
    InputText { text: String },
    InputImage { image_url: String },
}

/// A role-tagged, multi-part message in a model query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMessage {
    pub role: Role,
    pub content: Vec<InputPart>,
}

impl InputMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![InputPart::InputText { text: text.into() }],
        }
    }

    pub fn user_with_screenshot(text: impl Into<String>, screenshot: &Screenshot) -> Self {
        let mut message = Self::user(text);
        message.content.push(InputPart::InputImage {
            image_url: screenshot.to_data_url(),
        });
        message
    }

    /// Concatenated text parts, for logging and assertions.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                InputPart::InputText { text } => Some(text.as_str()),
                InputPart::InputImage { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A content part of a model `message` output item.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OutputContent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl OutputContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "output_text".to_string(),
            text: Some(text.into()),
        }
    }
}

/// One item of the model's output list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseItem {
    Message {
        #[serde(default)]
        content: Vec<OutputContent>,
    },
    ComputerCall {
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        action: ActionDescriptor,
    },
    McpListTools {
        #[serde(default)]
        server_label: Option<String>,
        #[serde(default)]
        tools: Vec<Value>,
    },
    #[serde(other)]
    Other,
}

impl ResponseItem {
    pub fn message(text: impl Into<String>) -> Self {
        Self::Message {
            content: vec![OutputContent::text(text)],
        }
    }

    pub fn computer_call(action: ActionDescriptor) -> Self {
        Self::ComputerCall {
            call_id: None,
            action,
        }
    }
}

/// Raw action as issued by the model: a kind plus its named arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(flatten)]
    pub arguments: Map<String, Value>,
}

impl ActionDescriptor {
    pub fn new(kind: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            kind: kind.into(),
            arguments,
        }
    }

    fn int(&self, name: &str) -> Option<i64> {
        let value = self.arguments.get(name)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f.round() as i64))
    }

    fn string(&self, name: &str) -> Option<String> {
        match self.arguments.get(name)? {
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Decode into a concrete [`Action`]. Unknown kinds fail fast.
    pub fn decode(&self) -> Result<Action> {
        let action = match self.kind.as_str() {
            "click" => Action::Click {
                x: self.int("x"),
                y: self.int("y"),
            },
            "type" => Action::Type {
                text: self.string("text").ok_or(Error::MissingArgument {
                    action: "type",
                    argument: "text",
                })?,
            },
            "press" | "keypress" => Action::Press {
                key: self.key_chord().ok_or(Error::MissingArgument {
                    action: "press",
                    argument: "key",
                })?,
            },
            "hover" => Action::Hover {
                selector: self.string("selector").ok_or(Error::MissingArgument {
                    action: "hover",
                    argument: "selector",
                })?,
            },
            "screenshot" => Action::Screenshot,
            "goto" => Action::Goto {
                url: self.string("url").ok_or(Error::MissingArgument {
                    action: "goto",
                    argument: "url",
                })?,
            },
            "scroll" => Action::Scroll {
                selector: self.string("selector"),
                dx: self.int("scroll_x").or_else(|| self.int("x")).unwrap_or(0),
                dy: self.int("scroll_y").or_else(|| self.int("y")).unwrap_or(200),
            },
            other => return Err(Error::UnknownAction(other.to_string())),
        };
        Ok(action)
    }

    // `key` for a single key, `keys` (list) for a chord such as ["ALT", "LEFT"].
    fn key_chord(&self) -> Option<String> {
        if let Some(key) = self.string("key") {
            return Some(key);
        }
        let keys = self.arguments.get("keys")?.as_array()?;
        let parts: Vec<&str> = keys.iter().filter_map(Value::as_str).collect();
        (!parts.is_empty()).then(|| parts.join("+"))
    }
}

/// A decoded, executable browser action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Click { x: Option<i64>, y: Option<i64> },
    Type { text: String },
    Press { key: String },
    Hover { selector: String },
    Screenshot,
    Goto { url: String },
    Scroll {
        selector: Option<String>,
        dx: i64,
        dy: i64,
    },
}

/// A viewport coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// Rectangle `[x1, y1, x2, y2]` as reported by the model. Ordering of the
/// corners is not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl BoundingBox {
    pub fn new(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Floor-division midpoint. Defined for every pair of corners.
    pub fn center(&self) -> Point {
        Point {
            x: midpoint(self.x1, self.x2),
            y: midpoint(self.y1, self.y2),
        }
    }

    /// Whether `x1 <= x2` and `y1 <= y2`.
    pub fn is_ordered(&self) -> bool {
        self.x1 <= self.x2 && self.y1 <= self.y2
    }
}

// The floor of the mean lies between the two inputs, so it always fits back into i64.
fn midpoint(a: i64, b: i64) -> i64 {
    (i128::from(a) + i128::from(b)).div_euclid(2) as i64
}

impl From<[i64; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [i64; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

/// Progress marker of one compilation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    LaunchSource,
    SearchAndDetect,
    IterateResults,
    Done,
}

impl WorkflowState {
    pub fn step(&self) -> Option<u8> {
        match self {
            WorkflowState::LaunchSource => Some(0),
            WorkflowState::SearchAndDetect => Some(1),
            WorkflowState::IterateResults => Some(2),
            WorkflowState::Done => None,
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkflowState::LaunchSource => "launch source",
            WorkflowState::SearchAndDetect => "search and detect results",
            WorkflowState::IterateResults => "iterate results",
            WorkflowState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Append-only descriptions gathered during one run, one per processed result.
#[derive(Debug, Clone, Default)]
pub struct ImageAnalysis {
    descriptions: Vec<String>,
}

impl ImageAnalysis {
    pub fn push(&mut self, description: impl Into<String>) {
        self.descriptions.push(description.into());
    }

    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }

    pub fn descriptions(&self) -> &[String] {
        &self.descriptions
    }

    pub fn into_descriptions(self) -> Vec<String> {
        self.descriptions
    }
}
