//! In-memory collaborators for exercising the agent without Chrome or a model.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::brain::Model;
use crate::hands::Driver;
use crate::types::{InputMessage, Point, ResponseItem, Screenshot};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Goto(String),
    Screenshot,
    Click(Point),
    Type(String),
    Press(String),
    Hover(String),
    Scroll(Option<String>, i64, i64),
    GoBack,
    WaitReady,
}

/// Records every call; all operations succeed unless configured otherwise.
#[derive(Default)]
pub struct RecordingDriver {
    pub calls: Mutex<Vec<Call>>,
    pub fail_screenshots: bool,
    pub fail_go_back: bool,
    pub fail_goto: bool,
}

impl RecordingDriver {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clicks(&self) -> Vec<Point> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Click(point) => Some(point),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Call) -> usize {
        self.calls().iter().filter(|call| *call == wanted).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    async fn goto(&self, url: &str) -> bool {
        self.record(Call::Goto(url.to_string()));
        !self.fail_goto
    }

    async fn screenshot(&self) -> Option<Screenshot> {
        self.record(Call::Screenshot);
        (!self.fail_screenshots).then(|| Screenshot::new(vec![0x89, b'P', b'N', b'G']))
    }

    async fn click(&self, x: i64, y: i64) -> bool {
        self.record(Call::Click(Point::new(x, y)));
        true
    }

    async fn type_text(&self, text: &str) -> bool {
        self.record(Call::Type(text.to_string()));
        true
    }

    async fn press(&self, key: &str) -> bool {
        self.record(Call::Press(key.to_string()));
        true
    }

    async fn hover(&self, selector: &str) -> bool {
        self.record(Call::Hover(selector.to_string()));
        true
    }

    async fn scroll(&self, selector: Option<&str>, dx: i64, dy: i64) -> bool {
        self.record(Call::Scroll(selector.map(String::from), dx, dy));
        true
    }

    async fn go_back(&self) -> Result<()> {
        self.record(Call::GoBack);
        if self.fail_go_back {
            return Err(Error::Browser("no history entry to go back to".into()));
        }
        Ok(())
    }

    async fn wait_until_ready(&self, _timeout: Duration) -> bool {
        self.record(Call::WaitReady);
        true
    }
}

/// Replays scripted replies in order, whichever model method is called.
/// Once the script runs out every call returns an empty output list.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<Vec<ResponseItem>>>>,
    queries: Mutex<Vec<Vec<InputMessage>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<Vec<ResponseItem>>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<Vec<InputMessage>> {
        self.queries.lock().unwrap().clone()
    }

    fn next(&self, input: Vec<InputMessage>) -> Result<Vec<ResponseItem>> {
        self.queries.lock().unwrap().push(input);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[async_trait]
impl Model for ScriptedModel {
    async fn computer_use(&self, input: Vec<InputMessage>) -> Result<Vec<ResponseItem>> {
        self.next(input)
    }

    async fn vision(&self, input: Vec<InputMessage>) -> Result<Vec<ResponseItem>> {
        self.next(input)
    }
}
