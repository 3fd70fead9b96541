use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::blocklist::Blocklist;
use crate::hands::Driver;
use crate::parsers;
use crate::types::{Action, ActionDescriptor, InputMessage, ResponseItem};
use crate::Result;

const SAVE_CONFIRMATION: &str = "Yes, please save the form by clicking the save button";

/// Applies model output items to the browser.
pub struct ActionHandler {
    driver: Arc<dyn Driver>,
    blocklist: Blocklist,
}

impl ActionHandler {
    pub fn new(driver: Arc<dyn Driver>, blocklist: Blocklist) -> Self {
        Self { driver, blocklist }
    }

    /// Handle one output item. Returns follow-up messages for the model, if
    /// any. Never fails: a bad action is logged and skipped.
    pub async fn handle_item(&self, item: &ResponseItem) -> Vec<InputMessage> {
        match item {
            ResponseItem::Message { .. } => self.handle_message(item).await,
            ResponseItem::ComputerCall { action, .. } => {
                self.handle_computer_call(action).await;
                Vec::new()
            }
            ResponseItem::McpListTools { .. } | ResponseItem::Other => Vec::new(),
        }
    }

    async fn handle_message(&self, item: &ResponseItem) -> Vec<InputMessage> {
        let text = parsers::extract_text_content(item);
        if text.is_empty() {
            return Vec::new();
        }
        info!("Message: {}", text);

        if let Some(point) = parsers::extract_coordinates_from_message(text) {
            info!("Clicking coordinates found in message: ({}, {})", point.x, point.y);
            self.driver.click(point.x, point.y).await;
            self.driver.screenshot().await;
            return Vec::new();
        }

        if is_save_request(text) {
            info!("Answering save prompt with a confirmation");
            return vec![InputMessage::user(SAVE_CONFIRMATION)];
        }

        Vec::new()
    }

    async fn handle_computer_call(&self, action: &ActionDescriptor) {
        match self.execute(action).await {
            Ok(()) => {
                self.driver.screenshot().await;
            }
            Err(e) => warn!("Error performing action '{}': {}", action.kind, e),
        }
    }

    /// Decode and perform one action. Errors on unknown kinds, missing
    /// required arguments and blocklisted navigation.
    pub async fn execute(&self, descriptor: &ActionDescriptor) -> Result<()> {
        let action = descriptor.decode()?;
        debug!("Executing {:?}", action);
        let ok = match action {
            Action::Click { x: Some(x), y: Some(y) } => self.driver.click(x, y).await,
            Action::Click { .. } => {
                warn!("Click action missing coordinates: {:?}", descriptor.arguments);
                true
            }
            Action::Type { text } => self.driver.type_text(&text).await,
            Action::Press { key } => self.driver.press(&key).await,
            Action::Hover { selector } => self.driver.hover(&selector).await,
            Action::Screenshot => self.driver.screenshot().await.is_some(),
            Action::Goto { url } => {
                self.blocklist.check(&url)?;
                self.driver.goto(&url).await
            }
            Action::Scroll { selector, dx, dy } => {
                self.driver.scroll(selector.as_deref(), dx, dy).await
            }
        };
        if !ok {
            debug!("Browser reported failure for '{}'", descriptor.kind);
        }
        Ok(())
    }
}

fn is_save_request(text: &str) -> bool {
    text.to_lowercase().contains("save")
}
