use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::brain::Model;
use crate::config::Pacing;
use crate::hands::Driver;
use crate::parsers;
use crate::types::{BoundingBox, InputMessage};

/// Polls screenshot-plus-question rounds until the model confirms a visual
/// condition or the attempt budget runs out.
pub struct ConfirmationLoop {
    driver: Arc<dyn Driver>,
    model: Arc<dyn Model>,
    max_attempts: u32,
    interval: Duration,
}

/// What one round learned.
enum Round {
    NoSignal,
    Unconfirmed,
    Confirmed(Vec<BoundingBox>),
}

impl ConfirmationLoop {
    pub fn new(driver: Arc<dyn Driver>, model: Arc<dyn Model>, pacing: &Pacing) -> Self {
        Self {
            driver,
            model,
            max_attempts: pacing.confirm_attempts,
            interval: pacing.confirm_interval,
        }
    }

    /// Ask `prompt` against fresh screenshots. Returns the boxes of the first
    /// confirming answer, which may be empty, or empty after exhaustion.
    pub async fn detect_condition(&self, prompt: &str) -> Vec<BoundingBox> {
        self.run(prompt).await.unwrap_or_default()
    }

    /// Same rounds as [`detect_condition`](Self::detect_condition) but only
    /// reports whether the condition was ever confirmed.
    pub async fn confirm(&self, prompt: &str) -> bool {
        self.run(prompt).await.is_some()
    }

    async fn run(&self, prompt: &str) -> Option<Vec<BoundingBox>> {
        for attempt in 1..=self.max_attempts {
            debug!("Confirmation attempt {}/{}", attempt, self.max_attempts);
            match self.round(prompt).await {
                Round::Confirmed(boxes) => {
                    info!("Condition confirmed with {} region(s)", boxes.len());
                    return Some(boxes);
                }
                // Empty answer: retry right away.
                Round::NoSignal => continue,
                Round::Unconfirmed => {
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.interval).await;
                    }
                }
            }
        }
        warn!("Condition not confirmed after {} attempts", self.max_attempts);
        None
    }

    async fn round(&self, prompt: &str) -> Round {
        let Some(screenshot) = self.driver.screenshot().await else {
            warn!("No screenshot available for confirmation");
            return Round::Unconfirmed;
        };

        let items = match self
            .model
            .computer_use(vec![InputMessage::user_with_screenshot(prompt, &screenshot)])
            .await
        {
            Ok(items) => items,
            Err(e) => {
                warn!("Model query failed during confirmation: {}", e);
                return Round::Unconfirmed;
            }
        };

        let Some(text) = parsers::first_text(&items) else {
            return Round::NoSignal;
        };
        debug!("Confirmation answer: {}", text);

        if let Some(detection) = parsers::parse_structured_detection(text) {
            return if detection.visible {
                Round::Confirmed(detection.bounding_boxes())
            } else {
                Round::Unconfirmed
            };
        }

        if parsers::check_for_search_results(text) {
            Round::Confirmed(parsers::extract_coordinates(text))
        } else {
            Round::Unconfirmed
        }
    }
}
