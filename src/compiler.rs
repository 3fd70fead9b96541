use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::actions::ActionHandler;
use crate::blocklist::Blocklist;
use crate::brain::Model;
use crate::config::{Config, Pacing};
use crate::confirm::ConfirmationLoop;
use crate::hands::Driver;
use crate::parsers;
use crate::report;
use crate::types::{ImageAnalysis, InputMessage, Point, WorkflowState};
use crate::{Error, Result};

const SEARCH_BOX_PROMPT: &str =
    "Please click on the search box on this page so I can type a search query.";

const DETECTION_PROMPT: &str = "Have the search results appeared in this screenshot?

Please respond with:
1. 'yes' or 'no' to indicate if search results are visible
2. If yes, provide the rectangle coordinates for each image shown in the search results in the format: [x1,y1,x2,y2] where (x1,y1) is top-left and (x2,y2) is bottom-right

Format your response as:
Answer: yes/no
Image coordinates: [[x1,y1,x2,y2], [x1,y1,x2,y2], ...]

You may instead answer with a JSON object: {\"visible\": true, \"boxes\": [[x1,y1,x2,y2], ...]}

If no search results are visible, just respond with 'no'.";

const NO_DESCRIPTION: &str = "No description available";

fn description_prompt(query: &str) -> String {
    format!(
        "Please provide a title for the fashion trend observed in this image, followed by a detailed description. \
Start your response with 'Title: [trend name]' then describe the content of this page in a concise manner, \
focusing on the trends and fashion elements visible. \
The user is specifically looking for trends related to: '{query}'. \
Please highlight any elements that are relevant to this search query."
    )
}

/// Progress notifications published while a compilation runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CompilerEvent {
    StateChanged { state: WorkflowState },
    ResultDescribed { number: usize, description: String },
    Finished { report: String },
}

/// Outcome of one compilation run.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub query: String,
    /// Every state entered, in order, ending with `Done`.
    pub states: Vec<WorkflowState>,
    pub centers: Vec<Point>,
    pub analyses: ImageAnalysis,
    pub report: String,
}

/// Drives the source site through launch, search and per-result description.
pub struct Compiler {
    driver: Arc<dyn Driver>,
    model: Arc<dyn Model>,
    actions: ActionHandler,
    confirmation: ConfirmationLoop,
    source_url: String,
    max_pages: usize,
    pacing: Pacing,
    events: Option<broadcast::Sender<CompilerEvent>>,
}

impl Compiler {
    pub fn new(config: &Config, driver: Arc<dyn Driver>, model: Arc<dyn Model>) -> Self {
        let blocklist = Blocklist::with_extra(&config.blocked_domains);
        Self {
            actions: ActionHandler::new(driver.clone(), blocklist),
            confirmation: ConfirmationLoop::new(driver.clone(), model.clone(), &config.pacing),
            driver,
            model,
            source_url: config.web_crawl_url.clone(),
            max_pages: config.max_pages_for_crawling,
            pacing: config.pacing.clone(),
            events: None,
        }
    }

    /// Publish progress on `events` as the run advances.
    pub fn with_events(mut self, events: broadcast::Sender<CompilerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: CompilerEvent) {
        if let Some(events) = &self.events {
            // No subscribers is fine.
            let _ = events.send(event);
        }
    }

    /// Run the workflow to completion. Never fails: an error in any state
    /// ends the run, and the report covers whatever was collected.
    pub async fn compile(&self, query: &str) -> Compilation {
        info!("Starting trends compilation for query: '{}'", query);

        let mut state = WorkflowState::LaunchSource;
        let mut states = Vec::new();
        let mut centers = Vec::new();
        let mut analyses = ImageAnalysis::default();

        loop {
            states.push(state);
            self.emit(CompilerEvent::StateChanged { state });

            let next = match state {
                WorkflowState::LaunchSource => self
                    .launch_source()
                    .await
                    .map(|()| WorkflowState::SearchAndDetect),
                WorkflowState::SearchAndDetect => match self.search_and_detect(query).await {
                    Ok(found) if found.is_empty() => {
                        info!("No result coordinates found, ending compilation");
                        Ok(WorkflowState::Done)
                    }
                    Ok(found) => {
                        centers = found;
                        Ok(WorkflowState::IterateResults)
                    }
                    Err(e) => Err(e),
                },
                WorkflowState::IterateResults => {
                    self.iterate_results(query, &centers, &mut analyses).await;
                    Ok(WorkflowState::Done)
                }
                WorkflowState::Done => break,
            };

            state = match next {
                Ok(next) => next,
                Err(e) => {
                    warn!("Error in step '{}': {}", state, e);
                    WorkflowState::Done
                }
            };
        }

        let report =
            report::generate_report(self.model.as_ref(), query, analyses.descriptions()).await;
        info!("Compilation finished with {} description(s)", analyses.len());
        self.emit(CompilerEvent::Finished {
            report: report.clone(),
        });

        Compilation {
            query: query.to_string(),
            states,
            centers,
            analyses,
            report,
        }
    }

    async fn launch_source(&self) -> Result<()> {
        info!("Launching source: {}", self.source_url);
        if !self.driver.goto(&self.source_url).await {
            return Err(Error::Browser(format!(
                "navigation to {} failed",
                self.source_url
            )));
        }
        self.settle().await;
        self.driver
            .screenshot()
            .await
            .ok_or_else(|| Error::Browser("no screenshot of the landing page".into()))?;
        Ok(())
    }

    async fn search_and_detect(&self, query: &str) -> Result<Vec<Point>> {
        self.click_search_box().await?;

        info!("Typing query: {}", query);
        self.driver.type_text(query).await;
        self.driver.press("Enter").await;
        self.settle().await;

        info!("Search submitted, waiting for results");
        let boxes = self.confirmation.detect_condition(DETECTION_PROMPT).await;
        let centers = parsers::calculate_centers(&boxes);
        info!("Stored {} center coordinates", centers.len());
        Ok(centers)
    }

    async fn click_search_box(&self) -> Result<()> {
        let screenshot = self
            .driver
            .screenshot()
            .await
            .ok_or_else(|| Error::Browser("no screenshot for locating the search box".into()))?;
        let items = self
            .model
            .computer_use(vec![InputMessage::user_with_screenshot(
                SEARCH_BOX_PROMPT,
                &screenshot,
            )])
            .await?;

        for item in &items {
            let followups = self.actions.handle_item(item).await;
            if !followups.is_empty() {
                debug!("Dropping {} follow-up message(s) while searching", followups.len());
            }
        }
        self.settle().await;
        Ok(())
    }

    async fn iterate_results(&self, query: &str, centers: &[Point], analyses: &mut ImageAnalysis) {
        let total = self.max_pages.min(centers.len());
        info!("Processing {} result(s)", total);

        for (idx, center) in centers.iter().take(total).enumerate() {
            let number = idx + 1;
            match self.process_result(number, *center, query).await {
                Ok(description) => {
                    info!("Result {} description: {}", number, description);
                    analyses.push(description.clone());
                    self.emit(CompilerEvent::ResultDescribed {
                        number,
                        description,
                    });
                }
                Err(e) => {
                    warn!("Error processing result {}: {}", number, e);
                    return;
                }
            }
        }
        info!("All result pages processed");
    }

    async fn process_result(&self, number: usize, center: Point, query: &str) -> Result<String> {
        info!("Clicking on result {} at ({}, {})", number, center.x, center.y);
        self.driver.click(center.x, center.y).await;
        self.settle().await;

        let screenshot = self
            .driver
            .screenshot()
            .await
            .ok_or_else(|| Error::Browser(format!("no screenshot of result {number}")))?;

        let items = self
            .model
            .vision(vec![InputMessage::user_with_screenshot(
                description_prompt(query),
                &screenshot,
            )])
            .await?;
        let description = parsers::first_text(&items)
            .unwrap_or(NO_DESCRIPTION)
            .to_string();

        self.return_to_results(number).await;
        Ok(description)
    }

    async fn return_to_results(&self, number: usize) {
        debug!("Going back to results from result {}", number);
        if let Err(e) = self.driver.go_back().await {
            warn!("Back navigation failed ({}), using Alt+Left", e);
            self.driver.press("Alt+Left").await;
        }
        self.settle().await;
    }

    async fn settle(&self) {
        if !self.driver.wait_until_ready(self.pacing.ready_timeout).await {
            debug!("Page not ready after {:?}", self.pacing.ready_timeout);
        }
        tokio::time::sleep(self.pacing.settle).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, RecordingDriver, ScriptedModel};
    use crate::types::{ActionDescriptor, ResponseItem};
    use serde_json::json;

    const TWO_RESULTS: &str = "Answer: yes\nImage coordinates: [[0,0,100,100],[200,0,300,100]]";
    const EDGE_RESULT: &str =
        "Answer: yes\nImage coordinates: [[9223372036854775807,0,9223372036854775807,0]]";

    fn config(max_pages: usize) -> Config {
        Config {
            max_pages_for_crawling: max_pages,
            pacing: Pacing::immediate(),
            ..Config::default()
        }
    }

    fn search_box_click() -> Result<Vec<ResponseItem>> {
        Ok(vec![ResponseItem::computer_call(ActionDescriptor::new(
            "click",
            json!({"x": 100, "y": 200}),
        ))])
    }

    fn reply(text: &str) -> Result<Vec<ResponseItem>> {
        Ok(vec![ResponseItem::message(text)])
    }

    #[tokio::test]
    async fn test_end_to_end_run() {
        let driver = Arc::new(RecordingDriver::default());
        let model = Arc::new(ScriptedModel::new(vec![
            search_box_click(),
            reply(TWO_RESULTS),
            reply("Title: Fringe\nSuede fringe jackets."),
            reply("Title: Crochet\nHand-made crochet tops."),
            reply("Earthy palettes dominate."),
        ]));
        let compiler = Compiler::new(&config(2), driver.clone(), model.clone());

        let run = compiler.compile("boho summer").await;

        assert_eq!(
            run.states,
            vec![
                WorkflowState::LaunchSource,
                WorkflowState::SearchAndDetect,
                WorkflowState::IterateResults,
                WorkflowState::Done,
            ]
        );
        assert_eq!(run.centers, vec![Point::new(50, 50), Point::new(250, 50)]);
        assert_eq!(
            driver.clicks(),
            vec![Point::new(100, 200), Point::new(50, 50), Point::new(250, 50)]
        );
        assert_eq!(run.analyses.len(), 2);
        assert_eq!(run.analyses.descriptions()[0], "Title: Fringe\nSuede fringe jackets.");

        let calls = driver.calls();
        assert_eq!(calls[0], Call::Goto(config(2).web_crawl_url));
        assert!(calls.contains(&Call::Type("boho summer".into())));
        assert!(calls.contains(&Call::Press("Enter".into())));
        assert_eq!(driver.count(&Call::GoBack), 2);
        assert_eq!(driver.count(&Call::Press("Alt+Left".into())), 0);

        let queries = model.queries();
        assert_eq!(queries.len(), 5);
        assert!(queries[2][0].text().contains("'boho summer'"));
        assert!(run.report.contains("## Image 2 Analysis"));
        assert!(run.report.contains("Earthy palettes dominate."));
    }

    #[tokio::test]
    async fn test_max_pages_above_available_results() {
        let driver = Arc::new(RecordingDriver::default());
        let model = Arc::new(ScriptedModel::new(vec![
            search_box_click(),
            reply(TWO_RESULTS),
            reply("Title: A"),
            reply("Title: B"),
        ]));
        let run = Compiler::new(&config(5), driver.clone(), model)
            .compile("linen")
            .await;

        assert_eq!(driver.clicks().len(), 3);
        assert_eq!(run.analyses.len(), 2);
        assert_eq!(run.states.last(), Some(&WorkflowState::Done));
    }

    #[tokio::test]
    async fn test_no_results_ends_after_detection() {
        let driver = Arc::new(RecordingDriver::default());
        let model = Arc::new(ScriptedModel::new(vec![search_box_click()]));
        let run = Compiler::new(&config(2), driver.clone(), model.clone())
            .compile("linen")
            .await;

        assert_eq!(
            run.states,
            vec![
                WorkflowState::LaunchSource,
                WorkflowState::SearchAndDetect,
                WorkflowState::Done,
            ]
        );
        assert_eq!(driver.clicks(), vec![Point::new(100, 200)]);
        assert_eq!(run.report, report::NO_DATA_REPORT);
        // one search-box query plus ten detection rounds
        assert_eq!(model.queries().len(), 11);
    }

    #[tokio::test]
    async fn test_extreme_coordinates_do_not_abort_run() {
        let driver = Arc::new(RecordingDriver::default());
        let model = Arc::new(ScriptedModel::new(vec![
            search_box_click(),
            reply(EDGE_RESULT),
            reply("Title: Edge"),
        ]));
        let run = Compiler::new(&config(2), driver.clone(), model)
            .compile("linen")
            .await;

        assert_eq!(run.centers, vec![Point::new(i64::MAX, 0)]);
        assert_eq!(run.analyses.len(), 1);
        assert_eq!(run.states.last(), Some(&WorkflowState::Done));
    }

    #[tokio::test]
    async fn test_failed_navigation_forces_done() {
        let driver = Arc::new(RecordingDriver {
            fail_goto: true,
            ..Default::default()
        });
        let model = Arc::new(ScriptedModel::default());
        let run = Compiler::new(&config(2), driver.clone(), model.clone())
            .compile("linen")
            .await;

        assert_eq!(
            run.states,
            vec![WorkflowState::LaunchSource, WorkflowState::Done]
        );
        assert!(model.queries().is_empty());
        assert_eq!(run.report, report::NO_DATA_REPORT);
    }

    #[tokio::test]
    async fn test_back_navigation_falls_back_to_alt_left() {
        let driver = Arc::new(RecordingDriver {
            fail_go_back: true,
            ..Default::default()
        });
        let model = Arc::new(ScriptedModel::new(vec![
            search_box_click(),
            reply(TWO_RESULTS),
            reply("Title: A"),
            reply("Title: B"),
        ]));
        let run = Compiler::new(&config(2), driver.clone(), model)
            .compile("linen")
            .await;

        assert_eq!(run.analyses.len(), 2);
        assert_eq!(driver.count(&Call::Press("Alt+Left".into())), 2);
    }

    #[tokio::test]
    async fn test_description_error_aborts_iteration() {
        let driver = Arc::new(RecordingDriver::default());
        let model = Arc::new(ScriptedModel::new(vec![
            search_box_click(),
            reply(TWO_RESULTS),
            Err(Error::Api {
                status: 500,
                message: "overloaded".into(),
            }),
        ]));
        let run = Compiler::new(&config(2), driver.clone(), model)
            .compile("linen")
            .await;

        assert_eq!(driver.clicks(), vec![Point::new(100, 200), Point::new(50, 50)]);
        assert!(run.analyses.is_empty());
        assert_eq!(run.states.last(), Some(&WorkflowState::Done));
        assert_eq!(run.report, report::NO_DATA_REPORT);
    }

    #[tokio::test]
    async fn test_empty_description_gets_placeholder() {
        let driver = Arc::new(RecordingDriver::default());
        let model = Arc::new(ScriptedModel::new(vec![
            search_box_click(),
            reply("Answer: yes\nImage coordinates: [[0,0,10,10]]"),
            Ok(vec![ResponseItem::Other]),
        ]));
        let run = Compiler::new(&config(2), driver, model).compile("linen").await;
        assert_eq!(run.analyses.descriptions(), [NO_DESCRIPTION.to_string()]);
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let (tx, mut rx) = broadcast::channel(32);
        let driver = Arc::new(RecordingDriver::default());
        let model = Arc::new(ScriptedModel::new(vec![
            search_box_click(),
            reply("Answer: yes\nImage coordinates: [[0,0,10,10]]"),
            reply("Title: A"),
        ]));
        let run = Compiler::new(&config(2), driver, model)
            .with_events(tx)
            .compile("linen")
            .await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events[..3],
            [
                CompilerEvent::StateChanged {
                    state: WorkflowState::LaunchSource
                },
                CompilerEvent::StateChanged {
                    state: WorkflowState::SearchAndDetect
                },
                CompilerEvent::StateChanged {
                    state: WorkflowState::IterateResults
                },
            ]
        );
        assert_eq!(
            events[3],
            CompilerEvent::ResultDescribed {
                number: 1,
                description: "Title: A".into()
            }
        );
        assert_eq!(
            events.last(),
            Some(&CompilerEvent::Finished { report: run.report })
        );
    }
}
