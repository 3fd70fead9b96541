use async_trait::async_trait;
use headless_chrome::browser::tab::ModifierKey;
use headless_chrome::browser::tab::point::Point as TabPoint;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::types::Screenshot;
use crate::{Error, Result};

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(120);
const READY_POLL: Duration = Duration::from_millis(100);

/// Input primitives the agent needs from a browser.
///
/// Failures are reported as `false`/`None` and logged by the implementation;
/// only `go_back` surfaces an error so callers can pick a fallback.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn goto(&self, url: &str) -> bool;
    async fn screenshot(&self) -> Option<Screenshot>;
    async fn click(&self, x: i64, y: i64) -> bool;
    async fn type_text(&self, text: &str) -> bool;
    /// `key` may be a chord such as `Alt+Left`.
    async fn press(&self, key: &str) -> bool;
    async fn hover(&self, selector: &str) -> bool;
    async fn scroll(&self, selector: Option<&str>, dx: i64, dy: i64) -> bool;
    async fn go_back(&self) -> Result<()>;
    /// Wait until the page reports itself loaded, up to `timeout`.
    async fn wait_until_ready(&self, timeout: Duration) -> bool;
}

/// A key plus the modifiers held while pressing it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyChord {
    pub key: String,
    pub alt: bool,
    pub ctrl: bool,
    pub shift: bool,
    pub meta: bool,
}

impl KeyChord {
    /// Parse `Alt+Left`, `CTRL+a`, `Enter`, ... into a DOM key name and modifiers.
    pub fn parse(spec: &str) -> Self {
        let mut chord = KeyChord::default();
        let parts: Vec<&str> = spec.split('+').map(str::trim).collect();
        let (last, modifiers): (&str, &[&str]) = match parts.as_slice() {
            // "Ctrl++" or a lone "+" means the plus key itself.
            [rest @ .., "", ""] => ("+", rest),
            // "Alt+" presses the modifier on its own.
            [.., held, ""] => (*held, &parts[..parts.len() - 1]),
            [rest @ .., last] => (*last, rest),
            [] => ("", &parts[..]),
        };
        for modifier in modifiers {
            match modifier.to_lowercase().as_str() {
                "alt" | "option" => chord.alt = true,
                "ctrl" | "control" => chord.ctrl = true,
                "shift" => chord.shift = true,
                "meta" | "cmd" | "command" | "super" | "win" => chord.meta = true,
                other => debug!("Ignoring unknown modifier '{}'", other),
            }
        }
        chord.key = dom_key_name(last);
        chord
    }

    fn modifiers(&self) -> Vec<ModifierKey> {
        let mut modifiers = Vec::new();
        if self.alt {
            modifiers.push(ModifierKey::Alt);
        }
        if self.ctrl {
            modifiers.push(ModifierKey::Ctrl);
        }
        if self.shift {
            modifiers.push(ModifierKey::Shift);
        }
        if self.meta {
            modifiers.push(ModifierKey::Meta);
        }
        modifiers
    }
}

fn dom_key_name(key: &str) -> String {
    let named = match key.to_lowercase().as_str() {
        "left" | "arrowleft" => "ArrowLeft",
        "right" | "arrowright" => "ArrowRight",
        "up" | "arrowup" => "ArrowUp",
        "down" | "arrowdown" => "ArrowDown",
        "enter" | "return" => "Enter",
        "esc" | "escape" => "Escape",
        "tab" => "Tab",
        "space" => " ",
        "backspace" => "Backspace",
        "delete" | "del" => "Delete",
        "home" => "Home",
        "end" => "End",
        "pageup" => "PageUp",
        "pagedown" => "PageDown",
        "alt" | "option" => "Alt",
        "ctrl" | "control" => "Control",
        "shift" => "Shift",
        "meta" | "cmd" | "command" | "super" | "win" => "Meta",
        _ => return key.to_string(),
    };
    named.to_string()
}

/// How to obtain a Chrome instance.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    /// DevTools endpoint of an already running Chrome, e.g. `http://127.0.0.1:9222`.
    pub attach_url: Option<String>,
    pub chrome_path: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: false,
            attach_url: None,
            chrome_path: None,
            width: 1024,
            height: 768,
        }
    }
}

/// Chrome session driven through the DevTools protocol. The active tab is
/// re-resolved on every call: a newly opened page takes over, and a page
/// closed from outside falls back to the most recent remaining one.
pub struct BrowserSession {
    browser: Browser,
    pages: Mutex<Pages>,
}

struct Pages {
    active: Option<Arc<Tab>>,
    /// Target ids seen at the previous resolution.
    known: HashSet<String>,
}

impl BrowserSession {
    /// Attach or launch. Blocking; run it on a blocking thread.
    pub fn launch(options: &BrowserOptions) -> anyhow::Result<Self> {
        if let Some(attach_url) = &options.attach_url {
            info!("[Hands] Attaching to existing Chrome at {}...", attach_url);
            match Browser::connect(attach_url.clone()) {
                Ok(browser) => {
                    let existing = open_tabs(&browser).last().cloned();
                    let tab = match existing {
                        Some(tab) => tab,
                        None => browser.new_tab()?,
                    };
                    tab.set_default_timeout(NAVIGATION_TIMEOUT);
                    info!("[Hands] Attached to existing Chrome.");
                    return Ok(Self::with_active(browser, tab));
                }
                Err(e) => warn!("[Hands] Could not attach ({}). Launching instead.", e),
            }
        }

        let options = LaunchOptions {
            headless: options.headless,
            path: options.chrome_path.clone(),
            window_size: Some((options.width, options.height)),
            ignore_certificate_errors: true,
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-extensions"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-background-timer-throttling"),
                OsStr::new("--disable-backgrounding-occluded-windows"),
                OsStr::new("--disable-renderer-backgrounding"),
            ],
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };

        info!("[Hands] Starting Chrome (headless: {})...", options.headless);
        let browser = Browser::new(options)
            .map_err(|e| anyhow::anyhow!("Browser launch failed: {}", e))?;
        let tab = browser.new_tab()?;
        tab.set_default_timeout(NAVIGATION_TIMEOUT);
        tab.navigate_to("about:blank")?;
        info!("[Hands] Chrome ready.");

        Ok(Self::with_active(browser, tab))
    }

    fn with_active(browser: Browser, tab: Arc<Tab>) -> Self {
        let known = open_tabs(&browser)
            .iter()
            .map(|t| t.get_target_id().clone())
            .collect();
        Self {
            browser,
            pages: Mutex::new(Pages {
                active: Some(tab),
                known,
            }),
        }
    }

    /// The page to act on, following pages opened or closed since the last call.
    fn active_tab(&self) -> Option<Arc<Tab>> {
        let mut pages = match self.pages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let tabs = open_tabs(&self.browser);
        let open: Vec<&str> = tabs.iter().map(|t| t.get_target_id().as_str()).collect();
        let current = pages.active.as_ref().map(|t| t.get_target_id().clone());

        let picked = pick_target(current.as_deref(), &open, &pages.known).map(str::to_string);
        pages.known = open.iter().map(|id| id.to_string()).collect();

        let Some(picked) = picked else {
            warn!("[Hands] All pages have been closed.");
            pages.active = None;
            return None;
        };
        if current.as_deref() != Some(picked.as_str()) {
            info!("[Hands] Switching to page {}", picked);
        }
        let tab = tabs
            .into_iter()
            .find(|t| t.get_target_id().as_str() == picked.as_str());
        pages.active = tab.clone();
        tab
    }

    /// Run a blocking tab operation off the async runtime. `None` when there
    /// is no page or the operation failed; both are logged.
    async fn with_tab<T, F>(&self, op: &'static str, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&Arc<Tab>) -> anyhow::Result<T> + Send + 'static,
    {
        let Some(tab) = self.active_tab() else {
            warn!("[Hands] Cannot {}, no active page", op);
            return None;
        };
        match tokio::task::spawn_blocking(move || f(&tab)).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!("[Hands] {} failed: {:#}", op, e);
                None
            }
            Err(e) => {
                warn!("[Hands] {} panicked: {}", op, e);
                None
            }
        }
    }
}

fn open_tabs(browser: &Browser) -> Vec<Arc<Tab>> {
    match browser.get_tabs().lock() {
        Ok(tabs) => tabs.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Choose among `open` target ids (oldest first). The newest id missing from
/// `known` was opened since the last check and wins. Otherwise the current
/// page stays, or the most recent one replaces it when it was closed.
fn pick_target<'a>(
    current: Option<&str>,
    open: &[&'a str],
    known: &HashSet<String>,
) -> Option<&'a str> {
    if let Some(new_page) = open.iter().rev().find(|id| !known.contains(**id)) {
        return Some(*new_page);
    }
    if let Some(current) = current {
        if let Some(id) = open.iter().find(|id| **id == current) {
            return Some(*id);
        }
        info!("[Hands] Page closed; selecting the most recent remaining page.");
    }
    open.last().copied()
}

/// Id of the history entry before the current one.
fn previous_entry<T: Copy>(current_index: usize, entry_ids: &[T]) -> Option<T> {
    current_index
        .checked_sub(1)
        .and_then(|idx| entry_ids.get(idx))
        .copied()
}

#[async_trait]
impl Driver for BrowserSession {
    async fn goto(&self, url: &str) -> bool {
        let url = url.to_string();
        self.with_tab("navigate", move |tab| {
            tab.navigate_to(&url)?;
            tab.wait_until_navigated()?;
            info!("[Hands] Page loaded: {}", tab.get_url());
            Ok(())
        })
        .await
        .is_some()
    }

    async fn screenshot(&self) -> Option<Screenshot> {
        self.with_tab("screenshot", |tab| {
            let png = tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)?;
            Ok(Screenshot::new(png))
        })
        .await
    }

    async fn click(&self, x: i64, y: i64) -> bool {
        self.with_tab("click", move |tab| {
            tab.click_point(TabPoint {
                x: x as f64,
                y: y as f64,
            })?;
            debug!("[Hands] Clicked at ({}, {})", x, y);
            Ok(())
        })
        .await
        .is_some()
    }

    async fn type_text(&self, text: &str) -> bool {
        let text = text.to_string();
        self.with_tab("type", move |tab| {
            tab.type_str(&text)?;
            Ok(())
        })
        .await
        .is_some()
    }

    async fn press(&self, key: &str) -> bool {
        let chord = KeyChord::parse(key);
        self.with_tab("press key", move |tab| {
            let modifiers = chord.modifiers();
            if modifiers.is_empty() {
                tab.press_key(&chord.key)?;
            } else {
                tab.press_key_with_modifiers(&chord.key, Some(modifiers.as_slice()))?;
            }
            Ok(())
        })
        .await
        .is_some()
    }

    async fn hover(&self, selector: &str) -> bool {
        let selector = selector.to_string();
        self.with_tab("hover", move |tab| {
            tab.find_element(&selector)?.move_mouse_over()?;
            Ok(())
        })
        .await
        .is_some()
    }

    async fn scroll(&self, selector: Option<&str>, dx: i64, dy: i64) -> bool {
        let script = match selector {
            Some(selector) => format!(
                "(() => {{ const el = document.querySelector({}); if (el) el.scrollBy({dx}, {dy}); return !!el; }})()",
                serde_json::Value::String(selector.to_string())
            ),
            None => format!("(() => {{ window.scrollBy({dx}, {dy}); return true; }})()"),
        };
        self.with_tab("scroll", move |tab| {
            tab.evaluate(&script, false)?;
            Ok(())
        })
        .await
        .is_some()
    }

    async fn go_back(&self) -> Result<()> {
        let Some(tab) = self.active_tab() else {
            return Err(Error::NoActivePage);
        };
        tokio::task::spawn_blocking(move || {
            let browser_error = |e: anyhow::Error| Error::Browser(e.to_string());
            let history = tab
                .call_method(Page::GetNavigationHistory(None))
                .map_err(browser_error)?;
            let entry_ids: Vec<_> = history.entries.iter().map(|entry| entry.id).collect();
            let Some(entry_id) = previous_entry(history.current_index as usize, &entry_ids) else {
                return Err(Error::Browser("no history entry to go back to".into()));
            };
            tab.call_method(Page::NavigateToHistoryEntry { entry_id })
                .map_err(browser_error)?;
            tab.wait_until_navigated().map_err(browser_error)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Browser(e.to_string()))?
    }

    async fn wait_until_ready(&self, timeout: Duration) -> bool {
        self.with_tab("wait for page", move |tab| {
            let deadline = Instant::now() + timeout;
            loop {
                let state = tab
                    .evaluate("document.readyState", false)?
                    .value
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_default();
                if state == "complete" {
                    return Ok(true);
                }
                if Instant::now() >= deadline {
                    debug!("[Hands] Page still '{}' after {:?}", state, timeout);
                    return Ok(false);
                }
                std::thread::sleep(READY_POLL);
            }
        })
        .await
        .unwrap_or(false)
    }
}
