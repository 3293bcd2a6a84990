use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("devtools protocol error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    #[error("timed out after {timeout:?} waiting for `{selector}`")]
    Timeout { selector: String, timeout: Duration },

    #[error("no element matches `{0}`")]
    NoElement(String),

    #[error("in-page script returned an unexpected value: {0}")]
    Script(String),
}

#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("pagination control for page {page} not found (`{selector}`)")]
    ControlNotFound { page: u32, selector: String },

    #[error("content did not change after navigating to page {page} ({attempts} checks)")]
    ContentUnchanged { page: u32, attempts: u32 },

    #[error("browser failure while navigating to page {page}: {source}")]
    Driver {
        page: u32,
        #[source]
        source: BrowserError,
    },
}

impl NavigationError {
    /// True when the listing is considered exhausted rather than the page broken.
    pub fn is_end_of_listing(&self) -> bool {
        !matches!(self, NavigationError::Driver { .. })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("batch of {size} exceeds the {max} operation limit")]
    BatchTooLarge { size: usize, max: usize },

    #[error("store misconfigured: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("invalid origin url: {0}")]
    Origin(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error(transparent)]
    Navigation(#[from] NavigationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
