use crate::config::{BrowserSettings, TimingSettings};
use crate::error::BrowserError;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::instrument;

/// What the crawler needs from a live, rendered page.
///
/// A single page is driven strictly sequentially; no method is called while another is
/// in flight.
#[async_trait]
pub trait PageDriver: Send {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Resolves once `selector` matches, or fails with [`BrowserError::Timeout`].
    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError>;

    async fn click(&mut self, selector: &str) -> Result<(), BrowserError>;

    /// Waits until the document reports it has finished loading.
    async fn wait_for_load(&mut self, timeout: Duration) -> Result<(), BrowserError>;

    /// Trimmed text of the first element matching `selector`, if any.
    async fn text_of(&mut self, selector: &str) -> Result<Option<String>, BrowserError>;

    async fn scroll_height(&mut self) -> Result<u64, BrowserError>;

    async fn scroll_by(&mut self, pixels: u64) -> Result<(), BrowserError>;

    async fn scroll_to_top(&mut self) -> Result<(), BrowserError>;

    /// Serialized DOM of the current page.
    async fn content(&mut self) -> Result<String, BrowserError>;

    async fn close(&mut self) -> Result<(), BrowserError>;
}

pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    poll_interval: Duration,
}

impl ChromiumDriver {
    #[instrument(skip_all, fields(headless = settings.headless))]
    pub async fn launch(
        settings: &BrowserSettings,
        timing: &TimingSettings,
    ) -> Result<Self, BrowserError> {
        tracing::info!("Launching browser");
        let mut builder = BrowserConfig::builder();
        if !settings.headless {
            builder = builder.with_head();
        }
        if settings.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &settings.executable {
            builder = builder.chrome_executable(path);
        }
        for arg in &settings.args {
            builder = builder.arg(arg.as_str());
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "Browser handler stopped");
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        Ok(Self {
            browser,
            page,
            handler,
            poll_interval: TimingSettings::ms(timing.poll_interval_ms.max(50)),
        })
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T, BrowserError> {
        self.page
            .evaluate(script)
            .await?
            .into_value::<T>()
            .map_err(|e| BrowserError::Script(e.to_string()))
    }

    async fn selector_present(&self, selector: &str) -> Result<bool, BrowserError> {
        self.eval(format!("document.querySelector({}) !== null", js_string(selector)))
            .await
    }
}

/// Quotes a selector for embedding in a script.
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[async_trait]
impl PageDriver for ChromiumDriver {
    #[instrument(skip(self))]
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        self.page.goto(url).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.selector_present(selector).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    selector: selector.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn click(&mut self, selector: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::NoElement(selector.to_string()))?;
        element.click().await?;
        Ok(())
    }

    async fn wait_for_load(&mut self, timeout: Duration) -> Result<(), BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            let state: String = self.eval("document.readyState".to_string()).await?;
            if state == "complete" {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    selector: "document.readyState".to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn text_of(&mut self, selector: &str) -> Result<Option<String>, BrowserError> {
        let text: String = self
            .eval(format!(
                "(() => {{ const el = document.querySelector({}); return el ? (el.textContent || '').trim() : ''; }})()",
                js_string(selector)
            ))
            .await?;
        Ok(Some(text).filter(|t| !t.is_empty()))
    }

    async fn scroll_height(&mut self) -> Result<u64, BrowserError> {
        self.eval("document.body.scrollHeight".to_string()).await
    }

    async fn scroll_by(&mut self, pixels: u64) -> Result<(), BrowserError> {
        self.page
            .evaluate(format!("window.scrollBy(0, {pixels})"))
            .await?;
        Ok(())
    }

    async fn scroll_to_top(&mut self) -> Result<(), BrowserError> {
        self.page.evaluate("window.scrollTo(0, 0)").await?;
        Ok(())
    }

    async fn content(&mut self) -> Result<String, BrowserError> {
        Ok(self.page.content().await?)
    }

    #[instrument(skip(self))]
    async fn close(&mut self) -> Result<(), BrowserError> {
        let closed = self.browser.close().await;
        if let Err(e) = self.browser.wait().await {
            tracing::debug!(error = %e, "Browser process wait failed");
        }
        self.handler.abort();
        tracing::info!("Browser closed");
        closed.map(|_| ()).map_err(BrowserError::from)
    }
}
