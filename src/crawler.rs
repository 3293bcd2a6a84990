use crate::browser::{ChromiumDriver, PageDriver};
use crate::config::{AppSettings, TimingSettings};
use crate::error::CrawlError;
use crate::extract::ListingExtractor;
use crate::pagination::{DanawaPager, Paginator};
use crate::state::RunState;
use crate::store::{open_store, DocumentStore};
use crate::writer::BatchWriter;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// What the caller gets back from a run, success or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlReport {
    pub success: bool,
    pub total_products: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlPhase {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Why the page loop stopped.
#[derive(Debug)]
enum Stop {
    TargetReached,
    EndOfListing { page: u32, reason: String },
}

pub struct Crawler {
    settings: AppSettings,
    extractor: ListingExtractor,
    paginator: Paginator,
    store: Arc<dyn DocumentStore>,
    phase: CrawlPhase,
}

impl Crawler {
    pub fn new(settings: AppSettings, store: Arc<dyn DocumentStore>) -> Result<Self, CrawlError> {
        let extractor = ListingExtractor::new(&settings.site, &settings.selectors)?;
        let layout = DanawaPager::new(&settings.site, &settings.selectors);
        let paginator = Paginator::new(
            Box::new(layout),
            &settings.selectors.first_name,
            &settings.timing,
        );
        Ok(Self {
            settings,
            extractor,
            paginator,
            store,
            phase: CrawlPhase::Idle,
        })
    }

    pub fn phase(&self) -> CrawlPhase {
        self.phase
    }

    /// Runs one crawl on an already-open browser page. The driver is closed before returning.
    #[instrument(skip(self, driver))]
    pub async fn run<D: PageDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        target_count: usize,
        start_page: u32,
    ) -> CrawlReport {
        let start = Instant::now();
        let start_page = start_page.max(1);
        self.phase = CrawlPhase::Running;
        tracing::info!("Starting crawl");

        let mut writer = BatchWriter::new(self.store.clone(), self.settings.batch_size());
        let outcome = self
            .crawl(driver, &mut writer, target_count, start_page)
            .await;

        // Whatever the loop collected is still flushed.
        let flushed = match &outcome {
            Ok(_) => {
                tracing::info!(pending = writer.pending(), "Flushing final batch");
                writer.flush().await.map_err(CrawlError::from)
            }
            Err(_) => {
                if writer.pending() > 0 {
                    tracing::warn!(pending = writer.pending(), "Discarding unsaved records after failure");
                }
                Ok(())
            }
        };

        if let Err(e) = driver.close().await {
            tracing::warn!(error = %e, "Failed to close browser");
        }

        let report = match outcome.and_then(|stop| flushed.map(|_| stop)) {
            Ok(Stop::TargetReached) => CrawlReport {
                success: true,
                total_products: writer.committed(),
                message: format!(
                    "Target reached: collected {} products from {}",
                    writer.committed(),
                    self.settings.site.source_tag
                ),
            },
            Ok(Stop::EndOfListing { page, reason }) => CrawlReport {
                success: true,
                total_products: writer.committed(),
                message: format!(
                    "Listing ended at page {page} ({reason}): collected {} products",
                    writer.committed()
                ),
            },
            Err(e) => CrawlReport {
                success: false,
                total_products: writer.committed(),
                message: format!("Crawl failed: {e}"),
            },
        };

        self.phase = if report.success {
            CrawlPhase::Completed
        } else {
            CrawlPhase::Failed
        };
        tracing::info!(
            success = report.success,
            total = report.total_products,
            batches = writer.batches(),
            duration = ?start.elapsed(),
            "Crawl finished"
        );
        report
    }

    async fn crawl<D: PageDriver + ?Sized>(
        &self,
        driver: &mut D,
        writer: &mut BatchWriter,
        target_count: usize,
        start_page: u32,
    ) -> Result<Stop, CrawlError> {
        let timing = &self.settings.timing;

        driver.goto(&self.settings.site.base_url).await?;
        tracing::info!(url = %self.settings.site.base_url, "Listing loaded");

        let stored = self.store.fetch_keys().await?;
        tracing::info!(existing = stored.len(), "Loaded existing product keys");
        let mut state = RunState::new(stored, 1);

        let mut page = start_page;
        let mut consecutive_failures = 0;

        loop {
            if state.collected().len() >= target_count {
                tracing::info!(collected = state.collected().len(), "Target reached");
                return Ok(Stop::TargetReached);
            }

            let navigated = if state.current_page() == page {
                Ok(())
            } else {
                self.paginator
                    .advance_to(driver, state.current_page(), page)
                    .await
                    .map(|()| state.landed_on(page))
            };

            let harvested = match navigated {
                Err(e) if e.is_end_of_listing() => {
                    tracing::warn!(page, error = %e, "Pagination stopped; treating as end of listing");
                    return Ok(Stop::EndOfListing {
                        page,
                        reason: e.to_string(),
                    });
                }
                Err(e) => Err(CrawlError::from(e)),
                Ok(()) => self.harvest_page(driver, &mut state, writer, page).await,
            };

            match harvested {
                Ok(()) => consecutive_failures = 0,
                Err(e @ CrawlError::Store(_)) => return Err(e),
                Err(e) => {
                    if self.skip_page(page, &e, &mut consecutive_failures) {
                        return Ok(Stop::EndOfListing {
                            page,
                            reason: "too many consecutive page failures".to_string(),
                        });
                    }
                    page += 1;
                    tokio::time::sleep(TimingSettings::ms(timing.error_backoff_ms)).await;
                    continue;
                }
            }

            if state.collected().len() >= target_count {
                tracing::info!(collected = state.collected().len(), "Target reached");
                return Ok(Stop::TargetReached);
            }

            page += 1;
            tokio::time::sleep(self.page_delay()).await;
        }
    }

    /// Logs an unexpected page failure; true once the failure budget is exhausted.
    fn skip_page(&self, page: u32, error: &CrawlError, consecutive: &mut u32) -> bool {
        *consecutive += 1;
        tracing::error!(page, error = %error, consecutive = *consecutive, "Page processing failed; moving on");
        *consecutive >= self.settings.crawl.max_consecutive_page_failures.max(1)
    }

    #[instrument(skip(self, driver, state, writer))]
    async fn harvest_page<D: PageDriver + ?Sized>(
        &self,
        driver: &mut D,
        state: &mut RunState,
        writer: &mut BatchWriter,
        page: u32,
    ) -> Result<(), CrawlError> {
        let timing = &self.settings.timing;
        driver
            .wait_for_selector(
                &self.settings.selectors.card,
                TimingSettings::ms(timing.card_timeout_ms),
            )
            .await?;

        self.materialize_lazy_content(driver).await?;

        let html = driver.content().await?;
        let extracted = self.extractor.extract(&html, page);
        let found = extracted.len();
        let accepted = state.admit(extracted);

        tracing::info!(
            page,
            extracted = found,
            accepted = accepted.len(),
            duplicates = found - accepted.len(),
            total = state.collected().len(),
            known = state.known_keys().len(),
            "Processed page"
        );

        for record in accepted {
            writer.push(record).await?;
        }
        Ok(())
    }

    /// Scrolls to the bottom in steps and back to the top so lazily rendered cards exist.
    async fn materialize_lazy_content<D: PageDriver + ?Sized>(
        &self,
        driver: &mut D,
    ) -> Result<(), CrawlError> {
        let timing = &self.settings.timing;
        let step = timing.scroll_step_px.max(1);
        let height = driver.scroll_height().await?;

        let mut scrolled = 0;
        while scrolled < height {
            driver.scroll_by(step).await?;
            scrolled += step;
            tokio::time::sleep(TimingSettings::ms(timing.scroll_interval_ms)).await;
        }
        tokio::time::sleep(TimingSettings::ms(timing.after_scroll_ms)).await;

        driver.scroll_to_top().await?;
        tokio::time::sleep(TimingSettings::ms(timing.top_settle_ms)).await;
        Ok(())
    }

    fn page_delay(&self) -> Duration {
        let timing = &self.settings.timing;
        let min = timing.page_delay_min_ms;
        let max = timing.page_delay_max_ms.max(min);
        TimingSettings::ms(rand::rng().random_range(min..=max))
    }
}

/// Launches a browser, crawls the configured listing and persists new products.
#[instrument(skip(settings))]
pub async fn run_crawl(settings: AppSettings, target_count: usize, start_page: u32) -> CrawlReport {
    let failed = |message: String| CrawlReport {
        success: false,
        total_products: 0,
        message,
    };

    let store = match open_store(&settings.store) {
        Ok(store) => store,
        Err(e) => return failed(format!("Crawl failed: {e}")),
    };
    let mut crawler = match Crawler::new(settings.clone(), store) {
        Ok(crawler) => crawler,
        Err(e) => return failed(format!("Crawl failed: {e}")),
    };
    let mut driver = match ChromiumDriver::launch(&settings.browser, &settings.timing).await {
        Ok(driver) => driver,
        Err(e) => return failed(format!("Crawl failed: {e}")),
    };

    crawler.run(&mut driver, target_count, start_page).await
}
