use crate::browser::PageDriver;
use crate::config::{ListingSelectors, SiteSettings, TimingSettings};
use crate::error::{BrowserError, NavigationError};
use std::time::Duration;
use tracing::instrument;

/// How a site's pager exposes page links.
///
/// Pages are grouped into blocks of numbered links; reaching a page in a later block
/// requires activating the "next block" control first.
pub trait PagerLayout: Send + Sync {
    /// Selector for the numbered link of `page` within the visible block.
    fn page_control(&self, page: u32) -> String;

    /// Selector for the control that reveals the following block.
    fn next_block_control(&self) -> &str;

    /// Zero-based block containing `page`.
    fn block_of(&self, page: u32) -> u32;

    /// First page of `block`; activating "next block" lands here.
    fn block_start(&self, block: u32) -> u32;

    /// True when `page` can only be reached from the previous page via "next block".
    fn requires_block_advance(&self, page: u32) -> bool {
        page > 1 && self.block_of(page) != self.block_of(page - 1)
    }
}

/// Danawa pager: ten `a.num` links calling `movePage(n)` per block.
#[derive(Debug, Clone)]
pub struct DanawaPager {
    block_size: u32,
    next_block: String,
}

impl DanawaPager {
    pub fn new(site: &SiteSettings, selectors: &ListingSelectors) -> Self {
        Self {
            block_size: site.block_size.max(1),
            next_block: selectors.next_block.clone(),
        }
    }
}

impl PagerLayout for DanawaPager {
    fn page_control(&self, page: u32) -> String {
        format!("a.num[onclick*=\"movePage({page})\"]")
    }

    fn next_block_control(&self) -> &str {
        &self.next_block
    }

    fn block_of(&self, page: u32) -> u32 {
        page.saturating_sub(1) / self.block_size
    }

    fn block_start(&self, block: u32) -> u32 {
        block * self.block_size + 1
    }
}

#[derive(Debug, Clone)]
struct NavTiming {
    selector_timeout: Duration,
    load_timeout: Duration,
    settle: Duration,
    block_settle: Duration,
    verify_attempts: u32,
    verify_interval: Duration,
}

impl From<&TimingSettings> for NavTiming {
    fn from(t: &TimingSettings) -> Self {
        Self {
            selector_timeout: TimingSettings::ms(t.selector_timeout_ms),
            load_timeout: TimingSettings::ms(t.load_timeout_ms),
            settle: TimingSettings::ms(t.settle_ms),
            block_settle: TimingSettings::ms(t.block_settle_ms),
            verify_attempts: t.verify_attempts.max(1),
            verify_interval: TimingSettings::ms(t.verify_interval_ms),
        }
    }
}

/// Moves the listing from one page to another and proves the visible content changed.
pub struct Paginator {
    layout: Box<dyn PagerLayout>,
    first_name: String,
    timing: NavTiming,
}

impl Paginator {
    pub fn new(layout: Box<dyn PagerLayout>, first_name: &str, timing: &TimingSettings) -> Self {
        Self {
            layout,
            first_name: first_name.to_string(),
            timing: NavTiming::from(timing),
        }
    }

    pub fn layout(&self) -> &dyn PagerLayout {
        self.layout.as_ref()
    }

    /// Navigates from `current` to `target`.
    ///
    /// Crosses as many blocks as needed with verified "next block" steps, then clicks the
    /// numbered link unless the block step already landed on `target`.
    #[instrument(skip(self, driver))]
    pub async fn advance_to<D: PageDriver + ?Sized>(
        &self,
        driver: &mut D,
        current: u32,
        target: u32,
    ) -> Result<(), NavigationError> {
        let mut at = current;

        loop {
            let landing = self.layout.block_start(self.layout.block_of(at) + 1);
            if landing > target || !self.layout.requires_block_advance(landing) {
                break;
            }
            tracing::info!(page = landing, "Advancing to next pagination block");
            let control = self.layout.next_block_control().to_string();
            self.activate(driver, &control, landing, self.timing.block_settle)
                .await?;
            at = landing;
        }

        if at != target {
            let control = self.layout.page_control(target);
            tracing::info!(page = target, "Clicking page link");
            self.activate(driver, &control, target, self.timing.settle)
                .await?;
        }

        Ok(())
    }

    async fn activate<D: PageDriver + ?Sized>(
        &self,
        driver: &mut D,
        control: &str,
        page: u32,
        settle: Duration,
    ) -> Result<(), NavigationError> {
        let before = self.first_visible(driver, page).await?;
        tracing::debug!(page, before = %before, "First product before navigation");

        match driver
            .wait_for_selector(control, self.timing.selector_timeout)
            .await
        {
            Ok(()) => {}
            Err(BrowserError::Timeout { .. }) | Err(BrowserError::NoElement(_)) => {
                return Err(NavigationError::ControlNotFound {
                    page,
                    selector: control.to_string(),
                });
            }
            Err(source) => return Err(NavigationError::Driver { page, source }),
        }

        driver.click(control).await.map_err(|source| match source {
            BrowserError::NoElement(_) => NavigationError::ControlNotFound {
                page,
                selector: control.to_string(),
            },
            source => NavigationError::Driver { page, source },
        })?;

        if let Err(e) = driver.wait_for_load(self.timing.load_timeout).await {
            tracing::warn!(page, error = %e, "Page did not report load completion");
        }
        tokio::time::sleep(settle).await;

        self.verify_changed(driver, &before, page).await
    }

    /// Polls the first product name until it differs from `before`.
    ///
    /// The click already happened, so a failed read counts as an unchanged attempt.
    async fn verify_changed<D: PageDriver + ?Sized>(
        &self,
        driver: &mut D,
        before: &str,
        page: u32,
    ) -> Result<(), NavigationError> {
        let attempts = self.timing.verify_attempts;
        for attempt in 1..=attempts {
            let after = match driver.text_of(&self.first_name).await {
                Ok(text) => text.unwrap_or_default(),
                Err(e) => {
                    tracing::debug!(page, attempt, error = %e, "First product name unreadable");
                    String::new()
                }
            };
            if !after.is_empty() && after != before {
                tracing::info!(page, first = %after, "Page change confirmed");
                return Ok(());
            }
            tracing::debug!(page, attempt, attempts, "Waiting for page content to change");
            if attempt < attempts {
                tokio::time::sleep(self.timing.verify_interval).await;
            }
        }

        tracing::warn!(page, attempts, "Page content never changed");
        Err(NavigationError::ContentUnchanged { page, attempts })
    }

    async fn first_visible<D: PageDriver + ?Sized>(
        &self,
        driver: &mut D,
        page: u32,
    ) -> Result<String, NavigationError> {
        driver
            .text_of(&self.first_name)
            .await
            .map(Option::unwrap_or_default)
            .map_err(|source| NavigationError::Driver { page, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn pager() -> DanawaPager {
        DanawaPager::new(&SiteSettings::default(), &ListingSelectors::default())
    }

    #[test]
    fn block_boundaries_follow_block_size() {
        let p = pager();
        assert_eq!(p.block_of(1), 0);
        assert_eq!(p.block_of(10), 0);
        assert_eq!(p.block_of(11), 1);
        assert_eq!(p.block_start(2), 21);
        assert!(!p.requires_block_advance(1));
        assert!(!p.requires_block_advance(10));
        assert!(p.requires_block_advance(11));
        assert!(!p.requires_block_advance(12));
        assert!(p.requires_block_advance(21));
        assert_eq!(p.page_control(7), "a.num[onclick*=\"movePage(7)\"]");
    }

    /// Records clicks; the first product name changes only if `responsive`.
    struct StubPage {
        first: String,
        responsive: bool,
        present: Vec<String>,
        clicks: Vec<String>,
        reads: u32,
        /// Reads after a click that fail before reads succeed again.
        failing_reads: u32,
    }

    #[async_trait]
    impl PageDriver for StubPage {
        async fn goto(&mut self, _url: &str) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
            if self.present.iter().any(|s| s == selector) {
                Ok(())
            } else {
                Err(BrowserError::Timeout { selector: selector.to_string(), timeout })
            }
        }
        async fn click(&mut self, selector: &str) -> Result<(), BrowserError> {
            self.clicks.push(selector.to_string());
            if self.responsive {
                self.first = format!("after click {}", self.clicks.len());
            }
            Ok(())
        }
        async fn wait_for_load(&mut self, _timeout: Duration) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn text_of(&mut self, _selector: &str) -> Result<Option<String>, BrowserError> {
            self.reads += 1;
            if !self.clicks.is_empty() && self.failing_reads > 0 {
                self.failing_reads -= 1;
                return Err(BrowserError::Script("execution context destroyed".to_string()));
            }
            Ok(Some(self.first.clone()))
        }
        async fn scroll_height(&mut self) -> Result<u64, BrowserError> {
            Ok(0)
        }
        async fn scroll_by(&mut self, _pixels: u64) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn scroll_to_top(&mut self) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn content(&mut self) -> Result<String, BrowserError> {
            Ok(String::new())
        }
        async fn close(&mut self) -> Result<(), BrowserError> {
            Ok(())
        }
    }

    fn stub(responsive: bool, present: &[&str]) -> StubPage {
        StubPage {
            first: "Eau A".to_string(),
            responsive,
            present: present.iter().map(|s| s.to_string()).collect(),
            clicks: Vec::new(),
            reads: 0,
            failing_reads: 0,
        }
    }

    fn paginator() -> Paginator {
        Paginator::new(
            Box::new(pager()),
            &ListingSelectors::default().first_name,
            &TimingSettings::immediate(),
        )
    }

    #[tokio::test]
    async fn unchanged_content_fails_after_retry_budget() {
        let p = paginator();
        let control = p.layout().page_control(2);
        let mut page = stub(false, &[control.as_str()]);

        let err = p.advance_to(&mut page, 1, 2).await.unwrap_err();
        assert!(matches!(err, NavigationError::ContentUnchanged { page: 2, attempts: 3 }));
        assert!(err.is_end_of_listing());
        // One read before the click, then one per verification attempt.
        assert_eq!(page.reads, 4);
    }

    #[tokio::test]
    async fn missing_control_reports_not_found() {
        let p = paginator();
        let mut page = stub(true, &[]);

        let err = p.advance_to(&mut page, 3, 4).await.unwrap_err();
        assert!(matches!(err, NavigationError::ControlNotFound { page: 4, .. }));
        assert!(page.clicks.is_empty());
    }

    #[tokio::test]
    async fn within_block_clicks_numbered_link() {
        let p = paginator();
        let control = p.layout().page_control(5);
        let mut page = stub(true, &[control.as_str()]);

        p.advance_to(&mut page, 4, 5).await.unwrap();
        assert_eq!(page.clicks, [control]);
    }

    #[tokio::test]
    async fn block_boundary_uses_next_block_only() {
        let p = paginator();
        let next = ListingSelectors::default().next_block;
        let mut page = stub(true, &[next.as_str()]);

        p.advance_to(&mut page, 10, 11).await.unwrap();
        assert_eq!(page.clicks, [next]);
    }

    #[tokio::test]
    async fn far_jump_crosses_blocks_then_clicks_link() {
        let p = paginator();
        let next = ListingSelectors::default().next_block;
        let control = p.layout().page_control(25);
        let mut page = stub(true, &[next.as_str(), control.as_str()]);

        p.advance_to(&mut page, 1, 25).await.unwrap();
        assert_eq!(page.clicks, [next.clone(), next, control]);
    }

    #[tokio::test]
    async fn unreadable_name_after_click_is_retried() {
        let p = paginator();
        let next = ListingSelectors::default().next_block;
        let mut page = stub(true, &[next.as_str()]);
        page.failing_reads = 1;

        p.advance_to(&mut page, 10, 11).await.unwrap();
        assert_eq!(page.clicks, [next]);
        // Before the click, one failed read, then the confirming read.
        assert_eq!(page.reads, 3);
    }

    #[tokio::test]
    async fn unreadable_name_for_every_attempt_is_unchanged_content() {
        let p = paginator();
        let control = p.layout().page_control(2);
        let mut page = stub(true, &[control.as_str()]);
        page.failing_reads = u32::MAX;

        let err = p.advance_to(&mut page, 1, 2).await.unwrap_err();
        assert!(matches!(err, NavigationError::ContentUnchanged { page: 2, attempts: 3 }));
    }

    #[tokio::test]
    async fn layout_without_blocks_only_clicks_links() {
        struct FlatPager;
        impl PagerLayout for FlatPager {
            fn page_control(&self, page: u32) -> String {
                format!("a.page-{page}")
            }
            fn next_block_control(&self) -> &str {
                "a.more"
            }
            fn block_of(&self, page: u32) -> u32 {
                page.saturating_sub(1) / 10
            }
            fn block_start(&self, block: u32) -> u32 {
                block * 10 + 1
            }
            fn requires_block_advance(&self, _page: u32) -> bool {
                false
            }
        }

        let p = Paginator::new(
            Box::new(FlatPager),
            &ListingSelectors::default().first_name,
            &TimingSettings::immediate(),
        );
        let mut page = stub(true, &["a.page-15"]);

        p.advance_to(&mut page, 3, 15).await.unwrap();
        assert_eq!(page.clicks, ["a.page-15"]);
    }
}
