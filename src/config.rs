use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on operations in a single store commit.
pub const MAX_BATCH_OPS: usize = 500;

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct AppSettings {
    pub browser: BrowserSettings,
    pub site: SiteSettings,
    pub selectors: ListingSelectors,
    pub timing: TimingSettings,
    pub crawl: CrawlSettings,
    pub store: StoreSettings,
}

impl AppSettings {
    /// Loads settings from an optional TOML file, then `CRAWLER__SECTION__KEY` env overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("CRAWLER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    pub fn batch_size(&self) -> usize {
        self.crawl.batch_size.clamp(1, MAX_BATCH_OPS)
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub no_sandbox: bool,
    pub args: Vec<String>,
    pub executable: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            no_sandbox: true,
            args: Vec::new(),
            executable: None,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SiteSettings {
    pub base_url: String,
    pub origin: String,
    pub source_tag: String,
    pub block_size: u32,
    pub fallback_brand: String,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            base_url: "https://prod.danawa.com/list/?cate=18222429&15main_18_02".to_string(),
            origin: "https://prod.danawa.com".to_string(),
            source_tag: "danawa".to_string(),
            block_size: 10,
            fallback_brand: crate::product::UNKNOWN_BRAND.to_string(),
        }
    }
}

/// CSS selectors for the product listing. All are relative to a product card except
/// `card`, `first_name` and `next_block`, which are document-level.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ListingSelectors {
    pub card: String,
    pub name: String,
    pub first_name: String,
    pub price: String,
    pub volume: String,
    pub unit_price: String,
    pub image: String,
    pub rank: String,
    pub rating: String,
    pub review_count: String,
    pub next_block: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            card: ".prod_main_info".to_string(),
            name: "a[name=\"productName\"]".to_string(),
            first_name: ".prod_main_info .prod_name a".to_string(),
            price: ".price_sect strong".to_string(),
            volume: ".memory_sect .text".to_string(),
            unit_price: ".memory_price_sect".to_string(),
            image: ".thumb_image img".to_string(),
            rank: ".pop_rank".to_string(),
            rating: ".text__score".to_string(),
            review_count: ".text__number".to_string(),
            next_block: "a.edge_nav.nav_next".to_string(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct TimingSettings {
    pub selector_timeout_ms: u64,
    pub card_timeout_ms: u64,
    pub load_timeout_ms: u64,
    pub settle_ms: u64,
    pub block_settle_ms: u64,
    pub verify_attempts: u32,
    pub verify_interval_ms: u64,
    pub scroll_step_px: u64,
    pub scroll_interval_ms: u64,
    pub after_scroll_ms: u64,
    pub top_settle_ms: u64,
    pub page_delay_min_ms: u64,
    pub page_delay_max_ms: u64,
    pub error_backoff_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            selector_timeout_ms: 10_000,
            card_timeout_ms: 15_000,
            load_timeout_ms: 30_000,
            settle_ms: 2_000,
            block_settle_ms: 5_000,
            verify_attempts: 10,
            verify_interval_ms: 2_000,
            scroll_step_px: 100,
            scroll_interval_ms: 100,
            after_scroll_ms: 3_000,
            top_settle_ms: 2_000,
            page_delay_min_ms: 2_000,
            page_delay_max_ms: 4_000,
            error_backoff_ms: 5_000,
            poll_interval_ms: 250,
        }
    }
}

impl TimingSettings {
    /// All waits zeroed, verification kept to a few attempts.
    pub fn immediate() -> Self {
        Self {
            selector_timeout_ms: 0,
            card_timeout_ms: 0,
            load_timeout_ms: 0,
            settle_ms: 0,
            block_settle_ms: 0,
            verify_attempts: 3,
            verify_interval_ms: 0,
            scroll_step_px: 1_000,
            scroll_interval_ms: 0,
            after_scroll_ms: 0,
            top_settle_ms: 0,
            page_delay_min_ms: 0,
            page_delay_max_ms: 0,
            error_backoff_ms: 0,
            poll_interval_ms: 0,
        }
    }

    pub fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CrawlSettings {
    pub batch_size: usize,
    pub target_count: usize,
    pub start_page: u32,
    pub max_consecutive_page_failures: u32,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            target_count: 1000,
            start_page: 1,
            max_consecutive_page_failures: 5,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Json,
    Firestore,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub json_path: PathBuf,
    pub collection: String,
    pub project_id: String,
    pub database_id: String,
    pub api_key: Option<String>,
    pub list_page_size: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Json,
            json_path: PathBuf::from("danawa-fragrances-clean.json"),
            collection: "danawa-fragrances-clean".to_string(),
            project_id: String::new(),
            database_id: "(default)".to_string(),
            api_key: None,
            list_page_size: 300,
        }
    }
}
