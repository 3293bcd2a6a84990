use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Brand label used when the name carries no recognizable brand prefix.
pub const UNKNOWN_BRAND: &str = "unknown";

/// One harvested listing, shaped exactly like the persisted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub id: String,
    pub name: String,
    pub brand: String,
    pub price: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_per_unit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    pub product_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_count: Option<u64>,
    pub source: String,
    pub crawled_at: DateTime<Utc>,
    pub page_number: u32,
}

impl ProductRecord {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(&self.name, &self.brand)
    }
}

/// The (name, brand) pair identifying a listing independent of its storage id.
/// Compared case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct NaturalKey {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub brand: String,
}

impl NaturalKey {
    pub fn new(name: &str, brand: &str) -> Self {
        Self {
            name: name.to_string(),
            brand: brand.to_string(),
        }
    }
}

/// Produces store keys of the form
/// `{source}-{unix_ms}-{nanos}-{seq}-{page}-{index}-{suffix}`.
///
/// The timestamp alone collides when several cards are extracted within one millisecond,
/// and a collision in the store is a silent overwrite.
#[derive(Debug)]
pub struct IdGenerator {
    source: String,
    epoch: Instant,
    sequence: AtomicU64,
}

impl IdGenerator {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            epoch: Instant::now(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn generate(&self, page: u32, index: usize) -> String {
        self.generate_at(Utc::now().timestamp_millis(), page, index)
    }

    pub fn generate_at(&self, unix_ms: i64, page: u32, index: usize) -> String {
        let nanos = self.epoch.elapsed().as_nanos();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(|c| char::from(c).to_ascii_lowercase())
            .collect();

        format!(
            "{}-{}-{}-{}-{}-{}-{}",
            self.source, unix_ms, nanos, seq, page, index, suffix
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sample() -> ProductRecord {
        ProductRecord {
            id: "danawa-1".to_string(),
            name: "Eau A".to_string(),
            brand: "Brand X".to_string(),
            price: 30_000,
            price_per_unit: None,
            volume: None,
            product_url: "https://prod.danawa.com/info/?pcode=1".to_string(),
            image_url: None,
            rank: None,
            rating: None,
            review_count: None,
            source: "danawa".to_string(),
            crawled_at: Utc::now(),
            page_number: 1,
        }
    }

    #[test]
    fn ids_within_one_millisecond_are_distinct() {
        let ids = IdGenerator::new("danawa");
        let generated: HashSet<String> = (0..1_000)
            .map(|i| ids.generate_at(1_700_000_000_000, 1, i % 3))
            .collect();
        assert_eq!(generated.len(), 1_000);
    }

    #[test]
    fn id_carries_source_page_and_index() {
        let id = IdGenerator::new("danawa").generate_at(42, 7, 3);
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts[0], "danawa");
        assert_eq!(parts[1], "42");
        assert_eq!(parts[4], "7");
        assert_eq!(parts[5], "3");
        assert_eq!(parts[6].len(), 6);
    }

    #[test]
    fn absent_optionals_are_omitted_from_documents() {
        let value = serde_json::to_value(sample()).unwrap();
        let doc = value.as_object().unwrap();
        for key in ["pricePerUnit", "volume", "imageUrl", "rank", "rating", "reviewCount"] {
            assert!(!doc.contains_key(key), "{key} should be absent");
        }
        assert_eq!(doc["productUrl"], "https://prod.danawa.com/info/?pcode=1");
        assert_eq!(doc["pageNumber"], 1);
    }

    #[test]
    fn natural_key_is_case_sensitive() {
        let record = sample();
        assert_eq!(record.natural_key(), NaturalKey::new("Eau A", "Brand X"));
        assert_ne!(record.natural_key(), NaturalKey::new("eau a", "Brand X"));
    }
}
