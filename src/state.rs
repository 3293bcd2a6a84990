use crate::dedup::KnownKeys;
use crate::product::{NaturalKey, ProductRecord};

/// Process-local state of one crawl run, owned by the orchestrator.
#[derive(Debug)]
pub struct RunState {
    collected: Vec<ProductRecord>,
    known: KnownKeys,
    current_page: u32,
}

impl RunState {
    /// `landing_page` is the page the browser shows after loading the listing.
    pub fn new(stored: impl IntoIterator<Item = NaturalKey>, landing_page: u32) -> Self {
        Self {
            collected: Vec::new(),
            known: KnownKeys::seeded(stored),
            current_page: landing_page,
        }
    }

    /// Keeps the records whose natural key is new, in order, and returns them.
    pub fn admit(&mut self, records: Vec<ProductRecord>) -> Vec<ProductRecord> {
        let accepted: Vec<ProductRecord> = records
            .into_iter()
            .filter(|record| {
                let fresh = self.known.accept(record);
                if !fresh {
                    tracing::debug!(name = %record.name, brand = %record.brand, "Duplicate product rejected");
                }
                fresh
            })
            .collect();
        self.collected.extend(accepted.iter().cloned());
        accepted
    }

    pub fn collected(&self) -> &[ProductRecord] {
        &self.collected
    }

    pub fn known_keys(&self) -> &KnownKeys {
        &self.known
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    /// Only called after a verified navigation.
    pub fn landed_on(&mut self, page: u32) {
        self.current_page = page;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(name: &str, brand: &str) -> ProductRecord {
        ProductRecord {
            id: format!("danawa-{name}"),
            name: name.to_string(),
            brand: brand.to_string(),
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
    fn admits_each_key_once_and_skips_stored_ones() {
        let stored = record("Eau Z", "Brand Z").natural_key();
        let mut state = RunState::new([stored], 1);

        let first = state.admit(vec![
            record("Eau A", "Brand X"),
            record("Eau A", "Brand X"),
            record("Eau Z", "Brand Z"),
        ]);
        assert_eq!(first.len(), 1);

        let second = state.admit(vec![record("Eau A", "Brand X"), record("Eau B", "Brand Y")]);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].name, "Eau B");

        let names: Vec<&str> = state.collected().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Eau A", "Eau B"]);
        assert_eq!(state.known_keys().len(), 3);
    }

    #[test]
    fn tracks_the_page_in_view() {
        let mut state = RunState::new(Vec::new(), 1);
        assert_eq!(state.current_page(), 1);
        state.landed_on(4);
        assert_eq!(state.current_page(), 4);
    }
}
