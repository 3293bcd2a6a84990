use crate::product::ProductRecord;
use csv::WriterBuilder;
use serde::Serialize;
use std::io::Write;
use std::time::Instant;
use tracing::instrument;

/// Flat CSV row; absent optionals become empty cells.
#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    id: &'a str,
    name: &'a str,
    brand: &'a str,
    price: u64,
    price_per_unit: Option<u64>,
    volume: Option<&'a str>,
    product_url: &'a str,
    image_url: Option<&'a str>,
    rank: Option<u32>,
    rating: Option<f64>,
    review_count: Option<u64>,
    source: &'a str,
    crawled_at: String,
    page_number: u32,
}

impl<'a> From<&'a ProductRecord> for ExportRow<'a> {
    fn from(p: &'a ProductRecord) -> Self {
        Self {
            id: &p.id,
            name: &p.name,
            brand: &p.brand,
            price: p.price,
            price_per_unit: p.price_per_unit,
            volume: p.volume.as_deref(),
            product_url: &p.product_url,
            image_url: p.image_url.as_deref(),
            rank: p.rank,
            rating: p.rating,
            review_count: p.review_count,
            source: &p.source,
            crawled_at: p.crawled_at.to_rfc3339(),
            page_number: p.page_number,
        }
    }
}

/// Writes `products` as CSV, ordered by page then crawl time.
#[instrument(skip(products, out), fields(products = products.len()))]
pub fn write_csv<W: Write>(products: &mut [ProductRecord], out: W) -> Result<(), csv::Error> {
    let start = Instant::now();
    products.sort_by(|a, b| {
        a.page_number
            .cmp(&b.page_number)
            .then(a.crawled_at.cmp(&b.crawled_at))
    });

    let mut writer = WriterBuilder::new().has_headers(true).from_writer(out);
    for product in products.iter() {
        if let Err(e) = writer.serialize(ExportRow::from(product)) {
            tracing::error!(id = %product.id, error = %e, "Failed to write product to CSV");
        }
    }
    writer.flush()?;

    tracing::info!(duration = ?start.elapsed(), "Completed CSV export");
    Ok(())
}
