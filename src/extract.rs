use crate::config::{ListingSelectors, SiteSettings};
use crate::error::ExtractError;
use crate::product::{IdGenerator, ProductRecord};
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

struct CardSelectors {
    card: Selector,
    name: Selector,
    price: Selector,
    volume: Selector,
    unit_price: Selector,
    image: Selector,
    rank: Selector,
    rating: Selector,
    review_count: Selector,
}

/// Turns a rendered listing snapshot into product records.
///
/// Cards without a name, a product link, or a positive price are skipped with a
/// debug log; they never abort the rest of the page.
pub struct ListingExtractor {
    selectors: CardSelectors,
    brand_prefix: Regex,
    amount: Regex,
    leading_decimal: Regex,
    fallback_brand: String,
    origin: Url,
    source: String,
    ids: IdGenerator,
}

fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::Selector {
        selector: selector.to_string(),
        reason: format!("{e:?}"),
    })
}

impl ListingExtractor {
    pub fn new(site: &SiteSettings, selectors: &ListingSelectors) -> Result<Self, ExtractError> {
        let selectors = CardSelectors {
            card: parse_selector(&selectors.card)?,
            name: parse_selector(&selectors.name)?,
            price: parse_selector(&selectors.price)?,
            volume: parse_selector(&selectors.volume)?,
            unit_price: parse_selector(&selectors.unit_price)?,
            image: parse_selector(&selectors.image)?,
            rank: parse_selector(&selectors.rank)?,
            rating: parse_selector(&selectors.rating)?,
            review_count: parse_selector(&selectors.review_count)?,
        };

        Ok(Self {
            selectors,
            // Leading run of Hangul, Latin letters and whitespace.
            brand_prefix: Regex::new(r"^([가-힣a-zA-Z\s]+)")?,
            amount: Regex::new(r"\d[\d,]*")?,
            leading_decimal: Regex::new(r"^\s*(\d+(?:\.\d+)?)")?,
            fallback_brand: site.fallback_brand.clone(),
            origin: Url::parse(&site.origin)?,
            source: site.source_tag.clone(),
            ids: IdGenerator::new(site.source_tag.clone()),
        })
    }

    pub fn extract(&self, html: &str, page_number: u32) -> Vec<ProductRecord> {
        self.extract_at(html, page_number, Utc::now())
    }

    pub fn extract_at(
        &self,
        html: &str,
        page_number: u32,
        crawled_at: DateTime<Utc>,
    ) -> Vec<ProductRecord> {
        let document = Html::parse_document(html);
        let mut products = Vec::new();
        let mut cards = 0;

        for (index, card) in document.select(&self.selectors.card).enumerate() {
            cards += 1;
            if let Some(product) = self.extract_card(card, page_number, index, crawled_at) {
                tracing::debug!(
                    page = page_number,
                    index,
                    name = %product.name,
                    id = %product.id,
                    "Extracted product"
                );
                products.push(product);
            }
        }

        tracing::info!(
            page = page_number,
            cards,
            extracted = products.len(),
            "Completed page extraction"
        );
        products
    }

    fn extract_card(
        &self,
        card: ElementRef<'_>,
        page_number: u32,
        index: usize,
        crawled_at: DateTime<Utc>,
    ) -> Option<ProductRecord> {
        let name_el = card.select(&self.selectors.name).next();
        let name = name_el.map(element_text).unwrap_or_default();
        let price = first_text(card, &self.selectors.price)
            .as_deref()
            .and_then(parse_digits)
            .filter(|p| *p > 0);

        let (name, price) = match (name.is_empty(), price) {
            (false, Some(price)) => (name, price),
            _ => {
                tracing::debug!(page = page_number, index, name = %name, "Skipping card without name or price");
                return None;
            }
        };

        let product_url = match name_el
            .and_then(|el| el.value().attr("href"))
            .and_then(|href| self.absolutize(href))
        {
            Some(url) => url,
            None => {
                tracing::debug!(page = page_number, index, name = %name, "Skipping card without product link");
                return None;
            }
        };

        let image_url = card.select(&self.selectors.image).next().and_then(|img| {
            ["src", "data-original", "data-src"]
                .iter()
                .filter_map(|attr| img.value().attr(attr))
                .map(str::trim)
                .find(|src| !src.is_empty() && !src.starts_with("data:"))
                .and_then(|src| self.absolutize(src))
        });

        Some(ProductRecord {
            id: self.ids.generate(page_number, index),
            brand: self.brand_of(&name),
            price,
            price_per_unit: first_text(card, &self.selectors.unit_price)
                .as_deref()
                .and_then(|text| self.last_amount(text))
                .filter(|p| *p > 0),
            volume: first_text(card, &self.selectors.volume).filter(|v| !v.is_empty()),
            product_url,
            image_url,
            rank: first_text(card, &self.selectors.rank)
                .as_deref()
                .and_then(parse_digits)
                .and_then(|r| u32::try_from(r).ok())
                .filter(|r| *r > 0),
            rating: first_text(card, &self.selectors.rating)
                .and_then(|text| self.leading_number(&text))
                .filter(|r| r.is_finite() && *r > 0.0),
            review_count: first_text(card, &self.selectors.review_count)
                .as_deref()
                .and_then(parse_digits)
                .filter(|c| *c > 0),
            name,
            source: self.source.clone(),
            crawled_at,
            page_number,
        })
    }

    /// Best-effort brand: the leading letters-and-spaces run of the name.
    pub fn brand_of(&self, name: &str) -> String {
        self.brand_prefix
            .captures(name)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|brand| !brand.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.fallback_brand.clone())
    }

    /// Unit prices read like "1ml당 1,890원"; only the trailing amount is the price.
    fn last_amount(&self, text: &str) -> Option<u64> {
        self.amount
            .find_iter(text)
            .last()
            .and_then(|m| parse_digits(m.as_str()))
    }

    /// Ratings read like "4.8" or "4.8점"; trailing text is ignored.
    fn leading_number(&self, text: &str) -> Option<f64> {
        self.leading_decimal
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    fn absolutize(&self, link: &str) -> Option<String> {
        let link = link.trim();
        if link.is_empty() {
            return None;
        }
        self.origin.join(link).ok().map(String::from)
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn first_text(card: ElementRef<'_>, selector: &Selector) -> Option<String> {
    card.select(selector).next().map(element_text)
}

/// Keeps only ASCII digits and parses them; `None` when nothing numeric remains.
pub fn parse_digits(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> ListingExtractor {
        ListingExtractor::new(&SiteSettings::default(), &ListingSelectors::default()).unwrap()
    }

    fn card(name: &str, href: &str, price: &str, extra: &str) -> String {
        format!(
            r#"<div class="prod_main_info">
                 <div class="thumb_image"><img src="//img.danawa.com/p/1.jpg"></div>
                 <p class="prod_name"><a name="productName" href="{href}">{name}</a></p>
                 <div class="price_sect"><strong>{price}</strong></div>
                 {extra}
               </div>"#
        )
    }

    fn page(cards: &[String]) -> String {
        format!("<html><body><ul>{}</ul></body></html>", cards.join(""))
    }

    #[test]
    fn extracts_full_card() {
        let html = page(&[card(
            "샤넬 코코 마드모아젤 100ml",
            "/info/?pcode=123",
            "189,000원",
            r#"<div class="memory_sect"><span class="text">100ml</span></div>
               <div class="memory_price_sect">1ml당 1,890원</div>
               <span class="pop_rank">3위</span>
               <span class="text__score">4.8</span>
               <span class="text__number">(1,204)</span>"#,
        )]);

        let products = extractor().extract(&html, 2);
        assert_eq!(products.len(), 1);
        let p = &products[0];
        assert_eq!(p.name, "샤넬 코코 마드모아젤 100ml");
        assert_eq!(p.brand, "샤넬 코코 마드모아젤");
        assert_eq!(p.price, 189_000);
        assert_eq!(p.price_per_unit, Some(1_890));
        assert_eq!(p.volume.as_deref(), Some("100ml"));
        assert_eq!(p.product_url, "https://prod.danawa.com/info/?pcode=123");
        assert_eq!(p.image_url.as_deref(), Some("https://img.danawa.com/p/1.jpg"));
        assert_eq!(p.rank, Some(3));
        assert_eq!(p.rating, Some(4.8));
        assert_eq!(p.review_count, Some(1_204));
        assert_eq!(p.page_number, 2);
        assert_eq!(p.source, "danawa");
        assert!(p.id.starts_with("danawa-"));
    }

    #[test]
    fn drops_cards_without_positive_price() {
        let html = page(&[
            card("Eau A", "/info/?pcode=1", "가격비교예정", ""),
            card("Eau B", "/info/?pcode=2", "0원", ""),
            card("Eau C", "/info/?pcode=3", "45,000원", ""),
            card("Eau D", "/info/?pcode=4", "99999999999999999999999", ""),
        ]);

        let products = extractor().extract(&html, 1);
        let names: Vec<&str> = products.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Eau C"]);
    }

    #[test]
    fn drops_cards_without_name_or_link_and_keeps_order() {
        let html = page(&[
            card("Eau B", "/info/?pcode=2", "10,000", ""),
            card("", "/info/?pcode=9", "10,000", ""),
            r#"<div class="prod_main_info"><p class="prod_name"><a name="productName">No Link</a></p>
               <div class="price_sect"><strong>5,000</strong></div></div>"#
                .to_string(),
            card("Eau A", "https://prod.danawa.com/info/?pcode=1", "20,000", ""),
        ]);

        let products = extractor().extract(&html, 1);
        let names: Vec<&str> = products.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Eau B", "Eau A"]);
        assert_eq!(products[1].product_url, "https://prod.danawa.com/info/?pcode=1");
    }

    #[test]
    fn non_positive_optionals_are_absent() {
        let html = page(&[card(
            "Eau A",
            "/info/?pcode=1",
            "30,000",
            r#"<span class="pop_rank"></span>
               <span class="text__score">0</span>
               <span class="text__number">(0)</span>
               <div class="memory_price_sect">-</div>"#,
        )]);

        let p = &extractor().extract(&html, 1)[0];
        assert_eq!(p.rank, None);
        assert_eq!(p.rating, None);
        assert_eq!(p.review_count, None);
        assert_eq!(p.price_per_unit, None);
        assert_eq!(p.volume, None);
    }

    #[test]
    fn rating_takes_the_leading_number() {
        let rated = |score: &str| {
            let html = page(&[card(
                "Eau A",
                "/info/?pcode=1",
                "30,000",
                &format!(r#"<span class="text__score">{score}</span>"#),
            )]);
            extractor().extract(&html, 1)[0].rating
        };

        assert_eq!(rated("4.8점"), Some(4.8));
        assert_eq!(rated(" 5 "), Some(5.0));
        assert_eq!(rated("평점 없음"), None);
    }

    #[test]
    fn brand_falls_back_when_name_has_no_letter_prefix() {
        let ex = extractor();
        assert_eq!(
            ex.brand_of("[발렌티노 뷰티] 본 인 로마"),
            crate::product::UNKNOWN_BRAND
        );
        assert_eq!(ex.brand_of("Jo Malone 50ml"), "Jo Malone");
    }

    #[test]
    fn parse_digits_strips_formatting() {
        assert_eq!(parse_digits("124,200원"), Some(124_200));
        assert_eq!(parse_digits("없음"), None);
    }
}
