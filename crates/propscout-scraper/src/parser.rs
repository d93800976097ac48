//! Listing parser: rendered results page to typed broker records.
//!
//! Pure over the page payload: no network access, no mutable state. The
//! portal ships listing data as JSON inside a `script#__NEXT_DATA__` element,
//! so that payload is preferred; when it is missing or its shape has changed,
//! extraction falls back to CSS selectors over the listing cards. Malformed
//! fragments are skipped and counted rather than failing the page.

use crate::error::{Result, ScrapeError};
use crate::site::SiteConfig;
use chrono::Utc;
use propscout_browser::RawPage;
use propscout_core::ListingId;
use propscout_db::BrokerRecord;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::BTreeMap;

/// Result of parsing a single results page.
#[derive(Debug, Clone)]
pub struct ParsedPage {
    /// Successfully extracted records, in page order
    pub records: Vec<BrokerRecord>,
    /// Listing fragments that could not be parsed
    pub parse_failures: u32,
    /// Whether an enabled next-page control is present
    pub has_next_page: bool,
}

/// Parser bound to one site's markup description.
pub struct ListingParser {
    site: SiteConfig,
    next_data: Selector,
    card: Selector,
    name: Selector,
    agency: Selector,
    phone: Selector,
    email: Selector,
    license: Selector,
    next_page: Selector,
}

impl ListingParser {
    /// Compile the site's selectors.
    ///
    /// # Errors
    /// Returns `ScrapeError::InvalidSelector` if any configured selector
    /// fails to compile.
    pub fn new(site: SiteConfig) -> Result<Self> {
        Ok(Self {
            next_data: compile("script#__NEXT_DATA__")?,
            card: compile(&site.card_selector)?,
            name: compile(&site.name_selector)?,
            agency: compile(&site.agency_selector)?,
            phone: compile(&site.phone_selector)?,
            email: compile(&site.email_selector)?,
            license: compile(&site.license_selector)?,
            next_page: compile(&site.next_page_selector)?,
            site,
        })
    }

    /// Extract broker records and the next-page signal from a rendered page.
    #[must_use]
    pub fn parse(&self, page: &RawPage) -> ParsedPage {
        let document = Html::parse_document(&page.html);
        let has_next_page = document.select(&self.next_page).next().is_some();

        if let Some(payload) = self.extract_next_data(&document) {
            let (records, parse_failures) = self.parse_payload(&payload, &page.url);
            if !records.is_empty() || parse_failures > 0 {
                return ParsedPage {
                    records,
                    parse_failures,
                    has_next_page,
                };
            }
        }

        let (records, parse_failures) = self.parse_cards(&document, &page.url);
        ParsedPage {
            records,
            parse_failures,
            has_next_page,
        }
    }

    fn extract_next_data(&self, document: &Html) -> Option<Value> {
        let script = document.select(&self.next_data).next()?;
        let text: String = script.text().collect();
        serde_json::from_str(&text).ok()
    }

    /// Pull the listing array out of the embedded JSON payload:
    /// `props.pageProps.brokers.data`.
    fn parse_payload(&self, payload: &Value, page_url: &str) -> (Vec<BrokerRecord>, u32) {
        let Some(items) = payload
            .pointer("/props/pageProps/brokers/data")
            .and_then(Value::as_array)
        else {
            return (Vec::new(), 0);
        };

        let mut records = Vec::new();
        let mut failures = 0u32;

        for item in items {
            match json_item_to_record(item, page_url) {
                Some(record) => records.push(record),
                None => {
                    tracing::debug!("skipping listing fragment without usable id");
                    failures += 1;
                }
            }
        }

        (records, failures)
    }

    fn parse_cards(&self, document: &Html, page_url: &str) -> (Vec<BrokerRecord>, u32) {
        let mut records = Vec::new();
        let mut failures = 0u32;

        for card in document.select(&self.card) {
            match self.card_to_record(card, page_url) {
                Some(record) => records.push(record),
                None => {
                    tracing::debug!("skipping listing card without usable id");
                    failures += 1;
                }
            }
        }

        (records, failures)
    }

    fn card_to_record(&self, card: ElementRef<'_>, page_url: &str) -> Option<BrokerRecord> {
        let raw_id = card.value().attr(&self.site.id_attribute)?;
        let listing_id = ListingId::new(raw_id).ok()?;

        Some(BrokerRecord {
            listing_id,
            name: select_text(card, &self.name),
            agency: select_text(card, &self.agency),
            phone: select_text(card, &self.phone).and_then(|p| normalize_phone(&p)),
            email: select_text(card, &self.email),
            license_number: select_text(card, &self.license),
            listing_url: page_url.to_string(),
            scraped_at: Utc::now(),
            raw_fields: BTreeMap::new(),
        })
    }
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|_| ScrapeError::InvalidSelector(selector.to_string()))
}

fn select_text(card: ElementRef<'_>, selector: &Selector) -> Option<String> {
    let element = card.select(selector).next()?;
    let text: String = element.text().collect();
    clean(&text)
}

/// Trim and map empty strings to `None`.
fn clean(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Keep a leading `+` and digits, dropping separators and labels.
fn normalize_phone(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let mut normalized = String::new();
    for (i, c) in trimmed.chars().enumerate() {
        if c == '+' && i == 0 {
            normalized.push(c);
        } else if c.is_ascii_digit() {
            normalized.push(c);
        }
    }
    if normalized.chars().any(|c| c.is_ascii_digit()) {
        Some(normalized)
    } else {
        None
    }
}

fn json_item_to_record(item: &Value, page_url: &str) -> Option<BrokerRecord> {
    let obj = item.as_object()?;

    let raw_id = scalar_to_string(obj.get("id")?)?;
    let listing_id = ListingId::new(raw_id).ok()?;

    let mut record = BrokerRecord {
        listing_id,
        name: None,
        agency: None,
        phone: None,
        email: None,
        license_number: None,
        listing_url: page_url.to_string(),
        scraped_at: Utc::now(),
        raw_fields: BTreeMap::new(),
    };

    for (key, value) in obj {
        let Some(text) = scalar_to_string(value) else {
            continue;
        };
        match key.as_str() {
            "id" => {}
            "name" => record.name = clean(&text),
            "agency" | "companyName" => record.agency = clean(&text),
            "phone" => record.phone = normalize_phone(&text),
            "email" => record.email = clean(&text),
            "license" | "licenseNumber" => record.license_number = clean(&text),
            _ => {
                if let Some(text) = clean(&text) {
                    record.raw_fields.insert(key.clone(), text);
                }
            }
        }
    }

    Some(record)
}

/// Stringify JSON scalars; objects, arrays, and null map to `None`.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
