//! Target-site description: URL shape and markup selectors.
//!
//! All knowledge of the portal's markup lives here and in the parser, so a
//! site redesign touches these two files only. The crawl loop and tracker see
//! nothing site-specific.

use crate::error::{Result, ScrapeError};
use url::Url;

/// Selectors and URL shape for the target portal's broker search.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    /// Search results URL the crawl starts from
    pub search_url: String,
    /// Query parameter carrying the page number
    pub page_param: String,
    /// Selector whose appearance marks a results page as rendered; also the
    /// wait selector handed to the browser session
    pub container_selector: String,
    /// Selector for one listing card within the container
    pub card_selector: String,
    /// Attribute on the card carrying the portal's listing id
    pub id_attribute: String,
    /// Selector for the broker name within a card
    pub name_selector: String,
    /// Selector for the agency within a card
    pub agency_selector: String,
    /// Selector for the phone number within a card
    pub phone_selector: String,
    /// Selector for the email within a card
    pub email_selector: String,
    /// Selector for the license number within a card
    pub license_selector: String,
    /// Selector for an enabled next-page control
    pub next_page_selector: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            search_url: "https://www.propertyfinder.qa/en/find-broker/search".to_string(),
            page_param: "page".to_string(),
            container_selector: "[data-testid='broker-list']".to_string(),
            card_selector: "[data-testid='broker-card']".to_string(),
            id_attribute: "data-broker-id".to_string(),
            name_selector: "[data-testid='broker-name']".to_string(),
            agency_selector: "[data-testid='broker-agency']".to_string(),
            phone_selector: "[data-testid='broker-phone']".to_string(),
            email_selector: "[data-testid='broker-email']".to_string(),
            license_selector: "[data-testid='broker-license']".to_string(),
            next_page_selector: "a[data-testid='pagination-page-next-link']".to_string(),
        }
    }
}

impl SiteConfig {
    /// Build the URL for a given results page.
    ///
    /// The page number is carried as a query parameter; any parameters
    /// already present on the search URL (sort order, region filters) are
    /// preserved.
    ///
    /// # Errors
    /// Returns `ScrapeError::InvalidUrl` if the search URL does not parse.
    pub fn page_url(&self, base: &str, page: u32) -> Result<String> {
        let mut url =
            Url::parse(base).map_err(|e| ScrapeError::InvalidUrl(format!("{base}: {e}")))?;

        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != self.page_param.as_str())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (k, v) in &retained {
                pairs.append_pair(k, v);
            }
            pairs.append_pair(&self.page_param, &page.to_string());
        }

        Ok(url.to_string())
    }

    /// Normalize a target URL for duplicate-job detection.
    ///
    /// Two start requests aim at the same crawl when their URLs differ only
    /// in case of scheme/host, a trailing slash, or an explicit page number.
    ///
    /// # Errors
    /// Returns `ScrapeError::InvalidUrl` if the URL does not parse.
    pub fn normalize_target(&self, target: &str) -> Result<String> {
        let mut url =
            Url::parse(target.trim()).map_err(|e| ScrapeError::InvalidUrl(format!("{target}: {e}")))?;

        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != self.page_param.as_str())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if retained.is_empty() {
            url.set_query(None);
        } else {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (k, v) in &retained {
                pairs.append_pair(k, v);
            }
        }

        let mut normalized = url.to_string();
        while normalized.ends_with('/') {
            normalized.pop();
        }
        Ok(normalized)
    }
}
