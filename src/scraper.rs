use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ScraperConfig;
use crate::models::Product;
use crate::utils::error::WatcherError;
use crate::Result;

/// Scrapes the Cafe24-hosted product listing pages of the storefront.
///
/// Selectors and regexes for the fixed structural contract are compiled
/// once at construction.
pub struct CatalogScraper {
    client: Client,
    base_url: Url,
    config: ScraperConfig,
    description_sel: Selector,
    thumb_link_sel: Selector,
    any_link_sel: Selector,
    name_sel: Selector,
    any_name_sel: Selector,
    price_row_sel: Selector,
    ptitle_sel: Selector,
    span_sel: Selector,
    thumb_img_sel: Selector,
    product_no_re: Regex,
    price_re: Regex,
}

impl CatalogScraper {
    pub fn new(config: ScraperConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| WatcherError::Parse {
            message: format!("invalid base URL {}: {e}", config.base_url),
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| WatcherError::Internal(format!("invalid user agent: {e}")))?,
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language)
                .map_err(|e| WatcherError::Internal(format!("invalid accept language: {e}")))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            config,
            description_sel: Selector::parse(".description").unwrap(),
            thumb_link_sel: Selector::parse(".thumbnail a[href*='product_no']").unwrap(),
            any_link_sel: Selector::parse("a[href*='product_no']").unwrap(),
            name_sel: Selector::parse(".name a").unwrap(),
            any_name_sel: Selector::parse("a").unwrap(),
            price_row_sel: Selector::parse(".listInfo li.xans-record-").unwrap(),
            ptitle_sel: Selector::parse(".ptitle").unwrap(),
            span_sel: Selector::parse("span").unwrap(),
            thumb_img_sel: Selector::parse(".thumbnail img").unwrap(),
            product_no_re: Regex::new(r"product_no=(\d+)").unwrap(),
            price_re: Regex::new(r"[\d,]+\s*원").unwrap(),
        })
    }

    /// Scrape one category across its listing pages.
    ///
    /// A transport failure on the first page fails the category; on a later
    /// page it stops pagination and keeps what was collected. Pagination
    /// also stops on an empty page or on a page contributing no ids not
    /// already seen in this category, which guards against sites that
    /// serve the last page again for out-of-range page numbers.
    pub async fn scrape_category(
        &self,
        cate_no: u32,
        label: &str,
        max_pages: u32,
    ) -> Result<HashMap<String, Product>> {
        let mut all_products: HashMap<String, Product> = HashMap::new();

        for page in 1..=max_pages {
            let url = self
                .base_url
                .join(&format!("product/list.html?cate_no={cate_no}&page={page}"))
                .map_err(|e| WatcherError::Parse {
                    message: format!("category {cate_no} page {page} URL: {e}"),
                })?;

            let html = match self.fetch_page(url).await {
                Ok(html) => html,
                Err(e) if page == 1 => {
                    return Err(WatcherError::Scraping(format!(
                        "category {cate_no} page 1 failed: {e}"
                    )));
                }
                Err(e) => {
                    warn!("Failed to fetch category {cate_no} page {page}: {e}");
                    break;
                }
            };

            let page_products = self.parse_listing(&html, label);
            if page_products.is_empty() {
                break;
            }

            let page_total = page_products.len();
            let mut new_count = 0;
            for (id, product) in page_products {
                if let Entry::Vacant(slot) = all_products.entry(id) {
                    slot.insert(product);
                    new_count += 1;
                }
            }

            if new_count == 0 {
                break;
            }

            debug!("Category {cate_no} page {page}: {page_total} products ({new_count} new)");

            if page < max_pages {
                sleep(Duration::from_millis(self.config.page_delay_ms)).await;
            }
        }

        Ok(all_products)
    }

    /// Scrape every configured category and merge the results keyed by id.
    /// A failing category is logged and skipped; the rest still run. When
    /// the same id appears in several categories, the first record wins
    /// and later categories only refresh its category label.
    pub async fn scrape_all(&self) -> Result<HashMap<String, Product>> {
        let mut all_products: HashMap<String, Product> = HashMap::new();
        let categories = &self.config.categories;

        for (i, category) in categories.iter().enumerate() {
            info!("Scraping category: {} (cate_no={})...", category.label, category.cate_no);

            match self
                .scrape_category(category.cate_no, &category.label, self.config.max_pages)
                .await
            {
                Ok(cat_products) => {
                    let found = cat_products.len();
                    let mut new_count = 0;
                    for (id, product) in cat_products {
                        match all_products.entry(id) {
                            Entry::Occupied(mut existing) => {
                                existing.get_mut().category = product.category;
                            }
                            Entry::Vacant(slot) => {
                                slot.insert(product);
                                new_count += 1;
                            }
                        }
                    }
                    info!("  -> {found} products ({new_count} new unique)");
                }
                Err(e) => warn!("Error scraping category {}: {e}", category.label),
            }

            if i + 1 < categories.len() {
                sleep(Duration::from_millis(self.config.category_delay_ms)).await;
            }
        }

        info!("Total unique products found: {}", all_products.len());
        Ok(all_products)
    }

    async fn fetch_page(&self, url: Url) -> Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    /// Extract products from one listing page body.
    ///
    /// Each entry hangs off a `.description` block: the parent box holds
    /// the thumbnail anchor carrying the numeric id and the image. Entries
    /// without a resolvable id or with an empty name are skipped.
    fn parse_listing(&self, html: &str, category: &str) -> HashMap<String, Product> {
        let document = Html::parse_document(html);
        let mut products = HashMap::new();

        for desc in document.select(&self.description_sel) {
            let Some(container) = desc.parent().and_then(ElementRef::wrap) else {
                continue;
            };

            let Some(link) = container
                .select(&self.thumb_link_sel)
                .next()
                .or_else(|| container.select(&self.any_link_sel).next())
            else {
                continue;
            };

            let Some(name_el) = desc
                .select(&self.name_sel)
                .next()
                .or_else(|| desc.select(&self.any_name_sel).next())
            else {
                continue;
            };

            let name = name_el.text().collect::<String>().trim().to_string();
            if name.is_empty() {
                continue;
            }

            let href = link.value().attr("href").unwrap_or("");
            let Some(caps) = self.product_no_re.captures(href) else {
                continue;
            };
            let product_no = caps[1].to_string();

            let Ok(full_url) = self.base_url.join(href) else {
                continue;
            };

            let mut product = Product::new(product_no.clone(), name, full_url.to_string());
            product.price = self.extract_price(&desc);
            product.image_url = self.extract_image(&container);
            product.category = category.to_string();
            products.insert(product_no, product);
        }

        products
    }

    /// Price priority: a member-price (회원가) row wins outright; a
    /// sale-price (판매가) row only fills in when nothing better was found.
    /// Struck-through spans hold the superseded price and are skipped.
    fn extract_price(&self, desc: &ElementRef) -> String {
        let mut price = String::new();

        for row in desc.select(&self.price_row_sel) {
            let Some(ptitle) = row.select(&self.ptitle_sel).next() else {
                continue;
            };
            let title_text = ptitle.text().collect::<String>();
            let is_member = title_text.contains("회원가");
            let is_sale = title_text.contains("판매가");
            if !is_member && !is_sale {
                continue;
            }

            for span in row.select(&self.span_sel) {
                if is_title_span(&span) {
                    continue;
                }
                if span
                    .value()
                    .attr("style")
                    .is_some_and(|style| style.contains("line-through"))
                {
                    continue;
                }

                let span_text = span.text().collect::<String>();
                let Some(found) = self.price_re.find(&span_text) else {
                    continue;
                };

                if is_member {
                    return found.as_str().trim().to_string();
                }
                if price.is_empty() {
                    price = found.as_str().trim().to_string();
                }
            }
        }

        price
    }

    fn extract_image(&self, container: &ElementRef) -> String {
        let Some(img) = container.select(&self.thumb_img_sel).next() else {
            return String::new();
        };

        let src = img
            .value()
            .attr("src")
            .filter(|s| !s.is_empty())
            .or_else(|| img.value().attr("data-original").filter(|s| !s.is_empty()))
            .unwrap_or("");

        match src.strip_prefix("//") {
            Some(rest) => format!("https://{rest}"),
            None => src.to_string(),
        }
    }
}

/// True when the span is the `.ptitle` label itself or sits inside it.
fn is_title_span(span: &ElementRef) -> bool {
    if span.value().classes().any(|c| c == "ptitle") {
        return true;
    }
    span.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| ancestor.value().classes().any(|c| c == "ptitle"))
}
