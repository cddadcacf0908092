use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::CurrencyConfig;
use crate::utils::error::WatcherError;
use crate::Result;

/// Currency code the converter resolves rates for.
const TARGET_CURRENCY: &str = "UAH";
/// Label appended to every formatted amount.
const CURRENCY_LABEL: &str = "грн";

/// Independent rate endpoints, tried in order. Each returns a JSON body
/// with a `rates` object keyed by currency code.
const DEFAULT_RATE_SOURCES: [&str; 3] = [
    "https://api.exchangerate-api.com/v4/latest/KRW",
    "https://open.er-api.com/v6/latest/KRW",
    "https://api.frankfurter.app/latest?from=KRW&to=UAH",
];

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: HashMap<String, f64>,
}

/// Resolves the KRW→UAH exchange rate with multi-source fallback.
///
/// The last successfully fetched rate is cached on the instance and reused
/// when every source fails on a later call.
pub struct CurrencyConverter {
    client: Client,
    sources: Vec<String>,
    fallback_rate: f64,
    cached_rate: Option<f64>,
}

impl CurrencyConverter {
    pub fn new(config: &CurrencyConfig) -> Result<Self> {
        let sources = DEFAULT_RATE_SOURCES.iter().map(|s| s.to_string()).collect();
        Self::with_sources(config, sources)
    }

    /// Build against an explicit source list; tests point this at mock servers.
    pub fn with_sources(config: &CurrencyConfig, sources: Vec<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            sources,
            fallback_rate: config.fallback_rate,
            cached_rate: None,
        })
    }

    /// Fetch the current rate: first source returning a usable number wins.
    /// Falls back to the cached rate, then to the configured constant.
    /// Never fails outward.
    pub async fn resolve_rate(&mut self) -> f64 {
        let sources = self.sources.clone();
        for source in &sources {
            match self.fetch_rate(source).await {
                Ok(rate) => {
                    info!("Exchange rate ({source}): 1 KRW = {rate} {TARGET_CURRENCY}");
                    self.cached_rate = Some(rate);
                    return rate;
                }
                Err(e) => warn!("Rate source {source} failed: {e}"),
            }
        }

        if let Some(rate) = self.cached_rate {
            warn!("All rate sources failed, using cached rate: 1 KRW = {rate} {TARGET_CURRENCY}");
            return rate;
        }

        warn!(
            "All rate sources failed and no cached rate, using fallback: 1 KRW = {} {TARGET_CURRENCY}",
            self.fallback_rate
        );
        self.fallback_rate
    }

    async fn fetch_rate(&self, url: &str) -> Result<f64> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let body: RatesResponse = response.json().await?;

        let rate = body
            .rates
            .get(TARGET_CURRENCY)
            .copied()
            .ok_or_else(|| WatcherError::Parse {
                message: format!("no {TARGET_CURRENCY} rate in response from {url}"),
            })?;

        if !rate.is_finite() || rate <= 0.0 {
            return Err(WatcherError::Parse {
                message: format!("unusable rate {rate} from {url}"),
            });
        }

        Ok(rate)
    }
}

/// Parse a KRW price string like `329,000원` into an integer amount.
/// Returns `None` when the text holds no digits.
pub fn parse_price(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Convert a KRW amount to UAH, rounded to 2 decimal places with
/// round-half-to-even (banker's rounding).
pub fn convert(amount_krw: i64, rate: f64) -> Decimal {
    let rate = Decimal::from_f64(rate).unwrap_or_default();
    (Decimal::from(amount_krw) * rate).round_dp(2)
}

/// Format a UAH amount: `1 234.50 грн` above a thousand (fraction only
/// when non-zero), plain integer or two decimals below.
pub fn format_uah(amount: Decimal) -> String {
    let amount = amount.round_dp(2);

    if amount >= Decimal::from(1000) {
        let whole = amount.trunc();
        let cents = ((amount - whole) * Decimal::from(100)).to_i64().unwrap_or(0);
        let grouped = group_thousands(whole.to_i64().unwrap_or(0));
        if cents > 0 {
            format!("{grouped}.{cents:02} {CURRENCY_LABEL}")
        } else {
            format!("{grouped} {CURRENCY_LABEL}")
        }
    } else if amount.fract().is_zero() {
        format!("{} {CURRENCY_LABEL}", amount.trunc())
    } else {
        format!("{amount:.2} {CURRENCY_LABEL}")
    }
}

/// Parse a raw KRW price string and render its UAH equivalent at the given
/// rate. `None` when the text holds no parsable amount.
pub fn convert_price(price_text: &str, rate: f64) -> Option<String> {
    let krw = parse_price(price_text)?;
    Some(format_uah(convert(krw, rate)))
}

fn group_thousands(n: i64) -> String {
    let digits = n.to_string();
    let mut groups = Vec::new();
    let mut end = digits.len();
    while end > 3 {
        groups.push(&digits[end - 3..end]);
        end -= 3;
    }
    groups.push(&digits[..end]);
    groups.reverse();
    groups.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> CurrencyConfig {
        CurrencyConfig {
            fallback_rate: 0.03,
            request_timeout_secs: 5,
        }
    }

    #[rstest]
    #[case("329,000원", Some(329_000))]
    #[case("1,299원", Some(1_299))]
    #[case("가격: 5000", Some(5_000))]
    #[case("", None)]
    #[case("품절", None)]
    fn test_parse_price(#[case] input: &str, #[case] expected: Option<i64>) {
        assert_eq!(parse_price(input), expected);
    }

    #[test]
    fn test_convert_basic() {
        assert_eq!(convert(100_000, 0.03), Decimal::new(300_000, 2)); // 3000.00
    }

    #[test]
    fn test_convert_rounds_half_to_even() {
        // 125 * 0.001 = 0.125 -> 0.12, 135 * 0.001 = 0.135 -> 0.14
        assert_eq!(convert(125, 0.001), Decimal::new(12, 2));
        assert_eq!(convert(135, 0.001), Decimal::new(14, 2));
    }

    #[rstest]
    #[case(Decimal::new(12345, 1), "1 234.50 грн")] // 1234.5
    #[case(Decimal::new(1_234_567, 0), "1 234 567 грн")]
    #[case(Decimal::new(1000, 0), "1 000 грн")]
    #[case(Decimal::new(999, 0), "999 грн")]
    #[case(Decimal::new(99950, 3), "99.95 грн")] // 99.95
    #[case(Decimal::new(0, 0), "0 грн")]
    fn test_format_uah(#[case] amount: Decimal, #[case] expected: &str) {
        assert_eq!(format_uah(amount), expected);
    }

    #[test]
    fn test_convert_price_end_to_end() {
        assert_eq!(convert_price("329,000원", 0.03).as_deref(), Some("9 870 грн"));
        assert_eq!(convert_price("", 0.03), None);
        assert_eq!(convert_price("품절", 0.03), None);
    }

    #[tokio::test]
    async fn test_resolve_rate_first_success_wins() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rates": {"UAH": 0.0295}})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rates": {"UAH": 0.9999}})))
            .mount(&server)
            .await;

        let sources = ["/a", "/b", "/c"]
            .iter()
            .map(|p| format!("{}{}", server.uri(), p))
            .collect();
        let mut converter = CurrencyConverter::with_sources(&test_config(), sources).unwrap();

        assert_eq!(converter.resolve_rate().await, 0.0295);
    }

    #[tokio::test]
    async fn test_resolve_rate_skips_response_without_target() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rates": {"USD": 0.00075}})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rates": {"UAH": 0.031}})))
            .mount(&server)
            .await;

        let sources = ["/a", "/b"]
            .iter()
            .map(|p| format!("{}{}", server.uri(), p))
            .collect();
        let mut converter = CurrencyConverter::with_sources(&test_config(), sources).unwrap();

        assert_eq!(converter.resolve_rate().await, 0.031);
    }

    #[tokio::test]
    async fn test_resolve_rate_uses_cache_before_fallback() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rates": {"UAH": 0.028}})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sources = vec![format!("{}/a", server.uri())];
        let mut converter = CurrencyConverter::with_sources(&test_config(), sources).unwrap();

        assert_eq!(converter.resolve_rate().await, 0.028);
        // Source is now failing; the cached rate takes over.
        assert_eq!(converter.resolve_rate().await, 0.028);
    }

    #[tokio::test]
    async fn test_resolve_rate_falls_back_to_constant() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let sources = vec![format!("{}/a", server.uri())];
        let mut converter = CurrencyConverter::with_sources(&test_config(), sources).unwrap();

        assert_eq!(converter.resolve_rate().await, 0.03);
    }
}
