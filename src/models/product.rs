use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One catalog entry scraped from the storefront.
///
/// `product_no` is the string form of the numeric Cafe24 catalog key and is
/// unique within a single scrape snapshot. `first_seen` is stamped by the
/// store the first time the id enters the ledger and is never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub product_no: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
}

impl Product {
    pub fn new(product_no: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            product_no: product_no.into(),
            name: name.into(),
            url: url.into(),
            price: String::new(),
            image_url: String::new(),
            category: String::new(),
            first_seen: None,
        }
    }

    /// Sort key for stable alert ordering. Ids the parser emits are always
    /// numeric; anything else sorts last.
    pub fn numeric_id(&self) -> u64 {
        self.product_no.parse().unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_product_has_no_first_seen() {
        let product = Product::new("12345", "Test Serum", "https://example.com/p/12345");
        assert_eq!(product.product_no, "12345");
        assert!(product.first_seen.is_none());
        assert!(product.price.is_empty());
    }

    #[test]
    fn test_numeric_id_ordering() {
        let a = Product::new("99", "A", "https://example.com/a");
        let b = Product::new("100", "B", "https://example.com/b");
        assert!(a.numeric_id() < b.numeric_id());
    }

    #[test]
    fn test_serde_roundtrip_omits_missing_first_seen() {
        let product = Product::new("7", "Cream", "https://example.com/p/7");
        let json = serde_json::to_string(&product).unwrap();
        assert!(!json.contains("first_seen"));

        let back: Product = serde_json::from_str(&json).unwrap();
        assert_eq!(back, product);
    }

    #[test]
    fn test_deserializes_with_missing_optional_fields() {
        let json = r#"{"product_no":"42","name":"Toner","url":"https://example.com/p/42"}"#;
        let product: Product = serde_json::from_str(json).unwrap();
        assert_eq!(product.product_no, "42");
        assert!(product.category.is_empty());
        assert!(product.first_seen.is_none());
    }
}
