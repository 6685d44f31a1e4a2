use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;

/// The eight marketplaces the dashboard integrates with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Marketplace {
    Trendyol,
    Hepsiburada,
    Amazon,
    Ikas,
    N11,
    Ciceksepeti,
    Etsy,
    Shopify,
}

impl Marketplace {
    pub const ALL: [Marketplace; 8] = [
        Marketplace::Trendyol,
        Marketplace::Hepsiburada,
        Marketplace::Amazon,
        Marketplace::Ikas,
        Marketplace::N11,
        Marketplace::Ciceksepeti,
        Marketplace::Etsy,
        Marketplace::Shopify,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            Marketplace::Trendyol => "trendyol",
            Marketplace::Hepsiburada => "hepsiburada",
            Marketplace::Amazon => "amazon",
            Marketplace::Ikas => "ikas",
            Marketplace::N11 => "n11",
            Marketplace::Ciceksepeti => "ciceksepeti",
            Marketplace::Etsy => "etsy",
            Marketplace::Shopify => "shopify",
        }
    }

    pub fn from_slug(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "trendyol" => Some(Marketplace::Trendyol),
            "hepsiburada" => Some(Marketplace::Hepsiburada),
            "amazon" => Some(Marketplace::Amazon),
            "ikas" => Some(Marketplace::Ikas),
            "n11" => Some(Marketplace::N11),
            "ciceksepeti" | "cicek_sepeti" => Some(Marketplace::Ciceksepeti),
            "etsy" => Some(Marketplace::Etsy),
            "shopify" => Some(Marketplace::Shopify),
            _ => None,
        }
    }
}

/// Canonical product shape consumed by every adapter's create/update path and
/// produced by every fetch path. `raw` preserves marketplace-specific
/// metadata from fetches without polluting the shared fields.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub sku: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    pub stock: u32,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub raw: Option<Value>,
}

/// Canonical order shape, normalized from each marketplace's native orders.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub status: crate::orders::OrderStatus,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub items: Vec<OrderLine>,
    pub total: f64,
    pub currency: String,
    #[serde(default)]
    pub placed_at: Option<DateTime<Utc>>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: String,
    #[serde(default)]
    pub title: Option<String>,
    pub quantity: u32,
    pub unit_price: f64,
}

/// One node of the canonical category tree. `path` is the root-to-node name
/// sequence; leaves carry an empty `children` list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryNode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub children: Vec<CategoryNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_attributes: Vec<String>,
}

/// Required/optional attribute schema for one category, used to drive
/// dynamic attribute forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryAttribute {
    pub id: String,
    pub name: String,
    pub required: bool,
    pub allows_custom: bool,
    #[serde(default)]
    pub values: Vec<AttributeValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeValue {
    pub id: String,
    pub name: String,
}

/// Result of a remote create: either/both of a marketplace listing id and a
/// batch tracking id, depending on what the marketplace returns.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReceipt {
    #[serde(default)]
    pub remote_id: Option<String>,
    #[serde(default)]
    pub tracking_id: Option<String>,
}

/// Partial update: only supplied fields are sent to the marketplace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductUpdate {
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub stock: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockLine {
    pub sku: String,
    pub quantity: u32,
}

/// Per-item outcome of a bulk operation. The batch itself never fails
/// atomically; it accumulates one of these per input item.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub item_id: String,
    pub item_label: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of `POST /marketplaces/{marketplace}`: one action plus either a
/// stored connection reference or inline credentials for pre-save testing.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchRequest {
    pub action: String,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub credentials: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub params: Value,
}

/// Body of the synchronous bulk endpoint and of enqueued bulk jobs.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkRequest {
    pub action: String,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub credentials: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub stock: Vec<StockLine>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marketplace_slug_round_trip() {
        for marketplace in Marketplace::ALL {
            assert_eq!(Marketplace::from_slug(marketplace.slug()), Some(marketplace));
        }
        assert_eq!(Marketplace::from_slug(" N11 "), Some(Marketplace::N11));
        assert_eq!(Marketplace::from_slug("ebay"), None);
    }

    #[test]
    fn product_optional_fields_skipped() {
        let product = Product {
            sku: "SKU-1".into(),
            title: "Mug".into(),
            description: None,
            price: 49.9,
            stock: 5,
            category_id: None,
            brand: None,
            images: vec![],
            raw: None,
        };
        let value = serde_json::to_value(&product).unwrap();
        assert!(value.get("description").is_none());
        assert!(value.get("brand").is_none());
    }

    #[test]
    fn dispatch_request_defaults() {
        let request: DispatchRequest =
            serde_json::from_str(r#"{"action":"fetch_categories"}"#).unwrap();
        assert!(request.connection_id.is_none());
        assert!(request.credentials.is_none());
        assert!(request.params.is_null());
    }
}
