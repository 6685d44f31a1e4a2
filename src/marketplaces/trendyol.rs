//! Trendyol supplier API: Basic-Auth REST+JSON under a seller-scoped root.
//! The supplier id rides in both the URL and the `User-Agent` header
//! (`"{seller_id} - SelfIntegration"`), which Trendyol uses to attribute
//! integration traffic.

use crate::credentials::Credentials;
use crate::error::{SyncError, SyncResult};
use crate::http::build_client;
use crate::marketplaces::check;
use crate::models::{
    AttributeValue, CategoryAttribute, CategoryNode, CreateReceipt, Marketplace, Order, OrderLine,
    Product, ProductUpdate, StockLine,
};
use crate::orders::{self, PushOutcome, StatusPush};
use crate::categories::{self, FlatCategory};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;

static ROOT: Lazy<String> = Lazy::new(|| {
    std::env::var("TRENDYOL_API_ROOT")
        .unwrap_or_else(|_| "https://api.trendyol.com/sapigw".to_string())
});

const DEFAULT_VAT_RATE: u8 = 18;
const DEFAULT_CARGO_COMPANY_ID: u32 = 10;
const PLACEHOLDER_IMAGE: &str = "https://cdn.dsmcdn.com/assets/placeholder-product.jpg";

struct Session {
    auth: String,
    seller_id: String,
}

// the auth header embeds the api key pair; keep it out of Debug output
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("seller_id", &self.seller_id)
            .finish_non_exhaustive()
    }
}

fn session(credentials: &Credentials) -> SyncResult<Session> {
    credentials.validate(Marketplace::Trendyol)?;
    let api_key = credentials.require("api_key")?;
    let api_secret = credentials.require("api_secret")?;
    let seller_id = credentials.require("seller_id")?;
    Ok(Session {
        auth: format!("Basic {}", BASE64.encode(format!("{api_key}:{api_secret}"))),
        seller_id: seller_id.to_string(),
    })
}

fn request(method: reqwest::Method, url: String, session: &Session) -> reqwest::RequestBuilder {
    build_client()
        .request(method, url)
        .header("Authorization", &session.auth)
        .header(
            "User-Agent",
            format!("{} - SelfIntegration", session.seller_id),
        )
}

pub async fn test_connection(credentials: &Credentials) -> SyncResult<()> {
    let session = session(credentials)?;
    let url = format!("{}/suppliers/{}/addresses", *ROOT, session.seller_id);
    let response = request(reqwest::Method::GET, url, &session)
        .send()
        .await
        .map_err(|err| SyncError::from_transport("Trendyol connection test", &err))?;
    check("Trendyol connection test", response).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct NativeCategoryTree {
    #[serde(default)]
    categories: Vec<NativeCategory>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeCategory {
    id: u64,
    name: String,
    #[serde(default)]
    sub_categories: Vec<NativeCategory>,
}

pub async fn fetch_categories(credentials: &Credentials) -> SyncResult<Vec<CategoryNode>> {
    let session = session(credentials)?;
    let url = format!("{}/product-categories", *ROOT);
    let response = request(reqwest::Method::GET, url, &session)
        .send()
        .await
        .map_err(|err| SyncError::from_transport("Trendyol category fetch", &err))?;
    let response = check("Trendyol category fetch", response).await?;
    let payload: NativeCategoryTree = response
        .json()
        .await
        .map_err(|_| SyncError::fetch("Trendyol category response could not be read"))?;

    let mut flat = Vec::new();
    for category in &payload.categories {
        flatten_native(category, None, &mut flat);
    }
    Ok(categories::build_tree(flat))
}

fn flatten_native(category: &NativeCategory, parent: Option<&str>, out: &mut Vec<FlatCategory>) {
    let id = category.id.to_string();
    out.push(FlatCategory::new(id.clone(), category.name.clone(), parent));
    for child in &category.sub_categories {
        flatten_native(child, Some(&id), out);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeAttributeList {
    #[serde(default)]
    category_attributes: Vec<NativeCategoryAttribute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeCategoryAttribute {
    attribute: NativeAttributeRef,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    allow_custom: bool,
    #[serde(default)]
    attribute_values: Vec<NativeAttributeValue>,
}

#[derive(Debug, Deserialize)]
struct NativeAttributeRef {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct NativeAttributeValue {
    id: u64,
    name: String,
}

pub async fn fetch_category_attributes(
    credentials: &Credentials,
    category_id: &str,
) -> SyncResult<Vec<CategoryAttribute>> {
    let session = session(credentials)?;
    let url = format!(
        "{}/product-categories/{}/attributes",
        *ROOT,
        urlencoding::encode(category_id)
    );
    let response = request(reqwest::Method::GET, url, &session)
        .send()
        .await
        .map_err(|err| SyncError::from_transport("Trendyol attribute fetch", &err))?;
    let response = check("Trendyol attribute fetch", response).await?;
    let payload: NativeAttributeList = response
        .json()
        .await
        .map_err(|_| SyncError::fetch("Trendyol attribute response could not be read"))?;
    Ok(payload
        .category_attributes
        .into_iter()
        .map(|entry| CategoryAttribute {
            id: entry.attribute.id.to_string(),
            name: entry.attribute.name,
            required: entry.required,
            allows_custom: entry.allow_custom,
            values: entry
                .attribute_values
                .into_iter()
                .map(|value| AttributeValue {
                    id: value.id.to_string(),
                    name: value.name,
                })
                .collect(),
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct NativeProductPage {
    #[serde(default)]
    content: Vec<NativeProduct>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeProduct {
    barcode: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    sale_price: f64,
    #[serde(default)]
    quantity: u32,
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    category_name: Option<String>,
    #[serde(default)]
    images: Vec<NativeImage>,
    #[serde(default)]
    product_main_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NativeImage {
    url: String,
}

pub async fn fetch_products(
    credentials: &Credentials,
    page: u32,
    page_size: u32,
) -> SyncResult<Vec<Product>> {
    let session = session(credentials)?;
    let url = format!("{}/suppliers/{}/products", *ROOT, session.seller_id);
    let response = request(reqwest::Method::GET, url, &session)
        .query(&[("page", page.to_string()), ("size", page_size.to_string())])
        .send()
        .await
        .map_err(|err| SyncError::from_transport("Trendyol product fetch", &err))?;
    let response = check("Trendyol product fetch", response).await?;
    let payload: NativeProductPage = response
        .json()
        .await
        .map_err(|_| SyncError::fetch("Trendyol product response could not be read"))?;
    Ok(payload.content.into_iter().map(normalize_product).collect())
}

fn normalize_product(native: NativeProduct) -> Product {
    let raw = json!({
        "product_main_id": native.product_main_id,
        "category_name": native.category_name,
    });
    Product {
        sku: native.barcode,
        title: native.title,
        description: native.description,
        price: native.sale_price,
        stock: native.quantity,
        category_id: None,
        brand: native.brand,
        images: native.images.into_iter().map(|image| image.url).collect(),
        raw: Some(raw),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateItem {
    barcode: String,
    title: String,
    product_main_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category_id: Option<String>,
    quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    list_price: f64,
    sale_price: f64,
    vat_rate: u8,
    cargo_company_id: u32,
    images: Vec<ImagePayload>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attributes: Vec<AttributePayload>,
}

#[derive(Debug, Serialize)]
struct ImagePayload {
    url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttributePayload {
    attribute_id: u32,
    attribute_value_id: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchReceipt {
    batch_request_id: Option<String>,
}

/// Map the canonical product onto Trendyol's create payload. Missing optional
/// fields get degraded-but-valid defaults (placeholder image, VAT 18, default
/// cargo company) so the marketplace accepts the submission.
fn create_item(product: &Product) -> CreateItem {
    let images = if product.images.is_empty() {
        vec![ImagePayload {
            url: PLACEHOLDER_IMAGE.to_string(),
        }]
    } else {
        product
            .images
            .iter()
            .map(|url| ImagePayload { url: url.clone() })
            .collect()
    };
    CreateItem {
        barcode: product.sku.clone(),
        title: product.title.clone(),
        product_main_id: product.sku.clone(),
        brand: product.brand.clone(),
        category_id: product.category_id.clone(),
        quantity: product.stock,
        description: product.description.clone(),
        list_price: product.price,
        sale_price: product.price,
        vat_rate: DEFAULT_VAT_RATE,
        cargo_company_id: DEFAULT_CARGO_COMPANY_ID,
        images,
        attributes: variant_attributes(product),
    }
}

pub async fn create_product(
    credentials: &Credentials,
    product: &Product,
) -> SyncResult<CreateReceipt> {
    push_products(credentials, std::slice::from_ref(product)).await
}

/// Trendyol's batch create endpoint; a whole product set goes out in one
/// request and is tracked by the returned `batchRequestId`.
pub async fn push_products(
    credentials: &Credentials,
    products: &[Product],
) -> SyncResult<CreateReceipt> {
    let session = session(credentials)?;
    let url = format!("{}/suppliers/{}/v2/products", *ROOT, session.seller_id);
    let items: Vec<CreateItem> = products.iter().map(create_item).collect();
    let response = request(reqwest::Method::POST, url, &session)
        .json(&json!({ "items": items }))
        .send()
        .await
        .map_err(|err| SyncError::from_transport("Trendyol product push", &err))?;
    let response = check("Trendyol product push", response).await?;
    let receipt: BatchReceipt = response
        .json()
        .await
        .map_err(|_| SyncError::fetch("Trendyol batch receipt could not be read"))?;
    Ok(CreateReceipt {
        remote_id: None,
        tracking_id: receipt.batch_request_id,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PriceInventoryItem {
    barcode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    quantity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sale_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    list_price: Option<f64>,
}

pub async fn update_product(
    credentials: &Credentials,
    sku: &str,
    updates: &ProductUpdate,
) -> SyncResult<()> {
    let items = vec![PriceInventoryItem {
        barcode: sku.to_string(),
        quantity: updates.stock,
        sale_price: updates.price,
        list_price: updates.price,
    }];
    send_price_inventory(credentials, items).await
}

/// Native batch stock endpoint.
pub async fn bulk_update_stock(credentials: &Credentials, items: &[StockLine]) -> SyncResult<()> {
    let items: Vec<PriceInventoryItem> = items
        .iter()
        .map(|line| PriceInventoryItem {
            barcode: line.sku.clone(),
            quantity: Some(line.quantity),
            sale_price: None,
            list_price: None,
        })
        .collect();
    send_price_inventory(credentials, items).await
}

async fn send_price_inventory(
    credentials: &Credentials,
    items: Vec<PriceInventoryItem>,
) -> SyncResult<()> {
    let session = session(credentials)?;
    let url = format!(
        "{}/suppliers/{}/products/price-and-inventory",
        *ROOT, session.seller_id
    );
    let response = request(reqwest::Method::POST, url, &session)
        .json(&json!({ "items": items }))
        .send()
        .await
        .map_err(|err| SyncError::from_transport("Trendyol stock/price update", &err))?;
    check("Trendyol stock/price update", response).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct NativeOrderPage {
    #[serde(default)]
    content: Vec<NativeOrder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeOrder {
    order_number: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    customer_first_name: Option<String>,
    #[serde(default)]
    customer_last_name: Option<String>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    lines: Vec<NativeOrderLine>,
    #[serde(default)]
    total_price: f64,
    #[serde(default)]
    currency_code: Option<String>,
    #[serde(default)]
    order_date: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeOrderLine {
    #[serde(default)]
    merchant_sku: Option<String>,
    #[serde(default)]
    product_name: Option<String>,
    #[serde(default)]
    quantity: u32,
    #[serde(default)]
    price: f64,
}

pub async fn fetch_orders(
    credentials: &Credentials,
    since: Option<DateTime<Utc>>,
    status: Option<&str>,
) -> SyncResult<Vec<Order>> {
    let session = session(credentials)?;
    let url = format!("{}/suppliers/{}/orders", *ROOT, session.seller_id);
    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(since) = since {
        query.push(("startDate", since.timestamp_millis().to_string()));
    }
    if let Some(status) = status {
        query.push(("status", status.to_string()));
    }
    let response = request(reqwest::Method::GET, url, &session)
        .query(&query)
        .send()
        .await
        .map_err(|err| SyncError::from_transport("Trendyol order fetch", &err))?;
    let response = check("Trendyol order fetch", response).await?;
    let payload: NativeOrderPage = response
        .json()
        .await
        .map_err(|_| SyncError::fetch("Trendyol order response could not be read"))?;
    Ok(payload.content.into_iter().map(normalize_order).collect())
}

fn normalize_order(native: NativeOrder) -> Order {
    let customer_name = match (&native.customer_first_name, &native.customer_last_name) {
        (Some(first), Some(last)) => Some(format!("{first} {last}")),
        (Some(first), None) => Some(first.clone()),
        (None, Some(last)) => Some(last.clone()),
        (None, None) => None,
    };
    Order {
        id: native.order_number,
        status: orders::canonical_status(&native.status),
        customer_name,
        customer_email: native.customer_email,
        items: native
            .lines
            .into_iter()
            .map(|line| OrderLine {
                sku: line.merchant_sku.unwrap_or_default(),
                title: line.product_name,
                quantity: line.quantity,
                unit_price: line.price,
            })
            .collect(),
        total: native.total_price,
        currency: native.currency_code.unwrap_or_else(|| "TRY".to_string()),
        placed_at: native
            .order_date
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
    }
}

pub async fn push_order_status(
    credentials: &Credentials,
    push: &StatusPush,
) -> SyncResult<PushOutcome> {
    let Some(native) = orders::native_status(Marketplace::Trendyol, push.status) else {
        return Ok(PushOutcome::skipped());
    };
    let session = session(credentials)?;
    let url = format!(
        "{}/suppliers/{}/shipment-packages/{}",
        *ROOT,
        session.seller_id,
        urlencoding::encode(&push.order_id)
    );
    let mut body = json!({ "status": native });
    if let Some(tracking) = &push.tracking_number {
        body["trackingNumber"] = json!(tracking);
    }
    let response = request(reqwest::Method::PUT, url, &session)
        .json(&body)
        .send()
        .await
        .map_err(|err| SyncError::from_transport("Trendyol order status push", &err))?;
    check("Trendyol order status push", response).await?;
    Ok(PushOutcome::pushed(native))
}

/// Trendyol expects numeric attribute value ids for variant attributes; the
/// common color/size vocabulary is a fixed lookup.
const COLOR_ATTRIBUTE_ID: u32 = 47;
const SIZE_ATTRIBUTE_ID: u32 = 338;

pub(crate) fn color_value_id(name: &str) -> Option<u32> {
    match name.trim().to_lowercase().as_str() {
        "siyah" | "black" => Some(686230),
        "beyaz" | "white" => Some(686234),
        "kırmızı" | "kirmizi" | "red" => Some(686239),
        "mavi" | "blue" => Some(686241),
        "yeşil" | "yesil" | "green" => Some(686249),
        "sarı" | "sari" | "yellow" => Some(686253),
        "gri" | "grey" | "gray" => Some(686255),
        "lacivert" | "navy" => Some(686258),
        "pembe" | "pink" => Some(686261),
        "kahverengi" | "brown" => Some(686265),
        _ => None,
    }
}

pub(crate) fn size_value_id(name: &str) -> Option<u32> {
    match name.trim().to_uppercase().as_str() {
        "XS" => Some(845001),
        "S" => Some(845002),
        "M" => Some(845003),
        "L" => Some(845004),
        "XL" => Some(845005),
        "XXL" => Some(845006),
        _ => None,
    }
}

fn variant_attributes(product: &Product) -> Vec<AttributePayload> {
    let mut attributes = Vec::new();
    if let Some(raw) = &product.raw {
        if let Some(color) = raw.get("color").and_then(|value| value.as_str())
            && let Some(value_id) = color_value_id(color)
        {
            attributes.push(AttributePayload {
                attribute_id: COLOR_ATTRIBUTE_ID,
                attribute_value_id: value_id,
            });
        }
        if let Some(size) = raw.get("size").and_then(|value| value.as_str())
            && let Some(value_id) = size_value_id(size)
        {
            attributes.push(AttributePayload {
                attribute_id: SIZE_ATTRIBUTE_ID,
                attribute_value_id: value_id,
            });
        }
    }
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn product(images: Vec<String>) -> Product {
        Product {
            sku: "BAR-1".into(),
            title: "Kupa".into(),
            description: None,
            price: 120.0,
            stock: 7,
            category_id: Some("411".into()),
            brand: Some("Atölye".into()),
            images,
            raw: Some(json!({"color": "Siyah", "size": "M"})),
        }
    }

    #[test]
    fn missing_credentials_fail_before_network() {
        let creds = Credentials::from(BTreeMap::from([(
            "api_key".to_string(),
            "k".to_string(),
        )]));
        let err = session(&creds).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigMissing);
        assert!(err.message().contains("api_secret"));
        assert!(err.message().contains("seller_id"));
    }

    #[test]
    fn session_debug_hides_auth_header() {
        let creds = Credentials::from(BTreeMap::from([
            ("api_key".to_string(), "key".to_string()),
            ("api_secret".to_string(), "top-secret".to_string()),
            ("seller_id".to_string(), "42".to_string()),
        ]));
        let session = session(&creds).unwrap();
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("Basic"));
        assert!(!rendered.contains("top-secret"));
        assert!(rendered.contains("42"));
    }

    #[test]
    fn create_item_defaults_placeholder_image_and_vat() {
        let item = create_item(&product(vec![]));
        assert_eq!(item.images.len(), 1);
        assert_eq!(item.images[0].url, PLACEHOLDER_IMAGE);
        assert_eq!(item.vat_rate, DEFAULT_VAT_RATE);
        assert_eq!(item.cargo_company_id, DEFAULT_CARGO_COMPANY_ID);
        assert_eq!(item.sale_price, 120.0);
    }

    #[test]
    fn create_item_keeps_supplied_images() {
        let item = create_item(&product(vec!["https://cdn.example/a.jpg".into()]));
        assert_eq!(item.images[0].url, "https://cdn.example/a.jpg");
    }

    #[test]
    fn variant_attributes_use_numeric_lookup() {
        let attributes = variant_attributes(&product(vec![]));
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[0].attribute_id, COLOR_ATTRIBUTE_ID);
        assert_eq!(attributes[0].attribute_value_id, 686230);
        assert_eq!(attributes[1].attribute_value_id, size_value_id("M").unwrap());
    }

    #[test]
    fn unknown_color_is_omitted_not_invented() {
        let mut item = product(vec![]);
        item.raw = Some(json!({"color": "Turkuaz Benekli"}));
        assert!(variant_attributes(&item).is_empty());
    }

    #[test]
    fn nested_categories_flatten_with_parents() {
        let native = NativeCategory {
            id: 1,
            name: "Giyim".into(),
            sub_categories: vec![NativeCategory {
                id: 2,
                name: "Elbise".into(),
                sub_categories: vec![],
            }],
        };
        let mut flat = Vec::new();
        flatten_native(&native, None, &mut flat);
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[1].parent_id.as_deref(), Some("1"));
        let tree = categories::build_tree(flat);
        assert_eq!(tree[0].children[0].path, vec!["Giyim", "Elbise"]);
    }

    #[test]
    fn order_normalization_joins_name_and_epoch_millis() {
        let native = NativeOrder {
            order_number: "TY-9".into(),
            status: "Picking".into(),
            customer_first_name: Some("Ayşe".into()),
            customer_last_name: Some("Demir".into()),
            customer_email: None,
            lines: vec![NativeOrderLine {
                merchant_sku: Some("BAR-1".into()),
                product_name: Some("Kupa".into()),
                quantity: 2,
                price: 120.0,
            }],
            total_price: 240.0,
            currency_code: None,
            order_date: Some(1_700_000_000_000),
        };
        let order = normalize_order(native);
        assert_eq!(order.customer_name.as_deref(), Some("Ayşe Demir"));
        assert_eq!(order.status, crate::orders::OrderStatus::Processing);
        assert_eq!(order.currency, "TRY");
        assert!(order.placed_at.is_some());
    }
}
