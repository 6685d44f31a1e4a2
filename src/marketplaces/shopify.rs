//! Shopify Admin REST adapter. Requests go to the merchant's own
//! `{shop_domain}` host with an `X-Shopify-Access-Token` header; there is
//! no marketplace-wide category API, so categories come from the static
//! fallback tree.

use crate::credentials::Credentials;
use crate::error::{SyncError, SyncResult};
use crate::http::build_client;
use crate::marketplaces::check;
use crate::models::{
    CategoryAttribute, CategoryNode, CreateReceipt, Marketplace, Order, OrderLine, Product,
    ProductUpdate, StockLine,
};
use crate::orders::{self, PushOutcome, StatusPush};
use crate::categories;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{Value, json};

static API_VERSION: Lazy<String> =
    Lazy::new(|| std::env::var("SHOPIFY_API_VERSION").unwrap_or_else(|_| "2024-07".to_string()));

struct Session {
    base: String,
    token: String,
}

impl Session {
    fn open(credentials: &Credentials) -> SyncResult<Self> {
        credentials.validate(Marketplace::Shopify)?;
        let domain = shop_host(credentials.require("shop_domain")?);
        Ok(Self {
            base: format!("https://{domain}/admin/api/{}", *API_VERSION),
            token: credentials.require("access_token")?.to_string(),
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("X-Shopify-Access-Token", &self.token)
            .header("Accept", "application/json")
    }
}

/// Accepts "store", "store.myshopify.com", or a full URL.
fn shop_host(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    if trimmed.contains('.') {
        trimmed.to_string()
    } else {
        format!("{trimmed}.myshopify.com")
    }
}

pub async fn test_connection(credentials: &Credentials) -> SyncResult<()> {
    let session = Session::open(credentials)?;
    let what = "Shopify shop lookup";
    let response = session
        .request(build_client().get(format!("{}/shop.json", session.base)))
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    check(what, response).await?;
    Ok(())
}

/// Shopify has no seller-facing category taxonomy endpoint on the REST
/// surface; product types are free-form. The static tree keeps the mapping
/// UI usable.
pub async fn fetch_categories(credentials: &Credentials) -> SyncResult<Vec<CategoryNode>> {
    credentials.validate(Marketplace::Shopify)?;
    Ok(categories::fallback_tree(Marketplace::Shopify))
}

pub async fn fetch_category_attributes(
    credentials: &Credentials,
    _category_id: &str,
) -> SyncResult<Vec<CategoryAttribute>> {
    credentials.validate(Marketplace::Shopify)?;
    Ok(Vec::new())
}

#[derive(Deserialize)]
struct NativeProduct {
    id: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body_html: Option<String>,
    #[serde(default)]
    vendor: Option<String>,
    #[serde(default)]
    product_type: Option<String>,
    #[serde(default)]
    variants: Vec<NativeVariant>,
    #[serde(default)]
    images: Vec<NativeImage>,
}

#[derive(Deserialize)]
struct NativeVariant {
    id: u64,
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    inventory_quantity: i64,
    #[serde(default)]
    inventory_item_id: Option<u64>,
}

#[derive(Deserialize)]
struct NativeImage {
    #[serde(default)]
    src: Option<String>,
}

#[derive(Deserialize)]
struct ProductPage {
    #[serde(default)]
    products: Vec<NativeProduct>,
}

pub async fn fetch_products(credentials: &Credentials, limit: u32) -> SyncResult<Vec<Product>> {
    let session = Session::open(credentials)?;
    let what = "Shopify products";
    let response = session
        .request(build_client().get(format!("{}/products.json", session.base)))
        .query(&[("limit", limit.to_string())])
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: ProductPage = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Shopify product response was not valid JSON"))?;
    Ok(body.products.into_iter().map(normalize_product).collect())
}

fn normalize_product(native: NativeProduct) -> Product {
    let variant = native.variants.first();
    Product {
        sku: variant
            .and_then(|v| v.sku.clone())
            .filter(|sku| !sku.is_empty())
            .unwrap_or_else(|| native.id.to_string()),
        title: native.title.unwrap_or_default(),
        description: native.body_html,
        price: variant
            .and_then(|v| v.price.as_deref())
            .and_then(|price| price.parse().ok())
            .unwrap_or(0.0),
        stock: variant
            .map(|v| v.inventory_quantity.max(0) as u32)
            .unwrap_or(0),
        category_id: native.product_type.filter(|t| !t.is_empty()),
        brand: native.vendor,
        images: native.images.into_iter().filter_map(|image| image.src).collect(),
        raw: Some(json!({
            "shopify_product_id": native.id,
            "variant_id": variant.map(|v| v.id),
            "inventory_item_id": variant.and_then(|v| v.inventory_item_id),
        })),
    }
}

pub async fn create_product(
    credentials: &Credentials,
    product: &Product,
) -> SyncResult<CreateReceipt> {
    let session = Session::open(credentials)?;
    let what = "Shopify product create";
    let payload = json!({
        "product": {
            "title": product.title,
            "body_html": product.description.clone().unwrap_or_default(),
            "vendor": product.brand.clone().unwrap_or_default(),
            "product_type": product.category_id.clone().unwrap_or_default(),
            "variants": [{
                "sku": product.sku,
                "price": format!("{:.2}", product.price),
                "inventory_quantity": product.stock,
                "inventory_management": "shopify",
            }],
            "images": product
                .images
                .iter()
                .map(|src| json!({ "src": src }))
                .collect::<Vec<_>>(),
        }
    });
    let response = session
        .request(build_client().post(format!("{}/products.json", session.base)))
        .json(&payload)
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: Value = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Shopify create response was not valid JSON"))?;
    Ok(CreateReceipt {
        remote_id: body
            .pointer("/product/id")
            .and_then(Value::as_u64)
            .map(|id| id.to_string()),
        tracking_id: None,
    })
}

/// Resolve a SKU to its owning product and first variant. Shopify updates
/// address variants, not SKUs.
async fn find_variant(session: &Session, sku: &str) -> SyncResult<(u64, u64)> {
    let what = "Shopify variant lookup";
    let response = session
        .request(build_client().get(format!("{}/products.json", session.base)))
        .query(&[("limit", "250"), ("fields", "id,variants")])
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: ProductPage = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Shopify product response was not valid JSON"))?;
    for product in body.products {
        for variant in &product.variants {
            if variant.sku.as_deref() == Some(sku) {
                return Ok((product.id, variant.id));
            }
        }
    }
    Err(SyncError::fetch(format!(
        "no Shopify variant matches SKU {sku}"
    )))
}

pub async fn update_product(
    credentials: &Credentials,
    sku: &str,
    updates: &ProductUpdate,
) -> SyncResult<()> {
    if updates.price.is_none() && updates.stock.is_none() {
        return Ok(());
    }
    let session = Session::open(credentials)?;
    let (_, variant_id) = find_variant(&session, sku).await?;
    let what = "Shopify variant update";
    let mut variant = json!({ "id": variant_id });
    if let Some(price) = updates.price {
        variant["price"] = json!(format!("{price:.2}"));
    }
    if let Some(stock) = updates.stock {
        variant["inventory_quantity"] = json!(stock);
    }
    let response = session
        .request(build_client().put(format!(
            "{}/variants/{variant_id}.json",
            session.base
        )))
        .json(&json!({ "variant": variant }))
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    check(what, response).await?;
    Ok(())
}

/// No native batch endpoint on the REST surface; routed through the shared
/// batch runner.
pub async fn bulk_update_stock(credentials: &Credentials, line: &StockLine) -> SyncResult<()> {
    update_product(
        credentials,
        &line.sku,
        &ProductUpdate {
            price: None,
            stock: Some(line.quantity),
        },
    )
    .await
}

#[derive(Deserialize)]
struct NativeOrder {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    financial_status: Option<String>,
    #[serde(default)]
    fulfillment_status: Option<String>,
    #[serde(default)]
    cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    customer: Option<NativeCustomer>,
    #[serde(default)]
    line_items: Vec<NativeLineItem>,
    #[serde(default)]
    total_price: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct NativeCustomer {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

#[derive(Deserialize)]
struct NativeLineItem {
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    quantity: u32,
    #[serde(default)]
    price: Option<String>,
}

#[derive(Deserialize)]
struct OrderPage {
    #[serde(default)]
    orders: Vec<NativeOrder>,
}

pub async fn fetch_orders(credentials: &Credentials, limit: u32) -> SyncResult<Vec<Order>> {
    let session = Session::open(credentials)?;
    let what = "Shopify orders";
    let response = session
        .request(build_client().get(format!("{}/orders.json", session.base)))
        .query(&[("limit", limit.to_string()), ("status", "any".to_string())])
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: OrderPage = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Shopify order response was not valid JSON"))?;
    Ok(body.orders.into_iter().map(normalize_order).collect())
}

// fulfillment state wins over payment state; a cancelled order is
// cancelled no matter what else is set
fn order_status(order: &NativeOrder) -> crate::orders::OrderStatus {
    if order.cancelled_at.is_some() {
        return crate::orders::OrderStatus::Cancelled;
    }
    if let Some(fulfillment) = order.fulfillment_status.as_deref() {
        return orders::canonical_status(fulfillment);
    }
    orders::canonical_status(order.financial_status.as_deref().unwrap_or(""))
}

fn normalize_order(native: NativeOrder) -> Order {
    let status = order_status(&native);
    let customer_name = native.customer.as_ref().and_then(|customer| {
        let full = [
            customer.first_name.as_deref().unwrap_or(""),
            customer.last_name.as_deref().unwrap_or(""),
        ]
        .join(" ")
        .trim()
        .to_string();
        (!full.is_empty()).then_some(full)
    });
    Order {
        id: native.name.clone().unwrap_or_else(|| native.id.to_string()),
        status,
        customer_name,
        customer_email: native.email,
        items: native
            .line_items
            .into_iter()
            .map(|item| OrderLine {
                sku: item.sku.unwrap_or_default(),
                title: item.title,
                quantity: item.quantity,
                unit_price: item
                    .price
                    .as_deref()
                    .and_then(|price| price.parse().ok())
                    .unwrap_or(0.0),
            })
            .collect(),
        total: native
            .total_price
            .as_deref()
            .and_then(|price| price.parse().ok())
            .unwrap_or(0.0),
        currency: native.currency.unwrap_or_else(|| "USD".to_string()),
        placed_at: native.created_at,
    }
}

pub async fn push_order_status(
    credentials: &Credentials,
    push: &StatusPush,
) -> SyncResult<PushOutcome> {
    let Some(native) = orders::native_status(Marketplace::Shopify, push.status) else {
        return Ok(PushOutcome::skipped());
    };
    let session = Session::open(credentials)?;
    match push.status {
        crate::orders::OrderStatus::Cancelled => {
            let what = "Shopify order cancel";
            let response = session
                .request(build_client().post(format!(
                    "{}/orders/{}/cancel.json",
                    session.base, push.order_id
                )))
                .json(&json!({}))
                .send()
                .await
                .map_err(|err| SyncError::from_transport(what, &err))?;
            check(what, response).await?;
        }
        _ => {
            // shipped: create a fulfillment carrying the tracking info
            let what = "Shopify fulfillment create";
            let mut fulfillment = json!({
                "notify_customer": true,
                "line_items_by_fulfillment_order": [],
            });
            if let Some(tracking) = &push.tracking_number {
                fulfillment["tracking_info"] = json!({
                    "number": tracking,
                    "company": push.carrier.clone().unwrap_or_default(),
                });
            }
            let response = session
                .request(build_client().post(format!("{}/fulfillments.json", session.base)))
                .json(&json!({ "fulfillment": fulfillment }))
                .send()
                .await
                .map_err(|err| SyncError::from_transport(what, &err))?;
            check(what, response).await?;
        }
    }
    Ok(PushOutcome::pushed(native))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn creds() -> Credentials {
        Credentials::from(BTreeMap::from([
            ("shop_domain".to_string(), "pazarstore".to_string()),
            ("access_token".to_string(), "shpat_x".to_string()),
        ]))
    }

    #[test]
    fn shop_host_accepts_bare_and_full_forms() {
        assert_eq!(shop_host("pazarstore"), "pazarstore.myshopify.com");
        assert_eq!(
            shop_host("https://pazarstore.myshopify.com/"),
            "pazarstore.myshopify.com"
        );
        assert_eq!(shop_host("shop.example.com"), "shop.example.com");
    }

    #[test]
    fn session_base_carries_api_version() {
        let session = Session::open(&creds()).unwrap();
        assert!(session.base.starts_with("https://pazarstore.myshopify.com/admin/api/"));
    }

    #[tokio::test]
    async fn missing_token_fails_before_network() {
        let bundle = Credentials::from(BTreeMap::from([(
            "shop_domain".to_string(),
            "pazarstore".to_string(),
        )]));
        let err = test_connection(&bundle).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigMissing);
        assert!(err.message().contains("access_token"));
    }

    #[test]
    fn product_uses_first_variant_and_keeps_ids_in_raw() {
        let native: NativeProduct = serde_json::from_value(json!({
            "id": 10,
            "title": "Mug",
            "vendor": "Pazar",
            "variants": [{
                "id": 20,
                "sku": "MUG-1",
                "price": "24.50",
                "inventory_quantity": 9,
                "inventory_item_id": 30
            }],
            "images": [{ "src": "https://cdn.shopify.com/a.jpg" }]
        }))
        .unwrap();
        let product = normalize_product(native);
        assert_eq!(product.sku, "MUG-1");
        assert_eq!(product.price, 24.5);
        assert_eq!(product.stock, 9);
        let raw = product.raw.unwrap();
        assert_eq!(raw["variant_id"], json!(20));
        assert_eq!(raw["inventory_item_id"], json!(30));
    }

    #[test]
    fn negative_inventory_clamps_to_zero() {
        let native: NativeProduct = serde_json::from_value(json!({
            "id": 10,
            "variants": [{ "id": 20, "inventory_quantity": -4 }]
        }))
        .unwrap();
        assert_eq!(normalize_product(native).stock, 0);
    }

    #[test]
    fn cancelled_at_overrides_other_statuses() {
        let native: NativeOrder = serde_json::from_value(json!({
            "id": 1,
            "financial_status": "paid",
            "fulfillment_status": "fulfilled",
            "cancelled_at": "2026-01-05T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(order_status(&native), crate::orders::OrderStatus::Cancelled);
    }

    #[test]
    fn order_prefers_display_name_and_parses_totals() {
        let native: NativeOrder = serde_json::from_value(json!({
            "id": 1,
            "name": "#1001",
            "financial_status": "paid",
            "total_price": "99.90",
            "currency": "TRY",
            "customer": { "first_name": "Ayşe", "last_name": "Yılmaz" },
            "line_items": [{ "sku": "MUG-1", "quantity": 2, "price": "24.50" }]
        }))
        .unwrap();
        let order = normalize_order(native);
        assert_eq!(order.id, "#1001");
        assert_eq!(order.status, crate::orders::OrderStatus::Processing);
        assert_eq!(order.customer_name.as_deref(), Some("Ayşe Yılmaz"));
        assert_eq!(order.total, 99.9);
        assert_eq!(order.currency, "TRY");
    }

    #[tokio::test]
    async fn fallback_categories_need_valid_credentials() {
        let tree = fetch_categories(&creds()).await.unwrap();
        assert!(!tree.is_empty());
        let err = fetch_categories(&Credentials::from(BTreeMap::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigMissing);
    }
}
