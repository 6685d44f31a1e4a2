//! Hepsiburada adapter. Three hosts share one Basic credential pair:
//! the catalog service (mpop) for categories and product import, the
//! listing service for stock/price state, and the OMS service for orders.

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
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

static MPOP_ROOT: Lazy<String> = Lazy::new(|| {
    std::env::var("HEPSIBURADA_MPOP_ROOT")
        .unwrap_or_else(|_| "https://mpop.hepsiburada.com".to_string())
});

static LISTING_ROOT: Lazy<String> = Lazy::new(|| {
    std::env::var("HEPSIBURADA_LISTING_ROOT")
        .unwrap_or_else(|_| "https://listing-external.hepsiburada.com".to_string())
});

static OMS_ROOT: Lazy<String> = Lazy::new(|| {
    std::env::var("HEPSIBURADA_OMS_ROOT")
        .unwrap_or_else(|_| "https://oms-external.hepsiburada.com".to_string())
});

struct Session {
    auth: String,
    merchant_id: String,
    user_agent: String,
}

impl Session {
    fn open(credentials: &Credentials) -> SyncResult<Self> {
        credentials.validate(Marketplace::Hepsiburada)?;
        let username = credentials.require("username")?;
        let password = credentials.require("password")?;
        let merchant_id = credentials.require("merchant_id")?;
        let token = BASE64.encode(format!("{username}:{password}"));
        Ok(Self {
            auth: format!("Basic {token}"),
            merchant_id: merchant_id.to_string(),
            // Hepsiburada rejects requests without the merchant username here
            user_agent: username.to_string(),
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", &self.auth)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/json")
    }
}

pub async fn test_connection(credentials: &Credentials) -> SyncResult<()> {
    let session = Session::open(credentials)?;
    let what = "Hepsiburada listing check";
    let response = session
        .request(build_client().get(format!(
            "{}/listings/merchantid/{}",
            *LISTING_ROOT, session.merchant_id
        )))
        .query(&[("offset", "0"), ("limit", "1")])
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    check(what, response).await?;
    Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeCategory {
    category_id: u64,
    name: String,
    #[serde(default)]
    parent_category_id: Option<u64>,
    // absent means listable; only an explicit false filters the node out
    #[serde(default = "default_available")]
    available: bool,
}

fn default_available() -> bool {
    true
}

#[derive(Deserialize)]
struct CategoryPage {
    #[serde(default)]
    data: Vec<NativeCategory>,
    #[serde(rename = "totalPages", default)]
    total_pages: u32,
}

pub async fn fetch_categories(credentials: &Credentials) -> SyncResult<Vec<CategoryNode>> {
    let session = Session::open(credentials)?;
    let what = "Hepsiburada categories";
    let mut flat = Vec::new();
    let mut page = 0u32;
    loop {
        let response = session
            .request(build_client().get(format!(
                "{}/product/api/categories/get-all-categories",
                *MPOP_ROOT
            )))
            .query(&[
                ("page", page.to_string()),
                ("size", "1000".to_string()),
                ("leaf", "false".to_string()),
                ("status", "ACTIVE".to_string()),
            ])
            .send()
            .await
            .map_err(|err| SyncError::from_transport(what, &err))?;
        let body: CategoryPage = check(what, response)
            .await?
            .json()
            .await
            .map_err(|_| SyncError::fetch("Hepsiburada category response was not valid JSON"))?;
        flat.extend(body.data.into_iter().filter(|c| c.available).map(|c| {
            FlatCategory::new(
                c.category_id.to_string(),
                c.name,
                c.parent_category_id.map(|id| id.to_string()).as_deref(),
            )
        }));
        page += 1;
        if page >= body.total_pages || page >= 50 {
            break;
        }
    }
    Ok(categories::build_tree(flat))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeAttribute {
    id: String,
    name: String,
    #[serde(default)]
    mandatory: bool,
    #[serde(default)]
    multi_value: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttributePayload {
    #[serde(default)]
    attributes: Vec<NativeAttribute>,
}

#[derive(Deserialize)]
struct AttributeResponse {
    #[serde(default)]
    data: Option<AttributePayload>,
}

pub async fn fetch_category_attributes(
    credentials: &Credentials,
    category_id: &str,
) -> SyncResult<Vec<CategoryAttribute>> {
    let session = Session::open(credentials)?;
    let what = "Hepsiburada category attributes";
    let response = session
        .request(build_client().get(format!(
            "{}/product/api/categories/{category_id}/attributes",
            *MPOP_ROOT
        )))
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: AttributeResponse = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Hepsiburada attribute response was not valid JSON"))?;
    let mut attributes = Vec::new();
    if let Some(payload) = body.data {
        for native in payload.attributes {
            let values = fetch_attribute_values(&session, category_id, &native.id)
                .await
                .unwrap_or_default();
            attributes.push(CategoryAttribute {
                id: native.id,
                name: native.name,
                required: native.mandatory,
                allows_custom: !native.multi_value,
                values,
            });
        }
    }
    Ok(attributes)
}

#[derive(Deserialize)]
struct AttributeValuesResponse {
    #[serde(default)]
    data: Vec<NativeAttributeValue>,
}

#[derive(Deserialize)]
struct NativeAttributeValue {
    id: String,
    value: String,
}

async fn fetch_attribute_values(
    session: &Session,
    category_id: &str,
    attribute_id: &str,
) -> SyncResult<Vec<AttributeValue>> {
    let what = "Hepsiburada attribute values";
    let response = session
        .request(build_client().get(format!(
            "{}/product/api/categories/{category_id}/attribute/{attribute_id}/values",
            *MPOP_ROOT
        )))
        .query(&[("page", "0"), ("size", "200")])
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: AttributeValuesResponse = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Hepsiburada attribute values were not valid JSON"))?;
    Ok(body
        .data
        .into_iter()
        .map(|value| AttributeValue {
            id: value.id,
            name: value.value,
        })
        .collect())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeListing {
    merchant_sku: String,
    #[serde(default)]
    product_name: Option<String>,
    #[serde(default)]
    price: f64,
    #[serde(default)]
    available_stock: u32,
    #[serde(default)]
    hepsiburada_sku: Option<String>,
}

#[derive(Deserialize)]
struct ListingPage {
    #[serde(default)]
    listings: Vec<NativeListing>,
}

pub async fn fetch_products(
    credentials: &Credentials,
    offset: u32,
    limit: u32,
) -> SyncResult<Vec<Product>> {
    let session = Session::open(credentials)?;
    let what = "Hepsiburada listings";
    let response = session
        .request(build_client().get(format!(
            "{}/listings/merchantid/{}",
            *LISTING_ROOT, session.merchant_id
        )))
        .query(&[("offset", offset.to_string()), ("limit", limit.to_string())])
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: ListingPage = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Hepsiburada listing response was not valid JSON"))?;
    Ok(body.listings.into_iter().map(normalize_listing).collect())
}

fn normalize_listing(listing: NativeListing) -> Product {
    Product {
        title: listing.product_name.clone().unwrap_or_default(),
        description: None,
        price: listing.price,
        stock: listing.available_stock,
        category_id: None,
        brand: None,
        images: Vec::new(),
        raw: listing
            .hepsiburada_sku
            .map(|sku| json!({ "hepsiburada_sku": sku })),
        sku: listing.merchant_sku,
    }
}

pub async fn create_product(
    credentials: &Credentials,
    product: &Product,
) -> SyncResult<CreateReceipt> {
    let session = Session::open(credentials)?;
    let what = "Hepsiburada product import";
    let item = import_item(&session.merchant_id, product);
    let response = session
        .request(build_client().post(format!("{}/product/api/products/import", *MPOP_ROOT)))
        .json(&json!([item]))
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: Value = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Hepsiburada import response was not valid JSON"))?;
    Ok(CreateReceipt {
        remote_id: None,
        tracking_id: body
            .pointer("/data/trackingId")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn import_item(merchant_id: &str, product: &Product) -> Value {
    let mut attributes = json!({
        "merchantSku": product.sku,
        "UrunAdi": product.title,
        "UrunAciklamasi": product.description.clone().unwrap_or_default(),
        "Marka": product.brand.clone().unwrap_or_else(|| "Markasız".to_string()),
        "GarantiSuresi": 24,
        "kg": "1",
        "tax_vat_rate": "18",
        "price": product.price,
        "stock": product.stock,
    });
    for (index, image) in product.images.iter().take(5).enumerate() {
        attributes[format!("Image{}", index + 1)] = json!(image);
    }
    json!({
        "categoryId": product.category_id.as_deref().and_then(|id| id.parse::<u64>().ok()),
        "merchant": merchant_id,
        "attributes": attributes,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StockUploadLine<'a> {
    merchant_sku: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    available_stock: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
}

async fn upload_listing_lines(
    session: &Session,
    what: &str,
    lines: &[StockUploadLine<'_>],
) -> SyncResult<Option<String>> {
    let response = session
        .request(build_client().post(format!(
            "{}/listings/merchantid/{}/stock-uploads",
            *LISTING_ROOT, session.merchant_id
        )))
        .json(&lines)
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: Value = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Hepsiburada stock upload response was not valid JSON"))?;
    Ok(body
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string))
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
    upload_listing_lines(
        &session,
        "Hepsiburada listing update",
        &[StockUploadLine {
            merchant_sku: sku,
            available_stock: updates.stock,
            price: updates.price,
        }],
    )
    .await?;
    Ok(())
}

/// Native batch: one upload request carries every line.
pub async fn bulk_update_stock(
    credentials: &Credentials,
    lines: &[StockLine],
) -> SyncResult<Option<String>> {
    if lines.is_empty() {
        return Err(SyncError::no_products("no stock lines to upload"));
    }
    let session = Session::open(credentials)?;
    let upload: Vec<StockUploadLine<'_>> = lines
        .iter()
        .map(|line| StockUploadLine {
            merchant_sku: &line.sku,
            available_stock: Some(line.quantity),
            price: None,
        })
        .collect();
    upload_listing_lines(&session, "Hepsiburada bulk stock upload", &upload).await
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativePackage {
    id: Value,
    #[serde(default)]
    order_number: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    recipient_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    total_price: Option<NativeMoney>,
    #[serde(default)]
    items: Vec<NativePackageItem>,
    #[serde(default)]
    order_date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativePackageItem {
    #[serde(default)]
    merchant_sku: Option<String>,
    #[serde(default)]
    product_name: Option<String>,
    #[serde(default)]
    quantity: u32,
    #[serde(default)]
    unit_price: Option<NativeMoney>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeMoney {
    #[serde(default)]
    amount: f64,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Deserialize)]
struct PackagePage {
    #[serde(default)]
    items: Vec<NativePackage>,
}

pub async fn fetch_orders(credentials: &Credentials, offset: u32, limit: u32) -> SyncResult<Vec<Order>> {
    let session = Session::open(credentials)?;
    let what = "Hepsiburada packages";
    let response = session
        .request(build_client().get(format!(
            "{}/packages/merchantid/{}",
            *OMS_ROOT, session.merchant_id
        )))
        .query(&[("offset", offset.to_string()), ("limit", limit.to_string())])
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: PackagePage = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Hepsiburada package response was not valid JSON"))?;
    Ok(body.items.into_iter().map(normalize_package).collect())
}

fn normalize_package(package: NativePackage) -> Order {
    let id = package
        .order_number
        .clone()
        .unwrap_or_else(|| render_id(&package.id));
    let (total, currency) = package
        .total_price
        .map(|money| (money.amount, money.currency.unwrap_or_else(|| "TRY".to_string())))
        .unwrap_or((0.0, "TRY".to_string()));
    Order {
        id,
        status: orders::canonical_status(package.status.as_deref().unwrap_or("")),
        customer_name: package.recipient_name,
        customer_email: package.email,
        items: package
            .items
            .into_iter()
            .map(|item| OrderLine {
                sku: item.merchant_sku.unwrap_or_default(),
                title: item.product_name,
                quantity: item.quantity,
                unit_price: item.unit_price.map(|money| money.amount).unwrap_or(0.0),
            })
            .collect(),
        total,
        currency,
        placed_at: package.order_date,
    }
}

// package ids arrive as either numbers or strings depending on the endpoint
fn render_id(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub async fn push_order_status(
    credentials: &Credentials,
    push: &StatusPush,
) -> SyncResult<PushOutcome> {
    let Some(native) = orders::native_status(Marketplace::Hepsiburada, push.status) else {
        return Ok(PushOutcome::skipped());
    };
    let session = Session::open(credentials)?;
    let what = "Hepsiburada package status";
    let mut payload = json!({ "status": native });
    if let Some(tracking) = &push.tracking_number {
        payload["trackingNumber"] = json!(tracking);
        if let Some(carrier) = &push.carrier {
            payload["cargoCompany"] = json!(carrier);
        }
    }
    let response = session
        .request(build_client().put(format!(
            "{}/packages/merchantid/{}/packagenumber/{}/status",
            *OMS_ROOT, session.merchant_id, push.order_id
        )))
        .json(&payload)
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    check(what, response).await?;
    Ok(PushOutcome::pushed(native))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn creds() -> Credentials {
        Credentials::from(BTreeMap::from([
            ("username".to_string(), "merchant".to_string()),
            ("password".to_string(), "pw".to_string()),
            ("merchant_id".to_string(), "M-77".to_string()),
        ]))
    }

    #[test]
    fn session_builds_basic_auth_and_user_agent() {
        let session = Session::open(&creds()).unwrap();
        assert_eq!(session.auth, format!("Basic {}", BASE64.encode("merchant:pw")));
        assert_eq!(session.user_agent, "merchant");
        assert_eq!(session.merchant_id, "M-77");
    }

    #[tokio::test]
    async fn missing_password_fails_before_network() {
        let bundle = Credentials::from(BTreeMap::from([(
            "username".to_string(),
            "merchant".to_string(),
        )]));
        let err = test_connection(&bundle).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigMissing);
        assert!(err.message().contains("password"));
        assert!(err.message().contains("merchant_id"));
    }

    #[test]
    fn import_item_carries_defaults_and_images() {
        let product = Product {
            sku: "HB-1".into(),
            title: "Fincan".into(),
            description: None,
            price: 120.0,
            stock: 4,
            category_id: Some("18022298".into()),
            brand: None,
            images: vec!["https://cdn.example/a.jpg".into()],
            raw: None,
        };
        let item = import_item("M-77", &product);
        assert_eq!(item["categoryId"], json!(18022298));
        assert_eq!(item["attributes"]["Marka"], json!("Markasız"));
        assert_eq!(item["attributes"]["Image1"], json!("https://cdn.example/a.jpg"));
        assert_eq!(item["attributes"]["tax_vat_rate"], json!("18"));
    }

    #[test]
    fn package_normalizes_with_missing_money() {
        let package: NativePackage = serde_json::from_value(json!({
            "id": 991,
            "status": "Packaged",
            "items": [{ "merchantSku": "HB-1", "quantity": 2 }]
        }))
        .unwrap();
        let order = normalize_package(package);
        assert_eq!(order.id, "991");
        assert_eq!(order.status, crate::orders::OrderStatus::Processing);
        assert_eq!(order.currency, "TRY");
        assert_eq!(order.items[0].unit_price, 0.0);
    }

    #[tokio::test]
    async fn empty_bulk_upload_is_no_products() {
        let err = bulk_update_stock(&creds(), &[]).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NoProducts);
    }
}
