//! Etsy Open API v3 adapter. Every request carries both the app's
//! `x-api-key` and the shop's OAuth bearer token; listing state and the
//! seller taxonomy live under `/application`.

use crate::credentials::Credentials;
use crate::error::{SyncError, SyncResult};
use crate::http::build_client;
use crate::marketplaces::check;
use crate::models::{
    CategoryAttribute, CategoryNode, CreateReceipt, Marketplace, Order, OrderLine, Product,
    ProductUpdate, StockLine,
};
use crate::orders::{self, PushOutcome, StatusPush};
use crate::categories::{self, FlatCategory};
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{Value, json};

static ROOT: Lazy<String> = Lazy::new(|| {
    std::env::var("ETSY_API_ROOT")
        .unwrap_or_else(|_| "https://openapi.etsy.com/v3/application".to_string())
});

struct Session {
    api_key: String,
    token: String,
    shop_id: String,
}

impl Session {
    fn open(credentials: &Credentials) -> SyncResult<Self> {
        credentials.validate(Marketplace::Etsy)?;
        Ok(Self {
            api_key: credentials.require("api_key")?.to_string(),
            token: credentials.require("access_token")?.to_string(),
            shop_id: credentials.require("shop_id")?.to_string(),
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("x-api-key", &self.api_key)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
    }
}

pub async fn test_connection(credentials: &Credentials) -> SyncResult<()> {
    let session = Session::open(credentials)?;
    let what = "Etsy shop lookup";
    let response = session
        .request(build_client().get(format!("{}/shops/{}", *ROOT, session.shop_id)))
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    check(what, response).await?;
    Ok(())
}

#[derive(Deserialize)]
struct TaxonomyNode {
    id: u64,
    name: String,
    #[serde(default)]
    children: Vec<TaxonomyNode>,
}

#[derive(Deserialize)]
struct TaxonomyResponse {
    #[serde(default)]
    results: Vec<TaxonomyNode>,
}

fn flatten_taxonomy(node: TaxonomyNode, parent: Option<&str>, out: &mut Vec<FlatCategory>) {
    let id = node.id.to_string();
    out.push(FlatCategory::new(id.clone(), node.name, parent));
    for child in node.children {
        flatten_taxonomy(child, Some(&id), out);
    }
}

pub async fn fetch_categories(credentials: &Credentials) -> SyncResult<Vec<CategoryNode>> {
    let session = Session::open(credentials)?;
    let what = "Etsy seller taxonomy";
    let response = session
        .request(build_client().get(format!("{}/seller-taxonomy/nodes", *ROOT)))
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: TaxonomyResponse = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Etsy taxonomy response was not valid JSON"))?;
    let mut flat = Vec::new();
    for node in body.results {
        flatten_taxonomy(node, None, &mut flat);
    }
    Ok(categories::build_tree(flat))
}

#[derive(Deserialize)]
struct TaxonomyProperty {
    property_id: u64,
    display_name: String,
    #[serde(default)]
    is_required: bool,
    #[serde(default)]
    supports_variations: bool,
    #[serde(default)]
    possible_values: Vec<TaxonomyPropertyValue>,
}

#[derive(Deserialize)]
struct TaxonomyPropertyValue {
    value_id: Option<u64>,
    name: String,
}

#[derive(Deserialize)]
struct PropertyResponse {
    #[serde(default)]
    results: Vec<TaxonomyProperty>,
}

pub async fn fetch_category_attributes(
    credentials: &Credentials,
    taxonomy_id: &str,
) -> SyncResult<Vec<CategoryAttribute>> {
    let session = Session::open(credentials)?;
    let what = "Etsy taxonomy properties";
    let response = session
        .request(build_client().get(format!(
            "{}/seller-taxonomy/nodes/{taxonomy_id}/properties",
            *ROOT
        )))
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: PropertyResponse = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Etsy property response was not valid JSON"))?;
    Ok(body
        .results
        .into_iter()
        .map(|property| CategoryAttribute {
            id: property.property_id.to_string(),
            name: property.display_name,
            required: property.is_required,
            allows_custom: property.supports_variations,
            values: property
                .possible_values
                .into_iter()
                .filter_map(|value| {
                    value.value_id.map(|id| crate::models::AttributeValue {
                        id: id.to_string(),
                        name: value.name,
                    })
                })
                .collect(),
        })
        .collect())
}

#[derive(Deserialize)]
struct NativeListing {
    listing_id: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    price: Option<NativeMoney>,
    #[serde(default)]
    quantity: u32,
    #[serde(default)]
    taxonomy_id: Option<u64>,
    #[serde(default)]
    skus: Vec<String>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Deserialize)]
struct NativeMoney {
    amount: i64,
    divisor: i64,
    #[serde(default)]
    currency_code: Option<String>,
}

impl NativeMoney {
    fn to_f64(&self) -> f64 {
        if self.divisor == 0 {
            return 0.0;
        }
        self.amount as f64 / self.divisor as f64
    }
}

#[derive(Deserialize)]
struct ListingPage {
    #[serde(default)]
    results: Vec<NativeListing>,
}

pub async fn fetch_products(
    credentials: &Credentials,
    offset: u32,
    limit: u32,
) -> SyncResult<Vec<Product>> {
    let session = Session::open(credentials)?;
    let what = "Etsy listings";
    let response = session
        .request(build_client().get(format!(
            "{}/shops/{}/listings",
            *ROOT, session.shop_id
        )))
        .query(&[
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
            ("state", "active".to_string()),
        ])
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: ListingPage = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Etsy listing response was not valid JSON"))?;
    Ok(body.results.into_iter().map(normalize_listing).collect())
}

fn normalize_listing(listing: NativeListing) -> Product {
    Product {
        sku: listing
            .skus
            .first()
            .cloned()
            .unwrap_or_else(|| listing.listing_id.to_string()),
        title: listing.title.unwrap_or_default(),
        description: listing.description,
        price: listing.price.as_ref().map(NativeMoney::to_f64).unwrap_or(0.0),
        stock: listing.quantity,
        category_id: listing.taxonomy_id.map(|id| id.to_string()),
        brand: None,
        images: Vec::new(),
        raw: Some(json!({
            "listing_id": listing.listing_id,
            "state": listing.state,
        })),
    }
}

pub async fn create_product(
    credentials: &Credentials,
    product: &Product,
) -> SyncResult<CreateReceipt> {
    let session = Session::open(credentials)?;
    let what = "Etsy listing create";
    let payload = json!({
        "quantity": product.stock,
        "title": product.title,
        "description": product.description.clone().unwrap_or_else(|| product.title.clone()),
        "price": product.price,
        "who_made": "i_did",
        "when_made": "made_to_order",
        "taxonomy_id": product.category_id.as_deref().and_then(|id| id.parse::<u64>().ok()),
        "sku": [product.sku],
        "type": "physical",
    });
    let response = session
        .request(build_client().post(format!(
            "{}/shops/{}/listings",
            *ROOT, session.shop_id
        )))
        .json(&payload)
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: Value = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Etsy create response was not valid JSON"))?;
    Ok(CreateReceipt {
        remote_id: body
            .get("listing_id")
            .and_then(Value::as_u64)
            .map(|id| id.to_string()),
        tracking_id: None,
    })
}

/// Updates address listings by their numeric listing id, carried in
/// `Product.raw` from fetches; a bare SKU that parses as a number is
/// accepted too.
pub async fn update_product(
    credentials: &Credentials,
    listing_id: &str,
    updates: &ProductUpdate,
) -> SyncResult<()> {
    if updates.price.is_none() && updates.stock.is_none() {
        return Ok(());
    }
    let session = Session::open(credentials)?;
    let what = "Etsy listing update";
    let mut payload = json!({});
    if let Some(price) = updates.price {
        payload["price"] = json!(price);
    }
    if let Some(stock) = updates.stock {
        payload["quantity"] = json!(stock);
    }
    let response = session
        .request(build_client().patch(format!(
            "{}/shops/{}/listings/{listing_id}",
            *ROOT, session.shop_id
        )))
        .json(&payload)
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    check(what, response).await?;
    Ok(())
}

/// No native batch endpoint; routed through the shared batch runner.
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
struct NativeReceipt {
    receipt_id: u64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    buyer_email: Option<String>,
    #[serde(default)]
    grandtotal: Option<NativeMoney>,
    #[serde(default)]
    transactions: Vec<NativeTransaction>,
    #[serde(default)]
    create_timestamp: Option<i64>,
}

#[derive(Deserialize)]
struct NativeTransaction {
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    quantity: u32,
    #[serde(default)]
    price: Option<NativeMoney>,
}

#[derive(Deserialize)]
struct ReceiptPage {
    #[serde(default)]
    results: Vec<NativeReceipt>,
}

pub async fn fetch_orders(
    credentials: &Credentials,
    offset: u32,
    limit: u32,
) -> SyncResult<Vec<Order>> {
    let session = Session::open(credentials)?;
    let what = "Etsy receipts";
    let response = session
        .request(build_client().get(format!(
            "{}/shops/{}/receipts",
            *ROOT, session.shop_id
        )))
        .query(&[("offset", offset.to_string()), ("limit", limit.to_string())])
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: ReceiptPage = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Etsy receipt response was not valid JSON"))?;
    Ok(body.results.into_iter().map(normalize_receipt).collect())
}

fn normalize_receipt(receipt: NativeReceipt) -> Order {
    let (total, currency) = receipt
        .grandtotal
        .as_ref()
        .map(|money| {
            (
                money.to_f64(),
                money.currency_code.clone().unwrap_or_else(|| "USD".to_string()),
            )
        })
        .unwrap_or((0.0, "USD".to_string()));
    Order {
        id: receipt.receipt_id.to_string(),
        status: orders::canonical_status(receipt.status.as_deref().unwrap_or("")),
        customer_name: receipt.name,
        customer_email: receipt.buyer_email,
        items: receipt
            .transactions
            .into_iter()
            .map(|tx| OrderLine {
                sku: tx.sku.unwrap_or_default(),
                title: tx.title,
                quantity: tx.quantity,
                unit_price: tx.price.as_ref().map(NativeMoney::to_f64).unwrap_or(0.0),
            })
            .collect(),
        total,
        currency,
        placed_at: receipt
            .create_timestamp
            .and_then(|seconds| parse_epoch(seconds)),
    }
}

fn parse_epoch(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

pub async fn push_order_status(
    credentials: &Credentials,
    push: &StatusPush,
) -> SyncResult<PushOutcome> {
    let Some(native) = orders::native_status(Marketplace::Etsy, push.status) else {
        return Ok(PushOutcome::skipped());
    };
    let session = Session::open(credentials)?;
    // shipping a receipt means creating a tracking record on it
    let what = "Etsy receipt shipment";
    let payload = json!({
        "tracking_code": push.tracking_number.clone().unwrap_or_default(),
        "carrier_name": push.carrier.clone().unwrap_or_default(),
        "send_bcc": false,
    });
    let response = session
        .request(build_client().post(format!(
            "{}/shops/{}/receipts/{}/tracking",
            *ROOT, session.shop_id, push.order_id
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

    #[tokio::test]
    async fn missing_token_fails_before_network() {
        let bundle = Credentials::from(BTreeMap::from([(
            "api_key".to_string(),
            "kx".to_string(),
        )]));
        let err = test_connection(&bundle).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigMissing);
        assert!(err.message().contains("access_token"));
        assert!(err.message().contains("shop_id"));
    }

    #[test]
    fn money_divisor_math() {
        let money = NativeMoney {
            amount: 1250,
            divisor: 100,
            currency_code: Some("USD".into()),
        };
        assert_eq!(money.to_f64(), 12.5);
        let degenerate = NativeMoney {
            amount: 10,
            divisor: 0,
            currency_code: None,
        };
        assert_eq!(degenerate.to_f64(), 0.0);
    }

    #[test]
    fn taxonomy_flattens_with_parent_links() {
        let node = TaxonomyNode {
            id: 1,
            name: "Home & Living".into(),
            children: vec![TaxonomyNode {
                id: 2,
                name: "Kitchen".into(),
                children: vec![],
            }],
        };
        let mut flat = Vec::new();
        flatten_taxonomy(node, None, &mut flat);
        let tree = categories::build_tree(flat);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children[0].path, vec!["Home & Living", "Kitchen"]);
    }

    #[test]
    fn listing_without_sku_falls_back_to_listing_id() {
        let listing: NativeListing = serde_json::from_value(json!({
            "listing_id": 4242,
            "title": "Ceramic Mug",
            "quantity": 3,
            "price": { "amount": 2400, "divisor": 100, "currency_code": "USD" }
        }))
        .unwrap();
        let product = normalize_listing(listing);
        assert_eq!(product.sku, "4242");
        assert_eq!(product.price, 24.0);
    }

    #[test]
    fn receipt_status_paid_is_processing() {
        let receipt: NativeReceipt = serde_json::from_value(json!({
            "receipt_id": 77,
            "status": "Paid",
            "create_timestamp": 1700000000
        }))
        .unwrap();
        let order = normalize_receipt(receipt);
        assert_eq!(order.status, crate::orders::OrderStatus::Processing);
        assert!(order.placed_at.is_some());
    }

    #[test]
    fn delivered_push_is_a_skip() {
        assert_eq!(
            orders::native_status(Marketplace::Etsy, crate::orders::OrderStatus::Delivered),
            None
        );
    }
}
