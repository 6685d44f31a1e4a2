//! ikas admin API: OAuth2 client-credentials against a *store-specific*
//! token endpoint, then GraphQL over a single `/api/admin/graphql` endpoint.
//! Product images come back as opaque image ids; URLs are built from the
//! CDN template, the API never returns them directly.

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
use serde::Deserialize;
use serde_json::{Value, json};

const DEFAULT_IMAGE_WIDTH: u32 = 540;

/// `store_name` is usually the bare store slug; appending `.myikas.com`
/// yields the API host. A credential that already carries a dot is treated
/// as a full host.
fn store_host(store_name: &str) -> String {
    let trimmed = store_name
        .trim()
        .trim_start_matches("https://")
        .trim_end_matches('/');
    if trimmed.contains('.') {
        trimmed.to_string()
    } else {
        format!("{trimmed}.myikas.com")
    }
}

pub(crate) fn image_url(image_id: &str, width: u32) -> String {
    format!("https://cdn.myikas.com/images/{image_id}/image_{width}.webp")
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Client-credentials grant against the store's own token endpoint. Runs on
/// every invocation; there is no shared token cache.
async fn fetch_token(credentials: &Credentials) -> SyncResult<(String, String)> {
    credentials.validate(Marketplace::Ikas)?;
    let client_id = credentials.require("client_id")?;
    let client_secret = credentials.require("client_secret")?;
    let host = store_host(credentials.require("store_name")?);

    let response = build_client()
        .post(format!("https://{host}/api/admin/oauth/token"))
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ])
        .send()
        .await
        .map_err(|err| SyncError::from_transport("ikas token exchange", &err))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(target: "pazarsync.ikas", status = status.as_u16(), body = %body, "token exchange failed");
        return Err(SyncError::with_status(
            crate::error::ErrorKind::OauthError,
            "ikas token exchange failed: check client id/secret and store name",
            status.as_u16(),
        ));
    }

    let payload: TokenResponse = response
        .json()
        .await
        .map_err(|_| SyncError::oauth("ikas token response could not be read"))?;
    Ok((host, payload.access_token))
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

async fn graphql(credentials: &Credentials, query: &str, variables: Value) -> SyncResult<Value> {
    let (host, token) = fetch_token(credentials).await?;
    let response = build_client()
        .post(format!("https://{host}/api/admin/graphql"))
        .bearer_auth(token)
        .json(&json!({ "query": query, "variables": variables }))
        .send()
        .await
        .map_err(|err| SyncError::from_transport("ikas API call", &err))?;
    let response = check("ikas API call", response).await?;
    let payload: GraphqlResponse = response
        .json()
        .await
        .map_err(|_| SyncError::fetch("ikas response could not be read"))?;

    if let Some(first) = payload.errors.first() {
        tracing::debug!(target: "pazarsync.ikas", error = %first.message, "graphql error");
        return Err(SyncError::api(format!(
            "ikas rejected the request: {}",
            first.message
        )));
    }
    payload
        .data
        .ok_or_else(|| SyncError::fetch("ikas response carried no data"))
}

pub async fn test_connection(credentials: &Credentials) -> SyncResult<()> {
    graphql(credentials, "query { me { id email } }", json!({})).await?;
    Ok(())
}

const LIST_CATEGORIES: &str = "query { listCategory { id name parentId } }";

pub async fn fetch_categories(credentials: &Credentials) -> SyncResult<Vec<CategoryNode>> {
    let data = graphql(credentials, LIST_CATEGORIES, json!({})).await?;
    let entries = data
        .get("listCategory")
        .and_then(|value| value.as_array())
        .cloned()
        .unwrap_or_default();
    let flat = entries
        .iter()
        .filter_map(|entry| {
            let id = entry.get("id")?.as_str()?.to_string();
            let name = entry.get("name")?.as_str()?.to_string();
            let parent = entry.get("parentId").and_then(|value| value.as_str());
            Some(FlatCategory::new(id, name, parent))
        })
        .collect();
    Ok(categories::build_tree(flat))
}

pub async fn fetch_category_attributes(
    _credentials: &Credentials,
    _category_id: &str,
) -> SyncResult<Vec<CategoryAttribute>> {
    // ikas categories carry no attribute schema; forms fall back to free text
    Ok(Vec::new())
}

const LIST_PRODUCTS: &str = "query ($page: Int!, $limit: Int!) { listProduct(pagination: { page: $page, limit: $limit }) { data { id name description brand { name } variants { sku prices { sellPrice } stocks { stockCount } images { imageId } } categories { id } } } }";

pub async fn fetch_products(
    credentials: &Credentials,
    page: u32,
    page_size: u32,
) -> SyncResult<Vec<Product>> {
    let data = graphql(
        credentials,
        LIST_PRODUCTS,
        json!({ "page": page.max(1), "limit": page_size }),
    )
    .await?;
    let entries = data
        .pointer("/listProduct/data")
        .and_then(|value| value.as_array())
        .cloned()
        .unwrap_or_default();
    Ok(entries.iter().filter_map(normalize_product).collect())
}

fn normalize_product(entry: &Value) -> Option<Product> {
    let variant = entry.pointer("/variants/0")?;
    let sku = variant.get("sku")?.as_str()?.to_string();
    let price = variant
        .pointer("/prices/0/sellPrice")
        .and_then(|value| value.as_f64())
        .unwrap_or(0.0);
    let stock = variant
        .pointer("/stocks/0/stockCount")
        .and_then(|value| value.as_u64())
        .unwrap_or(0) as u32;
    let images = variant
        .get("images")
        .and_then(|value| value.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("imageId").and_then(|value| value.as_str()))
                .map(|id| image_url(id, DEFAULT_IMAGE_WIDTH))
                .collect()
        })
        .unwrap_or_default();
    Some(Product {
        sku,
        title: entry.get("name")?.as_str()?.to_string(),
        description: entry
            .get("description")
            .and_then(|value| value.as_str())
            .map(str::to_string),
        price,
        stock,
        category_id: entry
            .pointer("/categories/0/id")
            .and_then(|value| value.as_str())
            .map(str::to_string),
        brand: entry
            .pointer("/brand/name")
            .and_then(|value| value.as_str())
            .map(str::to_string),
        images,
        raw: Some(json!({ "ikas_product_id": entry.get("id") })),
    })
}

const SAVE_PRODUCT: &str = "mutation ($input: ProductInput!) { saveProduct(input: $input) { id } }";

pub async fn create_product(
    credentials: &Credentials,
    product: &Product,
) -> SyncResult<CreateReceipt> {
    let input = json!({
        "name": product.title,
        "description": product.description,
        "type": "PHYSICAL",
        "categoryIds": product.category_id.as_ref().map(|id| vec![id.clone()]),
        "variants": [{
            "sku": product.sku,
            "isActive": true,
            "prices": [{ "sellPrice": product.price }],
            "stocks": [{ "stockCount": product.stock }],
        }],
    });
    let data = graphql(credentials, SAVE_PRODUCT, json!({ "input": input })).await?;
    Ok(CreateReceipt {
        remote_id: data
            .pointer("/saveProduct/id")
            .and_then(|value| value.as_str())
            .map(str::to_string),
        tracking_id: None,
    })
}

const SAVE_VARIANT: &str = "mutation ($input: VariantUpdateInput!) { updateVariant(input: $input) { sku } }";

pub async fn update_product(
    credentials: &Credentials,
    sku: &str,
    updates: &ProductUpdate,
) -> SyncResult<()> {
    let mut input = json!({ "sku": sku });
    if let Some(price) = updates.price {
        input["prices"] = json!([{ "sellPrice": price }]);
    }
    if let Some(stock) = updates.stock {
        input["stocks"] = json!([{ "stockCount": stock }]);
    }
    graphql(credentials, SAVE_VARIANT, json!({ "input": input })).await?;
    Ok(())
}

/// No native batch endpoint; the orchestrator routes bulk stock through the
/// shared batch runner, one `update_product` per line.
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

const LIST_ORDERS: &str = "query ($limit: Int!) { listOrder(pagination: { page: 1, limit: $limit }) { data { id status totalFinalPrice currencyCode orderedAt customer { firstName lastName email } orderLineItems { variant { sku name } quantity finalPrice } } } }";

pub async fn fetch_orders(credentials: &Credentials, limit: u32) -> SyncResult<Vec<Order>> {
    let data = graphql(credentials, LIST_ORDERS, json!({ "limit": limit })).await?;
    let entries = data
        .pointer("/listOrder/data")
        .and_then(|value| value.as_array())
        .cloned()
        .unwrap_or_default();
    Ok(entries.iter().filter_map(normalize_order).collect())
}

fn normalize_order(entry: &Value) -> Option<Order> {
    let first = entry
        .pointer("/customer/firstName")
        .and_then(|value| value.as_str());
    let last = entry
        .pointer("/customer/lastName")
        .and_then(|value| value.as_str());
    let customer_name = match (first, last) {
        (Some(a), Some(b)) => Some(format!("{a} {b}")),
        (Some(a), None) => Some(a.to_string()),
        (None, Some(b)) => Some(b.to_string()),
        (None, None) => None,
    };
    let items = entry
        .get("orderLineItems")
        .and_then(|value| value.as_array())
        .map(|lines| {
            lines
                .iter()
                .map(|line| OrderLine {
                    sku: line
                        .pointer("/variant/sku")
                        .and_then(|value| value.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    title: line
                        .pointer("/variant/name")
                        .and_then(|value| value.as_str())
                        .map(str::to_string),
                    quantity: line
                        .get("quantity")
                        .and_then(|value| value.as_u64())
                        .unwrap_or(0) as u32,
                    unit_price: line
                        .get("finalPrice")
                        .and_then(|value| value.as_f64())
                        .unwrap_or(0.0),
                })
                .collect()
        })
        .unwrap_or_default();
    Some(Order {
        id: entry.get("id")?.as_str()?.to_string(),
        status: orders::canonical_status(
            entry
                .get("status")
                .and_then(|value| value.as_str())
                .unwrap_or(""),
        ),
        customer_name,
        customer_email: entry
            .pointer("/customer/email")
            .and_then(|value| value.as_str())
            .map(str::to_string),
        items,
        total: entry
            .get("totalFinalPrice")
            .and_then(|value| value.as_f64())
            .unwrap_or(0.0),
        currency: entry
            .get("currencyCode")
            .and_then(|value| value.as_str())
            .unwrap_or("TRY")
            .to_string(),
        placed_at: entry
            .get("orderedAt")
            .and_then(|value| value.as_str())
            .and_then(|raw| raw.parse().ok()),
    })
}

const UPDATE_ORDER_STATUS: &str =
    "mutation ($input: OrderStatusInput!) { updateOrderStatus(input: $input) { id } }";

pub async fn push_order_status(
    credentials: &Credentials,
    push: &StatusPush,
) -> SyncResult<PushOutcome> {
    let Some(native) = orders::native_status(Marketplace::Ikas, push.status) else {
        return Ok(PushOutcome::skipped());
    };
    let mut input = json!({ "orderId": push.order_id, "status": native });
    if let Some(tracking) = &push.tracking_number {
        input["trackingInfo"] = json!({
            "trackingNumber": tracking,
            "cargoCompany": push.carrier,
        });
    }
    graphql(credentials, UPDATE_ORDER_STATUS, json!({ "input": input })).await?;
    Ok(PushOutcome::pushed(native))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn host_derivation_appends_suffix_once() {
        assert_eq!(store_host("kupacim"), "kupacim.myikas.com");
        assert_eq!(store_host(" kupacim "), "kupacim.myikas.com");
        assert_eq!(store_host("kupacim.myikas.com"), "kupacim.myikas.com");
        assert_eq!(store_host("https://shop.example.com/"), "shop.example.com");
    }

    #[test]
    fn image_urls_follow_cdn_template() {
        assert_eq!(
            image_url("abc123", 540),
            "https://cdn.myikas.com/images/abc123/image_540.webp"
        );
    }

    #[tokio::test]
    async fn missing_secret_is_config_missing_without_network() {
        let creds = Credentials::from(BTreeMap::from([
            ("client_id".to_string(), "id".to_string()),
            ("store_name".to_string(), "kupacim".to_string()),
        ]));
        let err = fetch_token(&creds).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigMissing);
        assert!(err.message().contains("client_secret"));
    }

    #[test]
    fn product_normalization_builds_cdn_urls() {
        let entry = json!({
            "id": "p1",
            "name": "El Yapımı Kupa",
            "description": null,
            "brand": { "name": "Atölye" },
            "categories": [{ "id": "c9" }],
            "variants": [{
                "sku": "KUPA-1",
                "prices": [{ "sellPrice": 249.5 }],
                "stocks": [{ "stockCount": 12 }],
                "images": [{ "imageId": "img-9" }],
            }],
        });
        let product = normalize_product(&entry).unwrap();
        assert_eq!(product.sku, "KUPA-1");
        assert_eq!(product.price, 249.5);
        assert_eq!(product.stock, 12);
        assert_eq!(
            product.images,
            vec!["https://cdn.myikas.com/images/img-9/image_540.webp"]
        );
        assert_eq!(product.brand.as_deref(), Some("Atölye"));
    }

    #[test]
    fn order_normalization_tolerates_missing_customer() {
        let entry = json!({
            "id": "o1",
            "status": "SHIPPED",
            "totalFinalPrice": 100.0,
            "currencyCode": "TRY",
            "orderLineItems": [],
        });
        let order = normalize_order(&entry).unwrap();
        assert!(order.customer_name.is_none());
        assert_eq!(order.status, crate::orders::OrderStatus::Shipped);
    }
}
