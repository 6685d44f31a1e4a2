//! Amazon SP-API: a refresh-token grant yields a short-lived access token
//! that must ride in both the `Authorization` bearer header and the
//! `x-amz-access-token` header. Catalog and listing calls are keyed by
//! seller id + marketplace id; order line items require a secondary
//! per-order call.

use crate::credentials::Credentials;
use crate::error::{ErrorKind, SyncError, SyncResult};
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
use tracing::warn;

/// Fixed marketplace id for amazon.com.tr.
pub const MARKETPLACE_ID_TR: &str = "A33AVAJ2PDY3EV";

static ROOT: Lazy<String> = Lazy::new(|| {
    std::env::var("AMAZON_SPAPI_ROOT")
        .unwrap_or_else(|_| "https://sellingpartnerapi-eu.amazon.com".to_string())
});

static TOKEN_URL: Lazy<String> = Lazy::new(|| {
    std::env::var("AMAZON_TOKEN_URL")
        .unwrap_or_else(|_| "https://api.amazon.com/auth/o2/token".to_string())
});

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

struct Session {
    token: String,
    seller_id: String,
    marketplace_id: String,
}

// the access token is a secret; keep it out of Debug output
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("seller_id", &self.seller_id)
            .field("marketplace_id", &self.marketplace_id)
            .finish_non_exhaustive()
    }
}

/// Refresh-token grant, performed fresh on every invocation.
async fn authorize(credentials: &Credentials) -> SyncResult<Session> {
    credentials.validate(Marketplace::Amazon)?;
    let client_id = credentials.require("client_id")?;
    let client_secret = credentials.require("client_secret")?;
    let refresh_token = credentials.require("refresh_token")?;
    let seller_id = credentials.require("seller_id")?.to_string();
    let marketplace_id = credentials
        .get("marketplace_id")
        .unwrap_or(MARKETPLACE_ID_TR)
        .to_string();

    let response = build_client()
        .post(TOKEN_URL.as_str())
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ])
        .send()
        .await
        .map_err(|err| SyncError::from_transport("Amazon token exchange", &err))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(target: "pazarsync.amazon", status = status.as_u16(), body = %body, "token exchange failed");
        return Err(SyncError::with_status(
            ErrorKind::OauthError,
            "Amazon token exchange failed: refresh token may be revoked",
            status.as_u16(),
        ));
    }

    let payload: TokenResponse = response
        .json()
        .await
        .map_err(|_| SyncError::oauth("Amazon token response could not be read"))?;
    Ok(Session {
        token: payload.access_token,
        seller_id,
        marketplace_id,
    })
}

fn request(method: reqwest::Method, url: String, session: &Session) -> reqwest::RequestBuilder {
    build_client()
        .request(method, url)
        .bearer_auth(&session.token)
        .header("x-amz-access-token", &session.token)
}

pub async fn test_connection(credentials: &Credentials) -> SyncResult<()> {
    let session = authorize(credentials).await?;
    let url = format!("{}/sellers/v1/marketplaceParticipations", *ROOT);
    let response = request(reqwest::Method::GET, url, &session)
        .send()
        .await
        .map_err(|err| SyncError::from_transport("Amazon connection test", &err))?;
    check("Amazon connection test", response).await?;
    Ok(())
}

pub async fn fetch_categories(_credentials: &Credentials) -> SyncResult<Vec<CategoryNode>> {
    // SP-API exposes no seller-facing browse-tree endpoint; serve the static
    // fallback so the mapping UI always has something to offer
    Ok(categories::fallback_tree(Marketplace::Amazon))
}

pub async fn fetch_category_attributes(
    _credentials: &Credentials,
    _category_id: &str,
) -> SyncResult<Vec<CategoryAttribute>> {
    Ok(Vec::new())
}

#[derive(Debug, Deserialize)]
struct ListingsPage {
    #[serde(default)]
    items: Vec<ListingItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListingItem {
    sku: String,
    #[serde(default)]
    summaries: Vec<ListingSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListingSummary {
    #[serde(default)]
    item_name: Option<String>,
    #[serde(default)]
    main_image: Option<MainImage>,
}

#[derive(Debug, Deserialize)]
struct MainImage {
    link: String,
}

pub async fn fetch_products(
    credentials: &Credentials,
    _page: u32,
    page_size: u32,
) -> SyncResult<Vec<Product>> {
    let session = authorize(credentials).await?;
    let url = format!(
        "{}/listings/2021-08-01/items/{}",
        *ROOT,
        urlencoding::encode(&session.seller_id)
    );
    let response = request(reqwest::Method::GET, url, &session)
        .query(&[
            ("marketplaceIds", session.marketplace_id.as_str()),
            ("pageSize", &page_size.to_string()),
            ("includedData", "summaries"),
        ])
        .send()
        .await
        .map_err(|err| SyncError::from_transport("Amazon listing fetch", &err))?;
    let response = check("Amazon listing fetch", response).await?;
    let payload: ListingsPage = response
        .json()
        .await
        .map_err(|_| SyncError::fetch("Amazon listing response could not be read"))?;
    Ok(payload
        .items
        .into_iter()
        .map(|item| {
            let summary = item.summaries.into_iter().next();
            Product {
                sku: item.sku,
                title: summary
                    .as_ref()
                    .and_then(|s| s.item_name.clone())
                    .unwrap_or_default(),
                description: None,
                price: 0.0,
                stock: 0,
                category_id: None,
                brand: None,
                images: summary
                    .and_then(|s| s.main_image)
                    .map(|image| vec![image.link])
                    .unwrap_or_default(),
                raw: None,
            }
        })
        .collect())
}

pub async fn create_product(
    credentials: &Credentials,
    product: &Product,
) -> SyncResult<CreateReceipt> {
    let session = authorize(credentials).await?;
    let url = format!(
        "{}/listings/2021-08-01/items/{}/{}",
        *ROOT,
        urlencoding::encode(&session.seller_id),
        urlencoding::encode(&product.sku)
    );
    let body = json!({
        "productType": "PRODUCT",
        "requirements": "LISTING_OFFER_ONLY",
        "attributes": {
            "item_name": [{ "value": product.title }],
            "purchasable_offer": [{
                "currency": "TRY",
                "our_price": [{ "schedule": [{ "value_with_tax": product.price }] }],
            }],
            "fulfillment_availability": [{
                "fulfillment_channel_code": "DEFAULT",
                "quantity": product.stock,
            }],
        },
    });
    let response = request(reqwest::Method::PUT, url, &session)
        .query(&[("marketplaceIds", session.marketplace_id.as_str())])
        .json(&body)
        .send()
        .await
        .map_err(|err| SyncError::from_transport("Amazon listing submit", &err))?;
    let response = check("Amazon listing submit", response).await?;
    let payload: Value = response.json().await.unwrap_or(Value::Null);
    Ok(CreateReceipt {
        remote_id: Some(product.sku.clone()),
        tracking_id: payload
            .get("submissionId")
            .and_then(|value| value.as_str())
            .map(str::to_string),
    })
}

pub async fn update_product(
    credentials: &Credentials,
    sku: &str,
    updates: &ProductUpdate,
) -> SyncResult<()> {
    let session = authorize(credentials).await?;
    let url = format!(
        "{}/listings/2021-08-01/items/{}/{}",
        *ROOT,
        urlencoding::encode(&session.seller_id),
        urlencoding::encode(sku)
    );
    let mut patches = Vec::new();
    if let Some(price) = updates.price {
        patches.push(json!({
            "op": "replace",
            "path": "/attributes/purchasable_offer",
            "value": [{
                "currency": "TRY",
                "our_price": [{ "schedule": [{ "value_with_tax": price }] }],
            }],
        }));
    }
    if let Some(stock) = updates.stock {
        patches.push(json!({
            "op": "replace",
            "path": "/attributes/fulfillment_availability",
            "value": [{
                "fulfillment_channel_code": "DEFAULT",
                "quantity": stock,
            }],
        }));
    }
    if patches.is_empty() {
        return Ok(());
    }
    let response = request(reqwest::Method::PATCH, url, &session)
        .query(&[("marketplaceIds", session.marketplace_id.as_str())])
        .json(&json!({ "productType": "PRODUCT", "patches": patches }))
        .send()
        .await
        .map_err(|err| SyncError::from_transport("Amazon listing update", &err))?;
    check("Amazon listing update", response).await?;
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

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OrdersResponse {
    payload: Option<OrdersPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OrdersPayload {
    #[serde(default)]
    orders: Vec<NativeOrder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NativeOrder {
    amazon_order_id: String,
    #[serde(default)]
    order_status: String,
    #[serde(default)]
    buyer_info: Option<BuyerInfo>,
    #[serde(default)]
    order_total: Option<Money>,
    #[serde(default)]
    purchase_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BuyerInfo {
    #[serde(default)]
    buyer_name: Option<String>,
    #[serde(default)]
    buyer_email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Money {
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    currency_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OrderItemsResponse {
    payload: Option<OrderItemsPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OrderItemsPayload {
    #[serde(default)]
    order_items: Vec<NativeOrderItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NativeOrderItem {
    #[serde(default)]
    seller_sku: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    quantity_ordered: u32,
    #[serde(default)]
    item_price: Option<Money>,
}

pub async fn fetch_orders(
    credentials: &Credentials,
    since: Option<DateTime<Utc>>,
) -> SyncResult<Vec<Order>> {
    let session = authorize(credentials).await?;
    let created_after = since
        .unwrap_or_else(|| Utc::now() - chrono::Duration::days(30))
        .to_rfc3339();
    let url = format!("{}/orders/v0/orders", *ROOT);
    let response = request(reqwest::Method::GET, url, &session)
        .query(&[
            ("MarketplaceIds", session.marketplace_id.as_str()),
            ("CreatedAfter", &created_after),
        ])
        .send()
        .await
        .map_err(|err| SyncError::from_transport("Amazon order fetch", &err))?;
    let response = check("Amazon order fetch", response).await?;
    let payload: OrdersResponse = response
        .json()
        .await
        .map_err(|_| SyncError::fetch("Amazon order response could not be read"))?;

    let natives = payload.payload.map(|p| p.orders).unwrap_or_default();
    let mut result = Vec::with_capacity(natives.len());
    for native in natives {
        // per-order fan-out; a failed item fetch degrades to an empty line
        // list rather than failing the whole sync
        let items = match fetch_order_items(&session, &native.amazon_order_id).await {
            Ok(items) => items,
            Err(err) => {
                warn!(
                    target: "pazarsync.amazon",
                    order_id = %native.amazon_order_id,
                    error = %err,
                    "order item fetch failed, continuing without lines"
                );
                Vec::new()
            }
        };
        result.push(normalize_order(native, items));
    }
    Ok(result)
}

async fn fetch_order_items(session: &Session, order_id: &str) -> SyncResult<Vec<OrderLine>> {
    let url = format!(
        "{}/orders/v0/orders/{}/orderItems",
        *ROOT,
        urlencoding::encode(order_id)
    );
    let response = request(reqwest::Method::GET, url, session)
        .send()
        .await
        .map_err(|err| SyncError::from_transport("Amazon order item fetch", &err))?;
    let response = check("Amazon order item fetch", response).await?;
    let payload: OrderItemsResponse = response
        .json()
        .await
        .map_err(|_| SyncError::fetch("Amazon order item response could not be read"))?;
    Ok(payload
        .payload
        .map(|p| p.order_items)
        .unwrap_or_default()
        .into_iter()
        .map(|item| OrderLine {
            sku: item.seller_sku.unwrap_or_default(),
            title: item.title,
            quantity: item.quantity_ordered,
            unit_price: item
                .item_price
                .and_then(|money| money.amount)
                .and_then(|amount| amount.parse().ok())
                .unwrap_or(0.0),
        })
        .collect())
}

fn normalize_order(native: NativeOrder, items: Vec<OrderLine>) -> Order {
    let (total, currency) = native
        .order_total
        .map(|money| {
            (
                money
                    .amount
                    .and_then(|amount| amount.parse().ok())
                    .unwrap_or(0.0),
                money.currency_code.unwrap_or_else(|| "TRY".to_string()),
            )
        })
        .unwrap_or((0.0, "TRY".to_string()));
    Order {
        id: native.amazon_order_id,
        status: orders::canonical_status(&native.order_status),
        customer_name: native.buyer_info.as_ref().and_then(|b| b.buyer_name.clone()),
        customer_email: native.buyer_info.and_then(|b| b.buyer_email),
        items,
        total,
        currency,
        placed_at: native.purchase_date,
    }
}

pub async fn push_order_status(
    credentials: &Credentials,
    push: &StatusPush,
) -> SyncResult<PushOutcome> {
    let Some(native) = orders::native_status(Marketplace::Amazon, push.status) else {
        return Ok(PushOutcome::skipped());
    };
    let session = authorize(credentials).await?;
    let url = format!(
        "{}/orders/v0/orders/{}/shipmentConfirmation",
        *ROOT,
        urlencoding::encode(&push.order_id)
    );
    let mut body = json!({
        "marketplaceId": session.marketplace_id,
        "shipmentStatus": native,
    });
    if let Some(tracking) = &push.tracking_number {
        body["trackingNumber"] = json!(tracking);
        if let Some(carrier) = &push.carrier {
            body["carrierCode"] = json!(carrier);
        }
    }
    let response = request(reqwest::Method::POST, url, &session)
        .json(&body)
        .send()
        .await
        .map_err(|err| SyncError::from_transport("Amazon shipment confirmation", &err))?;
    check("Amazon shipment confirmation", response).await?;
    Ok(PushOutcome::pushed(native))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn missing_refresh_token_fails_before_network() {
        let creds = Credentials::from(BTreeMap::from([
            ("client_id".to_string(), "id".to_string()),
            ("client_secret".to_string(), "sec".to_string()),
            ("seller_id".to_string(), "A1".to_string()),
        ]));
        let err = authorize(&creds).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigMissing);
        assert!(err.message().contains("refresh_token"));
    }

    #[test]
    fn marketplace_id_defaults_to_turkey() {
        assert_eq!(MARKETPLACE_ID_TR, "A33AVAJ2PDY3EV");
    }

    #[test]
    fn session_debug_hides_access_token() {
        let session = Session {
            token: "Atza|short-lived".into(),
            seller_id: "A1".into(),
            marketplace_id: MARKETPLACE_ID_TR.into(),
        };
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("Atza"));
        assert!(rendered.contains("A1"));
    }

    #[test]
    fn order_normalization_parses_money_strings() {
        let native = NativeOrder {
            amazon_order_id: "123-456".into(),
            order_status: "Unshipped".into(),
            buyer_info: Some(BuyerInfo {
                buyer_name: Some("Mehmet".into()),
                buyer_email: None,
            }),
            order_total: Some(Money {
                amount: Some("199.90".into()),
                currency_code: Some("TRY".into()),
            }),
            purchase_date: None,
        };
        let order = normalize_order(native, vec![]);
        assert_eq!(order.total, 199.90);
        assert_eq!(order.status, crate::orders::OrderStatus::Processing);
        assert_eq!(order.customer_name.as_deref(), Some("Mehmet"));
    }

    #[test]
    fn fallback_categories_available_without_credentials() {
        let tree = categories::fallback_tree(Marketplace::Amazon);
        assert!(!tree.is_empty());
    }
}
