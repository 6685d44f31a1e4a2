//! Çiçeksepeti adapter. A login call exchanges the seller api key for a
//! short-lived bearer token; the REST surface is camelCase JSON and
//! paginates with page/limit.

use crate::credentials::Credentials;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::http::build_client;
use crate::marketplaces::check;
use crate::models::{
    AttributeValue, CategoryAttribute, CategoryNode, CreateReceipt, Marketplace, Order, OrderLine,
    Product, ProductUpdate, StockLine,
};
use crate::orders::{self, PushOutcome, StatusPush};
use crate::categories::{self, FlatCategory};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{Value, json};

static ROOT: Lazy<String> = Lazy::new(|| {
    std::env::var("CICEKSEPETI_API_ROOT")
        .unwrap_or_else(|_| "https://apis.ciceksepeti.com/api/v1".to_string())
});

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

/// Exchange the seller api key for a short-lived bearer token, performed
/// fresh on every invocation.
async fn login(credentials: &Credentials) -> SyncResult<String> {
    credentials.validate(Marketplace::Ciceksepeti)?;
    let api_key = credentials.require("api_key")?;
    let what = "Çiçeksepeti login";
    let response = build_client()
        .post(format!("{}/auth/login", *ROOT))
        .json(&json!({ "apiKey": api_key }))
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(target: "pazarsync.ciceksepeti", status = status.as_u16(), body = %body, "login failed");
        return Err(SyncError::with_status(
            ErrorKind::OauthError,
            "Çiçeksepeti login failed: check the api key",
            status.as_u16(),
        ));
    }
    let payload: LoginResponse = response
        .json()
        .await
        .map_err(|_| SyncError::oauth("Çiçeksepeti login response could not be read"))?;
    Ok(payload.token)
}

async fn request(
    credentials: &Credentials,
    builder: reqwest::RequestBuilder,
) -> SyncResult<reqwest::RequestBuilder> {
    let token = login(credentials).await?;
    Ok(builder
        .bearer_auth(token)
        .header("Accept", "application/json"))
}

pub async fn test_connection(credentials: &Credentials) -> SyncResult<()> {
    let what = "Çiçeksepeti connection check";
    let response = request(credentials, build_client().get(format!("{}/sellers/me", *ROOT)))
        .await?
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    check(what, response).await?;
    Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeCategory {
    id: u64,
    name: String,
    #[serde(default)]
    parent_category_id: Option<u64>,
}

#[derive(Deserialize)]
struct CategoryResponse {
    #[serde(default)]
    categories: Vec<NativeCategory>,
}

pub async fn fetch_categories(credentials: &Credentials) -> SyncResult<Vec<CategoryNode>> {
    let what = "Çiçeksepeti categories";
    let response = request(credentials, build_client().get(format!("{}/categories", *ROOT)))
        .await?
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: CategoryResponse = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Çiçeksepeti category response was not valid JSON"))?;
    let flat = body
        .categories
        .into_iter()
        .map(|category| {
            FlatCategory::new(
                category.id.to_string(),
                category.name,
                category
                    .parent_category_id
                    .map(|id| id.to_string())
                    .as_deref(),
            )
        })
        .collect();
    Ok(categories::build_tree(flat))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeAttribute {
    id: u64,
    name: String,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    attribute_values: Vec<NativeAttributeValue>,
}

#[derive(Deserialize)]
struct NativeAttributeValue {
    id: u64,
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttributeResponse {
    #[serde(default)]
    category_attributes: Vec<NativeAttribute>,
}

pub async fn fetch_category_attributes(
    credentials: &Credentials,
    category_id: &str,
) -> SyncResult<Vec<CategoryAttribute>> {
    let what = "Çiçeksepeti category attributes";
    let response = request(
        credentials,
        build_client().get(format!("{}/categories/{category_id}/attributes", *ROOT)),
    )
    .await?
    .send()
    .await
    .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: AttributeResponse = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Çiçeksepeti attribute response was not valid JSON"))?;
    Ok(body
        .category_attributes
        .into_iter()
        .map(|native| CategoryAttribute {
            id: native.id.to_string(),
            name: native.name,
            required: native.required,
            allows_custom: false,
            values: native
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

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeProduct {
    #[serde(default)]
    stock_code: Option<String>,
    #[serde(default)]
    product_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    sales_price: f64,
    #[serde(default)]
    stock_quantity: u32,
    #[serde(default)]
    category_id: Option<u64>,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    product_code: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductPage {
    #[serde(default)]
    products: Vec<NativeProduct>,
}

pub async fn fetch_products(
    credentials: &Credentials,
    page: u32,
    page_size: u32,
) -> SyncResult<Vec<Product>> {
    let what = "Çiçeksepeti products";
    let response = request(credentials, build_client().get(format!("{}/products", *ROOT)))
        .await?
        .query(&[
            ("page", page.to_string()),
            ("limit", page_size.to_string()),
            ("productStatus", "2".to_string()),
        ])
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: ProductPage = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Çiçeksepeti product response was not valid JSON"))?;
    Ok(body
        .products
        .into_iter()
        .filter_map(normalize_product)
        .collect())
}

fn normalize_product(native: NativeProduct) -> Option<Product> {
    let sku = native.stock_code?;
    Some(Product {
        sku,
        title: native.product_name.unwrap_or_default(),
        description: native.description,
        price: native.sales_price,
        stock: native.stock_quantity,
        category_id: native.category_id.map(|id| id.to_string()),
        brand: None,
        images: native.images,
        raw: native
            .product_code
            .map(|code| json!({ "ciceksepeti_product_code": code })),
    })
}

pub async fn create_product(
    credentials: &Credentials,
    product: &Product,
) -> SyncResult<CreateReceipt> {
    let what = "Çiçeksepeti product create";
    let payload = json!({
        "products": [{
            "productName": product.title,
            "mainProductCode": product.sku,
            "stockCode": product.sku,
            "categoryId": product.category_id.as_deref().and_then(|id| id.parse::<u64>().ok()),
            "description": product.description.clone().unwrap_or_default(),
            "salesPrice": product.price,
            "stockQuantity": product.stock,
            "images": product.images,
            "deliveryType": 1,
            "deliveryMessageType": 4,
        }]
    });
    let response = request(credentials, build_client().post(format!("{}/products", *ROOT)))
        .await?
        .json(&payload)
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: Value = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Çiçeksepeti create response was not valid JSON"))?;
    Ok(CreateReceipt {
        remote_id: None,
        tracking_id: body
            .get("batchId")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

pub async fn update_product(
    credentials: &Credentials,
    sku: &str,
    updates: &ProductUpdate,
) -> SyncResult<()> {
    if let Some(price) = updates.price {
        let what = "Çiçeksepeti price update";
        let payload = json!({ "items": [{ "stockCode": sku, "salesPrice": price }] });
        let response = request(
            credentials,
            build_client().put(format!("{}/products/price", *ROOT)),
        )
        .await?
        .json(&payload)
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
        check(what, response).await?;
    }
    if let Some(stock) = updates.stock {
        let what = "Çiçeksepeti stock update";
        let payload = json!({ "items": [{ "stockCode": sku, "stockQuantity": stock }] });
        let response = request(
            credentials,
            build_client().put(format!("{}/products/stock", *ROOT)),
        )
        .await?
        .json(&payload)
        .send()
        .await
        .map_err(|err| SyncError::from_transport(what, &err))?;
        check(what, response).await?;
    }
    Ok(())
}

/// No reliable native batch semantics; routed through the shared batch runner.
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
#[serde(rename_all = "camelCase")]
struct NativeOrder {
    order_id: u64,
    #[serde(default)]
    order_item_status: Option<String>,
    #[serde(default)]
    receiver_name: Option<String>,
    #[serde(default)]
    sender_email: Option<String>,
    #[serde(default)]
    order_items: Vec<NativeOrderItem>,
    #[serde(default)]
    total_price: f64,
    #[serde(default)]
    order_create_date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeOrderItem {
    #[serde(default)]
    stock_code: Option<String>,
    #[serde(default)]
    product_name: Option<String>,
    #[serde(default)]
    quantity: u32,
    #[serde(default)]
    unit_price: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderPage {
    #[serde(default)]
    supplier_order_list_with_branch: Vec<NativeOrder>,
}

pub async fn fetch_orders(credentials: &Credentials, page: u32, page_size: u32) -> SyncResult<Vec<Order>> {
    let what = "Çiçeksepeti orders";
    let payload = json!({
        "pageSize": page_size,
        "page": page,
    });
    let response = request(
        credentials,
        build_client().post(format!("{}/order/getorders", *ROOT)),
    )
    .await?
    .json(&payload)
    .send()
    .await
    .map_err(|err| SyncError::from_transport(what, &err))?;
    let body: OrderPage = check(what, response)
        .await?
        .json()
        .await
        .map_err(|_| SyncError::fetch("Çiçeksepeti order response was not valid JSON"))?;
    Ok(body
        .supplier_order_list_with_branch
        .into_iter()
        .map(normalize_order)
        .collect())
}

fn normalize_order(native: NativeOrder) -> Order {
    Order {
        id: native.order_id.to_string(),
        status: orders::canonical_status(native.order_item_status.as_deref().unwrap_or("")),
        customer_name: native.receiver_name,
        customer_email: native.sender_email,
        items: native
            .order_items
            .into_iter()
            .map(|item| OrderLine {
                sku: item.stock_code.unwrap_or_default(),
                title: item.product_name,
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect(),
        total: native.total_price,
        currency: "TRY".to_string(),
        placed_at: native.order_create_date,
    }
}

pub async fn push_order_status(
    credentials: &Credentials,
    push: &StatusPush,
) -> SyncResult<PushOutcome> {
    let Some(native) = orders::native_status(Marketplace::Ciceksepeti, push.status) else {
        return Ok(PushOutcome::skipped());
    };
    let what = "Çiçeksepeti order status";
    let mut payload = json!({
        "orderId": push.order_id.parse::<u64>().unwrap_or(0),
        "orderProductStatus": native,
    });
    if let Some(tracking) = &push.tracking_number {
        payload["cargoTrackingNumber"] = json!(tracking);
        if let Some(carrier) = &push.carrier {
            payload["cargoCompany"] = json!(carrier);
        }
    }
    let response = request(
        credentials,
        build_client().put(format!("{}/order/orderstatusupdate", *ROOT)),
    )
    .await?
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
    async fn missing_api_key_fails_before_network() {
        let bundle = Credentials::from(BTreeMap::new());
        let err = test_connection(&bundle).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigMissing);
        assert!(err.message().contains("api_key"));
    }

    #[test]
    fn product_without_stock_code_is_skipped() {
        let native: NativeProduct = serde_json::from_value(json!({
            "productName": "Orkide",
            "salesPrice": 249.9
        }))
        .unwrap();
        assert!(normalize_product(native).is_none());
    }

    #[test]
    fn product_normalizes_ids_to_strings() {
        let native: NativeProduct = serde_json::from_value(json!({
            "stockCode": "CS-1",
            "productName": "Orkide",
            "salesPrice": 249.9,
            "stockQuantity": 7,
            "categoryId": 1,
            "productCode": "P-100"
        }))
        .unwrap();
        let product = normalize_product(native).unwrap();
        assert_eq!(product.category_id.as_deref(), Some("1"));
        assert_eq!(
            product.raw.unwrap()["ciceksepeti_product_code"],
            json!("P-100")
        );
    }

    #[test]
    fn order_status_strings_map_to_canonical() {
        let native: NativeOrder = serde_json::from_value(json!({
            "orderId": 555,
            "orderItemStatus": "Preparing",
            "totalPrice": 300.0
        }))
        .unwrap();
        let order = normalize_order(native);
        assert_eq!(order.id, "555");
        assert_eq!(order.status, crate::orders::OrderStatus::Processing);
        assert_eq!(order.currency, "TRY");
    }

    #[test]
    fn cancellation_has_no_native_push() {
        assert_eq!(
            orders::native_status(Marketplace::Ciceksepeti, crate::orders::OrderStatus::Cancelled),
            None
        );
    }
}
