//! Action dispatch. One entry point turns `(marketplace, action, params)`
//! into the right adapter call and wraps the outcome in the wire envelope.
//! Credentials come either inline (pre-save connection testing) or from a
//! stored connection; sync attempts against stored connections are recorded
//! best-effort.

use crate::batch::{self, BatchItem, Progress};
use crate::credentials::Credentials;
use crate::error::{SyncEnvelope, SyncError, SyncResult};
use crate::marketplaces::{
    amazon, ciceksepeti, etsy, hepsiburada, ikas, n11, shopify, trendyol,
};
use crate::models::{
    BulkRequest, DispatchRequest, Marketplace, Order, Product, ProductUpdate, StockLine,
};
use crate::orders::StatusPush;
use crate::store::{Connection, Store, StoreError};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    TestConnection,
    FetchCategories,
    FetchCategoryAttributes,
    FetchProducts,
    CreateProduct,
    UpdateProduct,
    BulkUpdateStock,
    PushProducts,
    FetchOrders,
    PushOrderStatus,
}

impl Action {
    /// Accepts snake_case, camelCase, and kebab-case spellings; clients have
    /// historically sent all three.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "testconnection" | "checkconnection" => Some(Action::TestConnection),
            "fetchcategories" | "getcategories" => Some(Action::FetchCategories),
            "fetchcategoryattributes" | "getattributes" => Some(Action::FetchCategoryAttributes),
            "fetchproducts" | "getproducts" => Some(Action::FetchProducts),
            "createproduct" => Some(Action::CreateProduct),
            "updateproduct" => Some(Action::UpdateProduct),
            "bulkupdatestock" => Some(Action::BulkUpdateStock),
            "pushproducts" => Some(Action::PushProducts),
            "fetchorders" | "getorders" => Some(Action::FetchOrders),
            "pushorderstatus" => Some(Action::PushOrderStatus),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::TestConnection => "test_connection",
            Action::FetchCategories => "fetch_categories",
            Action::FetchCategoryAttributes => "fetch_category_attributes",
            Action::FetchProducts => "fetch_products",
            Action::CreateProduct => "create_product",
            Action::UpdateProduct => "update_product",
            Action::BulkUpdateStock => "bulk_update_stock",
            Action::PushProducts => "push_products",
            Action::FetchOrders => "fetch_orders",
            Action::PushOrderStatus => "push_order_status",
        }
    }
}

/// Free-form action parameters; each action reads the fields it needs.
#[derive(Debug, Default, Deserialize)]
pub struct Params {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub product: Option<Product>,
    #[serde(default)]
    pub products: Option<Vec<Product>>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub stock: Option<u32>,
    #[serde(default)]
    pub stock_lines: Option<Vec<StockLine>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub order: Option<StatusPush>,
}

impl Params {
    fn from_value(value: Value) -> SyncResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
            .map_err(|err| SyncError::api(format!("invalid action params: {err}")))
    }

    fn page(&self) -> u32 {
        self.page.unwrap_or(0)
    }

    fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(50)
    }

    fn require_category(&self) -> SyncResult<&str> {
        self.category_id
            .as_deref()
            .ok_or_else(|| SyncError::api("category_id is required for this action"))
    }

    fn require_product(&self) -> SyncResult<&Product> {
        self.product
            .as_ref()
            .ok_or_else(|| SyncError::api("product is required for this action"))
    }

    fn require_sku(&self) -> SyncResult<&str> {
        self.sku
            .as_deref()
            .ok_or_else(|| SyncError::api("sku is required for this action"))
    }

    fn require_order(&self) -> SyncResult<&StatusPush> {
        self.order
            .as_ref()
            .ok_or_else(|| SyncError::api("order is required for this action"))
    }
}

/// Resolve the credential source of a request: inline credentials win, a
/// connection id falls back to the datastore. The stored connection rides
/// along so callers can attribute history rows to its owner.
pub async fn resolve_credentials(
    store: Option<&Store>,
    marketplace: Marketplace,
    connection_id: Option<&str>,
    inline: Option<&std::collections::BTreeMap<String, String>>,
) -> SyncResult<(Credentials, Option<Connection>)> {
    if let Some(map) = inline {
        return Ok((Credentials::from(map.clone()), None));
    }
    let Some(raw_id) = connection_id else {
        return Err(SyncError::auth_required(
            "provide credentials or a connection_id",
        ));
    };
    let id = Uuid::parse_str(raw_id)
        .map_err(|_| SyncError::api(format!("connection_id is not a UUID: {raw_id}")))?;
    let Some(store) = store else {
        return Err(SyncError::config_missing(
            "no datastore configured, stored connections are unavailable",
        ));
    };
    let connection = match store.fetch_connection(id).await {
        Ok(connection) => connection,
        Err(StoreError::NotFound(_)) => {
            return Err(SyncError::auth_required(format!(
                "connection {id} does not exist"
            )));
        }
        Err(err) => {
            warn!(target: "pazarsync.store", error = %err, "connection lookup failed");
            return Err(SyncError::connection("datastore is unavailable"));
        }
    };
    if connection.marketplace != marketplace {
        return Err(SyncError::api(format!(
            "connection {id} belongs to {}, not {}",
            connection.marketplace.slug(),
            marketplace.slug()
        )));
    }
    if !connection.is_active {
        return Err(SyncError::auth_required(format!(
            "connection {id} is disabled, reconnect the account"
        )));
    }
    Ok((connection.credentials(), Some(connection)))
}

/// Run a single action and wrap the outcome in the wire envelope, recording
/// the attempt when a stored connection was used.
pub async fn dispatch(
    store: Option<&Store>,
    marketplace: Marketplace,
    request: DispatchRequest,
) -> SyncEnvelope {
    let Some(action) = Action::parse(&request.action) else {
        return SyncEnvelope::err(&SyncError::unsupported(format!(
            "unknown action: {}",
            request.action
        )));
    };

    let resolved = resolve_credentials(
        store,
        marketplace,
        request.connection_id.as_deref(),
        request.credentials.as_ref(),
    )
    .await;
    let (credentials, connection) = match resolved {
        Ok(pair) => pair,
        Err(err) => return SyncEnvelope::err(&err),
    };

    let result = execute(marketplace, action, &credentials, request.params).await;

    if let (Some(store), Some(connection)) = (store, &connection) {
        let error_type = result.as_ref().err().map(|err| err.kind().tag());
        if let Err(err) = store
            .record_sync_attempt(connection.id, action.as_str(), result.is_ok(), error_type)
            .await
        {
            warn!(target: "pazarsync.store", error = %err, "failed to record sync attempt");
        }
        if let Ok(data) = &result {
            persist_fetch(store, connection, action, data).await;
        }
    }

    info!(
        target: "pazarsync.sync",
        marketplace = marketplace.slug(),
        action = action.as_str(),
        success = result.is_ok(),
        "action finished"
    );
    SyncEnvelope::from(result)
}

/// Mirror fetched listings and orders into the datastore, best-effort, so
/// the dashboard has local copies to render without re-hitting the
/// marketplace.
async fn persist_fetch(store: &Store, connection: &Connection, action: Action, data: &Value) {
    match action {
        Action::FetchProducts => {
            let Ok(products) = serde_json::from_value::<Vec<Product>>(data["products"].clone())
            else {
                return;
            };
            for product in &products {
                if let Err(err) = store
                    .upsert_listing(connection.user_id, connection.marketplace, product)
                    .await
                {
                    warn!(target: "pazarsync.store", error = %err, sku = %product.sku, "listing upsert failed");
                }
            }
        }
        Action::FetchOrders => {
            let Ok(orders) = serde_json::from_value::<Vec<Order>>(data["orders"].clone()) else {
                return;
            };
            if let Err(err) = store
                .insert_orders(connection.user_id, connection.marketplace, &orders)
                .await
            {
                warn!(target: "pazarsync.store", error = %err, "order insert failed");
            }
        }
        _ => {}
    }
}

/// Dispatch one action against one marketplace with resolved credentials.
pub async fn execute(
    marketplace: Marketplace,
    action: Action,
    credentials: &Credentials,
    params: Value,
) -> SyncResult<Value> {
    use Marketplace::*;
    let params = Params::from_value(params)?;
    match action {
        Action::TestConnection => {
            match marketplace {
                Trendyol => trendyol::test_connection(credentials).await?,
                Hepsiburada => hepsiburada::test_connection(credentials).await?,
                Amazon => amazon::test_connection(credentials).await?,
                Ikas => ikas::test_connection(credentials).await?,
                N11 => n11::test_connection(credentials).await?,
                Ciceksepeti => ciceksepeti::test_connection(credentials).await?,
                Etsy => etsy::test_connection(credentials).await?,
                Shopify => shopify::test_connection(credentials).await?,
            }
            Ok(json!({ "connected": true, "marketplace": marketplace.slug() }))
        }
        Action::FetchCategories => {
            let tree = match marketplace {
                Trendyol => trendyol::fetch_categories(credentials).await?,
                Hepsiburada => hepsiburada::fetch_categories(credentials).await?,
                Amazon => amazon::fetch_categories(credentials).await?,
                Ikas => ikas::fetch_categories(credentials).await?,
                N11 => n11::fetch_categories(credentials).await?,
                Ciceksepeti => ciceksepeti::fetch_categories(credentials).await?,
                Etsy => etsy::fetch_categories(credentials).await?,
                Shopify => shopify::fetch_categories(credentials).await?,
            };
            Ok(json!({ "categories": tree }))
        }
        Action::FetchCategoryAttributes => {
            let category_id = params.require_category()?;
            let attributes = match marketplace {
                Trendyol => trendyol::fetch_category_attributes(credentials, category_id).await?,
                Hepsiburada => {
                    hepsiburada::fetch_category_attributes(credentials, category_id).await?
                }
                Amazon => amazon::fetch_category_attributes(credentials, category_id).await?,
                Ikas => ikas::fetch_category_attributes(credentials, category_id).await?,
                N11 => n11::fetch_category_attributes(credentials, category_id).await?,
                Ciceksepeti => {
                    ciceksepeti::fetch_category_attributes(credentials, category_id).await?
                }
                Etsy => etsy::fetch_category_attributes(credentials, category_id).await?,
                Shopify => shopify::fetch_category_attributes(credentials, category_id).await?,
            };
            Ok(json!({ "attributes": attributes }))
        }
        Action::FetchProducts => {
            let (page, size) = (params.page(), params.page_size());
            let products = match marketplace {
                Trendyol => trendyol::fetch_products(credentials, page, size).await?,
                Hepsiburada => {
                    hepsiburada::fetch_products(credentials, page * size, size).await?
                }
                Amazon => amazon::fetch_products(credentials, page, size).await?,
                Ikas => ikas::fetch_products(credentials, page, size).await?,
                N11 => n11::fetch_products(credentials, page, size).await?,
                Ciceksepeti => ciceksepeti::fetch_products(credentials, page, size).await?,
                Etsy => etsy::fetch_products(credentials, page * size, size).await?,
                Shopify => shopify::fetch_products(credentials, size).await?,
            };
            // a seller with zero listings is valid data, not an error
            Ok(products_payload(products))
        }
        Action::CreateProduct => {
            let product = params.require_product()?;
            let receipt = match marketplace {
                Trendyol => trendyol::create_product(credentials, product).await?,
                Hepsiburada => hepsiburada::create_product(credentials, product).await?,
                Amazon => amazon::create_product(credentials, product).await?,
                Ikas => ikas::create_product(credentials, product).await?,
                N11 => n11::create_product(credentials, product).await?,
                Ciceksepeti => ciceksepeti::create_product(credentials, product).await?,
                Etsy => etsy::create_product(credentials, product).await?,
                Shopify => shopify::create_product(credentials, product).await?,
            };
            Ok(json!({ "receipt": receipt }))
        }
        Action::UpdateProduct => {
            let sku = params.require_sku()?;
            let updates = ProductUpdate {
                price: params.price,
                stock: params.stock,
            };
            match marketplace {
                Trendyol => trendyol::update_product(credentials, sku, &updates).await?,
                Hepsiburada => hepsiburada::update_product(credentials, sku, &updates).await?,
                Amazon => amazon::update_product(credentials, sku, &updates).await?,
                Ikas => ikas::update_product(credentials, sku, &updates).await?,
                N11 => n11::update_product(credentials, sku, &updates).await?,
                Ciceksepeti => ciceksepeti::update_product(credentials, sku, &updates).await?,
                Etsy => etsy::update_product(credentials, sku, &updates).await?,
                Shopify => shopify::update_product(credentials, sku, &updates).await?,
            }
            Ok(json!({ "updated": sku }))
        }
        Action::BulkUpdateStock => {
            let lines = params.stock_lines.unwrap_or_default();
            bulk_stock(marketplace, credentials, lines, None).await
        }
        Action::PushProducts => {
            let products = params.products.unwrap_or_default();
            if products.is_empty() {
                return Err(SyncError::no_products("bulk operation received no items"));
            }
            match marketplace {
                Trendyol => {
                    let count = products.len();
                    let receipt = trendyol::push_products(credentials, &products).await?;
                    Ok(json!({ "receipt": receipt, "count": count }))
                }
                other => Err(SyncError::unsupported(format!(
                    "push_products is not available on {}",
                    other.slug()
                ))),
            }
        }
        Action::FetchOrders => {
            let orders = match marketplace {
                Trendyol => {
                    trendyol::fetch_orders(credentials, params.since, params.status.as_deref())
                        .await?
                }
                Hepsiburada => {
                    hepsiburada::fetch_orders(
                        credentials,
                        params.page() * params.page_size(),
                        params.page_size(),
                    )
                    .await?
                }
                Amazon => amazon::fetch_orders(credentials, params.since).await?,
                Ikas => ikas::fetch_orders(credentials, params.page_size()).await?,
                N11 => n11::fetch_orders(credentials, params.status.as_deref()).await?,
                Ciceksepeti => {
                    ciceksepeti::fetch_orders(credentials, params.page(), params.page_size())
                        .await?
                }
                Etsy => {
                    etsy::fetch_orders(
                        credentials,
                        params.page() * params.page_size(),
                        params.page_size(),
                    )
                    .await?
                }
                Shopify => shopify::fetch_orders(credentials, params.page_size()).await?,
            };
            let count = orders.len();
            Ok(json!({ "orders": orders, "count": count }))
        }
        Action::PushOrderStatus => {
            let push = params.require_order()?;
            let outcome = match marketplace {
                Trendyol => trendyol::push_order_status(credentials, push).await?,
                Hepsiburada => hepsiburada::push_order_status(credentials, push).await?,
                Amazon => amazon::push_order_status(credentials, push).await?,
                Ikas => ikas::push_order_status(credentials, push).await?,
                N11 => n11::push_order_status(credentials, push).await?,
                Ciceksepeti => ciceksepeti::push_order_status(credentials, push).await?,
                Etsy => etsy::push_order_status(credentials, push).await?,
                Shopify => shopify::push_order_status(credentials, push).await?,
            };
            Ok(serde_json::to_value(outcome)
                .map_err(|err| SyncError::internal(err.to_string()))?)
        }
    }
}

fn products_payload(products: Vec<Product>) -> Value {
    let count = products.len();
    json!({ "products": products, "count": count })
}

/// Stock update for many SKUs at once. Trendyol and Hepsiburada take the
/// whole batch natively; everywhere else the shared runner fans out per
/// line with a bounded window.
pub async fn bulk_stock(
    marketplace: Marketplace,
    credentials: &Credentials,
    lines: Vec<StockLine>,
    progress: Option<watch::Sender<Progress>>,
) -> SyncResult<Value> {
    if lines.is_empty() {
        return Err(SyncError::no_products("bulk operation received no items"));
    }
    match marketplace {
        Marketplace::Trendyol => {
            trendyol::bulk_update_stock(credentials, &lines).await?;
            Ok(json!({ "total": lines.len(), "succeeded": lines.len(), "failed": 0 }))
        }
        Marketplace::Hepsiburada => {
            let tracking = hepsiburada::bulk_update_stock(credentials, &lines).await?;
            Ok(json!({
                "total": lines.len(),
                "succeeded": lines.len(),
                "failed": 0,
                "tracking_id": tracking,
            }))
        }
        _ => {
            let credentials = Arc::new(credentials.clone());
            let items: Vec<(BatchItem, StockLine)> = lines
                .into_iter()
                .map(|line| (BatchItem::new(line.sku.clone(), line.sku.clone()), line))
                .collect();
            let results = batch::run(items, batch::DEFAULT_WINDOW, progress, move |line| {
                let credentials = credentials.clone();
                async move { stock_one(marketplace, &credentials, &line).await }
            })
            .await?;
            Ok(batch::summarize(&results))
        }
    }
}

async fn stock_one(
    marketplace: Marketplace,
    credentials: &Credentials,
    line: &StockLine,
) -> SyncResult<()> {
    match marketplace {
        Marketplace::Amazon => amazon::bulk_update_stock(credentials, line).await,
        Marketplace::Ikas => ikas::bulk_update_stock(credentials, line).await,
        Marketplace::N11 => n11::bulk_update_stock(credentials, line).await,
        Marketplace::Ciceksepeti => ciceksepeti::bulk_update_stock(credentials, line).await,
        Marketplace::Etsy => etsy::bulk_update_stock(credentials, line).await,
        Marketplace::Shopify => shopify::bulk_update_stock(credentials, line).await,
        // native-batch marketplaces never reach the per-line path
        Marketplace::Trendyol | Marketplace::Hepsiburada => {
            Err(SyncError::internal("native batch routed to per-line path"))
        }
    }
}

/// Create many products with the bounded runner. One listing's rejection
/// never aborts its siblings.
pub async fn bulk_create(
    marketplace: Marketplace,
    credentials: &Credentials,
    products: Vec<Product>,
    progress: Option<watch::Sender<Progress>>,
) -> SyncResult<Value> {
    let credentials = Arc::new(credentials.clone());
    let items: Vec<(BatchItem, Product)> = products
        .into_iter()
        .map(|product| {
            (
                BatchItem::new(product.sku.clone(), product.title.clone()),
                product,
            )
        })
        .collect();
    let results = batch::run(items, batch::DEFAULT_WINDOW, progress, move |product| {
        let credentials = credentials.clone();
        async move { create_one(marketplace, &credentials, &product).await }
    })
    .await?;
    Ok(batch::summarize(&results))
}

async fn create_one(
    marketplace: Marketplace,
    credentials: &Credentials,
    product: &Product,
) -> SyncResult<()> {
    use Marketplace::*;
    match marketplace {
        Trendyol => trendyol::create_product(credentials, product).await.map(|_| ()),
        Hepsiburada => hepsiburada::create_product(credentials, product).await.map(|_| ()),
        Amazon => amazon::create_product(credentials, product).await.map(|_| ()),
        Ikas => ikas::create_product(credentials, product).await.map(|_| ()),
        N11 => n11::create_product(credentials, product).await.map(|_| ()),
        Ciceksepeti => ciceksepeti::create_product(credentials, product).await.map(|_| ()),
        Etsy => etsy::create_product(credentials, product).await.map(|_| ()),
        Shopify => shopify::create_product(credentials, product).await.map(|_| ()),
    }
}

/// Run a bulk request (create or stock) end to end; used by both the
/// synchronous endpoint and background jobs.
pub async fn run_bulk(
    store: Option<&Store>,
    marketplace: Marketplace,
    request: BulkRequest,
    progress: Option<watch::Sender<Progress>>,
) -> SyncEnvelope {
    let Some(action) = Action::parse(&request.action) else {
        return SyncEnvelope::err(&SyncError::unsupported(format!(
            "unknown action: {}",
            request.action
        )));
    };
    let resolved = resolve_credentials(
        store,
        marketplace,
        request.connection_id.as_deref(),
        request.credentials.as_ref(),
    )
    .await;
    let (credentials, _) = match resolved {
        Ok(pair) => pair,
        Err(err) => return SyncEnvelope::err(&err),
    };
    let result = match action {
        Action::CreateProduct => {
            bulk_create(marketplace, &credentials, request.products, progress).await
        }
        Action::BulkUpdateStock => {
            bulk_stock(marketplace, &credentials, request.stock, progress).await
        }
        other => Err(SyncError::unsupported(format!(
            "{} cannot run as a bulk job",
            other.as_str()
        ))),
    };
    SyncEnvelope::from(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::BTreeMap;

    #[test]
    fn action_parse_accepts_all_spellings() {
        assert_eq!(Action::parse("fetch_categories"), Some(Action::FetchCategories));
        assert_eq!(Action::parse("fetchCategories"), Some(Action::FetchCategories));
        assert_eq!(Action::parse("fetch-categories"), Some(Action::FetchCategories));
        assert_eq!(Action::parse(" bulkUpdateStock "), Some(Action::BulkUpdateStock));
        assert_eq!(Action::parse("pushOrderStatus"), Some(Action::PushOrderStatus));
        assert_eq!(Action::parse("deleteEverything"), None);
    }

    #[test]
    fn action_parse_accepts_legacy_aliases() {
        assert_eq!(Action::parse("check_connection"), Some(Action::TestConnection));
        assert_eq!(Action::parse("get_categories"), Some(Action::FetchCategories));
        assert_eq!(Action::parse("get_attributes"), Some(Action::FetchCategoryAttributes));
        assert_eq!(Action::parse("get_products"), Some(Action::FetchProducts));
        assert_eq!(Action::parse("get_orders"), Some(Action::FetchOrders));
        assert_eq!(Action::parse("push_products"), Some(Action::PushProducts));
    }

    #[tokio::test]
    async fn push_products_is_trendyol_only() {
        let credentials = Credentials::from(BTreeMap::new());
        let params = json!({ "products": [{
            "sku": "SKU-1", "title": "Kolye", "price": 99.0, "stock": 3
        }] });
        let err = execute(Marketplace::Etsy, Action::PushProducts, &credentials, params)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedAction);
    }

    #[tokio::test]
    async fn push_products_with_no_items_is_no_products() {
        let credentials = Credentials::from(BTreeMap::new());
        let err = execute(
            Marketplace::Trendyol,
            Action::PushProducts,
            &credentials,
            Value::Null,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoProducts);
    }

    #[test]
    fn empty_product_page_is_valid_data() {
        let payload = products_payload(Vec::new());
        assert_eq!(payload["count"], json!(0));
        assert!(payload["products"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_action_is_unsupported_envelope() {
        let envelope = dispatch(
            None,
            Marketplace::Trendyol,
            DispatchRequest {
                action: "reticulate_splines".into(),
                connection_id: None,
                credentials: Some(BTreeMap::new()),
                params: Value::Null,
            },
        )
        .await;
        assert!(!envelope.success);
        assert_eq!(envelope.error_type.as_deref(), Some("UNSUPPORTED_ACTION"));
        assert!(envelope.data.is_none());
    }

    #[tokio::test]
    async fn no_credential_source_is_auth_required() {
        let envelope = dispatch(
            None,
            Marketplace::Etsy,
            DispatchRequest {
                action: "test_connection".into(),
                connection_id: None,
                credentials: None,
                params: Value::Null,
            },
        )
        .await;
        assert!(!envelope.success);
        assert_eq!(envelope.error_type.as_deref(), Some("AUTH_REQUIRED"));
    }

    #[tokio::test]
    async fn connection_id_without_store_is_config_missing() {
        let envelope = dispatch(
            None,
            Marketplace::Etsy,
            DispatchRequest {
                action: "test_connection".into(),
                connection_id: Some(Uuid::new_v4().to_string()),
                credentials: None,
                params: Value::Null,
            },
        )
        .await;
        assert_eq!(envelope.error_type.as_deref(), Some("CONFIG_MISSING"));
    }

    #[tokio::test]
    async fn malformed_connection_id_is_api_error() {
        let err = resolve_credentials(None, Marketplace::N11, Some("not-a-uuid"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ApiError);
    }

    #[tokio::test]
    async fn attribute_fetch_requires_category_id() {
        let credentials = Credentials::from(BTreeMap::from([
            ("app_key".to_string(), "k".to_string()),
            ("app_secret".to_string(), "s".to_string()),
        ]));
        let err = execute(
            Marketplace::N11,
            Action::FetchCategoryAttributes,
            &credentials,
            Value::Null,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ApiError);
        assert!(err.message().contains("category_id"));
    }

    #[tokio::test]
    async fn bulk_stock_with_no_lines_is_no_products() {
        let credentials = Credentials::from(BTreeMap::new());
        let err = bulk_stock(Marketplace::Etsy, &credentials, Vec::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoProducts);
    }

    #[tokio::test]
    async fn bulk_tolerates_per_item_credential_failures() {
        // empty bundle: every item fails validation, none abort the batch
        let credentials = Credentials::from(BTreeMap::new());
        let lines = vec![
            StockLine { sku: "A".into(), quantity: 1 },
            StockLine { sku: "B".into(), quantity: 2 },
        ];
        let value = bulk_stock(Marketplace::Etsy, &credentials, lines, None)
            .await
            .unwrap();
        assert_eq!(value["total"], json!(2));
        assert_eq!(value["failed"], json!(2));
        assert_eq!(value["items"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn run_bulk_rejects_non_bulk_actions() {
        let envelope = run_bulk(
            None,
            Marketplace::Shopify,
            BulkRequest {
                action: "fetch_orders".into(),
                connection_id: None,
                credentials: Some(BTreeMap::new()),
                products: Vec::new(),
                stock: Vec::new(),
            },
            None,
        )
        .await;
        assert_eq!(envelope.error_type.as_deref(), Some("UNSUPPORTED_ACTION"));
    }

    #[test]
    fn params_reject_malformed_payloads() {
        let err = Params::from_value(json!({ "page": "three" })).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ApiError);
        assert!(Params::from_value(Value::Null).is_ok());
    }
}
