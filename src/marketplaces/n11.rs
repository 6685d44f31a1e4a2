//! N11 SOAP API: requests are hand-built XML envelopes carrying an
//! `<auth><appKey/><appSecret/></auth>` block; responses are read with
//! targeted tag extraction. A missing tag is `None`, never an error; a
//! payload with no recognizable result element is a categorical API error.

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
use once_cell::sync::Lazy;

static ROOT: Lazy<String> = Lazy::new(|| {
    std::env::var("N11_API_ROOT").unwrap_or_else(|_| "https://api.n11.com/ws".to_string())
});

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Extract the text content of the first `<tag>...</tag>` occurrence.
fn extract_tag(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].trim().to_string())
}

/// Extract the inner content of every `<tag>...</tag>` occurrence.
fn extract_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut blocks = Vec::new();
    let mut cursor = 0;
    while let Some(found) = xml[cursor..].find(&open) {
        let start = cursor + found + open.len();
        let Some(rel_end) = xml[start..].find(&close) else {
            break;
        };
        blocks.push(&xml[start..start + rel_end]);
        cursor = start + rel_end + close.len();
    }
    blocks
}

fn envelope(credentials: &Credentials, operation: &str, body: &str) -> SyncResult<String> {
    credentials.validate(Marketplace::N11)?;
    let app_key = xml_escape(credentials.require("app_key")?);
    let app_secret = xml_escape(credentials.require("app_secret")?);
    Ok(format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:sch="http://www.n11.com/ws/schemas">
  <soapenv:Header/>
  <soapenv:Body>
    <sch:{operation}>
      <auth>
        <appKey>{app_key}</appKey>
        <appSecret>{app_secret}</appSecret>
      </auth>
      {body}
    </sch:{operation}>
  </soapenv:Body>
</soapenv:Envelope>"#
    ))
}

async fn call(
    credentials: &Credentials,
    service: &str,
    operation: &str,
    body: &str,
) -> SyncResult<String> {
    let payload = envelope(credentials, operation, body)?;
    let what = format!("N11 {operation}");
    let response = build_client()
        .post(format!("{}/{service}.wsdl", *ROOT))
        .header("Content-Type", "text/xml; charset=utf-8")
        .header("SOAPAction", "")
        .body(payload)
        .send()
        .await
        .map_err(|err| SyncError::from_transport(&what, &err))?;
    let response = check(&what, response).await?;
    let xml = response
        .text()
        .await
        .map_err(|_| SyncError::fetch("N11 response body could not be read"))?;

    match extract_tag(&xml, "status").as_deref() {
        Some("success") => Ok(xml),
        Some("failure") => {
            let reason = extract_tag(&xml, "errorMessage")
                .unwrap_or_else(|| "N11 rejected the request".to_string());
            tracing::debug!(target: "pazarsync.n11", operation = operation, reason = %reason, "soap failure");
            Err(SyncError::api(format!("N11 rejected the request: {reason}")))
        }
        // malformed or unrecognizable payload
        _ => Err(SyncError::api(
            "N11 returned an unrecognizable response".to_string(),
        )),
    }
}

pub async fn test_connection(credentials: &Credentials) -> SyncResult<()> {
    call(credentials, "CategoryService", "GetTopLevelCategoriesRequest", "").await?;
    Ok(())
}

pub async fn fetch_categories(credentials: &Credentials) -> SyncResult<Vec<CategoryNode>> {
    let xml = call(
        credentials,
        "CategoryService",
        "GetTopLevelCategoriesRequest",
        "",
    )
    .await?;
    let mut flat = Vec::new();
    for block in extract_blocks(&xml, "category") {
        let Some(id) = extract_tag(block, "id") else {
            continue;
        };
        let name = extract_tag(block, "name").unwrap_or_default();
        flat.push(FlatCategory::new(id.clone(), name, None));
        // one level of eagerly returned subcategories
        for sub in extract_blocks(block, "subCategory") {
            if let Some(sub_id) = extract_tag(sub, "id") {
                let sub_name = extract_tag(sub, "name").unwrap_or_default();
                flat.push(FlatCategory::new(sub_id, sub_name, Some(&id)));
            }
        }
    }
    Ok(categories::build_tree(flat))
}

pub async fn fetch_category_attributes(
    credentials: &Credentials,
    category_id: &str,
) -> SyncResult<Vec<CategoryAttribute>> {
    let body = format!("<categoryId>{}</categoryId>", xml_escape(category_id));
    let xml = call(
        credentials,
        "CategoryService",
        "GetCategoryAttributesRequest",
        &body,
    )
    .await?;
    Ok(extract_blocks(&xml, "attribute")
        .into_iter()
        .filter_map(|block| {
            let id = extract_tag(block, "id")?;
            let name = extract_tag(block, "name")?;
            let required = extract_tag(block, "mandatory")
                .map(|value| value == "true")
                .unwrap_or(false);
            let values = extract_blocks(block, "value")
                .into_iter()
                .enumerate()
                .map(|(index, value)| AttributeValue {
                    id: extract_tag(value, "id").unwrap_or_else(|| index.to_string()),
                    name: extract_tag(value, "name").unwrap_or_default(),
                })
                .collect();
            Some(CategoryAttribute {
                id,
                name,
                required,
                allows_custom: true,
                values,
            })
        })
        .collect())
}

pub async fn fetch_products(
    credentials: &Credentials,
    page: u32,
    page_size: u32,
) -> SyncResult<Vec<Product>> {
    let body = format!(
        "<pagingData><currentPage>{page}</currentPage><pageSize>{page_size}</pageSize></pagingData>"
    );
    let xml = call(credentials, "ProductService", "GetProductListRequest", &body).await?;
    Ok(extract_blocks(&xml, "product")
        .into_iter()
        .filter_map(normalize_product)
        .collect())
}

fn normalize_product(block: &str) -> Option<Product> {
    let sku = extract_tag(block, "productSellerCode")?;
    Some(Product {
        sku,
        title: extract_tag(block, "title").unwrap_or_default(),
        description: extract_tag(block, "description"),
        price: extract_tag(block, "displayPrice")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0.0),
        stock: extract_tag(block, "quantity")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0),
        category_id: extract_tag(block, "categoryId"),
        brand: extract_tag(block, "brand"),
        images: extract_blocks(block, "image")
            .into_iter()
            .filter_map(|image| extract_tag(image, "url"))
            .collect(),
        raw: extract_tag(block, "id")
            .map(|id| serde_json::json!({ "n11_product_id": id })),
    })
}

pub async fn create_product(
    credentials: &Credentials,
    product: &Product,
) -> SyncResult<CreateReceipt> {
    let images = if product.images.is_empty() {
        String::new()
    } else {
        let entries: String = product
            .images
            .iter()
            .enumerate()
            .map(|(index, url)| {
                format!(
                    "<image><url>{}</url><order>{}</order></image>",
                    xml_escape(url),
                    index + 1
                )
            })
            .collect();
        format!("<images>{entries}</images>")
    };
    let body = format!(
        "<product>\
         <productSellerCode>{sku}</productSellerCode>\
         <title>{title}</title>\
         <description>{description}</description>\
         <category><id>{category}</id></category>\
         <price>{price:.2}</price>\
         <currencyType>TL</currencyType>\
         <stockItems><stockItem><quantity>{stock}</quantity><sellerStockCode>{sku}</sellerStockCode></stockItem></stockItems>\
         {images}\
         </product>",
        sku = xml_escape(&product.sku),
        title = xml_escape(&product.title),
        description = xml_escape(product.description.as_deref().unwrap_or("")),
        category = xml_escape(product.category_id.as_deref().unwrap_or("")),
        price = product.price,
        stock = product.stock,
    );
    let xml = call(credentials, "ProductService", "SaveProductRequest", &body).await?;
    Ok(CreateReceipt {
        remote_id: extract_tag(&xml, "id"),
        tracking_id: None,
    })
}

pub async fn update_product(
    credentials: &Credentials,
    sku: &str,
    updates: &ProductUpdate,
) -> SyncResult<()> {
    if let Some(stock) = updates.stock {
        let body = format!(
            "<stockItems><stockItem><sellerStockCode>{}</sellerStockCode><quantity>{stock}</quantity></stockItem></stockItems>",
            xml_escape(sku)
        );
        call(
            credentials,
            "ProductStockService",
            "UpdateStockByStockSellerCodeRequest",
            &body,
        )
        .await?;
    }
    if let Some(price) = updates.price {
        let body = format!(
            "<productSellerCode>{}</productSellerCode><price>{price:.2}</price>",
            xml_escape(sku)
        );
        call(
            credentials,
            "ProductService",
            "UpdateProductPriceBySellerCodeRequest",
            &body,
        )
        .await?;
    }
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

pub async fn fetch_orders(credentials: &Credentials, status: Option<&str>) -> SyncResult<Vec<Order>> {
    let filter = status
        .map(|value| format!("<searchData><status>{}</status></searchData>", xml_escape(value)))
        .unwrap_or_default();
    let xml = call(
        credentials,
        "OrderService",
        "DetailedOrderListRequest",
        &filter,
    )
    .await?;
    Ok(extract_blocks(&xml, "order")
        .into_iter()
        .filter_map(normalize_order)
        .collect())
}

fn normalize_order(block: &str) -> Option<Order> {
    let id = extract_tag(block, "orderNumber").or_else(|| extract_tag(block, "id"))?;
    let items = extract_blocks(block, "orderItem")
        .into_iter()
        .map(|item| OrderLine {
            sku: extract_tag(item, "productSellerCode").unwrap_or_default(),
            title: extract_tag(item, "productName"),
            quantity: extract_tag(item, "quantity")
                .and_then(|value| value.parse().ok())
                .unwrap_or(0),
            unit_price: extract_tag(item, "price")
                .and_then(|value| value.parse().ok())
                .unwrap_or(0.0),
        })
        .collect();
    Some(Order {
        id,
        status: orders::canonical_status(&extract_tag(block, "status").unwrap_or_default()),
        customer_name: extract_tag(block, "fullName"),
        customer_email: extract_tag(block, "email"),
        items,
        total: extract_tag(block, "totalAmount")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0.0),
        currency: "TRY".to_string(),
        placed_at: None,
    })
}

pub async fn push_order_status(
    credentials: &Credentials,
    push: &StatusPush,
) -> SyncResult<PushOutcome> {
    let Some(native) = orders::native_status(Marketplace::N11, push.status) else {
        return Ok(PushOutcome::skipped());
    };
    let tracking = push
        .tracking_number
        .as_deref()
        .map(|number| {
            format!(
                "<shipmentInfo><trackingNumber>{}</trackingNumber><shipmentCompany><name>{}</name></shipmentCompany></shipmentInfo>",
                xml_escape(number),
                xml_escape(push.carrier.as_deref().unwrap_or(""))
            )
        })
        .unwrap_or_default();
    let body = format!(
        "<orderItemList><orderItem><id>{}</id><status>{}</status>{tracking}</orderItem></orderItemList>",
        xml_escape(&push.order_id),
        native,
    );
    call(
        credentials,
        "OrderService",
        "MakeOrderItemShipmentRequest",
        &body,
    )
    .await?;
    Ok(PushOutcome::pushed(native))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn creds() -> Credentials {
        Credentials::from(BTreeMap::from([
            ("app_key".to_string(), "key".to_string()),
            ("app_secret".to_string(), "s&cret".to_string()),
        ]))
    }

    #[test]
    fn envelope_carries_escaped_auth_block() {
        let xml = envelope(&creds(), "GetTopLevelCategoriesRequest", "").unwrap();
        assert!(xml.contains("<appKey>key</appKey>"));
        assert!(xml.contains("<appSecret>s&amp;cret</appSecret>"));
        assert!(xml.contains("<sch:GetTopLevelCategoriesRequest>"));
    }

    #[test]
    fn missing_tag_is_none_not_error() {
        let xml = "<result><status>success</status></result>";
        assert_eq!(extract_tag(xml, "errorMessage"), None);
        assert_eq!(extract_tag(xml, "status").as_deref(), Some("success"));
    }

    #[test]
    fn extract_blocks_handles_repetition() {
        let xml = "<list><category><id>1</id></category><category><id>2</id></category></list>";
        let blocks = extract_blocks(xml, "category");
        assert_eq!(blocks.len(), 2);
        assert_eq!(extract_tag(blocks[1], "id").as_deref(), Some("2"));
    }

    #[test]
    fn product_block_with_missing_fields_still_normalizes() {
        let block = "<productSellerCode>N11-1</productSellerCode><title>Vazo</title>";
        let product = normalize_product(block).unwrap();
        assert_eq!(product.sku, "N11-1");
        assert_eq!(product.price, 0.0);
        assert!(product.description.is_none());
    }

    #[test]
    fn product_without_seller_code_is_skipped() {
        assert!(normalize_product("<title>Adsız</title>").is_none());
    }

    #[test]
    fn order_items_parse_from_nested_blocks() {
        let block = "<orderNumber>N-1</orderNumber><status>Shipped</status>\
                     <orderItem><productSellerCode>A</productSellerCode><quantity>2</quantity><price>10.5</price></orderItem>";
        let order = normalize_order(block).unwrap();
        assert_eq!(order.id, "N-1");
        assert_eq!(order.status, crate::orders::OrderStatus::Shipped);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].unit_price, 10.5);
    }

    #[test]
    fn xml_escape_covers_markup_characters() {
        assert_eq!(xml_escape(r#"<a & "b">"#), "&lt;a &amp; &quot;b&quot;&gt;");
    }
}
