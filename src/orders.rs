use crate::models::Marketplace;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Canonical order state machine shared across marketplaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

/// Request payload for pushing a local status change out to a marketplace.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPush {
    pub order_id: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub carrier: Option<String>,
}

/// What a push actually did. An unmapped status is a successful no-op, not
/// an error: not every marketplace's state machine has an equivalent state.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct PushOutcome {
    pub pushed: bool,
    #[serde(default)]
    pub native_status: Option<&'static str>,
}

impl PushOutcome {
    pub fn skipped() -> Self {
        Self {
            pushed: false,
            native_status: None,
        }
    }

    pub fn pushed(native_status: &'static str) -> Self {
        Self {
            pushed: true,
            native_status: Some(native_status),
        }
    }
}

/// Translate a canonical status into the marketplace's native status code.
/// `None` means the marketplace has no equivalent state and the push is a
/// no-op.
pub fn native_status(marketplace: Marketplace, status: OrderStatus) -> Option<&'static str> {
    use OrderStatus::*;
    match marketplace {
        Marketplace::Trendyol => match status {
            Processing => Some("Picking"),
            Shipped => Some("Shipped"),
            Delivered => Some("Delivered"),
            Cancelled => Some("Cancelled"),
            Pending => None,
        },
        Marketplace::Hepsiburada => match status {
            Processing => Some("Packaged"),
            Shipped => Some("Shipped"),
            Delivered => Some("Delivered"),
            Cancelled => Some("CancelledByMerchant"),
            Pending => None,
        },
        Marketplace::Amazon => match status {
            Shipped => Some("SHIPPED"),
            Cancelled => Some("CANCELED"),
            Pending | Processing | Delivered => None,
        },
        Marketplace::Ikas => match status {
            Processing => Some("PROCESSING"),
            Shipped => Some("SHIPPED"),
            Delivered => Some("DELIVERED"),
            Cancelled => Some("CANCELLED"),
            Pending => None,
        },
        Marketplace::N11 => match status {
            Shipped => Some("Shipped"),
            Delivered => Some("Delivered"),
            Cancelled => Some("Rejected"),
            Pending | Processing => None,
        },
        Marketplace::Ciceksepeti => match status {
            Processing => Some("preparing"),
            Shipped => Some("shipped"),
            Delivered => Some("delivered"),
            Pending | Cancelled => None,
        },
        Marketplace::Etsy => match status {
            Shipped => Some("completed"),
            Cancelled => Some("canceled"),
            Pending | Processing | Delivered => None,
        },
        Marketplace::Shopify => match status {
            Shipped => Some("success"),
            Cancelled => Some("cancelled"),
            Pending | Processing | Delivered => None,
        },
    }
}

/// Normalize a marketplace's native status string back into the canonical
/// state machine. Unknown strings default to `Pending` so fresh, unmapped
/// statuses never break an order fetch.
pub fn canonical_status(raw: &str) -> OrderStatus {
    let lowered = raw.trim().to_lowercase();
    match lowered.as_str() {
        "picking" | "packaged" | "preparing" | "processing" | "unshipped" | "paid" => {
            OrderStatus::Processing
        }
        "shipped" | "success" | "intransit" | "in_transit" | "partiallyshipped" | "fulfilled"
        | "partially_fulfilled" => OrderStatus::Shipped,
        "delivered" | "completed" => OrderStatus::Delivered,
        "cancelled" | "canceled" | "rejected" | "cancelledbymerchant" | "cancelledbycustomer" => {
            OrderStatus::Cancelled
        }
        _ => OrderStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_status_is_none() {
        assert_eq!(native_status(Marketplace::Amazon, OrderStatus::Processing), None);
        assert_eq!(native_status(Marketplace::Etsy, OrderStatus::Delivered), None);
        assert_eq!(native_status(Marketplace::Trendyol, OrderStatus::Pending), None);
    }

    #[test]
    fn shipped_maps_everywhere() {
        for marketplace in Marketplace::ALL {
            assert!(
                native_status(marketplace, OrderStatus::Shipped).is_some(),
                "shipped unmapped for {}",
                marketplace.slug()
            );
        }
    }

    #[test]
    fn canonical_status_covers_marketplace_spellings() {
        assert_eq!(canonical_status("Picking"), OrderStatus::Processing);
        assert_eq!(canonical_status("CANCELED"), OrderStatus::Cancelled);
        assert_eq!(canonical_status("completed"), OrderStatus::Delivered);
        assert_eq!(canonical_status("something-new"), OrderStatus::Pending);
    }

    #[test]
    fn push_outcome_shapes() {
        let skipped = serde_json::to_value(PushOutcome::skipped()).unwrap();
        assert_eq!(skipped["pushed"], serde_json::json!(false));
        assert!(skipped.get("native_status").is_none());
        let pushed = serde_json::to_value(PushOutcome::pushed("Shipped")).unwrap();
        assert_eq!(pushed["native_status"], serde_json::json!("Shipped"));
    }
}
