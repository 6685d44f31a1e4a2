//! PostgREST-backed datastore. Optional: when the env vars are absent the
//! service still runs, callers just pass inline credentials and sync history
//! is not recorded.

use crate::credentials::Credentials;
use crate::http::build_client;
use crate::models::{Marketplace, Order};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Store {
    base_url: String,
    service_key: String,
    http: Client,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
    #[error("connection not found: {0}")]
    NotFound(Uuid),
}

/// A stored marketplace connection: which marketplace, whose account, and the
/// credential bundle captured at connect time.
#[derive(Debug, Clone, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub user_id: Uuid,
    pub marketplace: Marketplace,
    pub credentials: BTreeMap<String, String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl Connection {
    pub fn credentials(&self) -> Credentials {
        Credentials::from(self.credentials.clone())
    }
}

/// A human-confirmed category mapping, used to ground AI suggestions.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerifiedMapping {
    pub source_category: String,
    pub target_category_id: String,
    pub target_category_path: String,
}

impl Store {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            http: build_client(),
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    pub async fn fetch_connection(&self, id: Uuid) -> Result<Connection, StoreError> {
        let url = format!(
            "{}/rest/v1/marketplace_connections?id=eq.{id}&select=*&limit=1",
            self.base_url
        );
        let response = self
            .request(self.http.get(url))
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Request(format!("HTTP {}", response.status())));
        }
        let mut payload: Vec<Connection> = response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))?;
        payload.pop().ok_or(StoreError::NotFound(id))
    }

    /// Best-effort audit record, one row per adapter invocation, plus a bump
    /// of the connection's `last_sync_at`. Callers log failures and move on;
    /// a down store never fails a sync.
    pub async fn record_sync_attempt(
        &self,
        connection_id: Uuid,
        action: &str,
        success: bool,
        error_type: Option<&str>,
    ) -> Result<(), StoreError> {
        let url = format!("{}/rest/v1/sync_attempts", self.base_url);
        let response = self
            .request(self.http.post(url))
            .header("Prefer", "return=minimal")
            .json(&json!({
                "connection_id": connection_id,
                "action": action,
                "success": success,
                "error_type": error_type,
                "attempted_at": Utc::now(),
            }))
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Request(format!("HTTP {}", response.status())));
        }

        let url = format!(
            "{}/rest/v1/marketplace_connections?id=eq.{connection_id}",
            self.base_url
        );
        let response = self
            .request(self.http.patch(url))
            .header("Prefer", "return=minimal")
            .json(&json!({ "last_sync_at": Utc::now() }))
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Request(format!("HTTP {}", response.status())));
        }
        Ok(())
    }

    /// Upsert a fetched listing keyed by (user, platform, external id). The
    /// merge-duplicates preference makes re-syncs idempotent server-side.
    pub async fn upsert_listing(
        &self,
        user_id: Uuid,
        marketplace: Marketplace,
        product: &crate::models::Product,
    ) -> Result<(), StoreError> {
        let url = format!(
            "{}/rest/v1/listings?on_conflict=user_id,platform,external_id",
            self.base_url
        );
        let response = self
            .request(self.http.post(url))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&json!({
                "user_id": user_id,
                "platform": marketplace.slug(),
                "external_id": product.sku,
                "title": product.title,
                "price": product.price,
                "stock": product.stock,
                "synced_at": Utc::now(),
            }))
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Request(format!("HTTP {}", response.status())));
        }
        Ok(())
    }

    pub async fn insert_orders(
        &self,
        user_id: Uuid,
        marketplace: Marketplace,
        orders: &[Order],
    ) -> Result<(), StoreError> {
        if orders.is_empty() {
            return Ok(());
        }
        let url = format!(
            "{}/rest/v1/marketplace_orders?on_conflict=user_id,platform,external_id",
            self.base_url
        );
        let rows: Vec<_> = orders
            .iter()
            .map(|order| {
                json!({
                    "user_id": user_id,
                    "platform": marketplace.slug(),
                    "external_id": order.id,
                    "status": order.status.as_str(),
                    "total": order.total,
                    "currency": order.currency,
                    "placed_at": order.placed_at,
                })
            })
            .collect();
        let response = self
            .request(self.http.post(url))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&rows)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Request(format!("HTTP {}", response.status())));
        }
        Ok(())
    }

    pub async fn fetch_verified_mappings(
        &self,
        marketplace: Marketplace,
        limit: u32,
    ) -> Result<Vec<VerifiedMapping>, StoreError> {
        let url = format!(
            "{}/rest/v1/category_mappings?platform=eq.{}&verified=eq.true&select=source_category,target_category_id,target_category_path&limit={limit}",
            self.base_url,
            marketplace.slug()
        );
        let response = self
            .request(self.http.get(url))
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Request(format!("HTTP {}", response.status())));
        }
        response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))
    }
}
