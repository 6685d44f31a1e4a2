use crate::error::{SyncError, SyncResult};
use crate::models::Marketplace;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Opaque per-marketplace credential bundle. `Debug` is redacted so a bundle
/// can never leak through logs or error formatting.
#[derive(Clone, Deserialize)]
pub struct Credentials(BTreeMap<String, String>);

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("fields", &self.0.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl From<BTreeMap<String, String>> for Credentials {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl Credentials {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0
            .get(field)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Required-field accessor used inside adapters after spec validation;
    /// still fails closed if a caller bypassed `validate`.
    pub fn require(&self, field: &str) -> SyncResult<&str> {
        self.get(field)
            .ok_or_else(|| SyncError::config_missing(format!("missing credential field: {field}")))
    }

    /// Validate against the marketplace's credential spec before any network
    /// call; the message lists every missing required field at once.
    pub fn validate(&self, marketplace: Marketplace) -> SyncResult<()> {
        let missing: Vec<&str> = spec_for(marketplace)
            .iter()
            .filter(|field| field.required && self.get(field.name).is_none())
            .map(|field| field.name)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SyncError::config_missing(format!(
                "missing credential fields for {}: {}",
                marketplace.slug(),
                missing.join(", ")
            )))
        }
    }
}

pub struct CredentialField {
    pub name: &'static str,
    pub required: bool,
    pub secret: bool,
}

const fn required(name: &'static str, secret: bool) -> CredentialField {
    CredentialField {
        name,
        required: true,
        secret,
    }
}

const fn optional(name: &'static str, secret: bool) -> CredentialField {
    CredentialField {
        name,
        required: false,
        secret,
    }
}

const TRENDYOL: &[CredentialField] = &[
    required("api_key", true),
    required("api_secret", true),
    required("seller_id", false),
];
const HEPSIBURADA: &[CredentialField] = &[
    required("username", false),
    required("password", true),
    required("merchant_id", false),
];
const AMAZON: &[CredentialField] = &[
    required("client_id", false),
    required("client_secret", true),
    required("refresh_token", true),
    required("seller_id", false),
    optional("marketplace_id", false),
];
const IKAS: &[CredentialField] = &[
    required("client_id", false),
    required("client_secret", true),
    required("store_name", false),
];
const N11: &[CredentialField] = &[required("app_key", false), required("app_secret", true)];
const CICEKSEPETI: &[CredentialField] = &[required("api_key", true)];
const ETSY: &[CredentialField] = &[
    required("api_key", true),
    required("access_token", true),
    required("shop_id", false),
];
const SHOPIFY: &[CredentialField] = &[
    required("shop_domain", false),
    required("access_token", true),
];

/// Typed configuration record per marketplace; `CONFIG_MISSING` validation is
/// generated from these tables rather than hand-checked per adapter.
pub fn spec_for(marketplace: Marketplace) -> &'static [CredentialField] {
    match marketplace {
        Marketplace::Trendyol => TRENDYOL,
        Marketplace::Hepsiburada => HEPSIBURADA,
        Marketplace::Amazon => AMAZON,
        Marketplace::Ikas => IKAS,
        Marketplace::N11 => N11,
        Marketplace::Ciceksepeti => CICEKSEPETI,
        Marketplace::Etsy => ETSY,
        Marketplace::Shopify => SHOPIFY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(pairs: &[(&str, &str)]) -> Credentials {
        Credentials::from(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn validate_lists_all_missing_fields() {
        let err = creds(&[("client_id", "abc")])
            .validate(Marketplace::Ikas)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigMissing);
        assert!(err.message().contains("client_secret"));
        assert!(err.message().contains("store_name"));
        assert!(!err.message().contains("client_id,"));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let bundle = creds(&[("api_key", "  "), ("api_secret", "s"), ("seller_id", "42")]);
        let err = bundle.validate(Marketplace::Trendyol).unwrap_err();
        assert!(err.message().contains("api_key"));
    }

    #[test]
    fn validate_passes_with_optional_absent() {
        let bundle = creds(&[
            ("client_id", "id"),
            ("client_secret", "sec"),
            ("refresh_token", "tok"),
            ("seller_id", "A1"),
        ]);
        assert!(bundle.validate(Marketplace::Amazon).is_ok());
    }

    #[test]
    fn debug_never_prints_values() {
        let bundle = creds(&[("api_key", "super-secret")]);
        let rendered = format!("{bundle:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("api_key"));
    }

    #[test]
    fn every_marketplace_has_a_spec_with_a_secret() {
        for marketplace in Marketplace::ALL {
            let spec = spec_for(marketplace);
            assert!(!spec.is_empty());
            assert!(spec.iter().any(|field| field.secret));
        }
    }

    #[test]
    fn spec_tables_keep_required_and_optional_apart() {
        let amazon = spec_for(Marketplace::Amazon);
        assert!(
            amazon
                .iter()
                .any(|field| field.name == "marketplace_id" && !field.required)
        );
        assert!(
            spec_for(Marketplace::Trendyol)
                .iter()
                .all(|field| field.required)
        );
    }
}
