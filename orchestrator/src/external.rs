//! Adapters to organization-configured external property systems
//!
//! An organization without a registered connector is a normal case: the
//! integration tools report "not configured" instead of failing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared_types::WorkOrder;
use std::collections::HashMap;
use std::sync::Arc;

pub type SharedConnector = Arc<dyn ExternalSystemConnector>;

#[derive(Debug, thiserror::Error)]
pub enum ExternalSystemError {
    #[error("external system request failed: {0}")]
    Request(String),
    #[error("external system returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid external system response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncReceipt {
    pub external_id: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Ways to find a tenant in the external system
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TenantLookup {
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub unit_id: Option<String>,
}

impl TenantLookup {
    pub fn is_empty(&self) -> bool {
        self.external_id.is_none() && self.email.is_none() && self.unit_id.is_none()
    }
}

#[async_trait]
pub trait ExternalSystemConnector: Send + Sync {
    fn system_name(&self) -> &str;

    async fn push_work_order(&self, order: &WorkOrder) -> Result<SyncReceipt, ExternalSystemError>;

    /// `Ok(None)` when the external system has no matching tenant.
    async fn fetch_tenant(&self, lookup: &TenantLookup)
        -> Result<Option<Value>, ExternalSystemError>;
}

/// Connectors keyed by organization id
#[derive(Default, Clone)]
pub struct ExternalSystems {
    connectors: HashMap<String, SharedConnector>,
}

impl ExternalSystems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, organization_id: impl Into<String>, connector: SharedConnector) {
        self.connectors.insert(organization_id.into(), connector);
    }

    pub fn with(mut self, organization_id: impl Into<String>, connector: SharedConnector) -> Self {
        self.register(organization_id, connector);
        self
    }

    pub fn connector(&self, organization_id: &str) -> Option<SharedConnector> {
        self.connectors.get(organization_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

/// REST property-management system
///
/// `POST {base}/work-orders` with the work order body, and
/// `GET {base}/tenants?external_id=..&email=..&unit_id=..`.
pub struct HttpPropertySystem {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPropertySystem {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl ExternalSystemConnector for HttpPropertySystem {
    fn system_name(&self) -> &str {
        &self.base_url
    }

    async fn push_work_order(&self, order: &WorkOrder) -> Result<SyncReceipt, ExternalSystemError> {
        let url = format!("{}/work-orders", self.base_url);
        let response = self
            .authorize(self.http.post(&url).json(order))
            .send()
            .await
            .map_err(|e| ExternalSystemError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalSystemError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<SyncReceipt>()
            .await
            .map_err(|e| ExternalSystemError::InvalidResponse(e.to_string()))
    }

    async fn fetch_tenant(
        &self,
        lookup: &TenantLookup,
    ) -> Result<Option<Value>, ExternalSystemError> {
        let url = format!("{}/tenants", self.base_url);
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(id) = lookup.external_id.as_deref() {
            query.push(("external_id", id));
        }
        if let Some(email) = lookup.email.as_deref() {
            query.push(("email", email));
        }
        if let Some(unit) = lookup.unit_id.as_deref() {
            query.push(("unit_id", unit));
        }

        let response = self
            .authorize(self.http.get(&url).query(&query))
            .send()
            .await
            .map_err(|e| ExternalSystemError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalSystemError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| ExternalSystemError::InvalidResponse(e.to_string()))?;
        Ok(if body.is_null() { None } else { Some(body) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup_is_per_organization() {
        let systems = ExternalSystems::new().with(
            "org-1",
            Arc::new(HttpPropertySystem::new("https://pms.example.com/", None)),
        );
        assert_eq!(systems.len(), 1);
        let connector = systems.connector("org-1").unwrap();
        assert_eq!(connector.system_name(), "https://pms.example.com");
        assert!(systems.connector("org-2").is_none());
    }

    #[test]
    fn test_empty_lookup() {
        assert!(TenantLookup::default().is_empty());
        let lookup = TenantLookup {
            email: Some("a@example.com".to_string()),
            ..Default::default()
        };
        assert!(!lookup.is_empty());
    }
}
