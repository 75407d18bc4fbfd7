//! REST implementation of the provider ports (Vultr v2 style API).
//!
//! Every response status is classified into a `ProviderError` here, so no
//! raw transport error crosses into the application layer.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::application::ports::{
    InstanceHardening, InstanceInspector, InstanceLifecycle, Plan, ProviderCatalog, ProviderResult,
    Region, Snapshot,
};
use crate::domain::error::ProviderError;
use crate::domain::instance::{InstanceSpec, ProviderInstance};

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "LEASEKEEPER_API_KEY";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PAGE_SIZE: u32 = 100;

/// HTTP client for the provider API.
pub struct HttpProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpProvider {
    /// Build a client for `base_url` authenticating with `api_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or the TLS client cannot be built.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            anyhow::bail!("{API_KEY_ENV} is empty");
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("leasekeeper/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Build a client from `LEASEKEEPER_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is unset or empty.
    pub fn from_env(base_url: &str) -> Result<Self> {
        let key = std::env::var(API_KEY_ENV).with_context(|| format!("{API_KEY_ENV} is not set"))?;
        Self::new(base_url, &key)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, request: RequestBuilder) -> ProviderResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), body = %body, "provider returned an error");
        Err(classify(status, &body))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ProviderResult<T> {
        let response = self.send(request).await?;
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| ProviderError::Malformed(e.to_string()))
    }

    async fn send_empty(&self, request: RequestBuilder) -> ProviderResult<()> {
        self.send(request).await.map(|_| ())
    }

    /// Fetch every page of a cursor-paginated list endpoint.
    async fn list_all<T: DeserializeOwned>(&self, path: &str, key: &str) -> ProviderResult<Vec<T>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut request = self
                .request(Method::GET, path)
                .query(&[("per_page", PAGE_SIZE.to_string())]);
            if let Some(c) = &cursor {
                request = request.query(&[("cursor", c)]);
            }
            let mut page: serde_json::Value = self.send_json(request).await?;
            let chunk = page
                .get_mut(key)
                .map(serde_json::Value::take)
                .ok_or_else(|| ProviderError::Malformed(format!("response has no '{key}' field")))?;
            let chunk: Vec<T> =
                serde_json::from_value(chunk).map_err(|e| ProviderError::Malformed(e.to_string()))?;
            items.extend(chunk);
            cursor = next_cursor(&page);
            if cursor.is_none() {
                return Ok(items);
            }
        }
    }
}

/// Map an error response onto the provider error taxonomy.
#[must_use]
pub fn classify(status: StatusCode, body: &str) -> ProviderError {
    let message = serde_json::from_str::<WireError>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| body.trim().to_string());
    match status {
        StatusCode::NOT_FOUND => ProviderError::NotFound,
        StatusCode::FORBIDDEN => ProviderError::Forbidden(message),
        StatusCode::UNAUTHORIZED => ProviderError::Unauthorized(message),
        StatusCode::BAD_REQUEST => ProviderError::Busy(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
        other => ProviderError::Server {
            status: other.as_u16(),
            message,
        },
    }
}

fn next_cursor(page: &serde_json::Value) -> Option<String> {
    page.pointer("/meta/links/next")
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct WireInstance {
    id: String,
    label: String,
    region: String,
    plan: String,
    status: String,
    power_status: String,
    server_status: String,
    main_ip: String,
    firewall_group_id: String,
    date_created: String,
}

impl From<WireInstance> for ProviderInstance {
    fn from(w: WireInstance) -> Self {
        Self {
            date_created: DateTime::parse_from_rfc3339(&w.date_created)
                .ok()
                .map(|d| d.with_timezone(&Utc)),
            id: w.id,
            label: w.label,
            region: w.region,
            plan: w.plan,
            status: w.status,
            power_status: w.power_status,
            server_status: w.server_status,
            main_ip: w.main_ip,
            firewall_group_id: w.firewall_group_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InstanceEnvelope {
    #[serde(default)]
    instance: Option<WireInstance>,
}

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    region: &'a str,
    plan: &'a str,
    snapshot_id: &'a str,
    label: &'a str,
    hostname: &'a str,
}

#[derive(Debug, Serialize)]
struct FirewallBody<'a> {
    firewall_group_id: &'a str,
}

#[derive(Debug, Serialize)]
struct DdosBody {
    ddos_protection: bool,
}

#[derive(Debug, Deserialize)]
struct WirePlan {
    id: String,
    #[serde(default)]
    monthly_cost: f64,
}

#[derive(Debug, Deserialize)]
struct WireSnapshot {
    id: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct WireRegion {
    id: String,
    #[serde(default)]
    city: String,
}

/// Hostnames may not contain spaces.
fn hostname_for(label: &str) -> String {
    label.replace([' ', '_'], "-").to_ascii_lowercase()
}

// ── Port implementations ──────────────────────────────────────────────────────

impl InstanceLifecycle for HttpProvider {
    async fn create_instance(&self, spec: &InstanceSpec<'_>) -> ProviderResult<ProviderInstance> {
        let hostname = hostname_for(spec.label);
        let body = CreateBody {
            region: spec.region,
            plan: spec.plan,
            snapshot_id: spec.snapshot_id,
            label: spec.label,
            hostname: &hostname,
        };
        let envelope: InstanceEnvelope = self
            .send_json(self.request(Method::POST, "/instances").json(&body))
            .await?;
        // An empty id is returned as-is; the pipeline decides how to re-check.
        Ok(envelope.instance.map(ProviderInstance::from).unwrap_or_default())
    }

    async fn start_instance(&self, id: &str) -> ProviderResult<()> {
        self.send_empty(self.request(Method::POST, &format!("/instances/{id}/start")))
            .await
    }

    async fn halt_instance(&self, id: &str) -> ProviderResult<()> {
        self.send_empty(self.request(Method::POST, &format!("/instances/{id}/halt")))
            .await
    }

    async fn reboot_instance(&self, id: &str) -> ProviderResult<()> {
        self.send_empty(self.request(Method::POST, &format!("/instances/{id}/reboot")))
            .await
    }

    async fn delete_instance(&self, id: &str) -> ProviderResult<()> {
        self.send_empty(self.request(Method::DELETE, &format!("/instances/{id}")))
            .await
    }
}

impl InstanceInspector for HttpProvider {
    async fn get_instance(&self, id: &str) -> ProviderResult<ProviderInstance> {
        let envelope: InstanceEnvelope = self
            .send_json(self.request(Method::GET, &format!("/instances/{id}")))
            .await?;
        envelope
            .instance
            .map(ProviderInstance::from)
            .ok_or_else(|| ProviderError::Malformed("response has no 'instance' field".to_string()))
    }

    async fn list_instances(&self) -> ProviderResult<Vec<ProviderInstance>> {
        let wire: Vec<WireInstance> = self.list_all("/instances", "instances").await?;
        Ok(wire.into_iter().map(ProviderInstance::from).collect())
    }
}

impl InstanceHardening for HttpProvider {
    async fn attach_firewall_group(&self, id: &str, group_id: &str) -> ProviderResult<()> {
        let body = FirewallBody {
            firewall_group_id: group_id,
        };
        self.send_empty(self.request(Method::PATCH, &format!("/instances/{id}")).json(&body))
            .await
    }

    async fn enable_ddos_protection(&self, id: &str) -> ProviderResult<()> {
        let body = DdosBody {
            ddos_protection: true,
        };
        self.send_empty(self.request(Method::PATCH, &format!("/instances/{id}")).json(&body))
            .await
    }
}

impl ProviderCatalog for HttpProvider {
    async fn list_plans(&self) -> ProviderResult<Vec<Plan>> {
        let wire: Vec<WirePlan> = self.list_all("/plans", "plans").await?;
        Ok(wire
            .into_iter()
            .map(|p| Plan {
                id: p.id,
                monthly_cost: p.monthly_cost,
            })
            .collect())
    }

    async fn list_snapshots(&self) -> ProviderResult<Vec<Snapshot>> {
        let wire: Vec<WireSnapshot> = self.list_all("/snapshots", "snapshots").await?;
        Ok(wire
            .into_iter()
            .map(|s| Snapshot {
                id: s.id,
                description: s.description,
            })
            .collect())
    }

    async fn list_regions(&self) -> ProviderResult<Vec<Region>> {
        let wire: Vec<WireRegion> = self.list_all("/regions", "regions").await?;
        Ok(wire
            .into_iter()
            .map(|r| Region { id: r.id, city: r.city })
            .collect())
    }
}
