//! Shared HTTP plumbing for vendor adapters.
//!
//! Every outbound call goes through a [`VendorClient`], which owns the base
//! URL and a `reqwest::Client` built with the configured per-request timeout.
//! Status codes are mapped onto [`AdapterError`] in one place.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::AdapterError;

/// Longest vendor error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// How a vendor expects to be authenticated.
#[derive(Debug, Clone, Copy)]
pub enum VendorAuth<'a> {
    Bearer(&'a str),
    Header(&'static str, &'a str),
}

/// HTTP client for one vendor API.
#[derive(Debug, Clone)]
pub struct VendorClient {
    base_url: String,
    client: Client,
}

impl VendorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::Client(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a request with the vendor's auth applied.
    pub fn request(&self, method: Method, path: &str, auth: VendorAuth<'_>) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let req = self.client.request(method, &url);
        match auth {
            VendorAuth::Bearer(token) => req.bearer_auth(token),
            VendorAuth::Header(name, value) => req.header(name, value),
        }
    }

    /// Send and decode a JSON body.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
    ) -> Result<T, AdapterError> {
        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| AdapterError::Decode(e.to_string()))
        } else {
            Err(error_for(status, response).await)
        }
    }

    /// Send a state-changing call whose response body is irrelevant.
    ///
    /// `409 Conflict` means the vendor already holds the requested state and
    /// is treated as success, which keeps repeated enforcement idempotent.
    pub async fn send_empty(&self, req: RequestBuilder) -> Result<(), AdapterError> {
        self.send_empty_allowing(req, &[StatusCode::CONFLICT]).await
    }

    /// Like [`send_empty`](Self::send_empty) with an explicit set of
    /// non-success statuses that count as "already done".
    pub async fn send_empty_allowing(
        &self,
        req: RequestBuilder,
        already_done: &[StatusCode],
    ) -> Result<(), AdapterError> {
        let response = req.send().await?;
        let status = response.status();
        if status.is_success() || already_done.contains(&status) {
            Ok(())
        } else {
            Err(error_for(status, response).await)
        }
    }
}

async fn error_for(status: StatusCode, response: reqwest::Response) -> AdapterError {
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    AdapterError::from_status(status, body)
}

/// A child profile as listed by a monitoring vendor.
#[derive(Debug, Clone, Deserialize)]
pub struct VendorProfile {
    pub id: String,
    pub name: String,
}

/// Resolve the vendor-side profile for a child.
///
/// An explicit profile id from the credentials wins; otherwise the vendor's
/// profile listing is searched for a case-insensitive name match.
pub async fn resolve_profile(
    client: &VendorClient,
    auth: VendorAuth<'_>,
    list_path: &str,
    explicit: Option<&str>,
    child_name: &str,
) -> Result<String, AdapterError> {
    if let Some(id) = explicit {
        return Ok(id.to_string());
    }

    let profiles: Vec<VendorProfile> = client
        .send_json(client.request(Method::GET, list_path, auth))
        .await?;

    profiles
        .into_iter()
        .find(|p| p.name.trim().eq_ignore_ascii_case(child_name.trim()))
        .map(|p| p.id)
        .ok_or_else(|| AdapterError::NotFound(format!("no vendor profile named '{}'", child_name)))
}

/// List every profile on the account.
pub async fn list_profiles(
    client: &VendorClient,
    auth: VendorAuth<'_>,
    list_path: &str,
) -> Result<Vec<VendorProfile>, AdapterError> {
    client
        .send_json(client.request(Method::GET, list_path, auth))
        .await
}
