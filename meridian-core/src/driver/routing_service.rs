//! Client for the Velocix routing service.
//!
//! `GET <url>?cs-uri=<original url>&c-ip=<client ip>&numcaches=1` answers with the
//! surrogates that should serve the client:
//!
//! ```json
//! { "http": [ { "http.ip": ["http://edge-1.example/path"] } ],
//!   "selectioncriteria": { "x-location": ["lon"] } }
//! ```

use std::net::IpAddr;

use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::error::RoutingError;

#[derive(Debug, Default, Deserialize)]
struct RoutingResponse {
    #[serde(default)]
    http: Vec<HttpEntry>,
    #[serde(default)]
    selectioncriteria: Option<SelectionCriteria>,
}

#[derive(Debug, Default, Deserialize)]
struct HttpEntry {
    #[serde(rename = "http.ip", default)]
    ip: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SelectionCriteria {
    #[serde(rename = "x-location", default)]
    location: Vec<String>,
}

/// A surrogate picked by the routing service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedSurrogate {
    /// Where the client should be sent.
    pub url: Url,
    /// Location label reported by the service.
    pub location: Option<String>,
}

/// HTTP client bound to one routing service endpoint.
#[derive(Debug, Clone)]
pub struct RoutingServiceClient {
    endpoint: Url,
    client: reqwest::Client,
}

impl RoutingServiceClient {
    /// Create a client for `endpoint`. Timeouts come from `client`.
    pub fn new(endpoint: Url, client: reqwest::Client) -> Self {
        Self { endpoint, client }
    }

    /// The configured endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Ask for a surrogate for `original` on behalf of `client_ip`. `Ok(None)` means
    /// the service answered but offered no surrogate.
    pub async fn resolve(
        &self,
        original: &Url,
        client_ip: IpAddr,
    ) -> Result<Option<RoutedSurrogate>, RoutingError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("cs-uri", original.as_str())
            .append_pair("c-ip", &client_ip.to_string())
            .append_pair("numcaches", "1");

        let response = self.client.get(url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(RoutingError::Status(response.status().as_u16()));
        }
        let body: RoutingResponse = response.json().await?;

        let Some(first) = body.http.iter().flat_map(|entry| entry.ip.iter()).next() else {
            return Ok(None);
        };
        let url = Url::parse(first).map_err(|_| RoutingError::InvalidSurrogate(first.clone()))?;
        let location = body
            .selectioncriteria
            .and_then(|criteria| criteria.location.into_iter().next());
        Ok(Some(RoutedSurrogate { url, location }))
    }
}
