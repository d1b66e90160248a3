//! Error types shared across the routing pipeline.
//!
//! None of these ever reach an HTTP client directly: the dispatcher maps them onto
//! fallback, `401` or `503`.

use thiserror::Error;

/// Failures while minting an outbound token or loading signing material.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The provider has no token or signed URL configuration.
    #[error("no token configuration for {0} scheme")]
    NotConfigured(&'static str),
    /// The token configuration has an empty secret list.
    #[error("token configuration has no secrets")]
    NoSecret,
    /// The configured hash name is not supported.
    #[error("unsupported hash function `{0}`")]
    UnknownHash(String),
    /// A secret or key could not be used as key material.
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    /// The canned policy could not be serialized.
    #[error("policy encoding failed: {0}")]
    Policy(#[from] serde_json::Error),
}

/// Failures while fetching or parsing a topology document.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// The configured or referenced URL is malformed.
    #[error("invalid topology url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// Transport level failure, including timeouts.
    #[error("topology request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("topology service returned status {0}")]
    Status(u16),
    /// The document was neither a directory nor a network map.
    #[error("unexpected media type `{0}`")]
    UnexpectedMediaType(String),
    /// The directory has no matching network map resource.
    #[error("no network map resource matching {0:?} in directory")]
    NetworkMapNotFound(Option<String>),
    /// The network map body has no map section.
    #[error("network map document has no map data")]
    MissingNetworkMap,
}

/// Failures from the Velocix routing service.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Transport level failure, including timeouts and undecodable bodies.
    #[error("routing service request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The routing service answered with something other than `200 OK`.
    #[error("routing service returned status {0}")]
    Status(u16),
    /// The routing service returned a surrogate that is not a URL.
    #[error("routing service returned invalid surrogate `{0}`")]
    InvalidSurrogate(String),
}

/// Failures while a driver resolves a surrogate.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The inbound token was present but did not validate.
    #[error("inbound token failed validation")]
    InvalidToken,
    /// The provider hostname could not be applied to the request URL.
    #[error("invalid provider hostname `{0}`")]
    InvalidHostname(String),
    /// The outbound token could not be minted.
    #[error(transparent)]
    Mint(#[from] TokenError),
}
