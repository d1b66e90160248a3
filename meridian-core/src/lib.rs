//! Meridian Core functionality.
//!
//! This crate contains the domain models, token codecs, topology classification and
//! selection primitives that decide which CDN provider serves an inbound request and
//! how the client's authorization token is translated for it.

pub mod access_log;
pub mod dispatch;
pub mod domain;
pub mod driver;
pub mod error;
pub mod load_balancer;
pub mod net;
pub mod selector;
pub mod token;

pub use access_log::{AccessLogEntry, AccessLogger, TracingAccessLog};
pub use dispatch::{Dispatcher, Disposition};
pub use domain::catalog::DistributionCatalog;
pub use domain::cdn::{CdnInstanceConfig, DriverKind};
pub use domain::distribution::{Distribution, Provider, SelectionMode};
pub use domain::request::RequestContext;
pub use domain::ChangeEvent;
pub use driver::registry::DriverRegistry;
pub use driver::CdnDriver;
pub use load_balancer::balancer::LoadBalancer;
pub use selector::CdnSelector;
pub use token::{NormalizedToken, TokenScheme};
