//! Target-share load balancing across CDN providers.

pub mod balancer;
pub mod window;
