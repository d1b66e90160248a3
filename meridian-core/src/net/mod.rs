//! Network topology: prefix tries, ALTO classification and per-CDN whitelists.

pub mod alto;
pub mod trie;
pub mod whitelist;

pub use alto::NetworkClassifier;
pub use trie::IpTrie;
pub use whitelist::ProviderWhitelist;
