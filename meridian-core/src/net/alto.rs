//! ALTO network map client.
//!
//! Fetches either an ALTO information resource directory or a network map, turns the
//! map's PID ranges into an [`IpTrie`] and answers "is this client on-net" queries.
//! A failed refresh never touches the current trie: stale topology is preferred over
//! no topology.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use ipnetwork::IpNetwork;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::trie::IpTrie;
use crate::domain::cdn::AltoConfig;
use crate::error::TopologyError;

/// Media type of an ALTO information resource directory.
pub const DIRECTORY_MEDIA_TYPE: &str = "application/alto-directory+json";
/// Media type of an ALTO network map.
pub const NETWORK_MAP_MEDIA_TYPE: &str = "application/alto-networkmap+json";

const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Version fingerprint of a network map.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VersionTag {
    /// Resource id of the map.
    #[serde(rename = "resource-id")]
    pub resource_id: String,
    /// Opaque version tag.
    pub tag: String,
}

/// Result of a successful refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new trie was built and swapped in.
    Updated {
        /// Number of networks in the new trie.
        entries: usize,
    },
    /// The map version had not changed; nothing was parsed.
    Unchanged,
}

enum Document {
    Directory(Value),
    NetworkMap(Value),
}

/// Classifies client addresses against an ALTO network map.
#[derive(Debug)]
pub struct NetworkClassifier {
    config: ArcSwap<AltoConfig>,
    trie: ArcSwap<IpTrie<String>>,
    vtag: ArcSwapOption<VersionTag>,
    client: reqwest::Client,
    wake: Arc<Notify>,
}

impl NetworkClassifier {
    /// Create a classifier with an empty topology. Nothing is fetched until
    /// [`refresh`](Self::refresh) or [`spawn`](Self::spawn) is called.
    pub fn new(config: AltoConfig, client: reqwest::Client) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            trie: ArcSwap::from_pointee(IpTrie::new()),
            vtag: ArcSwapOption::empty(),
            client,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> Arc<AltoConfig> {
        self.config.load_full()
    }

    /// Replace the configuration. Returns `false` and does nothing when the new
    /// configuration equals the current one; otherwise the refresh loop re-fetches
    /// immediately.
    pub fn reconfigure(&self, config: AltoConfig) -> bool {
        if *self.config.load_full() == config {
            return false;
        }
        info!(url = %config.url, "topology source reconfigured");
        self.config.store(Arc::new(config));
        self.vtag.store(None);
        self.wake.notify_one();
        true
    }

    /// Whether `ip` falls inside any non-ignored PID.
    pub fn is_on_net(&self, ip: IpAddr) -> bool {
        self.trie.load().contains(ip)
    }

    /// PID of the most specific range containing `ip`.
    pub fn classify(&self, ip: IpAddr) -> Option<String> {
        self.trie
            .load()
            .longest_match(ip)
            .map(|(_, pid)| pid.clone())
    }

    /// Number of ranges in the current topology.
    pub fn entries(&self) -> usize {
        self.trie.load().len()
    }

    /// Fetch the configured document and rebuild the topology if it changed.
    pub async fn refresh(&self) -> Result<RefreshOutcome, TopologyError> {
        let config = self.config.load_full();
        let url = Url::parse(&config.url)?;
        let map = match self.fetch(&url).await? {
            Document::NetworkMap(doc) => doc,
            Document::Directory(directory) => {
                let map_url = find_network_map(&directory, config.network_map_id.as_deref(), &url)?;
                debug!(%map_url, "resolved network map from directory");
                match self.fetch(&map_url).await? {
                    Document::NetworkMap(doc) => doc,
                    Document::Directory(_) => {
                        return Err(TopologyError::UnexpectedMediaType(
                            DIRECTORY_MEDIA_TYPE.to_string(),
                        ))
                    }
                }
            }
        };
        self.load_network_map(&map, &config)
    }

    /// Spawn the background refresh loop.
    ///
    /// The loop refreshes immediately, then again after `refreshInterval` seconds
    /// (sooner after a failure or a reconfiguration). It ends once the classifier
    /// is dropped.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let classifier = Arc::downgrade(self);
        let wake = self.wake.clone();

        tokio::spawn(async move {
            loop {
                let Some(this) = classifier.upgrade() else {
                    break;
                };
                let delay = this.refresh_logged().await;
                drop(this);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wake.notified() => {}
                }
            }
            debug!("topology refresh loop stopped");
        })
    }

    async fn refresh_logged(&self) -> Duration {
        let config = self.config.load_full();
        let interval = Duration::from_secs(config.refresh_interval.max(1));
        match self.refresh().await {
            Ok(RefreshOutcome::Updated { entries }) => {
                info!(url = %config.url, entries, "topology updated");
                interval
            }
            Ok(RefreshOutcome::Unchanged) => {
                debug!(url = %config.url, "topology unchanged");
                interval
            }
            Err(error) => {
                warn!(url = %config.url, %error, "topology refresh failed, keeping last known map");
                interval.min(MAX_RETRY_DELAY)
            }
        }
    }

    async fn fetch(&self, url: &Url) -> Result<Document, TopologyError> {
        let response = self
            .client
            .get(url.clone())
            .header(
                ACCEPT,
                format!("{NETWORK_MAP_MEDIA_TYPE}, {DIRECTORY_MEDIA_TYPE}, application/json"),
            )
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TopologyError::Status(status.as_u16()));
        }

        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_default();
        let body: Value = response.json().await?;

        match media_type.as_str() {
            DIRECTORY_MEDIA_TYPE => Ok(Document::Directory(body)),
            NETWORK_MAP_MEDIA_TYPE => Ok(Document::NetworkMap(body)),
            "" | "application/json" if body.get("resources").is_some() => {
                Ok(Document::Directory(body))
            }
            "" | "application/json" => Ok(Document::NetworkMap(body)),
            other => Err(TopologyError::UnexpectedMediaType(other.to_string())),
        }
    }

    fn load_network_map(
        &self,
        doc: &Value,
        config: &AltoConfig,
    ) -> Result<RefreshOutcome, TopologyError> {
        let vtag = doc
            .pointer("/data/map-vtag")
            .or_else(|| doc.pointer("/meta/vtag"))
            .and_then(|v| serde_json::from_value::<VersionTag>(v.clone()).ok());

        let current = self.vtag.load_full();
        if vtag.is_some() && vtag.as_ref() == current.as_deref() {
            return Ok(RefreshOutcome::Unchanged);
        }

        let map = doc
            .pointer("/data/map")
            .or_else(|| doc.get("network-map"))
            .and_then(Value::as_object)
            .ok_or(TopologyError::MissingNetworkMap)?;

        let trie = build_trie(map, &config.ignore_pids);
        let entries = trie.len();
        self.trie.store(Arc::new(trie));
        self.vtag.store(vtag.map(Arc::new));
        Ok(RefreshOutcome::Updated { entries })
    }
}

impl Drop for NetworkClassifier {
    fn drop(&mut self) {
        // wakes the refresh loop so it notices the classifier is gone
        self.wake.notify_one();
    }
}

/// Locate the network map resource in an information resource directory.
/// Without a wanted id the first network map listed in the document wins.
fn find_network_map(
    directory: &Value,
    wanted: Option<&str>,
    base: &Url,
) -> Result<Url, TopologyError> {
    let resources: Vec<(&str, &Value)> = match directory.get("resources") {
        Some(Value::Object(entries)) => entries.iter().map(|(id, e)| (id.as_str(), e)).collect(),
        Some(Value::Array(entries)) => entries
            .iter()
            .map(|e| {
                let id = e
                    .get("resource-id")
                    .or_else(|| e.get("id"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                (id, e)
            })
            .collect(),
        _ => Vec::new(),
    };

    let uri = resources
        .into_iter()
        .filter(|(_, e)| e.get("media-type").and_then(Value::as_str) == Some(NETWORK_MAP_MEDIA_TYPE))
        .find(|(id, _)| wanted.map_or(true, |w| w == *id))
        .and_then(|(_, e)| e.get("uri").and_then(Value::as_str))
        .ok_or_else(|| TopologyError::NetworkMapNotFound(wanted.map(str::to_string)))?;

    Ok(base.join(uri)?)
}

fn build_trie(map: &Map<String, Value>, ignore_pids: &[String]) -> IpTrie<String> {
    let mut trie = IpTrie::new();
    for (pid, entry) in map {
        if ignore_pids.iter().any(|ignored| ignored == pid) {
            debug!(pid = %pid, "ignoring pid");
            continue;
        }
        for family in ["ipv4", "ipv6"] {
            let Some(ranges) = entry.get(family).and_then(Value::as_array) else {
                continue;
            };
            for cidr in ranges.iter().filter_map(Value::as_str) {
                match cidr.parse::<IpNetwork>() {
                    Ok(network) => {
                        trie.insert(network, pid.clone());
                    }
                    Err(error) => warn!(pid = %pid, cidr, %error, "skipping malformed prefix"),
                }
            }
        }
    }
    trie
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn network_map(tag: &str) -> Value {
        json!({
            "meta": {},
            "data": {
                "map-vtag": { "resource-id": "default-map", "tag": tag },
                "map": {
                    "core": { "ipv4": ["10.0.0.0/8"], "ipv6": ["2001:db8::/32"] },
                    "metro": { "ipv4": ["10.1.0.0/16", "not-a-prefix"] },
                    "internet": { "ipv4": ["0.0.0.0/0"] }
                }
            }
        })
    }

    fn config(url: String) -> AltoConfig {
        AltoConfig {
            url,
            network_map_id: None,
            ignore_pids: vec!["internet".to_string()],
            refresh_interval: 3600,
        }
    }

    async fn serve(server: &MockServer, at: &str, body: Value, media_type: &str) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_string(), media_type))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn loads_network_map_and_skips_ignored_pids() {
        let server = MockServer::start().await;
        serve(&server, "/map", network_map("v1"), NETWORK_MAP_MEDIA_TYPE).await;

        let classifier =
            NetworkClassifier::new(config(format!("{}/map", server.uri())), reqwest::Client::new());
        let outcome = classifier.refresh().await.unwrap();

        assert_eq!(outcome, RefreshOutcome::Updated { entries: 3 });
        assert_eq!(classifier.classify("10.1.2.3".parse().unwrap()).as_deref(), Some("metro"));
        assert_eq!(classifier.classify("10.2.0.1".parse().unwrap()).as_deref(), Some("core"));
        assert!(classifier.is_on_net("2001:db8::5".parse().unwrap()));
        assert!(!classifier.is_on_net("192.0.2.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn unchanged_version_tag_skips_parsing() {
        let server = MockServer::start().await;
        serve(&server, "/map", network_map("v1"), NETWORK_MAP_MEDIA_TYPE).await;

        let classifier =
            NetworkClassifier::new(config(format!("{}/map", server.uri())), reqwest::Client::new());
        classifier.refresh().await.unwrap();
        assert_eq!(classifier.refresh().await.unwrap(), RefreshOutcome::Unchanged);
    }

    #[tokio::test]
    async fn follows_directory_to_named_map() {
        let server = MockServer::start().await;
        let directory = json!({
            "meta": {},
            "resources": {
                "other-map": { "uri": "/maps/other", "media-type": NETWORK_MAP_MEDIA_TYPE },
                "default-map": { "uri": "maps/default", "media-type": NETWORK_MAP_MEDIA_TYPE },
                "costs": { "uri": "/costs", "media-type": "application/alto-costmap+json" }
            }
        });
        serve(&server, "/alto/directory", directory, DIRECTORY_MEDIA_TYPE).await;
        serve(&server, "/alto/maps/default", network_map("v1"), NETWORK_MAP_MEDIA_TYPE).await;

        let mut cfg = config(format!("{}/alto/directory", server.uri()));
        cfg.network_map_id = Some("default-map".to_string());
        let classifier = NetworkClassifier::new(cfg, reqwest::Client::new());

        assert!(matches!(
            classifier.refresh().await.unwrap(),
            RefreshOutcome::Updated { .. }
        ));
        assert!(classifier.is_on_net("10.9.9.9".parse().unwrap()));
    }

    #[tokio::test]
    async fn missing_map_in_directory_is_an_error() {
        let server = MockServer::start().await;
        serve(&server, "/dir", json!({ "resources": [] }), DIRECTORY_MEDIA_TYPE).await;

        let classifier =
            NetworkClassifier::new(config(format!("{}/dir", server.uri())), reqwest::Client::new());
        assert!(matches!(
            classifier.refresh().await,
            Err(TopologyError::NetworkMapNotFound(None))
        ));
    }

    #[tokio::test]
    async fn failures_keep_last_known_topology() {
        let server = MockServer::start().await;
        serve(&server, "/map", network_map("v1"), NETWORK_MAP_MEDIA_TYPE).await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let classifier =
            NetworkClassifier::new(config(format!("{}/map", server.uri())), reqwest::Client::new());
        classifier.refresh().await.unwrap();

        assert!(classifier.reconfigure(config(format!("{}/broken", server.uri()))));
        assert!(matches!(classifier.refresh().await, Err(TopologyError::Status(500))));
        assert!(classifier.is_on_net("10.1.2.3".parse().unwrap()));
        assert_eq!(classifier.entries(), 3);
    }

    #[test]
    fn reconfigure_ignores_identical_config() {
        let classifier =
            NetworkClassifier::new(config("http://alto.invalid/map".into()), reqwest::Client::new());
        assert!(!classifier.reconfigure(config("http://alto.invalid/map".into())));
        assert!(classifier.reconfigure(config("http://alto.invalid/other".into())));
        assert_eq!(classifier.config().url, "http://alto.invalid/other");
    }

    #[test]
    fn unnamed_map_is_first_listed() {
        let directory = json!({
            "resources": {
                "z-map": { "uri": "/maps/z", "media-type": NETWORK_MAP_MEDIA_TYPE },
                "a-map": { "uri": "/maps/a", "media-type": NETWORK_MAP_MEDIA_TYPE }
            }
        });
        let base = Url::parse("http://alto.example.net/directory").unwrap();
        assert_eq!(
            find_network_map(&directory, None, &base).unwrap().as_str(),
            "http://alto.example.net/maps/z"
        );
        assert_eq!(
            find_network_map(&directory, Some("a-map"), &base).unwrap().as_str(),
            "http://alto.example.net/maps/a"
        );
    }

    proptest::proptest! {
        #[test]
        fn ignored_pids_never_classify(
            ignored in proptest::sample::subsequence(vec!["p0", "p1", "p2", "p3", "p4"], 0..=5),
        ) {
            let mut map = Map::new();
            for i in 0..5 {
                map.insert(format!("p{i}"), json!({ "ipv4": [format!("10.{i}.0.0/16")] }));
            }
            let ignored: Vec<String> = ignored.into_iter().map(str::to_string).collect();
            let trie = build_trie(&map, &ignored);

            proptest::prop_assert_eq!(trie.len(), 5 - ignored.len());
            for i in 0..5 {
                let pid = format!("p{i}");
                let ip: IpAddr = format!("10.{i}.3.4").parse().unwrap();
                let found = trie.longest_match(ip).map(|(_, tag)| tag.clone());
                if ignored.contains(&pid) {
                    proptest::prop_assert_eq!(found, None);
                } else {
                    proptest::prop_assert_eq!(found, Some(pid));
                }
            }
        }
    }
}
