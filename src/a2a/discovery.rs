//! Registry loading and agent discovery.
//!
//! A registry source is a JSON file listing child-agent base URLs. Each URL
//! is resolved into an [`AgentCard`] by fetching the well-known discovery
//! path. Entries that cannot be resolved are logged and excluded, so
//! discovery degrades to a partial or empty registry instead of failing.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::join_all;
use serde::Deserialize;

use super::errors::DiscoveryError;
use super::types::{AgentCard, AGENT_CARD_PATH};

// ---------------------------------------------------------------------------
// Registry source
// ---------------------------------------------------------------------------

/// One entry of a registry file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum RegistryEntry {
    Url(String),
    Named {
        #[serde(default)]
        name: Option<String>,
        url: String,
    },
}

/// Accepted registry file shapes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum RegistrySource {
    List(Vec<RegistryEntry>),
    Map(HashMap<String, String>),
}

/// A candidate agent before its card has been fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryCandidate {
    pub name: Option<String>,
    pub url: String,
}

/// Parse registry content into candidates, in file order (map entries sorted by name).
pub fn parse_registry(content: &str) -> Result<Vec<RegistryCandidate>, serde_json::Error> {
    let source: RegistrySource = serde_json::from_str(content)?;
    let candidates = match source {
        RegistrySource::List(entries) => entries
            .into_iter()
            .map(|entry| match entry {
                RegistryEntry::Url(url) => RegistryCandidate { name: None, url },
                RegistryEntry::Named { name, url } => RegistryCandidate { name, url },
            })
            .collect(),
        RegistrySource::Map(map) => {
            let sorted: BTreeMap<_, _> = map.into_iter().collect();
            sorted
                .into_iter()
                .map(|(name, url)| RegistryCandidate { name: Some(name), url })
                .collect()
        }
    };
    Ok(candidates)
}

// ---------------------------------------------------------------------------
// Discovery client
// ---------------------------------------------------------------------------

/// Resolves a registry source into live agent cards.
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    registry: Option<PathBuf>,
    timeout: Duration,
    http: reqwest::Client,
}

impl DiscoveryClient {
    pub fn new(registry: Option<PathBuf>, timeout: Duration) -> Self {
        Self::with_http(registry, timeout, reqwest::Client::new())
    }

    pub fn with_http(registry: Option<PathBuf>, timeout: Duration, http: reqwest::Client) -> Self {
        Self {
            registry,
            timeout,
            http,
        }
    }

    /// Read the registry source and fetch every candidate's card.
    ///
    /// Never fails: a missing or malformed source yields an empty list and
    /// unreachable candidates are dropped.
    pub async fn list_agent_cards(&self) -> Vec<AgentCard> {
        let candidates = match &self.registry {
            Some(path) => match load_registry(path).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    log::warn!("{}", e);
                    return Vec::new();
                }
            },
            None => {
                log::warn!("No registry source configured");
                return Vec::new();
            }
        };
        if candidates.is_empty() {
            log::warn!("Registry lists no agents");
            return Vec::new();
        }

        let fetches = candidates
            .iter()
            .map(|c| fetch_agent_card(&self.http, &c.url, self.timeout));
        let results = join_all(fetches).await;

        let mut cards = Vec::with_capacity(candidates.len());
        for (candidate, result) in candidates.iter().zip(results) {
            match result {
                Ok(card) => {
                    if let Some(expected) = &candidate.name {
                        if expected != &card.name {
                            log::debug!(
                                "Registry name '{}' differs from card name '{}' at {}",
                                expected, card.name, candidate.url
                            );
                        }
                    }
                    log::info!("Discovered agent '{}' at {}", card.name, card.url);
                    cards.push(card);
                }
                Err(e) => log::warn!("Excluding registry entry {}: {}", candidate.url, e),
            }
        }
        cards
    }
}

async fn load_registry(path: &Path) -> Result<Vec<RegistryCandidate>, DiscoveryError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DiscoveryError::Io {
            path: path.display().to_string(),
            source,
        })?;
    parse_registry(&content).map_err(|e| DiscoveryError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// GET `{base_url}/.well-known/agent.json` within `timeout`.
///
/// A card that advertises no URL inherits `base_url`.
pub async fn fetch_agent_card(
    http: &reqwest::Client,
    base_url: &str,
    timeout: Duration,
) -> Result<AgentCard, DiscoveryError> {
    let url = format!("{}{}", base_url.trim_end_matches('/'), AGENT_CARD_PATH);
    log::debug!("Fetching agent card from: {}", url);
    let fetch_err = |message: String| DiscoveryError::Fetch {
        url: url.clone(),
        message,
    };

    let resp = http
        .get(&url)
        .header("Accept", "application/json")
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| fetch_err(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(fetch_err(format!("HTTP {}", resp.status())));
    }

    let mut card: AgentCard = resp.json().await.map_err(|e| fetch_err(e.to_string()))?;
    if card.url.trim().is_empty() {
        card.url = base_url.to_string();
    }
    Ok(card)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Read-only table of discovered agents keyed by unique name.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    cards: BTreeMap<String, AgentCard>,
}

impl AgentRegistry {
    /// Build from discovered cards; a duplicate name keeps the first card.
    pub fn from_cards(cards: impl IntoIterator<Item = AgentCard>) -> Self {
        let mut table = BTreeMap::new();
        for card in cards {
            if table.contains_key(&card.name) {
                log::warn!("Duplicate agent name '{}' at {}; keeping the first", card.name, card.url);
                continue;
            }
            table.insert(card.name.clone(), card);
        }
        Self { cards: table }
    }

    /// Agent names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.cards.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<&AgentCard> {
        self.cards.get(name)
    }

    pub fn cards(&self) -> impl Iterator<Item = &AgentCard> {
        self.cards.values()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_list() {
        let c = parse_registry(r#"["http://localhost:40002", "http://localhost:40003/"]"#).unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].url, "http://localhost:40002");
        assert!(c[0].name.is_none());
    }

    #[test]
    fn test_parse_named_list_and_map() {
        let list = parse_registry(r#"[{"name": "Calc", "url": "http://a"}, {"url": "http://b"}]"#)
            .unwrap();
        assert_eq!(list[0].name.as_deref(), Some("Calc"));
        assert_eq!(list[1].name, None);

        let map = parse_registry(r#"{"Equip": "http://e", "Calc": "http://c"}"#).unwrap();
        assert_eq!(map[0].name.as_deref(), Some("Calc"));
        assert_eq!(map[1].url, "http://e");
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        assert!(parse_registry("42").is_err());
        assert!(parse_registry("not json").is_err());
    }

    #[tokio::test]
    async fn test_missing_registry_is_empty() {
        let client = DiscoveryClient::new(
            Some(PathBuf::from("/definitely/not/here/agent_registry.json")),
            Duration::from_millis(200),
        );
        assert!(client.list_agent_cards().await.is_empty());

        let unconfigured = DiscoveryClient::new(None, Duration::from_millis(200));
        assert!(unconfigured.list_agent_cards().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_entries_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, r#"["http://127.0.0.1:9", "http://127.0.0.1:9/other"]"#).unwrap();

        let client = DiscoveryClient::new(Some(path), Duration::from_millis(500));
        assert!(client.list_agent_cards().await.is_empty());
    }

    #[test]
    fn test_registry_keeps_first_duplicate() {
        let registry = AgentRegistry::from_cards(vec![
            AgentCard::new("Calc", "http://first"),
            AgentCard::new("Equip", "http://equip"),
            AgentCard::new("Calc", "http://second"),
        ]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["Calc".to_string(), "Equip".to_string()]);
        assert_eq!(registry.get("Calc").unwrap().url, "http://first");
    }
}
