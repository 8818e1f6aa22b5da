//! Knowledge base: learned skills and per-domain site maps.
//!
//! Both maps are loaded once and kept in memory as the source of truth. Every
//! mutation writes the whole owning map back to the store; if the write
//! fails, the in-memory map is rolled back so memory and storage agree.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::actions::Plan;
use crate::perception::ElementDescriptor;
use crate::storage::{KeyValueStore, StoreError};

/// Storage key of the skill map.
pub const SKILLS_KEY: &str = "@agent_skills";
/// Storage key of the site map collection.
pub const SITE_MAPS_KEY: &str = "@agent_sitemaps";
/// Descriptors kept per domain.
pub const SITE_MAP_CAPACITY: usize = 30;

/// goal key -> plan sequence ending in `finish`.
pub type Skills = BTreeMap<String, Vec<Plan>>;
/// domain -> elements seen on the last structural perception.
pub type SiteMaps = BTreeMap<String, Vec<ElementDescriptor>>;

/// Knowledge base errors.
#[derive(Error, Debug)]
pub enum KnowledgeError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Failed to encode knowledge: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("URL has no host: {0}")]
    NoDomain(String),
    #[error("Refusing to save an empty skill for {0:?}")]
    EmptySkill(String),
}

/// Normalize a goal for skill lookup: lowercase, surrounding whitespace removed.
pub fn goal_key(goal: &str) -> String {
    goal.to_lowercase().trim().to_string()
}

/// Host component of `url`, if it has one.
pub fn domain_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// What the agent remembers about the site it is looking at.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteAdvisory {
    pub domain: String,
    pub known_elements: Vec<ElementDescriptor>,
}

impl SiteAdvisory {
    pub fn is_known(&self) -> bool {
        !self.known_elements.is_empty()
    }

    /// One-line memory note for the planner prompt.
    pub fn note(&self) -> String {
        if !self.is_known() {
            return "New site.".to_string();
        }
        let elements = serde_json::to_string(&self.known_elements).unwrap_or_default();
        format!("Known site, previously seen elements: {}", elements)
    }
}

/// In-memory skills and site maps backed by a [`KeyValueStore`].
pub struct KnowledgeBase {
    store: Arc<dyn KeyValueStore>,
    skills: Skills,
    site_maps: SiteMaps,
}

impl KnowledgeBase {
    /// An empty knowledge base that writes to `store`.
    pub fn empty(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            skills: Skills::new(),
            site_maps: SiteMaps::new(),
        }
    }

    /// Load both maps. Missing keys mean empty maps; undecodable blobs are
    /// logged and treated as empty.
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Result<Self, KnowledgeError> {
        let skills: Skills = decode_map(store.get(SKILLS_KEY).await?, SKILLS_KEY);
        let site_maps: SiteMaps = decode_map(store.get(SITE_MAPS_KEY).await?, SITE_MAPS_KEY);
        info!(
            skills = skills.len(),
            site_maps = site_maps.len(),
            "Knowledge loaded"
        );
        Ok(Self {
            store,
            skills,
            site_maps,
        })
    }

    /// The stored plan sequence for `goal`, matched by goal key.
    pub fn skill(&self, goal: &str) -> Option<&[Plan]> {
        self.skills.get(&goal_key(goal)).map(Vec::as_slice)
    }

    pub fn skills(&self) -> &Skills {
        &self.skills
    }

    pub fn skill_keys(&self) -> Vec<String> {
        self.skills.keys().cloned().collect()
    }

    pub fn site_map(&self, domain: &str) -> Option<&[ElementDescriptor]> {
        self.site_maps.get(domain).map(Vec::as_slice)
    }

    pub fn site_maps(&self) -> &SiteMaps {
        &self.site_maps
    }

    /// Advisory for the page at `url`; `None` if the URL has no host.
    pub fn site_advisory(&self, url: &str) -> Option<SiteAdvisory> {
        let domain = domain_of(url)?;
        let known_elements = self.site_maps.get(&domain).cloned().unwrap_or_default();
        Some(SiteAdvisory {
            domain,
            known_elements,
        })
    }

    /// Store `plans` under the goal key of `goal`, replacing any previous skill.
    pub async fn save_skill(&mut self, goal: &str, plans: Vec<Plan>) -> Result<(), KnowledgeError> {
        let key = goal_key(goal);
        if key.is_empty() || plans.is_empty() {
            return Err(KnowledgeError::EmptySkill(goal.to_string()));
        }

        let steps = plans.len();
        let previous = self.skills.insert(key.clone(), plans);
        if let Err(e) = write_map(self.store.as_ref(), SKILLS_KEY, &self.skills).await {
            restore(&mut self.skills, key, previous);
            return Err(e);
        }
        info!(goal = %key, steps, "Skill saved");
        Ok(())
    }

    /// Remove the skill for `goal`. Returns whether one existed.
    pub async fn forget_skill(&mut self, goal: &str) -> Result<bool, KnowledgeError> {
        let key = goal_key(goal);
        let Some(previous) = self.skills.remove(&key) else {
            return Ok(false);
        };
        if let Err(e) = write_map(self.store.as_ref(), SKILLS_KEY, &self.skills).await {
            self.skills.insert(key, previous);
            return Err(e);
        }
        info!(goal = %key, "Skill forgotten");
        Ok(true)
    }

    /// Replace the site map of `url`'s domain with the first
    /// [`SITE_MAP_CAPACITY`] of `elements`.
    pub async fn save_site_map(
        &mut self,
        url: &str,
        elements: &[ElementDescriptor],
    ) -> Result<(), KnowledgeError> {
        let domain = domain_of(url).ok_or_else(|| KnowledgeError::NoDomain(url.to_string()))?;
        let kept: Vec<ElementDescriptor> =
            elements.iter().take(SITE_MAP_CAPACITY).cloned().collect();

        let previous = self.site_maps.insert(domain.clone(), kept);
        if let Err(e) = write_map(self.store.as_ref(), SITE_MAPS_KEY, &self.site_maps).await {
            restore(&mut self.site_maps, domain, previous);
            return Err(e);
        }
        debug!(domain = %domain, "Site map updated");
        Ok(())
    }
}

fn restore<V>(map: &mut BTreeMap<String, V>, key: String, previous: Option<V>) {
    match previous {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}

async fn write_map<V: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    map: &BTreeMap<String, V>,
) -> Result<(), KnowledgeError> {
    let value = serde_json::to_value(map)?;
    store.set(key, &value).await?;
    Ok(())
}

/// Decode a stored map entry by entry, skipping what cannot be read.
fn decode_map<V: DeserializeOwned>(blob: Option<Value>, key: &str) -> BTreeMap<String, V> {
    let Some(blob) = blob else {
        return BTreeMap::new();
    };
    let Value::Object(entries) = blob else {
        warn!("Stored {} is not a JSON object, starting empty", key);
        return BTreeMap::new();
    };

    let mut map = BTreeMap::new();
    for (name, value) in entries {
        match serde_json::from_value(value) {
            Ok(decoded) => {
                map.insert(name, decoded);
            }
            Err(e) => warn!("Skipping unreadable {} entry {:?}: {}", key, name, e),
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{NormalizedPoint, Target};
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn click() -> Plan {
        Plan::Click {
            target: Target::Point(NormalizedPoint::new(500.0, 500.0).unwrap()),
            value: None,
            description: None,
        }
    }

    fn finish() -> Plan {
        Plan::Finish { message: None }
    }

    fn element(i: usize) -> ElementDescriptor {
        ElementDescriptor {
            tag: "A".to_string(),
            text: format!("link {}", i),
            selector: format!("a#l{}", i),
        }
    }

    #[test]
    fn test_goal_key_is_idempotent() {
        for goal in ["  Open Mail ", "ОТКРЫТЬ почту", "plain", ""] {
            let once = goal_key(goal);
            assert_eq!(goal_key(&once), once);
        }
        assert_eq!(goal_key("  Open Mail "), "open mail");
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("https://mail.test:8443/inbox").as_deref(), Some("mail.test"));
        assert_eq!(domain_of("not a url"), None);
    }

    #[tokio::test]
    async fn test_skill_lookup_ignores_case_and_padding() {
        let store = Arc::new(MemoryStore::new());
        let mut kb = KnowledgeBase::empty(store.clone());
        kb.save_skill("Open Mail", vec![click(), finish()]).await.unwrap();

        assert_eq!(kb.skill("  open MAIL ").map(|s| s.len()), Some(2));
        let stored = store.get(SKILLS_KEY).await.unwrap().unwrap();
        assert_eq!(stored["open mail"][1], json!({"action": "finish"}));
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let store = Arc::new(MemoryStore::new());
        let mut kb = KnowledgeBase::empty(store.clone());
        kb.save_skill("a", vec![finish()]).await.unwrap();

        store.set_read_only(true);
        assert!(kb.save_skill("a", vec![click(), finish()]).await.is_err());
        assert!(kb.save_skill("b", vec![finish()]).await.is_err());
        assert!(kb.forget_skill("a").await.is_err());
        assert!(kb
            .save_site_map("https://x.test/", &[element(1)])
            .await
            .is_err());

        assert_eq!(kb.skill("a").map(|s| s.len()), Some(1));
        assert!(kb.skill("b").is_none());
        assert!(kb.site_map("x.test").is_none());
    }

    #[tokio::test]
    async fn test_site_map_is_capped_and_rebuilt() {
        let store = Arc::new(MemoryStore::new());
        let mut kb = KnowledgeBase::empty(store);
        let many: Vec<_> = (0..45).map(element).collect();

        kb.save_site_map("https://shop.test/a", &many).await.unwrap();
        assert_eq!(kb.site_map("shop.test").map(|m| m.len()), Some(SITE_MAP_CAPACITY));

        kb.save_site_map("https://shop.test/b", &many[40..]).await.unwrap();
        assert_eq!(kb.site_map("shop.test").map(|m| m.len()), Some(5));

        assert!(kb.save_site_map("about:blank", &many).await.is_err());
    }

    #[tokio::test]
    async fn test_site_advisory_note() {
        let mut kb = KnowledgeBase::empty(Arc::new(MemoryStore::new()));
        let fresh = kb.site_advisory("https://new.test/").unwrap();
        assert_eq!(fresh.note(), "New site.");

        kb.save_site_map("https://new.test/", &[element(1)]).await.unwrap();
        let known = kb.site_advisory("https://new.test/other").unwrap();
        assert!(known.is_known());
        assert!(known
            .note()
            .starts_with("Known site, previously seen elements: [{\"tag\":\"A\""));
    }

    #[tokio::test]
    async fn test_load_tolerates_corrupt_blobs() {
        let store = Arc::new(
            MemoryStore::new()
                .with_entry(SKILLS_KEY, json!("garbage"))
                .with_entry(
                    SITE_MAPS_KEY,
                    json!({
                        "ok.test": [{"tag": "A", "text": "x", "selector": "a"}],
                        "bad.test": 17
                    }),
                ),
        );
        let kb = KnowledgeBase::load(store).await.unwrap();
        assert!(kb.skills().is_empty());
        assert_eq!(kb.site_maps().len(), 1);
        assert!(kb.site_map("ok.test").is_some());
    }

    #[tokio::test]
    async fn test_forget_skill() {
        let mut kb = KnowledgeBase::empty(Arc::new(MemoryStore::new()));
        kb.save_skill("x", vec![finish()]).await.unwrap();
        assert!(kb.forget_skill(" X ").await.unwrap());
        assert!(!kb.forget_skill("x").await.unwrap());
        assert!(kb.skill_keys().is_empty());
    }
}
