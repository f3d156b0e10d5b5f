use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::{
    bucketer::murmur_hash, decision::DecideOption, project_config::ProjectConfig,
    AttributeValue, UserContext,
};

use super::{CmabClient, CmabError};

/// Variation picked by the prediction service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmabDecision {
    pub variation_id: String,
    /// Identifier of the prediction, reported along with the decision.
    pub cmab_uuid: String,
}

/// Source of CMAB decisions used by the decision service.
pub trait CmabService: Send + Sync {
    fn get_decision(
        &self,
        config: &ProjectConfig,
        user: &UserContext,
        rule_id: &str,
        options: &[DecideOption],
    ) -> Result<CmabDecision, CmabError>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    attributes_hash: String,
    decision: CmabDecision,
    created_at: Instant,
    /// Tick of the last read or write, the key of this entry in `PredictionCache::recency`.
    last_used: u64,
}

/// Bounded LRU map of predictions keyed by user and rule.
///
/// `recency` orders keys by last use so eviction pops the oldest entry without scanning.
#[derive(Debug, Default)]
struct PredictionCache {
    entries: HashMap<String, CacheEntry>,
    recency: BTreeMap<u64, String>,
    tick: u64,
}

impl PredictionCache {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Return the cached decision if it is fresh and was made for the same attributes. A stale
    /// entry is dropped.
    fn get(&mut self, key: &str, attributes_hash: &str, ttl: Duration) -> Option<CmabDecision> {
        let entry = self.entries.get(key)?;
        if entry.attributes_hash != attributes_hash || entry.created_at.elapsed() >= ttl {
            self.remove(key);
            return None;
        }

        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;
        let key = self.recency.remove(&entry.last_used)?;
        entry.last_used = tick;
        let decision = entry.decision.clone();
        self.recency.insert(tick, key);
        Some(decision)
    }

    fn insert(
        &mut self,
        key: String,
        attributes_hash: String,
        decision: CmabDecision,
        capacity: usize,
    ) {
        self.remove(&key);
        while self.entries.len() >= capacity {
            let Some((_, evicted)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&evicted);
        }

        let last_used = self.next_tick();
        self.recency.insert(last_used, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                attributes_hash,
                decision,
                created_at: Instant::now(),
                last_used,
            },
        );
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.recency.remove(&entry.last_used);
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }
}

/// [`CmabService`] backed by [`CmabClient`] with a bounded, expiring cache of predictions.
///
/// A cached prediction is reused only while the user's relevant attributes are unchanged.
pub struct DefaultCmabService {
    client: CmabClient,
    cache: Mutex<PredictionCache>,
    cache_size: usize,
    cache_ttl: Duration,
}

impl DefaultCmabService {
    pub const DEFAULT_CACHE_SIZE: usize = 10_000;
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

    pub fn new(client: CmabClient, cache_size: usize, cache_ttl: Duration) -> DefaultCmabService {
        DefaultCmabService {
            client,
            cache: Mutex::new(PredictionCache::default()),
            cache_size,
            cache_ttl,
        }
    }

    fn cache(&self) -> MutexGuard<'_, PredictionCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fetch_decision(
        &self,
        rule_id: &str,
        user_id: &str,
        attributes: &BTreeMap<String, AttributeValue>,
    ) -> Result<CmabDecision, CmabError> {
        let cmab_uuid = uuid::Uuid::new_v4().to_string();
        let variation_id = self
            .client
            .fetch_decision(rule_id, user_id, attributes, &cmab_uuid)?;
        Ok(CmabDecision {
            variation_id,
            cmab_uuid,
        })
    }
}

impl CmabService for DefaultCmabService {
    fn get_decision(
        &self,
        config: &ProjectConfig,
        user: &UserContext,
        rule_id: &str,
        options: &[DecideOption],
    ) -> Result<CmabDecision, CmabError> {
        let attributes = filter_attributes(config, user, rule_id);
        let user_id = user.user_id();

        if options.contains(&DecideOption::IgnoreCmabCache) {
            return self.fetch_decision(rule_id, user_id, &attributes);
        }

        if options.contains(&DecideOption::ResetCmabCache) {
            self.cache().clear();
        }

        let cache_key = cache_key(user_id, rule_id);
        if options.contains(&DecideOption::InvalidateUserCmabCache) {
            self.cache().remove(&cache_key);
        }

        let attributes_hash = hash_attributes(&attributes);
        let cached = self.cache().get(&cache_key, &attributes_hash, self.cache_ttl);
        if let Some(decision) = cached {
            log::debug!(target: "optimizely", user_id, rule_id; "using cached CMAB decision");
            return Ok(decision);
        }

        let decision = self.fetch_decision(rule_id, user_id, &attributes)?;
        if self.cache_size > 0 {
            self.cache().insert(
                cache_key,
                attributes_hash,
                decision.clone(),
                self.cache_size,
            );
        }
        Ok(decision)
    }
}

/// Keep only the user attributes the rule sends to the prediction service, keyed by attribute key.
fn filter_attributes(
    config: &ProjectConfig,
    user: &UserContext,
    rule_id: &str,
) -> BTreeMap<String, AttributeValue> {
    let Some(cmab) = config
        .get_experiment_from_id(rule_id)
        .ok()
        .and_then(|rule| rule.cmab.as_ref())
    else {
        return BTreeMap::new();
    };

    cmab.attribute_ids
        .iter()
        .filter_map(|id| config.get_attribute_key(id))
        .filter_map(|key| {
            let value = user.attributes().get(key)?;
            Some((key.to_owned(), value.clone()))
        })
        .collect()
}

fn cache_key(user_id: &str, rule_id: &str) -> String {
    format!("{}-{user_id}-{rule_id}", user_id.len())
}

fn hash_attributes(attributes: &BTreeMap<String, AttributeValue>) -> String {
    let json = serde_json::to_vec(attributes)
        .expect("serializing string-keyed attributes should never fail");
    murmur_hash(json).to_string()
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use serde_json::json;
    use url::Url;

    use super::{CmabService, DefaultCmabService};
    use crate::{
        cmab::{
            CmabClient, CmabError, CmabRetryConfig, PredictionTransport, TransportError,
            TransportResponse,
        },
        decision::DecideOption,
        project_config::ProjectConfig,
        UserContext,
    };

    #[derive(Clone, Default)]
    struct CountingTransport {
        variation_ids: Arc<Mutex<VecDeque<&'static str>>>,
        bodies: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    impl PredictionTransport for CountingTransport {
        fn post_json(
            &self,
            _url: &Url,
            body: String,
        ) -> Result<TransportResponse, TransportError> {
            self.bodies
                .lock()
                .unwrap()
                .push(serde_json::from_str(&body).unwrap());
            match self.variation_ids.lock().unwrap().pop_front() {
                Some(variation_id) => Ok(TransportResponse {
                    status: 200,
                    body: json!({"predictions": [{"variationId": variation_id}]}).to_string(),
                }),
                None => Ok(TransportResponse {
                    status: 500,
                    body: String::new(),
                }),
            }
        }
    }

    impl CountingTransport {
        fn new(variation_ids: &[&'static str]) -> CountingTransport {
            CountingTransport {
                variation_ids: Arc::new(Mutex::new(variation_ids.iter().copied().collect())),
                bodies: Default::default(),
            }
        }

        fn calls(&self) -> usize {
            self.bodies.lock().unwrap().len()
        }
    }

    fn config() -> ProjectConfig {
        ProjectConfig::from_json(
            &json!({
                "version": "4",
                "attributes": [
                    {"id": "a1", "key": "age"},
                    {"id": "a2", "key": "country"},
                    {"id": "a3", "key": "unused"}
                ],
                "experiments": [{
                    "id": "cmab-rule",
                    "key": "cmab_rule",
                    "status": "Running",
                    "cmab": {"attributeIds": ["a1", "a2"], "trafficAllocation": 10000}
                }]
            })
            .to_string(),
        )
        .unwrap()
    }

    fn service(transport: &CountingTransport, cache_ttl: Duration) -> DefaultCmabService {
        let client = CmabClient::new(
            transport.clone(),
            CmabClient::DEFAULT_ENDPOINT,
            CmabRetryConfig {
                max_retries: 0,
                ..CmabRetryConfig::default()
            },
        )
        .unwrap();
        DefaultCmabService::new(client, 2, cache_ttl)
    }

    fn user(id: &str, age: i32) -> UserContext {
        let mut user = UserContext::new(id, Default::default());
        user.set_attribute("age", age);
        user.set_attribute("country", "NZ");
        user.set_attribute("unused", true);
        user
    }

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn sends_only_rule_attributes() {
        let transport = CountingTransport::new(&["v1"]);
        let service = service(&transport, TTL);

        let decision = service
            .get_decision(&config(), &user("u1", 30), "cmab-rule", &[])
            .unwrap();
        assert_eq!(decision.variation_id, "v1");
        assert_eq!(decision.cmab_uuid.len(), 36);

        let bodies = transport.bodies.lock().unwrap();
        assert_eq!(
            bodies[0]["instances"][0]["attributes"],
            json!([
                {"id": "age", "value": 30.0, "type": "custom_attribute"},
                {"id": "country", "value": "NZ", "type": "custom_attribute"}
            ])
        );
        assert_eq!(
            bodies[0]["instances"][0]["cmabUUID"],
            json!(decision.cmab_uuid)
        );
    }

    #[test]
    fn caches_while_attributes_are_unchanged() {
        let transport = CountingTransport::new(&["v1", "v2"]);
        let service = service(&transport, TTL);
        let config = config();

        let first = service
            .get_decision(&config, &user("u1", 30), "cmab-rule", &[])
            .unwrap();
        let second = service
            .get_decision(&config, &user("u1", 30), "cmab-rule", &[])
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.calls(), 1);

        let changed = service
            .get_decision(&config, &user("u1", 31), "cmab-rule", &[])
            .unwrap();
        assert_eq!(changed.variation_id, "v2");
        assert_ne!(changed.cmab_uuid, first.cmab_uuid);
        assert_eq!(transport.calls(), 2);
    }

    #[test]
    fn cache_options() {
        let transport = CountingTransport::new(&["v1", "v2", "v3", "v4"]);
        let service = service(&transport, TTL);
        let config = config();
        let user = user("u1", 30);

        service.get_decision(&config, &user, "cmab-rule", &[]).unwrap();

        let ignored = service
            .get_decision(&config, &user, "cmab-rule", &[DecideOption::IgnoreCmabCache])
            .unwrap();
        assert_eq!(ignored.variation_id, "v2");
        // The cached entry is untouched.
        assert_eq!(
            service
                .get_decision(&config, &user, "cmab-rule", &[])
                .unwrap()
                .variation_id,
            "v1"
        );

        let invalidated = service
            .get_decision(
                &config,
                &user,
                "cmab-rule",
                &[DecideOption::InvalidateUserCmabCache],
            )
            .unwrap();
        assert_eq!(invalidated.variation_id, "v3");

        let reset = service
            .get_decision(&config, &user, "cmab-rule", &[DecideOption::ResetCmabCache])
            .unwrap();
        assert_eq!(reset.variation_id, "v4");
        assert_eq!(transport.calls(), 4);
    }

    #[test]
    fn expired_entries_are_refetched() {
        let transport = CountingTransport::new(&["v1", "v2"]);
        let service = service(&transport, Duration::ZERO);
        let config = config();

        service
            .get_decision(&config, &user("u1", 30), "cmab-rule", &[])
            .unwrap();
        let second = service
            .get_decision(&config, &user("u1", 30), "cmab-rule", &[])
            .unwrap();
        assert_eq!(second.variation_id, "v2");
    }

    #[test]
    fn cache_is_bounded() {
        let transport = CountingTransport::new(&["v1", "v2", "v3", "v4"]);
        let service = service(&transport, TTL);
        let config = config();

        for user_id in ["u1", "u2", "u3"] {
            service
                .get_decision(&config, &user(user_id, 30), "cmab-rule", &[])
                .unwrap();
        }
        assert_eq!(service.cache().entries.len(), 2);
        // u1 was least recently used and got evicted.
        let again = service
            .get_decision(&config, &user("u1", 30), "cmab-rule", &[])
            .unwrap();
        assert_eq!(again.variation_id, "v4");
    }

    #[test]
    fn reads_refresh_recency() {
        let transport = CountingTransport::new(&["v1", "v2", "v3", "v4"]);
        let service = service(&transport, TTL);
        let config = config();

        for user_id in ["u1", "u2", "u1", "u3"] {
            service
                .get_decision(&config, &user(user_id, 30), "cmab-rule", &[])
                .unwrap();
        }
        // u1 was read after u2 was stored, so u2 is the one evicted.
        assert_eq!(transport.calls(), 3);
        {
            let cache = service.cache();
            assert_eq!(cache.entries.len(), 2);
            assert_eq!(cache.recency.len(), 2);
            assert!(cache
                .recency
                .iter()
                .all(|(tick, key)| cache.entries[key].last_used == *tick));
        }

        let u1 = service
            .get_decision(&config, &user("u1", 30), "cmab-rule", &[])
            .unwrap();
        assert_eq!(u1.variation_id, "v1");
        let u2 = service
            .get_decision(&config, &user("u2", 30), "cmab-rule", &[])
            .unwrap();
        assert_eq!(u2.variation_id, "v4");
    }

    #[test]
    fn fetch_errors_are_returned() {
        let transport = CountingTransport::new(&[]);
        let service = service(&transport, TTL);
        let result = service.get_decision(&config(), &user("u1", 30), "cmab-rule", &[]);
        assert!(matches!(result, Err(CmabError::Fetch(_))));
        assert!(service.cache().entries.is_empty());
    }
}
