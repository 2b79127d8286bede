// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registration database for the lookup server.
//!
//! Maps a `(category, topic, channel)` registration to the set of producers
//! currently serving it. Producers are shared: the same `Arc<Producer>` is
//! referenced from every registration it joined, so a heartbeat or tombstone
//! on it is visible everywhere at once.

use crate::names;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Query-time wildcard. Never stored in a registration.
pub const WILDCARD: &str = "*";

/// Registration category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Bookkeeping registration of every identified producer.
    Client,
    /// Topic registration (`sub_key` is empty).
    Topic,
    /// Channel registration (`sub_key` is the channel name).
    Channel,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Topic => "topic",
            Self::Channel => "channel",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Registration {
    pub category: Category,
    pub key: String,
    pub sub_key: String,
}

impl Registration {
    /// Create a registration key.
    pub fn new(category: Category, key: impl Into<String>, sub_key: impl Into<String>) -> Self {
        Self {
            category,
            key: key.into(),
            sub_key: sub_key.into(),
        }
    }

    /// The `{client, "", ""}` registration every identified producer joins.
    pub fn client() -> Self {
        Self::new(Category::Client, "", "")
    }

    /// `{topic, topic, ""}`
    pub fn topic(topic: impl Into<String>) -> Self {
        Self::new(Category::Topic, topic, "")
    }

    /// `{channel, topic, channel}`
    pub fn channel(topic: impl Into<String>, channel: impl Into<String>) -> Self {
        Self::new(Category::Channel, topic, channel)
    }

    /// Check whether this registration matches a (possibly wildcard) query.
    ///
    /// A query field matches when it is `*` or equal to the stored field.
    pub fn is_match(&self, category: Category, key: &str, sub_key: &str) -> bool {
        if category != self.category {
            return false;
        }
        if key != WILDCARD && key != self.key {
            return false;
        }
        if sub_key != WILDCARD && sub_key != self.sub_key {
            return false;
        }
        true
    }

    /// Check whether the name this registration is keyed by is ephemeral.
    pub fn is_ephemeral(&self) -> bool {
        match self.category {
            Category::Client => false,
            Category::Topic => names::is_ephemeral(&self.key),
            Category::Channel => names::is_ephemeral(&self.sub_key),
        }
    }

    fn has_wildcard(&self) -> bool {
        self.key == WILDCARD || self.sub_key == WILDCARD
    }
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "category:{} key:{} subkey:{}",
            self.category, self.key, self.sub_key
        )
    }
}

/// Helpers over a list of registrations.
pub trait RegistrationsExt {
    /// Keep the registrations matching a (possibly wildcard) query.
    fn filter(&self, category: Category, key: &str, sub_key: &str) -> Vec<Registration>;

    /// Topic names of the registrations.
    fn keys(&self) -> Vec<String>;

    /// Channel names of the registrations.
    fn sub_keys(&self) -> Vec<String>;
}

impl RegistrationsExt for [Registration] {
    fn filter(&self, category: Category, key: &str, sub_key: &str) -> Vec<Registration> {
        self.iter()
            .filter(|r| r.is_match(category, key, sub_key))
            .cloned()
            .collect()
    }

    fn keys(&self) -> Vec<String> {
        self.iter().map(|r| r.key.clone()).collect()
    }

    fn sub_keys(&self) -> Vec<String> {
        self.iter().map(|r| r.sub_key.clone()).collect()
    }
}

/// Identity of a connected producer.
#[derive(Debug, Serialize)]
pub struct PeerInfo {
    /// Stable identifier (remote address at IDENTIFY time)
    #[serde(skip)]
    pub id: String,

    /// Remote address observed on the connection
    pub remote_address: String,

    /// Producer hostname (optional in IDENTIFY)
    pub hostname: String,

    /// Address the producer wants consumers to connect to
    pub broadcast_address: String,

    /// Producer TCP port
    pub tcp_port: u16,

    /// Producer HTTP port
    pub http_port: u16,

    /// Producer version
    pub version: String,

    /// Last heartbeat, nanoseconds since the Unix epoch
    #[serde(skip)]
    last_update: AtomicU64,
}

impl PeerInfo {
    /// Create a peer info with the given id. `last_update` starts at now.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            remote_address: String::new(),
            hostname: String::new(),
            broadcast_address: String::new(),
            tcp_port: 0,
            http_port: 0,
            version: String::new(),
            last_update: AtomicU64::new(unix_nanos(SystemTime::now())),
        }
    }

    /// Record a heartbeat and return the time elapsed since the previous one.
    pub fn touch(&self) -> Duration {
        let now = unix_nanos(SystemTime::now());
        let previous = self.last_update.swap(now, Ordering::AcqRel);
        Duration::from_nanos(now.saturating_sub(previous))
    }

    /// Last heartbeat timestamp.
    pub fn last_update(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.last_update.load(Ordering::Acquire))
    }

    /// Overwrite the heartbeat timestamp.
    pub fn set_last_update(&self, at: SystemTime) {
        self.last_update.store(unix_nanos(at), Ordering::Release);
    }

    /// Time elapsed since the last heartbeat (zero if the clock went backwards).
    pub fn since_last_update(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.last_update())
            .unwrap_or_default()
    }
}

fn unix_nanos(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// A producer registered under one or more registrations.
#[derive(Debug)]
pub struct Producer {
    peer_info: Arc<PeerInfo>,
    tombstoned_at: Mutex<Option<Instant>>,
}

impl Producer {
    /// Wrap an identified peer.
    pub fn new(peer_info: PeerInfo) -> Self {
        Self {
            peer_info: Arc::new(peer_info),
            tombstoned_at: Mutex::new(None),
        }
    }

    /// Producer id (the peer id).
    pub fn id(&self) -> &str {
        &self.peer_info.id
    }

    pub fn peer_info(&self) -> &Arc<PeerInfo> {
        &self.peer_info
    }

    /// Mark the producer as withdrawn, starting now.
    pub fn tombstone(&self) {
        *self.tombstoned_at.lock() = Some(Instant::now());
    }

    /// Check whether the producer was tombstoned less than `lifetime` ago.
    pub fn is_tombstoned(&self, lifetime: Duration) -> bool {
        match *self.tombstoned_at.lock() {
            Some(at) => at.elapsed() < lifetime,
            None => false,
        }
    }

    /// Heartbeat within `inactivity_timeout` and not currently tombstoned.
    pub fn is_active(&self, inactivity_timeout: Duration, tombstone_lifetime: Duration) -> bool {
        self.peer_info.since_last_update() <= inactivity_timeout
            && !self.is_tombstoned(tombstone_lifetime)
    }
}

impl fmt::Display for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}, {}]",
            self.peer_info.broadcast_address, self.peer_info.tcp_port, self.peer_info.http_port
        )
    }
}

/// Keep only the active producers.
pub fn filter_active(
    producers: &[Arc<Producer>],
    inactivity_timeout: Duration,
    tombstone_lifetime: Duration,
) -> Vec<Arc<Producer>> {
    producers
        .iter()
        .filter(|p| p.is_active(inactivity_timeout, tombstone_lifetime))
        .cloned()
        .collect()
}

/// Peer infos of a list of producers.
pub fn peer_infos(producers: &[Arc<Producer>]) -> Vec<Arc<PeerInfo>> {
    producers.iter().map(|p| Arc::clone(p.peer_info())).collect()
}

type ProducerMap = HashMap<String, Arc<Producer>>;

/// Registration database.
///
/// One `RwLock` guards the whole map. Every operation is a short in-memory
/// critical section; none of them can fail.
#[derive(Debug, Default)]
pub struct RegistrationDb {
    registrations: RwLock<HashMap<Registration, ProducerMap>>,
}

impl RegistrationDb {
    /// Create a new empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty producer set for `key` if absent.
    pub fn add_registration(&self, key: &Registration) {
        if key.has_wildcard() {
            return;
        }
        self.registrations
            .write()
            .entry(key.clone())
            .or_default();
    }

    /// Add `producer` under `key`, creating the registration if needed.
    ///
    /// Returns `false` if a producer with the same id was already there.
    pub fn add_producer(&self, key: &Registration, producer: &Arc<Producer>) -> bool {
        if key.has_wildcard() {
            return false;
        }
        let mut registrations = self.registrations.write();
        let producers = registrations.entry(key.clone()).or_default();
        if producers.contains_key(producer.id()) {
            return false;
        }
        producers.insert(producer.id().to_string(), Arc::clone(producer));
        true
    }

    /// Remove producer `id` from `key`.
    ///
    /// Returns whether a removal happened and how many producers remain
    /// (0 if the registration does not exist).
    pub fn remove_producer(&self, key: &Registration, id: &str) -> (bool, usize) {
        let mut registrations = self.registrations.write();
        match registrations.get_mut(key) {
            Some(producers) => {
                let removed = producers.remove(id).is_some();
                (removed, producers.len())
            }
            None => (false, 0),
        }
    }

    /// Remove producer `id` from `key` and, if that leaves an ephemeral
    /// registration empty, delete it under the same write lock.
    ///
    /// Returns the same pair as [`Self::remove_producer`].
    pub fn remove_producer_pruning(&self, key: &Registration, id: &str) -> (bool, usize) {
        let mut registrations = self.registrations.write();
        let Some(producers) = registrations.get_mut(key) else {
            return (false, 0);
        };

        let removed = producers.remove(id).is_some();
        let left = producers.len();
        if left == 0 && key.is_ephemeral() {
            registrations.remove(key);
        }
        (removed, left)
    }

    /// Delete a registration regardless of its producers.
    pub fn remove_registration(&self, key: &Registration) {
        self.registrations.write().remove(key);
    }

    /// Find registrations matching a query. `*` in `key` or `sub_key` matches anything.
    pub fn find_registrations(
        &self,
        category: Category,
        key: &str,
        sub_key: &str,
    ) -> Vec<Registration> {
        let registrations = self.registrations.read();

        if !is_wildcard_query(key, sub_key) {
            let k = Registration::new(category, key, sub_key);
            return if registrations.contains_key(&k) {
                vec![k]
            } else {
                Vec::new()
            };
        }

        registrations
            .keys()
            .filter(|k| k.is_match(category, key, sub_key))
            .cloned()
            .collect()
    }

    /// Find producers across every registration matching a query,
    /// de-duplicated by producer id.
    pub fn find_producers(&self, category: Category, key: &str, sub_key: &str) -> Vec<Arc<Producer>> {
        let registrations = self.registrations.read();

        if !is_wildcard_query(key, sub_key) {
            let k = Registration::new(category, key, sub_key);
            return registrations
                .get(&k)
                .map(|producers| producers.values().cloned().collect())
                .unwrap_or_default();
        }

        let mut seen = HashSet::new();
        let mut results = Vec::new();
        for (k, producers) in registrations.iter() {
            if !k.is_match(category, key, sub_key) {
                continue;
            }
            for producer in producers.values() {
                if seen.insert(producer.id()) {
                    results.push(Arc::clone(producer));
                }
            }
        }
        results
    }

    /// Every registration currently containing producer `id`.
    pub fn lookup_registrations(&self, id: &str) -> Vec<Registration> {
        self.registrations
            .read()
            .iter()
            .filter(|(_, producers)| producers.contains_key(id))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Tombstone producer `id` registered under `key`.
    ///
    /// Returns `false` if no such producer is registered there.
    pub fn tombstone_producer(&self, key: &Registration, id: &str) -> bool {
        let registrations = self.registrations.read();
        match registrations.get(key).and_then(|producers| producers.get(id)) {
            Some(producer) => {
                producer.tombstone();
                true
            }
            None => false,
        }
    }

    /// Number of stored registrations.
    pub fn registration_count(&self) -> usize {
        self.registrations.read().len()
    }
}

fn is_wildcard_query(key: &str, sub_key: &str) -> bool {
    key == WILDCARD || sub_key == WILDCARD
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_producer(id: &str) -> Arc<Producer> {
        let mut info = PeerInfo::new(id);
        info.broadcast_address = "h1".into();
        info.tcp_port = 4150;
        info.http_port = 4151;
        info.version = "1.0".into();
        Arc::new(Producer::new(info))
    }

    fn ids(producers: &[Arc<Producer>]) -> Vec<String> {
        let mut ids: Vec<String> = producers.iter().map(|p| p.id().to_string()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_db_new() {
        let db = RegistrationDb::new();
        assert_eq!(db.registration_count(), 0);
        assert!(db.lookup_registrations("p1").is_empty());
    }

    #[test]
    fn test_add_registration_idempotent() {
        let db = RegistrationDb::new();
        let key = Registration::topic("t");
        db.add_registration(&key);
        db.add_registration(&key);

        assert_eq!(db.registration_count(), 1);
        assert!(db.find_producers(Category::Topic, "t", "").is_empty());
    }

    #[test]
    fn test_add_producer_idempotent() {
        let db = RegistrationDb::new();
        let key = Registration::topic("t");
        let p = make_producer("p1");

        assert!(db.add_producer(&key, &p));
        assert!(!db.add_producer(&key, &p));
        assert!(!db.add_producer(&key, &make_producer("p1")));

        let found = db.find_producers(Category::Topic, "t", "");
        assert_eq!(ids(&found), vec!["p1"]);
    }

    #[test]
    fn test_wildcard_never_stored() {
        let db = RegistrationDb::new();
        let p = make_producer("p1");

        assert!(!db.add_producer(&Registration::topic(WILDCARD), &p));
        db.add_registration(&Registration::channel("t", WILDCARD));

        assert_eq!(db.registration_count(), 0);
    }

    #[test]
    fn test_remove_producer() {
        let db = RegistrationDb::new();
        let key = Registration::topic("t");
        db.add_producer(&key, &make_producer("p1"));
        db.add_producer(&key, &make_producer("p2"));

        assert_eq!(db.remove_producer(&key, "p1"), (true, 1));
        assert_eq!(db.remove_producer(&key, "p1"), (false, 1));
        assert_eq!(db.remove_producer(&key, "p2"), (true, 0));

        // Emptied registration is kept
        assert_eq!(db.find_registrations(Category::Topic, "t", ""), vec![key]);
    }

    #[test]
    fn test_remove_producer_unknown() {
        let db = RegistrationDb::new();
        let key = Registration::topic("t");

        assert_eq!(db.remove_producer(&key, "ghost"), (false, 0));

        db.add_producer(&key, &make_producer("p1"));
        assert_eq!(db.remove_producer(&key, "ghost"), (false, 1));
    }

    #[test]
    fn test_remove_registration() {
        let db = RegistrationDb::new();
        let key = Registration::channel("t", "c");
        db.add_producer(&key, &make_producer("p1"));

        db.remove_registration(&key);

        assert!(db.find_registrations(Category::Channel, "t", "c").is_empty());
        assert!(db.lookup_registrations("p1").is_empty());
    }

    #[test]
    fn test_find_registrations_exact() {
        let db = RegistrationDb::new();
        db.add_registration(&Registration::topic("a"));
        db.add_registration(&Registration::topic("b"));

        let found = db.find_registrations(Category::Topic, "a", "");
        assert_eq!(found, vec![Registration::topic("a")]);
        assert!(db.find_registrations(Category::Topic, "c", "").is_empty());
        assert!(db.find_registrations(Category::Channel, "a", "").is_empty());
    }

    #[test]
    fn test_find_registrations_wildcard() {
        let db = RegistrationDb::new();
        db.add_registration(&Registration::channel("foo", "bar"));
        db.add_registration(&Registration::channel("foo", "baz"));
        db.add_registration(&Registration::channel("qux", "bar"));
        db.add_registration(&Registration::topic("foo"));

        assert_eq!(db.find_registrations(Category::Channel, "foo", "*").len(), 2);
        assert_eq!(db.find_registrations(Category::Channel, "*", "bar").len(), 2);
        assert_eq!(db.find_registrations(Category::Channel, "*", "*").len(), 3);
        assert_eq!(db.find_registrations(Category::Topic, "*", "").len(), 1);
    }

    #[test]
    fn test_wildcard_sub_key_compares_sub_key() {
        let db = RegistrationDb::new();
        db.add_registration(&Registration::channel("foo", "bar"));

        // Key wildcard with a literal sub key that only matches the key field
        assert!(db.find_registrations(Category::Channel, "*", "foo").is_empty());
        assert_eq!(db.find_registrations(Category::Channel, "*", "bar").len(), 1);
    }

    #[test]
    fn test_find_producers_wildcard_dedup() {
        let db = RegistrationDb::new();
        let p = make_producer("p1");
        db.add_producer(&Registration::topic("foo"), &p);
        db.add_producer(&Registration::channel("foo", "bar"), &p);
        db.add_producer(&Registration::channel("foo", "baz"), &p);

        assert_eq!(ids(&db.find_producers(Category::Channel, "foo", "*")), vec!["p1"]);
        assert_eq!(ids(&db.find_producers(Category::Channel, "*", "bar")), vec!["p1"]);
        assert_eq!(ids(&db.find_producers(Category::Topic, "*", "")), vec!["p1"]);
    }

    #[test]
    fn test_find_producers_union() {
        let db = RegistrationDb::new();
        db.add_producer(&Registration::channel("foo", "a"), &make_producer("p1"));
        db.add_producer(&Registration::channel("foo", "b"), &make_producer("p2"));
        db.add_producer(&Registration::channel("other", "a"), &make_producer("p3"));

        assert_eq!(
            ids(&db.find_producers(Category::Channel, "foo", "*")),
            vec!["p1", "p2"]
        );
        assert_eq!(
            ids(&db.find_producers(Category::Channel, "*", "a")),
            vec!["p1", "p3"]
        );
    }

    #[test]
    fn test_lookup_registrations() {
        let db = RegistrationDb::new();
        let p = make_producer("p1");
        db.add_producer(&Registration::client(), &p);
        db.add_producer(&Registration::topic("t"), &p);
        db.add_producer(&Registration::channel("t", "c"), &p);
        db.add_producer(&Registration::topic("other"), &make_producer("p2"));

        let mut found = db.lookup_registrations("p1");
        found.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        assert_eq!(found.len(), 3);

        for key in &found {
            db.remove_producer(key, "p1");
        }
        assert!(db.lookup_registrations("p1").is_empty());
        assert_eq!(db.lookup_registrations("p2").len(), 1);
    }

    #[test]
    fn test_shared_producer_heartbeat_visible_everywhere() {
        let db = RegistrationDb::new();
        let p = make_producer("p1");
        db.add_producer(&Registration::topic("a"), &p);
        db.add_producer(&Registration::topic("b"), &p);

        let stale = SystemTime::now() - Duration::from_secs(600);
        p.peer_info().set_last_update(stale);

        for topic in ["a", "b"] {
            let found = db.find_producers(Category::Topic, topic, "");
            assert_eq!(found[0].peer_info().last_update(), p.peer_info().last_update());
        }
    }

    #[test]
    fn test_tombstone_producer() {
        let db = RegistrationDb::new();
        let key = Registration::topic("t");
        let p = make_producer("p1");
        db.add_producer(&key, &p);

        assert!(!db.tombstone_producer(&key, "ghost"));
        assert!(!db.tombstone_producer(&Registration::topic("x"), "p1"));
        assert!(db.tombstone_producer(&key, "p1"));

        assert!(p.is_tombstoned(Duration::from_secs(45)));
        assert!(!p.is_tombstoned(Duration::ZERO));
    }

    #[test]
    fn test_filter_active() {
        let fresh = make_producer("fresh");
        let stale = make_producer("stale");
        stale
            .peer_info()
            .set_last_update(SystemTime::now() - Duration::from_secs(600));
        let tombstoned = make_producer("tombstoned");
        tombstoned.tombstone();

        let all = vec![fresh, stale, tombstoned];
        let inactivity = Duration::from_secs(300);

        let active = filter_active(&all, inactivity, Duration::from_secs(45));
        assert_eq!(ids(&active), vec!["fresh"]);

        // Expired tombstones no longer hide the producer
        let active = filter_active(&all, inactivity, Duration::ZERO);
        assert_eq!(ids(&active), vec!["fresh", "tombstoned"]);
    }

    #[test]
    fn test_peer_info_touch() {
        let info = PeerInfo::new("p1");
        info.set_last_update(SystemTime::now() - Duration::from_secs(10));

        let elapsed = info.touch();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(info.since_last_update() < Duration::from_secs(10));
    }

    #[test]
    fn test_registration_helpers() {
        let regs = vec![
            Registration::channel("foo", "a"),
            Registration::channel("foo", "b"),
            Registration::channel("bar", "a"),
            Registration::topic("foo"),
        ];

        let foo = regs.filter(Category::Channel, "foo", WILDCARD);
        assert_eq!(foo.len(), 2);

        let mut channels = foo.sub_keys();
        channels.sort();
        assert_eq!(channels, vec!["a", "b"]);

        let topics = regs.filter(Category::Topic, WILDCARD, "").keys();
        assert_eq!(topics, vec!["foo"]);
    }

    #[test]
    fn test_registration_is_ephemeral() {
        assert!(Registration::topic("t#ephemeral").is_ephemeral());
        assert!(!Registration::topic("t").is_ephemeral());
        assert!(Registration::channel("t", "c#ephemeral").is_ephemeral());
        // Only the channel name decides for channel registrations
        assert!(!Registration::channel("t#ephemeral", "c").is_ephemeral());
        assert!(!Registration::client().is_ephemeral());
    }

    #[test]
    fn test_display() {
        let p = make_producer("p1");
        assert_eq!(p.to_string(), "h1 [4150, 4151]");
        assert_eq!(
            Registration::channel("t", "c").to_string(),
            "category:channel key:t subkey:c"
        );
    }

    #[test]
    fn test_peer_info_serialize() {
        let p = make_producer("p1");
        let json = serde_json::to_value(p.peer_info().as_ref()).unwrap();
        assert_eq!(json["broadcast_address"], "h1");
        assert_eq!(json["tcp_port"], 4150);
        assert!(json.get("id").is_none());
        assert!(json.get("last_update").is_none());
    }

    #[test]
    fn test_remove_producer_pruning() {
        let db = RegistrationDb::new();
        let key = Registration::channel("t", "c#ephemeral");
        let a = make_producer("a");
        let b = make_producer("b");
        db.add_producer(&key, &a);
        db.add_producer(&key, &b);

        // Still populated: kept
        assert_eq!(db.remove_producer_pruning(&key, "a"), (true, 1));
        assert_eq!(db.find_registrations(Category::Channel, "t", "c#ephemeral").len(), 1);

        // Emptied: deleted
        assert_eq!(db.remove_producer_pruning(&key, "b"), (true, 0));
        assert!(db.find_registrations(Category::Channel, "t", "c#ephemeral").is_empty());

        assert_eq!(db.remove_producer_pruning(&key, "b"), (false, 0));
    }

    #[test]
    fn test_remove_producer_pruning_keeps_durable() {
        let db = RegistrationDb::new();
        let key = Registration::topic("t");
        db.add_producer(&key, &make_producer("a"));

        assert_eq!(db.remove_producer_pruning(&key, "a"), (true, 0));
        assert_eq!(db.find_registrations(Category::Topic, "t", "").len(), 1);
    }

    #[test]
    fn test_register_after_prune_survives() {
        let db = RegistrationDb::new();
        let key = Registration::topic("t#ephemeral");
        db.add_producer(&key, &make_producer("a"));

        assert_eq!(db.remove_producer_pruning(&key, "a"), (true, 0));
        assert!(db.add_producer(&key, &make_producer("b")));

        assert_eq!(ids(&db.find_producers(Category::Topic, "t#ephemeral", "")), vec!["b"]);
    }

    #[test]
    fn test_concurrent_prune_never_drops_other_producer() {
        let db = RegistrationDb::new();
        let key = Registration::topic("t#ephemeral");
        let a = make_producer("a");
        let b = make_producer("b");

        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..2000 {
                    db.add_producer(&key, &a);
                    db.remove_producer_pruning(&key, "a");
                }
            });
            s.spawn(|| {
                for _ in 0..100 {
                    std::thread::yield_now();
                }
                assert!(db.add_producer(&key, &b));
            });
        });

        // `b` is never removed, so its registration must still hold it
        assert_eq!(ids(&db.find_producers(Category::Topic, "t#ephemeral", "")), vec!["b"]);
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        const WRITERS: usize = 8;
        const PER_WRITER: usize = 100;

        let db = RegistrationDb::new();
        let key = Registration::channel("t", "c");

        std::thread::scope(|s| {
            for w in 0..WRITERS {
                let db = &db;
                let key = &key;
                s.spawn(move || {
                    for i in 0..PER_WRITER {
                        let id = format!("w{}-{}", w, i);
                        assert!(db.add_producer(key, &make_producer(&id)));
                        if i % 2 == 1 {
                            let (removed, _) = db.remove_producer(key, &id);
                            assert!(removed);
                        }
                    }
                });
            }
            for _ in 0..2 {
                let db = &db;
                s.spawn(move || {
                    for _ in 0..200 {
                        let found = ids(&db.find_producers(Category::Channel, "t", "c"));
                        let mut unique = found.clone();
                        unique.dedup();
                        assert_eq!(found, unique, "duplicate producer id");
                    }
                });
            }
        });

        let found = ids(&db.find_producers(Category::Channel, "t", "c"));
        let mut expected: Vec<String> = (0..WRITERS)
            .flat_map(|w| (0..PER_WRITER).step_by(2).map(move |i| format!("w{}-{}", w, i)))
            .collect();
        expected.sort();
        assert_eq!(found, expected);
        assert_eq!(db.lookup_registrations("w0-0"), vec![key.clone()]);
        assert!(db.lookup_registrations("w0-1").is_empty());
    }
}
