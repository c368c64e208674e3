//! In-process model of the Redis data types used by the broker.

use crate::{Result, StoreError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Data {
    String(String),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
    SortedSet(HashMap<String, f64>),
    Hash(BTreeMap<String, String>),
}

impl Data {
    fn is_empty(&self) -> bool {
        match self {
            Data::String(_) => false,
            Data::List(l) => l.is_empty(),
            Data::Set(s) => s.is_empty(),
            Data::SortedSet(z) => z.is_empty(),
            Data::Hash(h) => h.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn persistent(data: Data) -> Self {
        Entry {
            data,
            expires_at: None,
        }
    }
}

macro_rules! typed_access {
    ($read:ident, $write:ident, $variant:ident, $ty:ty) => {
        fn $read(&self, key: &str) -> Result<Option<&$ty>> {
            match self.entries.get(key).map(|e| &e.data) {
                None => Ok(None),
                Some(Data::$variant(v)) => Ok(Some(v)),
                Some(_) => Err(StoreError::WrongType(key.to_string())),
            }
        }

        /// Creates an empty value if the key is absent; callers that may
        /// leave it empty must call `drop_if_empty`.
        fn $write(&mut self, key: &str) -> Result<&mut $ty> {
            let entry = self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::persistent(Data::$variant(Default::default())));
            match &mut entry.data {
                Data::$variant(v) => Ok(v),
                _ => Err(StoreError::WrongType(key.to_string())),
            }
        }
    };
}

/// Keys and values of a [`crate::MemoryStore`].
///
/// Mirrors Redis semantics for the commands the broker needs: collections
/// that become empty are deleted and expired keys vanish. Lists are indexed
/// from the left (LPUSH side), like `LRANGE key 0 -1`.
#[derive(Debug)]
pub struct Keyspace {
    entries: HashMap<String, Entry>,
    now: DateTime<Utc>,
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyspace {
    pub fn new() -> Self {
        Keyspace {
            entries: HashMap::new(),
            now: Utc::now(),
        }
    }

    /// Clock reading taken when the current atomic unit started
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Move the clock forward and evict every key that expired
    pub(crate) fn tick(&mut self, now: DateTime<Utc>) {
        self.now = now;
        self.entries
            .retain(|_, e| e.expires_at.map_or(true, |deadline| deadline > now));
    }

    typed_access!(list_ref, list_mut, List, VecDeque<String>);
    typed_access!(set_ref, set_mut, Set, BTreeSet<String>);
    typed_access!(zset_ref, zset_mut, SortedSet, HashMap<String, f64>);
    typed_access!(hash_ref, hash_mut, Hash, BTreeMap<String, String>);

    fn drop_if_empty(&mut self, key: &str) {
        if self.entries.get(key).is_some_and(|e| e.data.is_empty()) {
            self.entries.remove(key);
        }
    }

    fn deadline(&self, ttl: Duration) -> DateTime<Utc> {
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| self.now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn flush(&mut self) {
        self.entries.clear();
    }

    /// All live keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn del(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remaining time to live; `None` if the key is missing or persistent
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let deadline = self.entries.get(key)?.expires_at?;
        (deadline - self.now).to_std().ok()
    }

    pub fn expire(&mut self, key: &str, ttl: Duration) -> bool {
        let deadline = self.deadline(ttl);
        self.expire_at(key, deadline)
    }

    pub fn expire_at(&mut self, key: &str, deadline: DateTime<Utc>) -> bool {
        if !self.entries.contains_key(key) {
            return false;
        }
        if deadline <= self.now {
            self.entries.remove(key);
        } else if let Some(entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(deadline);
        }
        true
    }

    // Strings

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entries.get(key).map(|e| &e.data) {
            None => Ok(None),
            Some(Data::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    /// SET, replacing any previous value and expiry
    pub fn set(&mut self, key: &str, value: &str, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| self.deadline(ttl));
        self.entries.insert(
            key.to_string(),
            Entry {
                data: Data::String(value.to_string()),
                expires_at,
            },
        );
    }

    /// SET NX; returns whether the key was written
    pub fn set_nx(&mut self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        if self.entries.contains_key(key) {
            return false;
        }
        self.set(key, value, ttl);
        true
    }

    /// INCR, keeping any existing expiry
    pub fn incr(&mut self, key: &str) -> Result<i64> {
        let current = match self.get(key)? {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| StoreError::WrongType(key.to_string()))?,
            None => 0,
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| StoreError::Overflow(key.to_string()))?;
        match self.entries.get_mut(key) {
            Some(entry) => entry.data = Data::String(next.to_string()),
            None => self.set(key, &next.to_string(), None),
        }
        Ok(next)
    }

    // Lists

    pub fn lpush(&mut self, key: &str, value: &str) -> Result<usize> {
        let list = self.list_mut(key)?;
        list.push_front(value.to_string());
        Ok(list.len())
    }

    pub fn rpush(&mut self, key: &str, value: &str) -> Result<usize> {
        let list = self.list_mut(key)?;
        list.push_back(value.to_string());
        Ok(list.len())
    }

    /// RPOPLPUSH: pop the right end of `src` onto the left end of `dst`
    pub fn rpoplpush(&mut self, src: &str, dst: &str) -> Result<Option<String>> {
        self.list_ref(dst)?;
        if self.list_ref(src)?.is_none() {
            return Ok(None);
        }
        let popped = self.list_mut(src)?.pop_back();
        self.drop_if_empty(src);
        if let Some(value) = &popped {
            self.list_mut(dst)?.push_front(value.clone());
        }
        Ok(popped)
    }

    /// LREM key 0 value: remove every occurrence
    pub fn lrem(&mut self, key: &str, value: &str) -> Result<usize> {
        if self.list_ref(key)?.is_none() {
            return Ok(0);
        }
        let list = self.list_mut(key)?;
        let before = list.len();
        list.retain(|v| v != value);
        let removed = before - list.len();
        self.drop_if_empty(key);
        Ok(removed)
    }

    pub fn lrange(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.list_ref(key)?
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub fn llen(&self, key: &str) -> Result<usize> {
        Ok(self.list_ref(key)?.map_or(0, VecDeque::len))
    }

    // Sets

    pub fn sadd(&mut self, key: &str, member: &str) -> Result<bool> {
        Ok(self.set_mut(key)?.insert(member.to_string()))
    }

    pub fn srem(&mut self, key: &str, member: &str) -> Result<bool> {
        if self.set_ref(key)?.is_none() {
            return Ok(false);
        }
        let removed = self.set_mut(key)?.remove(member);
        self.drop_if_empty(key);
        Ok(removed)
    }

    pub fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self.set_ref(key)?.is_some_and(|s| s.contains(member)))
    }

    pub fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .set_ref(key)?
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    // Sorted sets

    fn ordered(zset: &HashMap<String, f64>) -> Vec<(String, f64)> {
        let mut members: Vec<(String, f64)> =
            zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        members
    }

    /// ZADD; returns whether the member is new
    pub fn zadd(&mut self, key: &str, score: f64, member: &str) -> Result<bool> {
        Ok(self
            .zset_mut(key)?
            .insert(member.to_string(), score)
            .is_none())
    }

    pub fn zrem(&mut self, key: &str, member: &str) -> Result<bool> {
        if self.zset_ref(key)?.is_none() {
            return Ok(false);
        }
        let removed = self.zset_mut(key)?.remove(member).is_some();
        self.drop_if_empty(key);
        Ok(removed)
    }

    pub fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        Ok(self.zset_ref(key)?.and_then(|z| z.get(member).copied()))
    }

    pub fn zcard(&self, key: &str) -> Result<usize> {
        Ok(self.zset_ref(key)?.map_or(0, HashMap::len))
    }

    /// Members with scores, lowest score first
    pub fn zrange_with_scores(&self, key: &str) -> Result<Vec<(String, f64)>> {
        Ok(self.zset_ref(key)?.map(Self::ordered).unwrap_or_default())
    }

    /// ZRANGEBYSCORE key -inf max
    pub fn zrange_by_score(&self, key: &str, max: f64) -> Result<Vec<String>> {
        Ok(self
            .zrange_with_scores(key)?
            .into_iter()
            .filter(|(_, score)| *score <= max)
            .map(|(member, _)| member)
            .collect())
    }

    /// ZREMRANGEBYSCORE key -inf max
    pub fn zrem_range_by_score(&mut self, key: &str, max: f64) -> Result<usize> {
        if self.zset_ref(key)?.is_none() {
            return Ok(0);
        }
        let zset = self.zset_mut(key)?;
        let before = zset.len();
        zset.retain(|_, score| *score > max);
        let removed = before - zset.len();
        self.drop_if_empty(key);
        Ok(removed)
    }

    /// ZREMRANGEBYRANK with Redis index semantics (negative counts from the end)
    pub fn zrem_range_by_rank(&mut self, key: &str, start: i64, stop: i64) -> Result<usize> {
        let ordered = match self.zset_ref(key)? {
            None => return Ok(0),
            Some(zset) => Self::ordered(zset),
        };
        let len = ordered.len() as i64;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Ok(0);
        }

        let zset = self.zset_mut(key)?;
        for (member, _) in &ordered[start as usize..=stop as usize] {
            zset.remove(member);
        }
        self.drop_if_empty(key);
        Ok((stop - start + 1) as usize)
    }

    // Hashes

    pub fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<bool> {
        Ok(self
            .hash_mut(key)?
            .insert(field.to_string(), value.to_string())
            .is_none())
    }

    pub fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.hash_ref(key)?.cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_orientation() {
        let mut ks = Keyspace::new();
        ks.lpush("q", "a").unwrap();
        ks.lpush("q", "b").unwrap();
        ks.rpush("q", "c").unwrap();

        assert_eq!(ks.lrange("q").unwrap(), vec!["b", "a", "c"]);
        assert_eq!(ks.rpoplpush("q", "p").unwrap().as_deref(), Some("c"));
        assert_eq!(ks.lrange("p").unwrap(), vec!["c"]);
    }

    #[test]
    fn test_empty_collections_are_deleted() {
        let mut ks = Keyspace::new();
        ks.lpush("q", "a").unwrap();
        ks.rpoplpush("q", "p").unwrap();
        assert!(!ks.exists("q"));

        ks.zadd("z", 1.0, "m").unwrap();
        ks.zrem("z", "m").unwrap();
        assert!(!ks.exists("z"));

        assert_eq!(ks.rpoplpush("missing", "p2").unwrap(), None);
        assert!(!ks.exists("p2"));
    }

    #[test]
    fn test_wrong_type() {
        let mut ks = Keyspace::new();
        ks.set("s", "value", None);

        match ks.lpush("s", "a") {
            Err(StoreError::WrongType(key)) => assert_eq!(key, "s"),
            other => panic!("Expected WrongType, got {:?}", other),
        }
        assert!(ks.rpoplpush("s", "p").is_err());
        assert!(!ks.exists("p"));
    }

    #[test]
    fn test_expiry() {
        let mut ks = Keyspace::new();
        let start = ks.now();
        ks.set("lock", "owner", Some(Duration::from_secs(60)));
        ks.set("forever", "x", None);

        assert_eq!(ks.ttl("lock"), Some(Duration::from_secs(60)));
        assert_eq!(ks.ttl("forever"), None);
        assert!(!ks.set_nx("lock", "other", None));

        ks.tick(start + chrono::Duration::seconds(61));
        assert!(!ks.exists("lock"));
        assert!(ks.exists("forever"));
        assert!(ks.set_nx("lock", "other", None));
    }

    #[test]
    fn test_incr_keeps_expiry() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.incr("n").unwrap(), 1);
        ks.expire("n", Duration::from_secs(10));
        assert_eq!(ks.incr("n").unwrap(), 2);

        assert_eq!(ks.get("n").unwrap().as_deref(), Some("2"));
        assert_eq!(ks.ttl("n"), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_incr_overflow_leaves_value() {
        let mut ks = Keyspace::new();
        ks.set("n", &i64::MAX.to_string(), None);

        match ks.incr("n") {
            Err(StoreError::Overflow(key)) => assert_eq!(key, "n"),
            other => panic!("Expected Overflow, got {:?}", other),
        }
        assert_eq!(ks.get("n").unwrap(), Some(i64::MAX.to_string()));
    }

    #[test]
    fn test_set_membership() {
        let mut ks = Keyspace::new();
        assert!(ks.sadd("s", "b").unwrap());
        assert!(ks.sadd("s", "a").unwrap());
        assert!(!ks.sadd("s", "a").unwrap());

        assert!(ks.sismember("s", "a").unwrap());
        assert_eq!(ks.smembers("s").unwrap(), vec!["a", "b"]);

        assert!(ks.srem("s", "a").unwrap());
        assert!(!ks.srem("s", "a").unwrap());
        assert!(ks.srem("s", "b").unwrap());
        assert!(!ks.exists("s"));
        assert!(!ks.srem("missing", "a").unwrap());
    }

    #[test]
    fn test_sorted_set_ranges() {
        let mut ks = Keyspace::new();
        for (member, score) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)] {
            ks.zadd("z", score, member).unwrap();
        }

        assert_eq!(ks.zrange_by_score("z", 2.0).unwrap(), vec!["a", "b"]);
        assert_eq!(ks.zrem_range_by_score("z", 1.0).unwrap(), 1);
        // keep the newest two
        assert_eq!(ks.zrem_range_by_rank("z", 0, -3).unwrap(), 1);
        assert_eq!(
            ks.zrange_with_scores("z").unwrap(),
            vec![("c".to_string(), 3.0), ("d".to_string(), 4.0)]
        );
        assert_eq!(ks.zrem_range_by_rank("z", 0, -3).unwrap(), 0);
    }
}
