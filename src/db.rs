use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// Key-value map behind a single exclusive lock.
///
/// Expiry is lazy: an expired entry reads as absent but keeps its slot (and
/// shows up in [`Store::keys`] and [`Store::exists`]) until it is
/// overwritten, deleted or flushed.
#[derive(Debug, Default)]
pub struct Store {
    map: Mutex<HashMap<String, Entry>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn save(&self, key: impl Into<String>, value: impl Into<Value>, expires_at: Option<Instant>) {
        let entry = Entry {
            value: value.into(),
            expires_at,
        };
        self.lock().insert(key.into(), entry);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        self.lock()
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// `"string"`, `"integer"`, `"float"`, or `"none"` for a missing or expired key.
    pub fn value_type(&self, key: &str) -> &'static str {
        let now = Instant::now();
        match self.lock().get(key) {
            Some(entry) if !entry.is_expired(now) => entry.value.type_name(),
            _ => "none",
        }
    }

    pub fn delete(&self, key: &str) -> usize {
        usize::from(self.lock().remove(key).is_some())
    }

    pub fn exists(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn keys(&self) -> BTreeSet<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn flush(&self) {
        self.lock().clear();
    }
}
