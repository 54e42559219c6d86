//! Session registry.
//!
//! Discovers sessions through a [`Dataset`], assigns each key a unique
//! escaped form and builds [`Session`]s on first access. Subsets produced by
//! [`filter`](SessionRegistry::filter) share session instances and escaped
//! keys with their parent but hold their own record table.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Write;
use std::rc::Rc;

use crate::config::LoaderConfig;
use crate::error::{LoaderError, Result};
use crate::memo::Memo;
use crate::session::{Dataset, Session, SessionRecord};

/// Filesystem/URL-safe rendering of a session key.
///
/// `/`, `\` and space become `_`; every character outside
/// `[A-Za-z0-9-_.() ]` is written as `%` plus four lowercase hex digits.
pub fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for ch in key.chars() {
        let ch = match ch {
            '/' | '\\' | ' ' => '_',
            other => other,
        };
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '(' | ')' | ' ') {
            escaped.push(ch);
        } else {
            // writing into a String cannot fail
            let _ = write!(escaped, "%{:04x}", ch as u32);
        }
    }
    escaped
}

/// Shared between a registry and all subsets derived from it.
#[derive(Default)]
struct Identity {
    sessions: HashMap<String, Rc<Session>>,
    escaped: HashMap<String, String>,
    taken: HashSet<String>,
}

impl Identity {
    /// Stable escaped key; collisions are resolved by appending `_`.
    fn assign(&mut self, key: &str) -> String {
        if let Some(escaped) = self.escaped.get(key) {
            return escaped.clone();
        }
        let mut candidate = escape_key(key);
        while self.taken.contains(&candidate) {
            candidate.push('_');
        }
        self.taken.insert(candidate.clone());
        self.escaped.insert(key.to_string(), candidate.clone());
        candidate
    }
}

struct RecordTable {
    keys: Vec<String>,
    records: HashMap<String, SessionRecord>,
}

pub struct SessionRegistry {
    dataset: Rc<dyn Dataset>,
    config: Rc<LoaderConfig>,
    identity: Rc<RefCell<Identity>>,
    table: Memo<Rc<RecordTable>>,
}

impl SessionRegistry {
    pub fn new(dataset: impl Dataset + 'static, config: LoaderConfig) -> Self {
        Self::from_shared(Rc::new(dataset), Rc::new(config))
    }

    pub fn from_shared(dataset: Rc<dyn Dataset>, config: Rc<LoaderConfig>) -> Self {
        Self {
            dataset,
            config,
            identity: Rc::new(RefCell::new(Identity::default())),
            table: Memo::new(),
        }
    }

    pub fn title(&self) -> &str {
        self.dataset.title()
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    fn table(&self) -> Result<Rc<RecordTable>> {
        self.table.get_or_try_init(|| {
            let discovered = self.dataset.discover()?;
            let mut keys = Vec::with_capacity(discovered.len());
            let mut records = HashMap::with_capacity(discovered.len());
            let mut identity = self.identity.borrow_mut();
            for (key, record) in discovered {
                if records.insert(key.clone(), record).is_none() {
                    identity.assign(&key);
                    keys.push(key);
                }
            }
            log::info!(
                "{}: discovered {} sessions in {}",
                self.dataset.title(),
                keys.len(),
                self.dataset.root().display()
            );
            Ok(Rc::new(RecordTable { keys, records }))
        })
    }

    /// Session keys in discovery order. Fails when there are none.
    pub fn session_keys(&self) -> Result<Vec<String>> {
        let table = self.table()?;
        if table.keys.is_empty() {
            return Err(LoaderError::NoSessions(self.title().to_string()));
        }
        Ok(table.keys.clone())
    }

    pub fn session_count(&self) -> Result<usize> {
        Ok(self.session_keys()?.len())
    }

    pub fn record(&self, key: &str) -> Result<Option<SessionRecord>> {
        Ok(self.table()?.records.get(key).cloned())
    }

    pub fn escaped_key(&self, key: &str) -> Result<Option<String>> {
        if !self.table()?.records.contains_key(key) {
            return Ok(None);
        }
        Ok(self.identity.borrow().escaped.get(key).cloned())
    }

    /// Valid session for `key`; `None` when unknown or invalid.
    pub fn session(&self, key: &str) -> Result<Option<Rc<Session>>> {
        let table = self.table()?;
        let record = match table.records.get(key) {
            Some(record) => record,
            None => return Ok(None),
        };

        let existing = self.identity.borrow().sessions.get(key).cloned();
        let session = match existing {
            Some(session) => session,
            None => {
                let escaped = self.identity.borrow_mut().assign(key);
                log::debug!("{}: instantiating session '{}'", self.title(), key);
                let session = Rc::new(Session::new(
                    key.to_string(),
                    escaped,
                    record.clone(),
                    Rc::clone(&self.dataset),
                    Rc::clone(&self.config),
                ));
                self.identity
                    .borrow_mut()
                    .sessions
                    .insert(key.to_string(), Rc::clone(&session));
                session
            }
        };

        Ok(session.is_valid()?.then_some(session))
    }

    pub fn session_by_escaped_key(&self, escaped: &str) -> Result<Option<Rc<Session>>> {
        let table = self.table()?;
        let key = {
            let identity = self.identity.borrow();
            table
                .keys
                .iter()
                .find(|key| identity.escaped.get(*key).map(String::as_str) == Some(escaped))
                .cloned()
        };
        match key {
            Some(key) => self.session(&key),
            None => Ok(None),
        }
    }

    /// Session at position `index` in key order; `None` if it is invalid.
    pub fn session_by_index(&self, index: usize) -> Result<Option<Rc<Session>>> {
        let keys = self.session_keys()?;
        let key = keys.get(index).ok_or(LoaderError::IndexOutOfRange {
            index,
            len: keys.len(),
        })?;
        self.session(key)
    }

    /// Valid sessions in key order.
    pub fn sessions(&self) -> Result<Vec<Rc<Session>>> {
        let mut sessions = Vec::new();
        for key in self.session_keys()? {
            if let Some(session) = self.session(&key)? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    /// Subset of records matching `predicate(record, key)`; `None` if
    /// nothing matches.
    pub fn filter<F>(&self, predicate: F) -> Result<Option<SessionRegistry>>
    where
        F: Fn(&SessionRecord, &str) -> bool,
    {
        let table = self.table()?;
        let keys: Vec<String> = table
            .keys
            .iter()
            .filter(|key| predicate(&table.records[key.as_str()], key.as_str()))
            .cloned()
            .collect();
        if keys.is_empty() {
            return Ok(None);
        }

        let records = keys
            .iter()
            .map(|key| (key.clone(), table.records[key.as_str()].clone()))
            .collect();
        let subset = Memo::new();
        subset.get_or_init(|| Rc::new(RecordTable { keys, records }));
        Ok(Some(SessionRegistry {
            dataset: Rc::clone(&self.dataset),
            config: Rc::clone(&self.config),
            identity: Rc::clone(&self.identity),
            table: subset,
        }))
    }

    /// Records whose `field` equals `value` exactly.
    pub fn group_by(&self, field: &str, value: &str) -> Result<Option<SessionRegistry>> {
        self.filter(|record, _| record.get(field) == Some(value))
    }

    /// Subset holding exactly `keys`. Unknown or duplicate keys are a
    /// contract violation.
    pub fn subset_by_keys<S: AsRef<str>>(&self, keys: &[S]) -> Result<SessionRegistry> {
        let wanted: HashSet<&str> = keys.iter().map(|k| k.as_ref()).collect();
        let subset = self.filter(|_, key| wanted.contains(key))?;
        check_subset_size(subset, keys.len(), "session key")
    }

    pub fn subset_by_escaped_keys<S: AsRef<str>>(&self, escaped_keys: &[S]) -> Result<SessionRegistry> {
        let wanted: HashSet<&str> = escaped_keys.iter().map(|k| k.as_ref()).collect();
        self.table()?;
        let escaped = self.identity.borrow().escaped.clone();
        let subset = self.filter(|_, key| {
            escaped
                .get(key)
                .map_or(false, |e| wanted.contains(e.as_str()))
        })?;
        check_subset_size(subset, escaped_keys.len(), "escaped session key")
    }

    /// Distinct values of `field`, skipping records without it.
    pub fn distinct_values(&self, field: &str) -> Result<BTreeSet<String>> {
        let table = self.table()?;
        Ok(table
            .keys
            .iter()
            .filter_map(|key| table.records[key.as_str()].get(field))
            .map(str::to_string)
            .collect())
    }

    /// Releases cached metadata and pages of every instantiated session,
    /// including those reached through subsets.
    pub fn purge(&self) {
        let sessions: Vec<Rc<Session>> = self.identity.borrow().sessions.values().cloned().collect();
        for session in sessions {
            session.purge();
        }
    }
}

fn check_subset_size(
    subset: Option<SessionRegistry>,
    requested: usize,
    what: &str,
) -> Result<SessionRegistry> {
    let found = match &subset {
        Some(registry) => registry.session_count()?,
        None => 0,
    };
    match subset {
        Some(registry) if found == requested => Ok(registry),
        _ => Err(LoaderError::Contract(format!(
            "{} list has {} entries but the subset holds {} sessions",
            what, requested, found
        ))),
    }
}
