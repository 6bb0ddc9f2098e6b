//! Registration of client-facing filter and sort keys
//!
//! A `Crud` accepts a list of [`KeyEntry`] values per concern and turns it
//! into a [`Registry`] once, at construction. Every name is validated here so
//! that request-time dispatch only has to look keys up.

use std::fmt;

use indexmap::IndexMap;

use crate::error::{CrudError, Result};
use crate::sql::sanitize::validate_key;

/// Which registry a key belongs to, used in error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryKind {
    Filtering,
    Sorting,
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filtering => write!(f, "filtering"),
            Self::Sorting => write!(f, "sorting"),
        }
    }
}

/// One parameter name, or an ordered tuple of names that must all be present
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(Vec<String>);

impl Key {
    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn is_single(&self) -> bool {
        self.0.len() == 1
    }

    /// Whether every name of this key is in `present`
    pub fn is_satisfied_by(&self, mut present: impl FnMut(&str) -> bool) -> bool {
        self.0.iter().all(|name| present(name))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "{}", single),
            names => write!(f, "({})", names.join(", ")),
        }
    }
}

/// Anything that names one or more parameters
pub trait IntoKey {
    fn into_names(self) -> Vec<String>;
}

impl IntoKey for &str {
    fn into_names(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoKey for String {
    fn into_names(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoKey for &[&str] {
    fn into_names(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl<const N: usize> IntoKey for [&str; N] {
    fn into_names(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl IntoKey for Vec<String> {
    fn into_names(self) -> Vec<String> {
        self
    }
}

/// How a registered key is resolved at request time
#[derive(Clone)]
pub enum Resolver<F> {
    /// Compare or order by the attribute of this name
    Alias(String),
    Callback(F),
}

impl<F> fmt::Debug for Resolver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alias(name) => f.debug_tuple("Alias").field(name).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// A registration entry as supplied by the caller
pub enum KeyEntry<F> {
    /// Bare attribute name
    Key(Vec<String>),
    /// Key bound to a callback
    WithCallback(Vec<String>, F),
    /// A filter builder that was passed without being activated
    Unactivated { builder: &'static str },
}

impl<F> KeyEntry<F> {
    pub fn key(key: impl IntoKey) -> Self {
        KeyEntry::Key(key.into_names())
    }

    pub fn with_callback(key: impl IntoKey, callback: F) -> Self {
        KeyEntry::WithCallback(key.into_names(), callback)
    }
}

impl<F> From<&str> for KeyEntry<F> {
    fn from(name: &str) -> Self {
        KeyEntry::key(name)
    }
}

/// Insertion-ordered map of validated keys to resolvers
pub struct Registry<F> {
    entries: IndexMap<Key, Resolver<F>>,
}

impl<F> Default for Registry<F> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<F> fmt::Debug for Registry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl<F> Registry<F> {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Look up a single-name key
    pub fn get(&self, name: &str) -> Option<&Resolver<F>> {
        self.entries
            .iter()
            .find(|(key, _)| key.is_single() && key.names()[0] == name)
            .map(|(_, resolver)| resolver)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Resolver<F>)> {
        self.entries.iter()
    }

    /// Names used by alias resolvers
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.values().filter_map(|resolver| match resolver {
            Resolver::Alias(name) => Some(name.as_str()),
            Resolver::Callback(_) => None,
        })
    }
}

/// Validate and collect registration entries
///
/// Bare keys are always single names. Callback keys may be tuples only when
/// `allow_multiple_keys` is set. A key registered twice keeps its first
/// position and its last resolver.
pub fn register<F>(
    entries: Vec<KeyEntry<F>>,
    allow_multiple_keys: bool,
    kind: RegistryKind,
) -> Result<Registry<F>> {
    let mut registry = Registry::default();

    for entry in entries {
        match entry {
            KeyEntry::Key(names) => {
                let key = parse_key(names, false, kind)?;
                let alias = key.names()[0].clone();
                registry.entries.insert(key, Resolver::Alias(alias));
            }
            KeyEntry::WithCallback(names, callback) => {
                let key = parse_key(names, allow_multiple_keys, kind)?;
                registry.entries.insert(key, Resolver::Callback(callback));
            }
            KeyEntry::Unactivated { builder } => {
                return Err(CrudError::configuration(format!(
                    "Unsupported entry {} for {}. Maybe you forgot to call .activate()?",
                    builder, kind
                )));
            }
        }
    }

    Ok(registry)
}

fn parse_key(names: Vec<String>, allow_multiple_keys: bool, kind: RegistryKind) -> Result<Key> {
    for name in &names {
        validate_key(name).map_err(CrudError::configuration)?;
    }

    if names.is_empty() {
        return Err(CrudError::configuration(format!(
            "No keys detected in {} entry",
            kind
        )));
    }

    let key = Key(names);
    if !allow_multiple_keys && !key.is_single() {
        return Err(CrudError::configuration(format!(
            "Unable to parse {} key \"{}\" (multiple keys are prohibited here)",
            kind, key
        )));
    }

    Ok(key)
}
