//! Invocation Environment
//!
//! The name -> value mapping of one flow invocation. It starts with the
//! bound free variables and grows by one merge per stage.

use indexmap::IndexMap;

use crate::error::InternalConsistencyError;

/// Values computed so far in one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Environment<V> {
    values: IndexMap<String, V>,
}

impl<V> Default for Environment<V> {
    fn default() -> Self {
        Self {
            values: IndexMap::new(),
        }
    }
}

impl<V> Environment<V> {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value bound to `name`.
    pub fn get(&self, name: &str) -> Option<&V> {
        self.values.get(name)
    }

    /// Check whether `name` is bound.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Number of bound names.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Bound names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Remove and return the value bound to `name`.
    pub fn take(&mut self, name: &str) -> Option<V> {
        self.values.shift_remove(name)
    }

    /// Add the private results of one group.
    ///
    /// # Errors
    ///
    /// [`InternalConsistencyError`] if any name is already bound. Groups of a
    /// stage never share outputs, so a collision means the plan is broken.
    pub fn merge(&mut self, produced: IndexMap<String, V>) -> Result<(), InternalConsistencyError> {
        for (name, value) in produced {
            if self.values.contains_key(&name) {
                return Err(InternalConsistencyError::new(format!(
                    "`{name}` was produced twice"
                )));
            }
            self.values.insert(name, value);
        }
        Ok(())
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for Environment<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
