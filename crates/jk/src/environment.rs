//! The interpreter's name store: a chain of scopes linked outward.

use std::{cell::RefCell, rc::Rc};

use ahash::AHashMap;

use crate::object::Object;

/// One scope of name bindings with an optional enclosing scope.
///
/// Lookup walks outward until the name is found. Definition always writes the
/// innermost scope; reassignment updates the binding where it already lives.
#[derive(Debug, Default)]
pub struct Environment {
    store: AHashMap<String, Object>,
    outer: Option<Rc<RefCell<Environment>>>,
}

impl Environment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh scope enclosed by `outer`.
    #[must_use]
    pub fn enclosed(outer: Rc<RefCell<Environment>>) -> Self {
        Self {
            store: AHashMap::new(),
            outer: Some(outer),
        }
    }

    /// Looks `name` up, walking outward through enclosing scopes.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Object> {
        if let Some(value) = self.store.get(name) {
            return Some(value.clone());
        }
        self.outer.as_ref().and_then(|outer| outer.borrow().get(name))
    }

    /// Creates or replaces a binding in this scope.
    pub fn define(&mut self, name: impl Into<String>, value: Object) {
        self.store.insert(name.into(), value);
    }

    /// Updates an existing binding wherever it lives in the chain. Returns
    /// false when the name is bound nowhere.
    pub fn assign(&mut self, name: &str, value: Object) -> bool {
        if let Some(slot) = self.store.get_mut(name) {
            *slot = value;
            return true;
        }
        match &self.outer {
            Some(outer) => outer.borrow_mut().assign(name, value),
            None => false,
        }
    }
}
