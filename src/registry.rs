//! Repeated-capability registry.
//!
//! Owns the name -> ordinal mapping for every capability class. Instances
//! exist only between `register` and `unregister`; there is no implicit
//! creation and no default-instance fallback. `Global` has exactly one
//! implicit instance, addressed by the empty name.
//!
//! Ordinals are allocated lowest-free-first. A freed ordinal may be handed to
//! a later instance, but never while its original name is still registered.

use std::collections::{BTreeSet, HashMap};

use crate::capability::{CapabilityClass, Ordinal};
use crate::error::{AttributeError, AttributeResult};

/// Live instances of one capability class.
#[derive(Debug, Default, Clone)]
struct ClassInstances {
    /// Names in registration order.
    order: Vec<String>,
    index: HashMap<String, Ordinal>,
    free: BTreeSet<Ordinal>,
    next: u32,
}

impl ClassInstances {
    fn allocate(&mut self) -> Ordinal {
        if let Some(ordinal) = self.free.pop_first() {
            return ordinal;
        }
        let ordinal = Ordinal(self.next);
        self.next += 1;
        ordinal
    }
}

/// Registry of live repeated-capability instances.
#[derive(Debug, Default, Clone)]
pub struct CapabilityRegistry {
    classes: HashMap<CapabilityClass, ClassInstances>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` in `class` and return its ordinal.
    pub fn register(&mut self, class: CapabilityClass, name: &str) -> AttributeResult<Ordinal> {
        if !class.is_repeated() {
            return Err(AttributeError::NotRepeated(class));
        }
        if name.is_empty() {
            return Err(AttributeError::InvalidInstanceName { class });
        }

        let instances = self.classes.entry(class).or_default();
        if instances.index.contains_key(name) {
            return Err(AttributeError::DuplicateInstance {
                class,
                name: name.to_string(),
            });
        }

        let ordinal = instances.allocate();
        instances.index.insert(name.to_string(), ordinal);
        instances.order.push(name.to_string());
        Ok(ordinal)
    }

    /// Remove `name` from `class` and return the ordinal it held.
    ///
    /// The caller is responsible for invalidating store cells of that ordinal.
    pub fn unregister(&mut self, class: CapabilityClass, name: &str) -> AttributeResult<Ordinal> {
        let not_found = || AttributeError::InstanceNotFound {
            class,
            name: name.to_string(),
        };
        if !class.is_repeated() {
            return Err(AttributeError::NotRepeated(class));
        }

        let instances = self.classes.get_mut(&class).ok_or_else(not_found)?;
        let ordinal = instances.index.remove(name).ok_or_else(not_found)?;
        instances.order.retain(|n| n != name);
        instances.free.insert(ordinal);
        Ok(ordinal)
    }

    /// Resolve `name` in `class` to its ordinal.
    pub fn resolve(&self, class: CapabilityClass, name: &str) -> AttributeResult<Ordinal> {
        if !class.is_repeated() {
            return if name.is_empty() {
                Ok(Ordinal::GLOBAL)
            } else {
                Err(AttributeError::InstanceNotFound {
                    class,
                    name: name.to_string(),
                })
            };
        }

        self.classes
            .get(&class)
            .and_then(|instances| instances.index.get(name))
            .copied()
            .ok_or_else(|| AttributeError::InstanceNotFound {
                class,
                name: name.to_string(),
            })
    }

    /// Whether `name` is live in `class`.
    pub fn contains(&self, class: CapabilityClass, name: &str) -> bool {
        self.resolve(class, name).is_ok()
    }

    /// Live instance names of `class`, in registration order.
    ///
    /// Returns a snapshot, so iterating it again always restarts from the
    /// first name. `Global` lists its single unnamed instance.
    pub fn list_instances(&self, class: CapabilityClass) -> Vec<String> {
        if !class.is_repeated() {
            return vec![String::new()];
        }
        self.classes
            .get(&class)
            .map(|instances| instances.order.clone())
            .unwrap_or_default()
    }

    /// Live `(name, ordinal)` pairs of `class`, in registration order.
    pub fn entries(&self, class: CapabilityClass) -> Vec<(String, Ordinal)> {
        if !class.is_repeated() {
            return vec![(String::new(), Ordinal::GLOBAL)];
        }
        self.classes
            .get(&class)
            .map(|instances| {
                instances
                    .order
                    .iter()
                    .filter_map(|name| instances.index.get(name).map(|o| (name.clone(), *o)))
                    .collect()
            })
            .unwrap_or_default()
    }
}
