//! Resource bindings
//!
//! A binding links an external resource identifier (a topic, a table, a URL)
//! to the message or service that describes it. Scopes can then name the
//! resource instead of the type.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// What a resource is bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingTarget {
    Message(String),
    Service(String),
}

impl BindingTarget {
    pub fn name(&self) -> &str {
        match self {
            BindingTarget::Message(name) | BindingTarget::Service(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBinding {
    pub linked_resource: String,
    pub target: BindingTarget,
    pub updated_at: DateTime<Utc>,
}

impl ResourceBinding {
    pub fn new(linked_resource: impl Into<String>, target: BindingTarget) -> Self {
        Self {
            linked_resource: linked_resource.into(),
            target,
            updated_at: Utc::now(),
        }
    }
}

/// Lookup of bindings by resource identifier
pub trait BindingResolver: Sync {
    fn resolve_binding(&self, linked_resource: &str) -> Option<ResourceBinding>;
}

/// Resolver for callers that have no bindings
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBindings;

impl BindingResolver for NoBindings {
    fn resolve_binding(&self, _linked_resource: &str) -> Option<ResourceBinding> {
        None
    }
}

/// The binding table of one registry, persisted as `bindings.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bindings {
    entries: BTreeMap<String, ResourceBinding>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, linked_resource: &str) -> Option<&ResourceBinding> {
        self.entries.get(linked_resource)
    }

    /// Insert a new binding; fails if the resource is already bound
    pub fn create(&mut self, binding: ResourceBinding) -> Result<()> {
        if self.entries.contains_key(&binding.linked_resource) {
            return Err(RegistryError::BindingExists(binding.linked_resource));
        }
        self.entries.insert(binding.linked_resource.clone(), binding);
        Ok(())
    }

    /// Replace an existing binding; fails if the resource is unbound
    pub fn update(&mut self, binding: ResourceBinding) -> Result<()> {
        match self.entries.get_mut(&binding.linked_resource) {
            Some(slot) => {
                *slot = binding;
                Ok(())
            }
            None => Err(RegistryError::not_found(
                "resource binding",
                binding.linked_resource,
            )),
        }
    }

    pub fn delete(&mut self, linked_resource: &str) -> Result<ResourceBinding> {
        self.entries
            .remove(linked_resource)
            .ok_or_else(|| RegistryError::not_found("resource binding", linked_resource))
    }

    /// Bindings in resource-identifier order
    pub fn iter(&self) -> impl Iterator<Item = &ResourceBinding> {
        self.entries.values()
    }
}

impl BindingResolver for Bindings {
    fn resolve_binding(&self, linked_resource: &str) -> Option<ResourceBinding> {
        self.entries.get(linked_resource).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rejects_existing() {
        let mut bindings = Bindings::new();
        bindings
            .create(ResourceBinding::new("orders-topic", BindingTarget::Message("shop.Order".into())))
            .unwrap();
        let err = bindings
            .create(ResourceBinding::new("orders-topic", BindingTarget::Message("shop.Other".into())))
            .unwrap_err();
        assert!(matches!(err, RegistryError::BindingExists(ref id) if id == "orders-topic"));
        assert_eq!(bindings.get("orders-topic").unwrap().target.name(), "shop.Order");
    }

    #[test]
    fn test_update_and_delete_require_existing() {
        let mut bindings = Bindings::new();
        let binding = ResourceBinding::new("svc", BindingTarget::Service("shop.Api".into()));
        assert!(bindings.update(binding.clone()).unwrap_err().is_not_found());
        assert!(bindings.delete("svc").unwrap_err().is_not_found());

        bindings.create(binding).unwrap();
        bindings
            .update(ResourceBinding::new("svc", BindingTarget::Service("shop.ApiV2".into())))
            .unwrap();
        assert_eq!(bindings.resolve_binding("svc").unwrap().target.name(), "shop.ApiV2");
        bindings.delete("svc").unwrap();
        assert!(bindings.is_empty());
    }

    #[test]
    fn test_json_is_keyed_by_resource() {
        let mut bindings = Bindings::new();
        bindings
            .create(ResourceBinding::new("t", BindingTarget::Message("p.M".into())))
            .unwrap();
        let json = serde_json::to_value(&bindings).unwrap();
        assert_eq!(json["t"]["target"]["message"], "p.M");

        let back: Bindings = serde_json::from_value(json).unwrap();
        assert_eq!(back, bindings);
    }
}
