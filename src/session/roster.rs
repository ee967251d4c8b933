//! Session membership
//!
//! Which suppliers serve a session is decided outside this crate; the core
//! only asks the question through `SessionMembership`.

use std::collections::{BTreeMap, BTreeSet};

use super::SessionHeader;

/// Answers whether a supplier belongs to a session
pub trait SessionMembership {
    fn is_session_supplier(&self, header: &SessionHeader, supplier_operator_address: &str) -> bool;
}

/// Fixed supplier set per service, the same for every session
#[derive(Debug, Clone, Default)]
pub struct StaticRoster {
    suppliers: BTreeMap<String, BTreeSet<String>>,
}

impl StaticRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_supplier(&mut self, service_id: impl Into<String>, supplier: impl Into<String>) {
        self.suppliers.entry(service_id.into()).or_default().insert(supplier.into());
    }

    pub fn with_supplier(mut self, service_id: impl Into<String>, supplier: impl Into<String>) -> Self {
        self.add_supplier(service_id, supplier);
        self
    }

    /// Suppliers staked for `service_id`, in address order
    pub fn suppliers(&self, service_id: &str) -> impl Iterator<Item = &str> {
        self.suppliers.get(service_id).into_iter().flatten().map(String::as_str)
    }
}

impl SessionMembership for StaticRoster {
    fn is_session_supplier(&self, header: &SessionHeader, supplier_operator_address: &str) -> bool {
        self.suppliers
            .get(&header.service_id)
            .is_some_and(|set| set.contains(supplier_operator_address))
    }
}
