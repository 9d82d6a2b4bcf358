//! In-memory allocation state.
//!
//! Two maps kept as exact inverses: every `(address, key)` entry in one has
//! the matching `(key, address)` entry in the other. Only the allocator
//! touches this type, and only while holding its lock.

use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Debug, Default, Clone)]
pub(crate) struct AllocationState {
    ip_to_svc: HashMap<IpAddr, String>,
    svc_to_ip: HashMap<String, IpAddr>,
}

impl AllocationState {
    pub(crate) fn owner(&self, ip: &IpAddr) -> Option<&str> {
        self.ip_to_svc.get(ip).map(String::as_str)
    }

    pub(crate) fn address_of(&self, key: &str) -> Option<IpAddr> {
        self.svc_to_ip.get(key).copied()
    }

    /// Binds `key` to `ip`, dropping any address `key` held before.
    ///
    /// The caller has already checked that `ip` is free or owned by `key`.
    pub(crate) fn insert(&mut self, key: &str, ip: IpAddr) {
        debug_assert!(self.owner(&ip).is_none_or(|owner| owner == key));
        if let Some(previous) = self.svc_to_ip.insert(key.to_string(), ip) {
            if previous != ip {
                self.ip_to_svc.remove(&previous);
            }
        }
        self.ip_to_svc.insert(ip, key.to_string());
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<IpAddr> {
        let ip = self.svc_to_ip.remove(key)?;
        self.ip_to_svc.remove(&ip);
        Some(ip)
    }

    /// Drops every entry whose address fails `keep`, returning what was dropped.
    pub(crate) fn retain_addresses(&mut self, keep: impl Fn(&IpAddr) -> bool) -> Vec<(String, IpAddr)> {
        let dropped: Vec<(String, IpAddr)> = self
            .svc_to_ip
            .iter()
            .filter(|(_, ip)| !keep(ip))
            .map(|(key, ip)| (key.clone(), *ip))
            .collect();
        for (key, _) in &dropped {
            self.remove(key);
        }
        dropped
    }

    pub(crate) fn len(&self) -> usize {
        self.svc_to_ip.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, IpAddr)> {
        self.svc_to_ip.iter().map(|(key, ip)| (key.as_str(), *ip))
    }

    /// Whether the two maps are exact inverses.
    pub(crate) fn is_consistent(&self) -> bool {
        self.ip_to_svc.len() == self.svc_to_ip.len()
            && self
                .svc_to_ip
                .iter()
                .all(|(key, ip)| self.ip_to_svc.get(ip) == Some(key))
    }
}
