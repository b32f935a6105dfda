//! Applications, backend endpoints and canonical registration sets.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use crate::config::ApplicationConfig;

/// A load-balanced application and the registry key holding its backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Application {
    /// Upstream name, unique per deployment.
    pub name: String,
    /// Registry key under which backends register themselves.
    pub key: String,
}

impl Application {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }
}

impl From<&ApplicationConfig> for Application {
    fn from(config: &ApplicationConfig) -> Self {
        let key = config.key.clone().unwrap_or_else(|| config.name.clone());
        Self::new(config.name.clone(), key)
    }
}

/// One live backend instance.
///
/// Ordering is by host (lexicographic) and then port (numeric), which the
/// derive gives us from the field order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BackendEndpoint {
    pub host: String,
    pub port: u16,
}

impl BackendEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Validate a host literal and bring it to canonical form.
    ///
    /// Accepts an IP address (optionally bracketed) or a DNS hostname. IP
    /// addresses are re-printed in their standard form and hostnames are
    /// lowercased, so two spellings of one address compare equal.
    pub fn canonical_host(host: &str) -> Result<String, &'static str> {
        let unbracketed = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if let Ok(ip) = unbracketed.parse::<IpAddr>() {
            return Ok(ip.to_string());
        }
        if unbracketed.len() != host.len() {
            return Err("brackets only enclose an IP address");
        }
        if is_hostname(host) {
            Ok(host.to_ascii_lowercase())
        } else {
            Err("host is not an IP address or hostname")
        }
    }

    /// The record line for this endpoint in a registry blob.
    pub fn to_record(&self) -> String {
        format!("{} {}", self.host, self.port)
    }
}

// RFC 1123 labels: 1-63 alphanumerics or hyphens, no leading/trailing hyphen.
fn is_hostname(host: &str) -> bool {
    let host = host.strip_suffix('.').unwrap_or(host);
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        })
}

impl fmt::Display for BackendEndpoint {
    /// Bracketed notation, valid for IPv4, IPv6 and hostnames alike.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.starts_with('[') && self.host.ends_with(']') {
            write!(f, "{}:{}", self.host, self.port)
        } else {
            write!(f, "[{}]:{}", self.host, self.port)
        }
    }
}

/// The canonical set of endpoints registered for one application.
///
/// Always materialized sorted and deduplicated, however it was built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrationSet {
    endpoints: Vec<BackendEndpoint>,
}

impl RegistrationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BackendEndpoint> {
        self.endpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn contains(&self, endpoint: &BackendEndpoint) -> bool {
        self.endpoints.binary_search(endpoint).is_ok()
    }

    /// Insert an endpoint, returning false if it was already registered.
    pub fn insert(&mut self, endpoint: BackendEndpoint) -> bool {
        match self.endpoints.binary_search(&endpoint) {
            Ok(_) => false,
            Err(pos) => {
                self.endpoints.insert(pos, endpoint);
                true
            }
        }
    }

    /// Remove an endpoint, returning false if it was not registered.
    pub fn remove(&mut self, endpoint: &BackendEndpoint) -> bool {
        match self.endpoints.binary_search(endpoint) {
            Ok(pos) => {
                self.endpoints.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// Serialize back to the registry blob format, one record per line.
    pub fn to_registry_text(&self) -> String {
        let mut out = String::new();
        for endpoint in &self.endpoints {
            out.push_str(&endpoint.to_record());
            out.push('\n');
        }
        out
    }
}

impl FromIterator<BackendEndpoint> for RegistrationSet {
    fn from_iter<I: IntoIterator<Item = BackendEndpoint>>(iter: I) -> Self {
        let unique: BTreeSet<BackendEndpoint> = iter.into_iter().collect();
        Self {
            endpoints: unique.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a RegistrationSet {
    type Item = &'a BackendEndpoint;
    type IntoIter = std::slice::Iter<'a, BackendEndpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.endpoints.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order_and_dedup() {
        let set: RegistrationSet = vec![
            BackendEndpoint::new("b", 2),
            BackendEndpoint::new("a", 1),
            BackendEndpoint::new("a", 1),
        ]
        .into_iter()
        .collect();

        let endpoints: Vec<_> = set.iter().cloned().collect();
        assert_eq!(
            endpoints,
            vec![BackendEndpoint::new("a", 1), BackendEndpoint::new("b", 2)]
        );
    }

    #[test]
    fn test_port_orders_numerically() {
        let set: RegistrationSet = vec![
            BackendEndpoint::new("10.0.0.1", 10000),
            BackendEndpoint::new("10.0.0.1", 9),
        ]
        .into_iter()
        .collect();

        let ports: Vec<u16> = set.iter().map(|e| e.port).collect();
        assert_eq!(ports, vec![9, 10000]);
    }

    #[test]
    fn test_insert_and_remove_keep_order() {
        let mut set = RegistrationSet::new();
        assert!(set.insert(BackendEndpoint::new("c", 1)));
        assert!(set.insert(BackendEndpoint::new("a", 1)));
        assert!(!set.insert(BackendEndpoint::new("a", 1)));
        assert_eq!(set.to_registry_text(), "a 1\nc 1\n");

        assert!(set.remove(&BackendEndpoint::new("a", 1)));
        assert!(!set.remove(&BackendEndpoint::new("a", 1)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_display_brackets() {
        assert_eq!(BackendEndpoint::new("10.0.0.1", 80).to_string(), "[10.0.0.1]:80");
        assert_eq!(BackendEndpoint::new("fd00::1", 80).to_string(), "[fd00::1]:80");
        assert_eq!(BackendEndpoint::new("[fd00::1]", 80).to_string(), "[fd00::1]:80");
    }

    #[test]
    fn test_canonical_host() {
        assert_eq!(BackendEndpoint::canonical_host("10.0.0.1").unwrap(), "10.0.0.1");
        assert_eq!(BackendEndpoint::canonical_host("[fd00::1]").unwrap(), "fd00::1");
        assert_eq!(BackendEndpoint::canonical_host("FD00:0:0::1").unwrap(), "fd00::1");
        assert_eq!(
            BackendEndpoint::canonical_host("Backend-1.Internal").unwrap(),
            "backend-1.internal"
        );

        for bad in ["evil;}", "[backend]", "-lead.example", "a..b", "", "fd00::1]", "x y"] {
            assert!(BackendEndpoint::canonical_host(bad).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_application_key_defaults_to_name() {
        let config = ApplicationConfig {
            name: "web".into(),
            key: None,
        };
        assert_eq!(Application::from(&config), Application::new("web", "web"));
    }
}
