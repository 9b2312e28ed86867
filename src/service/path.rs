//! Remote resource paths
//!
//! - network-scoped: `/{version}/{currency}/{network}/{endpoint}`
//! - network-agnostic: `/{version}/{currency}/{endpoint}`

use serde::{Deserialize, Serialize};

/// Currency, and optionally network, a call is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

impl Scope {
    /// Network-scoped resource
    pub fn network(currency: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            network: Some(network.into()),
        }
    }

    /// Network-agnostic resource (network listing, rates)
    pub fn currency(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            network: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApiPath(String);

impl ApiPath {
    pub fn scoped(version: &str, currency: &str, network: &str, endpoint: &str) -> Self {
        Self(format!(
            "/{}/{}/{}/{}",
            segment(version),
            segment(currency),
            segment(network),
            segment(endpoint)
        ))
    }

    pub fn global(version: &str, currency: &str, endpoint: &str) -> Self {
        Self(format!(
            "/{}/{}/{}",
            segment(version),
            segment(currency),
            segment(endpoint)
        ))
    }

    pub fn for_scope(version: &str, scope: &Scope, endpoint: &str) -> Self {
        match &scope.network {
            Some(network) => Self::scoped(version, &scope.currency, network, endpoint),
            None => Self::global(version, &scope.currency, endpoint),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ApiPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ApiPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn segment(value: &str) -> &str {
    value.trim().trim_matches('/')
}
