//! Argument Validators
//!
//! Pure checks run before any network call. Every validator fails fast on the
//! first violation, in this order:
//! 1. missing argument
//! 2. wrong top-level type (must be a plain object)
//! 3. empty object
//! 4. too many keys
//! 5. unknown key
//! 6. wrong value type for a known key
//! 7. value outside the allowed set for that key

pub mod error;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use error::{ValidationError, ValidationResult, ValueKind};

use crate::service::Scope;

/// Values a key may take beyond its type
#[derive(Debug, Clone, Copy)]
pub enum Allowed {
    Any,
    Numbers(&'static [i64]),
    Strings(&'static [&'static str]),
}

impl Allowed {
    fn permits(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Any, _) => true,
            (Self::Numbers(set), Value::Number(n)) => n
                .as_f64()
                .map(|n| set.iter().any(|allowed| *allowed as f64 == n))
                .unwrap_or(false),
            (Self::Strings(set), Value::String(s)) => set.contains(&s.as_str()),
            _ => false,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Any => "any".to_string(),
            Self::Numbers(set) => set
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            Self::Strings(set) => set.join(", "),
        }
    }
}

/// Rule for a single recognised key
#[derive(Debug, Clone, Copy)]
pub struct KeyRule {
    pub key: &'static str,
    pub kind: ValueKind,
    pub allowed: Allowed,
}

impl KeyRule {
    pub const fn new(key: &'static str, kind: ValueKind) -> Self {
        Self {
            key,
            kind,
            allowed: Allowed::Any,
        }
    }

    pub const fn one_of(key: &'static str, kind: ValueKind, allowed: Allowed) -> Self {
        Self { key, kind, allowed }
    }
}

/// A closed object contract: only the listed keys, with the listed types
#[derive(Debug, Clone, Copy)]
pub struct Contract {
    pub name: &'static str,
    pub rules: &'static [KeyRule],
}

impl Contract {
    /// Run the ordered checks and hand back the object on success
    pub fn check<'a>(&self, value: &'a Value) -> ValidationResult<&'a Map<String, Value>> {
        let object = match value {
            Value::Null => return Err(ValidationError::MissingArgument { name: self.name }),
            Value::Object(object) => object,
            other => {
                return Err(ValidationError::NotAnObject {
                    name: self.name,
                    found: ValueKind::of(other),
                })
            }
        };

        if object.is_empty() {
            return Err(ValidationError::EmptyObject { name: self.name });
        }

        if object.len() > self.rules.len() {
            return Err(ValidationError::TooManyKeys {
                name: self.name,
                max: self.rules.len(),
                found: object.len(),
            });
        }

        if let Some(key) = object.keys().find(|key| self.rule(key).is_none()) {
            return Err(ValidationError::UnknownKey {
                name: self.name,
                key: key.clone(),
            });
        }

        for (key, value) in object {
            let Some(rule) = self.rule(key) else { continue };
            let found = ValueKind::of(value);
            if found != rule.kind {
                return Err(ValidationError::WrongType {
                    key: key.clone(),
                    expected: rule.kind,
                    found,
                });
            }
        }

        for (key, value) in object {
            let Some(rule) = self.rule(key) else { continue };
            if !rule.allowed.permits(value) {
                return Err(ValidationError::NotAllowed {
                    key: key.clone(),
                    value: value.to_string(),
                    allowed: rule.allowed.describe(),
                });
            }
        }

        Ok(object)
    }

    fn rule(&self, key: &str) -> Option<&KeyRule> {
        self.rules.iter().find(|rule| rule.key == key)
    }
}

/// Recognised settings keys
pub const SETTINGS: Contract = Contract {
    name: "settings",
    rules: &[
        KeyRule::new("url", ValueKind::String),
        KeyRule::new("version", ValueKind::String),
        KeyRule::one_of("debug", ValueKind::Number, Allowed::Numbers(&[0, 1, 2])),
        KeyRule::new("maxTries", ValueKind::Number),
        KeyRule::new("connectionTimeout", ValueKind::Number),
        KeyRule::new("respondDirect", ValueKind::Boolean),
        KeyRule::one_of(
            "environment",
            ValueKind::String,
            Allowed::Strings(&["development", "production", "test"]),
        ),
        KeyRule::one_of(
            "context",
            ValueKind::String,
            Allowed::Strings(&["headless", "browser"]),
        ),
        KeyRule::new("probeInterval", ValueKind::Number),
    ],
};

/// Authentication details contract
pub const AUTH_DETAILS: Contract = Contract {
    name: "authDetails",
    rules: &[
        KeyRule::new("key", ValueKind::String),
        KeyRule::new("secret", ValueKind::String),
    ],
};

/// Per-call query options contract
pub const QUERY_OPTIONS: Contract = Contract {
    name: "options",
    rules: &[
        KeyRule::new("limit", ValueKind::Number),
        KeyRule::new("skip", ValueKind::Number),
        KeyRule::new("respondDirect", ValueKind::Boolean),
    ],
};

/// API credentials used for the `local` login strategy
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthDetails {
    pub key: String,
    pub secret: String,
}

impl AuthDetails {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for AuthDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthDetails")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Per-call overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub respond_direct: Option<bool>,
}

impl QueryOptions {
    /// Merge paging options into a service query as `$limit` / `$skip`
    pub fn apply_to_query(&self, query: Option<Value>) -> Option<Value> {
        if self.limit.is_none() && self.skip.is_none() {
            return query;
        }

        let mut object = match query {
            Some(Value::Object(object)) => object,
            _ => Map::new(),
        };
        if let Some(limit) = self.limit {
            object.insert("$limit".to_string(), Value::from(limit));
        }
        if let Some(skip) = self.skip {
            object.insert("$skip".to_string(), Value::from(skip));
        }
        Some(Value::Object(object))
    }
}

/// Black-box address format check, supplied by the application
pub trait AddressValidator: Send + Sync {
    fn validate(&self, address: &str, currency: &str, network: &str) -> bool;
}

impl<F> AddressValidator for F
where
    F: Fn(&str, &str, &str) -> bool + Send + Sync,
{
    fn validate(&self, address: &str, currency: &str, network: &str) -> bool {
        self(address, currency, network)
    }
}

/// Validate a settings object
pub fn validate_settings(settings: &Value) -> ValidationResult {
    SETTINGS.check(settings).map(|_| ())
}

/// Validate authentication details: exactly `{key, secret}`, both non-empty strings
pub fn validate_auth_details(details: &Value) -> ValidationResult<AuthDetails> {
    let object = AUTH_DETAILS.check(details)?;

    let field = |key: &'static str| -> ValidationResult<String> {
        match object.get(key).and_then(Value::as_str) {
            None => Err(ValidationError::MissingKey {
                name: AUTH_DETAILS.name,
                key,
            }),
            Some(value) if value.trim().is_empty() => Err(ValidationError::EmptyValue {
                key: key.to_string(),
            }),
            Some(value) => Ok(value.to_string()),
        }
    };

    Ok(AuthDetails {
        key: field("key")?,
        secret: field("secret")?,
    })
}

/// Validate per-call query options
pub fn validate_query_options(options: &Value) -> ValidationResult<QueryOptions> {
    let object = QUERY_OPTIONS.check(options)?;

    let count = |key: &str| -> ValidationResult<Option<u64>> {
        match object.get(key) {
            None => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or_else(|| ValidationError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected a non-negative integer, got {}", value),
            }),
        }
    };

    Ok(QueryOptions {
        limit: count("limit")?,
        skip: count("skip")?,
        respond_direct: object.get("respondDirect").and_then(Value::as_bool),
    })
}

/// Validate an address with the application-supplied format check
pub fn validate_address(
    validator: &dyn AddressValidator,
    address: &str,
    currency: &str,
    network: &str,
) -> ValidationResult {
    require_non_empty("address", address)?;
    require_non_empty("currency", currency)?;
    require_non_empty("network", network)?;

    if validator.validate(address, currency, network) {
        Ok(())
    } else {
        Err(ValidationError::InvalidAddress {
            address: address.to_string(),
            currency: currency.to_string(),
            network: network.to_string(),
        })
    }
}

/// Reject empty string arguments
pub fn require_non_empty(key: &str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        Err(ValidationError::EmptyValue {
            key: key.to_string(),
        })
    } else {
        Ok(())
    }
}

/// Validate a currency / network scope
pub fn validate_scope(scope: &Scope) -> ValidationResult {
    require_non_empty("currency", &scope.currency)?;
    if let Some(network) = &scope.network {
        require_non_empty("network", network)?;
    }
    Ok(())
}

/// A service query must be a plain object; an empty one is fine
pub fn validate_query(query: &Value) -> ValidationResult {
    match query {
        Value::Object(_) => Ok(()),
        Value::Null => Err(ValidationError::MissingArgument { name: "query" }),
        other => Err(ValidationError::NotAnObject {
            name: "query",
            found: ValueKind::of(other),
        }),
    }
}

/// Record payloads for create / update / patch must be non-empty plain objects
pub fn validate_data(data: &Value) -> ValidationResult {
    match data {
        Value::Null => Err(ValidationError::MissingArgument { name: "data" }),
        Value::Object(object) if object.is_empty() => {
            Err(ValidationError::EmptyObject { name: "data" })
        }
        Value::Object(_) => Ok(()),
        other => Err(ValidationError::NotAnObject {
            name: "data",
            found: ValueKind::of(other),
        }),
    }
}
