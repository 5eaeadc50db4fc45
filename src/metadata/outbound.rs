use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConnectorPoolError;

/// Element names of an `outbound-resourceadapter` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboundTag {
    Unknown,
    ConnectionDefinition,
    TransactionSupport,
    AuthenticationMechanism,
    ReauthenticationSupport,
}

impl OutboundTag {
    #[must_use]
    pub fn local_name(self) -> Option<&'static str> {
        match self {
            OutboundTag::Unknown => None,
            OutboundTag::ConnectionDefinition => Some("connection-definition"),
            OutboundTag::TransactionSupport => Some("transaction-support"),
            OutboundTag::AuthenticationMechanism => Some("authentication-mechanism"),
            OutboundTag::ReauthenticationSupport => Some("reauthentication-support"),
        }
    }

    #[must_use]
    pub fn for_name(local_name: &str) -> Self {
        match local_name {
            "connection-definition" => OutboundTag::ConnectionDefinition,
            "transaction-support" => OutboundTag::TransactionSupport,
            "authentication-mechanism" => OutboundTag::AuthenticationMechanism,
            "reauthentication-support" => OutboundTag::ReauthenticationSupport,
            _ => OutboundTag::Unknown,
        }
    }
}

impl fmt::Display for OutboundTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.local_name().unwrap_or(""))
    }
}

/// Attribute names of an `outbound-resourceadapter` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboundAttribute {
    Id,
}

impl OutboundAttribute {
    #[must_use]
    pub fn local_name(self) -> &'static str {
        match self {
            OutboundAttribute::Id => "id",
        }
    }
}

/// Level of transaction participation an adapter declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionSupport {
    NoTransaction,
    LocalTransaction,
    XaTransaction,
}

impl TransactionSupport {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionSupport::NoTransaction => "NoTransaction",
            TransactionSupport::LocalTransaction => "LocalTransaction",
            TransactionSupport::XaTransaction => "XATransaction",
        }
    }

    #[must_use]
    pub fn for_name(name: &str) -> Option<Self> {
        match name.trim() {
            "NoTransaction" => Some(TransactionSupport::NoTransaction),
            "LocalTransaction" => Some(TransactionSupport::LocalTransaction),
            "XATransaction" => Some(TransactionSupport::XaTransaction),
            _ => None,
        }
    }

    /// Whether connections of this kind take part in two-phase commit and so
    /// need a crash-recovery unit.
    #[must_use]
    pub fn needs_recovery(self) -> bool {
        matches!(self, TransactionSupport::XaTransaction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDefinition {
    pub id: Option<String>,
    pub managed_connection_factory_class: String,
    pub connection_factory_interface: String,
    pub connection_interface: String,
}

impl ConnectionDefinition {
    fn is_valid(&self) -> bool {
        !self.managed_connection_factory_class.trim().is_empty()
            && !self.connection_factory_interface.trim().is_empty()
            && !self.connection_interface.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationMechanism {
    pub mechanism_type: String,
    pub credential_interface: String,
}

/// Outbound side of a resource adapter, as produced by a descriptor reader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundResourceAdapter {
    pub id: Option<String>,
    pub connection_definitions: Vec<ConnectionDefinition>,
    pub transaction_support: Option<TransactionSupport>,
    pub authentication_mechanisms: Vec<AuthenticationMechanism>,
    pub reauthentication_support: bool,
}

impl OutboundResourceAdapter {
    /// Effective transaction support; an adapter that declares nothing is
    /// treated as non-transactional.
    #[must_use]
    pub fn transaction_support(&self) -> TransactionSupport {
        self.transaction_support
            .unwrap_or(TransactionSupport::NoTransaction)
    }

    /// True when the adapter has at least one connection definition and every
    /// definition names its classes.
    #[must_use]
    pub fn validation_as_boolean(&self) -> bool {
        !self.connection_definitions.is_empty()
            && self.connection_definitions.iter().all(ConnectionDefinition::is_valid)
    }

    /// Merge `other` into a copy of `self`. Values already present on `self`
    /// win; lists are unioned.
    ///
    /// # Errors
    /// Returns `ConnectorPoolError::ValidationError` when both sides carry
    /// different ids or different transaction support levels.
    pub fn merge(&self, other: &OutboundResourceAdapter) -> Result<Self, ConnectorPoolError> {
        let id = match (&self.id, &other.id) {
            (Some(a), Some(b)) if a != b => {
                return Err(ConnectorPoolError::ValidationError(format!(
                    "cannot merge outbound adapters with ids {a} and {b}"
                )));
            }
            (Some(a), _) => Some(a.clone()),
            (None, b) => b.clone(),
        };

        let transaction_support = match (self.transaction_support, other.transaction_support) {
            (Some(a), Some(b)) if a != b => {
                return Err(ConnectorPoolError::ValidationError(format!(
                    "conflicting {}: {} vs {}",
                    OutboundTag::TransactionSupport,
                    a.as_str(),
                    b.as_str()
                )));
            }
            (a, b) => a.or(b),
        };

        let mut connection_definitions = self.connection_definitions.clone();
        for def in &other.connection_definitions {
            let known = connection_definitions.iter().any(|existing| {
                existing.managed_connection_factory_class == def.managed_connection_factory_class
            });
            if !known {
                connection_definitions.push(def.clone());
            }
        }

        let mut authentication_mechanisms = self.authentication_mechanisms.clone();
        for mechanism in &other.authentication_mechanisms {
            if !authentication_mechanisms.contains(mechanism) {
                authentication_mechanisms.push(mechanism.clone());
            }
        }

        Ok(Self {
            id,
            connection_definitions,
            transaction_support,
            authentication_mechanisms,
            reauthentication_support: self.reauthentication_support
                || other.reauthentication_support,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(mcf: &str) -> ConnectionDefinition {
        ConnectionDefinition {
            id: None,
            managed_connection_factory_class: mcf.into(),
            connection_factory_interface: "javax.resource.cci.ConnectionFactory".into(),
            connection_interface: "javax.resource.cci.Connection".into(),
        }
    }

    #[test]
    fn tags_map_unknown_names_to_unknown() {
        assert_eq!(
            OutboundTag::for_name("transaction-support"),
            OutboundTag::TransactionSupport
        );
        assert_eq!(OutboundTag::for_name("bogus"), OutboundTag::Unknown);
        assert_eq!(OutboundAttribute::Id.local_name(), "id");
        assert_eq!(
            TransactionSupport::for_name("XATransaction"),
            Some(TransactionSupport::XaTransaction)
        );
        assert_eq!(TransactionSupport::for_name("Sometimes"), None);
    }

    #[test]
    fn validation_requires_complete_definitions() {
        let mut adapter = OutboundResourceAdapter::default();
        assert!(!adapter.validation_as_boolean());

        adapter.connection_definitions.push(definition("org.example.Mcf"));
        assert!(adapter.validation_as_boolean());

        adapter.connection_definitions.push(definition("  "));
        assert!(!adapter.validation_as_boolean());
    }

    #[test]
    fn merge_unions_and_prefers_self() {
        let left = OutboundResourceAdapter {
            id: Some("ra".into()),
            connection_definitions: vec![definition("a.Mcf")],
            transaction_support: None,
            authentication_mechanisms: vec![],
            reauthentication_support: false,
        };
        let right = OutboundResourceAdapter {
            id: None,
            connection_definitions: vec![definition("a.Mcf"), definition("b.Mcf")],
            transaction_support: Some(TransactionSupport::XaTransaction),
            authentication_mechanisms: vec![AuthenticationMechanism {
                mechanism_type: "BasicPassword".into(),
                credential_interface: "javax.resource.spi.security.PasswordCredential".into(),
            }],
            reauthentication_support: true,
        };

        let merged = left.merge(&right).unwrap();
        assert_eq!(merged.id.as_deref(), Some("ra"));
        assert_eq!(merged.connection_definitions.len(), 2);
        assert_eq!(merged.transaction_support(), TransactionSupport::XaTransaction);
        assert_eq!(merged.authentication_mechanisms.len(), 1);
        assert!(merged.reauthentication_support);
    }

    #[test]
    fn merge_rejects_conflicts() {
        let left = OutboundResourceAdapter {
            transaction_support: Some(TransactionSupport::LocalTransaction),
            ..Default::default()
        };
        let right = OutboundResourceAdapter {
            transaction_support: Some(TransactionSupport::XaTransaction),
            ..Default::default()
        };
        assert!(left.merge(&right).is_err());
    }
}
