//! Strongly-typed identifiers used across the workspace.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Identifier of a tenant (one customer organization).
///
/// Every piece of scheduling, cache and dedupe state is partitioned by this value.
/// The nil UUID is never a valid tenant: parsing it fails so that a request that
/// lost its tenant cannot end up addressing a shared "zero" partition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Uuid", into = "Uuid")]
pub struct TenantId(Uuid);

/// Identifier of one execution of a polling job (the Execution Lock token).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(Uuid);

/// Identity of one live timer instance.
///
/// A replaced timer always gets a fresh id, so callers can tell "same timer" from
/// "same configuration".
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> DomainResult<Self> {
                let uuid = Uuid::from_str(s.trim())
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Self::try_from(uuid)
            }
        }
    };
}

impl_uuid_newtype!(TenantId, "TenantId");
impl_uuid_newtype!(ExecutionId, "ExecutionId");
impl_uuid_newtype!(TimerId, "TimerId");

impl TryFrom<Uuid> for TenantId {
    type Error = DomainError;

    fn try_from(value: Uuid) -> DomainResult<Self> {
        if value.is_nil() {
            return Err(DomainError::invalid_id("TenantId: nil uuid is not a tenant"));
        }
        Ok(Self(value))
    }
}

impl TryFrom<Uuid> for ExecutionId {
    type Error = DomainError;

    fn try_from(value: Uuid) -> DomainResult<Self> {
        Ok(Self(value))
    }
}

impl TryFrom<Uuid> for TimerId {
    type Error = DomainError;

    fn try_from(value: Uuid) -> DomainResult<Self> {
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_round_trips_through_display() {
        let id = TenantId::new();
        let parsed: TenantId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn nil_tenant_is_refused() {
        let err = Uuid::nil().to_string().parse::<TenantId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(_)));
    }

    #[test]
    fn garbage_tenant_is_refused() {
        assert!("".parse::<TenantId>().is_err());
        assert!("not-a-tenant".parse::<TenantId>().is_err());
    }

    #[test]
    fn nil_tenant_is_refused_by_serde() {
        let json = format!("\"{}\"", Uuid::nil());
        assert!(serde_json::from_str::<TenantId>(&json).is_err());

        let id = TenantId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(serde_json::from_str::<TenantId>(&json).unwrap(), id);
    }
}
