//! Strongly typed identifiers.
//!
//! Newtype wrappers over UUIDs so that the different kinds of ids flowing
//! through the engine (operations, conflicts, batches, alerts) cannot be
//! swapped by accident at a call site.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Error type for ID parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The underlying UUID parse error message.
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to define a strongly-typed ID type.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID using UUID v4.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns a reference to the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        message: e.to_string(),
                    })
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Identifier for a tenant (organization) scoping users and resources.
    ///
    /// # Example
    ///
    /// ```
    /// use tasksync_core::TenantId;
    ///
    /// let tenant_id = TenantId::new();
    /// let parsed: TenantId = tenant_id.to_string().parse().unwrap();
    /// assert_eq!(tenant_id, parsed);
    /// ```
    TenantId
);

define_id!(
    /// Identifier for a user within a tenant.
    UserId
);

define_id!(
    /// Identifier for a tracked sync operation.
    OperationId
);

define_id!(
    /// Identifier for a detected conflict.
    ConflictId
);

define_id!(
    /// Identifier for a merged delta batch.
    BatchId
);

define_id!(
    /// Identifier for a raised health alert.
    AlertId
);

define_id!(
    /// Identifier for a queued recovery operation.
    RecoveryId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_creates_valid_uuid() {
        let id = OperationId::new();
        let parsed = Uuid::parse_str(&id.to_string());
        assert!(parsed.is_ok());
    }

    #[test]
    fn test_roundtrip_through_string() {
        let id = TenantId::new();
        let parsed: TenantId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let result = "not-a-uuid".parse::<ConflictId>();
        let err = result.unwrap_err();
        assert_eq!(err.id_type, "ConflictId");
    }

    #[test]
    fn test_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = BatchId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), &uuid);
    }

    #[test]
    fn test_serde_transparent() {
        let id = AlertId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: AlertId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
