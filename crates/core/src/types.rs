//! Identifier newtypes
//!
//! `LogicalId` and `PhysicalId` both wrap a 128-bit UUID but occupy distinct
//! identifier spaces per §3 of the spec: a `Handle` is the only bridge
//! between them. Keeping them as separate types prevents a logical ID from
//! being passed where a physical blob key is expected, or vice versa.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_newtype {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                $name(id)
            }

            /// Borrow the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// The nil UUID, used as a sentinel for "not allocated".
            pub fn nil() -> Self {
                $name(Uuid::nil())
            }

            /// True if this is the nil sentinel.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                $name(id)
            }
        }
    };
}

uuid_newtype!(LogicalId, "Logical identifier of a registered Handle.");
uuid_newtype!(
    PhysicalId,
    "Physical identifier of a node or value blob, valid within one of a Handle's two shadow slots."
);
uuid_newtype!(TransactionId, "Identifier of an in-flight transaction.");
