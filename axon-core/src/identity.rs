//! Identity types for AXON entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ENTITY ID TYPE SYSTEM
// ============================================================================

/// Trait for type-safe entity IDs.
///
/// Each entity type gets its own newtype so step ids, flow ids and trace ids
/// cannot be swapped for one another at compile time.
pub trait EntityIdType:
    Copy
    + Clone
    + Eq
    + PartialEq
    + Hash
    + fmt::Debug
    + fmt::Display
    + FromStr
    + Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// The name of the entity type (e.g. "step", "flow").
    const ENTITY_NAME: &'static str;

    /// Create a new id from a UUID.
    fn new(uuid: Uuid) -> Self;

    /// Get the underlying UUID.
    fn as_uuid(&self) -> Uuid;

    /// Create a nil (all zeros) id.
    fn nil() -> Self {
        Self::new(Uuid::nil())
    }

    /// Create a new timestamp-sortable UUIDv7 id.
    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }

    /// Create a new random UUIDv4 id.
    fn new_v4() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// Create a deterministic name-based UUIDv5 id.
    ///
    /// Used where repeated compiles of identical input must produce
    /// byte-identical ids (the IR generator's step ids, in particular).
    fn from_name(namespace: &Uuid, name: &str) -> Self {
        Self::new(Uuid::new_v5(namespace, name.as_bytes()))
    }
}

/// Error type for parsing entity ids from strings.
#[derive(Debug, Clone)]
pub struct EntityIdParseError {
    pub entity_name: &'static str,
    pub input: String,
    pub source: uuid::Error,
}

impl fmt::Display for EntityIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to parse {} id from '{}': {}",
            self.entity_name, self.input, self.source
        )
    }
}

impl std::error::Error for EntityIdParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

macro_rules! define_entity_id {
    ($name:ident, $entity:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            const ENTITY_NAME: &'static str = $entity;

            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = EntityIdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(s)
                    .map(Self::new)
                    .map_err(|e| EntityIdParseError {
                        entity_name: Self::ENTITY_NAME,
                        input: s.to_string(),
                        source: e,
                    })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::nil()
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                self.0.serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                Uuid::deserialize(deserializer).map(Self::new)
            }
        }
    };
}

define_entity_id!(ProgramId, "program", "Type-safe id for a compiled AXON program.");
define_entity_id!(FlowId, "flow", "Type-safe id for a flow declaration.");
define_entity_id!(StepId, "step", "Type-safe id for an IR step.");
define_entity_id!(TraceId, "trace", "Type-safe id for a single execution trace.");
define_entity_id!(SpanId, "span", "Type-safe id for a trace span (flow, step, retry attempt or tool call).");

/// Namespace UUID used for all name-based (v5) AXON ids.
///
/// Fixed so that ids derived from identical input are identical across
/// processes and across runs, not merely within one process.
pub const AXON_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0xa1, 0x70, 0x9c, 0x00, 0x6d, 0x0e, 0x5a, 0xe0, 0x9b, 0xfe, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55,
]);

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn entity_ids_do_not_collide_across_types() {
        let step = StepId::now_v7();
        let flow = FlowId::now_v7();
        assert_ne!(step.as_uuid(), flow.as_uuid());
    }

    #[test]
    fn entity_id_display_and_debug() {
        let id = StepId::new(Uuid::nil());
        assert_eq!(format!("{:?}", id), "StepId(00000000-0000-0000-0000-000000000000)");
        assert_eq!(format!("{}", id), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn entity_id_from_name_is_deterministic() {
        let a = StepId::from_name(&AXON_ID_NAMESPACE, "F::0");
        let b = StepId::from_name(&AXON_ID_NAMESPACE, "F::0");
        let c = StepId::from_name(&AXON_ID_NAMESPACE, "F::1");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn entity_id_serde_round_trip() {
        let id = StepId::now_v7();
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.starts_with('"'));
        let back: StepId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn entity_id_parse_error_names_entity() {
        let result: Result<StepId, _> = "not-a-uuid".parse();
        let err = result.unwrap_err();
        assert_eq!(err.entity_name, "step");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Display followed by FromStr, and serialize followed by
        /// deserialize, both recover the exact id for any underlying UUID.
        #[test]
        fn prop_entity_id_round_trips_through_display_and_serde(bytes in any::<[u8; 16]>()) {
            let id = StepId::new(Uuid::from_bytes(bytes));

            let via_display: StepId = id.to_string().parse().unwrap();
            prop_assert_eq!(id, via_display);

            let json = serde_json::to_string(&id).unwrap();
            let via_serde: StepId = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(id, via_serde);
        }

        /// `from_name` is a pure function of (namespace, name): calling it
        /// twice on the same name always produces the same id.
        #[test]
        fn prop_from_name_is_deterministic_for_any_name(name in "[a-zA-Z0-9_:]{1,40}") {
            let a = StepId::from_name(&AXON_ID_NAMESPACE, &name);
            let b = StepId::from_name(&AXON_ID_NAMESPACE, &name);
            prop_assert_eq!(a, b);
        }
    }
}
