use std::sync::Arc;

use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Canonical alphabet for generated string identifiers (no ambiguous glyphs).
const ENTITY_ID_ALPHABET: &[char] = &[
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'J', 'K', 'L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y',
    'Z', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'j', 'm', 'n', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];
/// Default generated string id length.
const ENTITY_ID_LENGTH: usize = 20;

/// Prefix marking a client-side placeholder for string identities (`"new:1"`).
pub const FAKE_STRING_PREFIX: &str = "new:";

/// Generates a new string identifier using the configured alphabet and length.
pub fn generate_entity_id() -> String {
    nanoid!(ENTITY_ID_LENGTH, ENTITY_ID_ALPHABET)
}

/// Storage type of an entity identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    /// Store generated, counting up from 1. Zero and negative values are placeholders.
    #[default]
    Int,
    /// Store generated nanoid. Empty strings and `new:` prefixed values are placeholders.
    String,
    /// Store generated v4 uuid. Uuids whose first eight bytes are zero are placeholders.
    Uuid,
}

impl IdKind {
    /// Default placeholder test for this identity type.
    pub fn is_fake(self, id: &Value) -> bool {
        match self {
            Self::Int => id.as_i64().is_some_and(|n| n <= 0),
            Self::String => id
                .as_str()
                .is_some_and(|s| s.is_empty() || s.starts_with(FAKE_STRING_PREFIX)),
            Self::Uuid => id
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .is_some_and(|uuid| uuid.as_bytes()[..8].iter().all(|byte| *byte == 0)),
        }
    }

    /// Returns true when `id` has the JSON shape this identity type expects.
    pub fn accepts(self, id: &Value) -> bool {
        match self {
            Self::Int => id.as_i64().is_some(),
            Self::String => id.is_string(),
            Self::Uuid => id.as_str().is_some_and(|s| Uuid::parse_str(s).is_ok()),
        }
    }

    /// Produces a fresh store-side identity. `sequence` is only consulted for integer ids.
    pub fn generate(self, sequence: i64) -> Value {
        match self {
            Self::Int => Value::from(sequence),
            Self::String => Value::String(generate_entity_id()),
            Self::Uuid => Value::String(Uuid::new_v4().to_string()),
        }
    }
}

/// Predicate deciding whether a client id denotes an entity that does not exist yet.
pub type FakeIdPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Wraps [`IdKind::is_fake`] into a predicate value.
pub fn default_fake_predicate(kind: IdKind) -> FakeIdPredicate {
    Arc::new(move |id| kind.is_fake(id))
}

/// Canonical string form of an id, used for map keys and error messages.
///
/// Uuids compare as values: any accepted spelling maps to the lower-case
/// hyphenated form.
pub fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => match Uuid::parse_str(s) {
            Ok(uuid) => uuid.hyphenated().to_string(),
            Err(_) => s.clone(),
        },
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
