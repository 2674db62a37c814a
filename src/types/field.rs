//! Three-state optional field
//!
//! The metering wire format distinguishes a field the provider did not report
//! (omitted from the JSON object) from a field that has no meaning for the
//! operation (explicit `null`). `Option<T>` cannot carry both, so payload
//! slots that need the distinction use [`Field`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A payload slot that is either unreported, inapplicable, or set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Field<T> {
    /// The provider did not report a value it could have reported.
    /// Omitted from serialized output.
    #[default]
    Absent,
    /// The concept does not apply to this operation. Serialized as `null`.
    Null,
    Value(T),
}

impl<T> Field<T> {
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Field<U> {
        match self {
            Self::Absent => Field::Absent,
            Self::Null => Field::Null,
            Self::Value(v) => Field::Value(f(v)),
        }
    }

    /// Keep `self` unless it is absent, in which case use `other`.
    pub fn or(self, other: Field<T>) -> Field<T> {
        match self {
            Self::Absent => other,
            set => set,
        }
    }
}

impl<T> From<Option<T>> for Field<T> {
    /// `None` maps to [`Field::Absent`]: an unreported value, not an
    /// inapplicable one.
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Absent, Self::Value)
    }
}

impl<T: Serialize> Serialize for Field<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // Only reachable when the containing struct forgot
            // `skip_serializing_if = "Field::is_absent"`.
            Self::Absent | Self::Null => serializer.serialize_none(),
            Self::Value(v) => serializer.serialize_some(v),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Field<T> {
    /// Present keys decode to `Null` or `Value`; missing keys rely on
    /// `#[serde(default)]` to become `Absent`.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(|opt| opt.map_or(Self::Null, Self::Value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Slot {
        #[serde(default, skip_serializing_if = "Field::is_absent")]
        count: Field<u64>,
    }

    #[test]
    fn absent_is_omitted_and_null_is_explicit() {
        let absent = serde_json::to_value(Slot { count: Field::Absent }).unwrap();
        let null = serde_json::to_value(Slot { count: Field::Null }).unwrap();
        let set = serde_json::to_value(Slot { count: Field::Value(3) }).unwrap();

        assert_eq!(absent, json!({}));
        assert_eq!(null, json!({"count": null}));
        assert_eq!(set, json!({"count": 3}));
    }

    #[test]
    fn both_missing_states_survive_decoding() {
        let absent: Slot = serde_json::from_value(json!({})).unwrap();
        let null: Slot = serde_json::from_value(json!({"count": null})).unwrap();
        assert_eq!(absent.count, Field::Absent);
        assert_eq!(null.count, Field::Null);
    }

    #[test]
    fn or_only_replaces_absent() {
        assert_eq!(Field::<u64>::Absent.or(Field::Value(1)), Field::Value(1));
        assert_eq!(Field::<u64>::Null.or(Field::Value(1)), Field::Null);
        assert_eq!(Field::from(None::<u64>), Field::Absent);
    }
}
