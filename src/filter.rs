//! Filter — server-scoping parameter set and the membership predicate.
//!
//! A filter maps field names to a scalar or an array of scalars (array =
//! logical OR). The reserved key `"except"` negates equality against the
//! item's primary key. The same predicate serves both the defensive
//! server-filter recheck and the authoritative local-filter check.

use std::collections::btree_map;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Resource;

/// Reserved key: matches every item except the one with this primary key.
pub const EXCEPT_KEY: &str = "except";

/// Reserved key used by [`Filter::match_nothing`]. A filter carrying it
/// matches no item; it is sent as a neutralizing parameter change before a
/// channel is torn down.
pub const MATCH_NOTHING_KEY: &str = "__match_nothing__";

/// A filter value: one scalar, or several combined with logical OR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Many(Vec<Value>),
    One(Value),
}

impl FilterValue {
    /// The value as a slice of alternatives (a scalar is one alternative).
    pub fn alternatives(&self) -> Vec<&Value> {
        match self {
            FilterValue::One(v) => vec![v],
            FilterValue::Many(vs) => vs.iter().collect(),
        }
    }

    /// Whether this value carries more than one alternative.
    pub fn is_multi_valued(&self) -> bool {
        matches!(self, FilterValue::Many(vs) if vs.len() > 1)
    }
}

impl From<Value> for FilterValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Array(vs) => FilterValue::Many(vs),
            other => FilterValue::One(other),
        }
    }
}

/// Ordered field-name → value mapping. Deep equality is `PartialEq`;
/// ordering is stable so two equal filters always serialize identically.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(BTreeMap<String, FilterValue>);

impl Filter {
    /// The empty filter — matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// The neutralizing filter — matches nothing.
    pub fn match_nothing() -> Self {
        let mut f = Self::new();
        f.0.insert(MATCH_NOTHING_KEY.to_string(), FilterValue::One(Value::Bool(true)));
        f
    }

    pub fn is_match_nothing(&self) -> bool {
        self.0.contains_key(MATCH_NOTHING_KEY)
    }

    /// Builder-style: set `key` to a scalar (or array, taken as OR).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), FilterValue::from(value.into()));
        self
    }

    /// Builder-style: exclude the item with this primary key.
    pub fn except(self, primary_key: impl Into<String>) -> Self {
        self.with(EXCEPT_KEY, Value::String(primary_key.into()))
    }

    pub fn get(&self, key: &str) -> Option<&FilterValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, FilterValue> {
        self.0.iter()
    }

    /// True iff `item` satisfies every key of this filter.
    ///
    /// - `"except"` → the item's primary key must differ from the value.
    /// - scalar → the item field must equal it.
    /// - array → the item field must be contained in it.
    /// - an absent item field never matches (except for the empty filter).
    pub fn matches<I: Resource>(&self, item: &I) -> bool {
        for (key, value) in &self.0 {
            if key == MATCH_NOTHING_KEY {
                return false;
            }
            if key == EXCEPT_KEY {
                let pk = Value::String(item.primary_key());
                if value.alternatives().iter().any(|v| **v == pk) {
                    return false;
                }
                continue;
            }
            let field = match item.field(key) {
                Some(v) => v,
                None => return false,
            };
            if !value.alternatives().iter().any(|v| **v == field) {
                return false;
            }
        }
        true
    }

    /// Number of fields carrying more than one alternative.
    pub fn multi_valued_fields(&self) -> usize {
        self.0.values().filter(|v| v.is_multi_valued()).count()
    }
}

impl FromIterator<(String, FilterValue)> for Filter {
    fn from_iter<T: IntoIterator<Item = (String, FilterValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
