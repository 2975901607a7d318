//! InvalidationPlanner — which cache entries must a filter-parameter change
//! drop?
//!
//! Multi-valued fields are expanded into the cartesian product of
//! one-scalar-per-field combinations; the combinations removed by the change
//! (`expand(old) − expand(new)`) determine the entries to drop. Combinations
//! present in both expansions are retained, so narrowing a filter never
//! flushes the whole cache.
//!
//! The expansion is exponential in the number of simultaneously multi-valued
//! fields. Beyond [`MAX_MULTI_VALUED_FIELDS`] the planner degrades to a
//! conservative per-field policy: drop any entry sharing a removed
//! single-field value.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::filter::Filter;

/// One single-valued combination of parameters.
pub type ParamCombo = BTreeMap<String, Value>;

/// Above this many simultaneously multi-valued fields, full enumeration is
/// abandoned for the conservative per-field policy.
pub const MAX_MULTI_VALUED_FIELDS: usize = 3;

/// The drop-decision computed from an `old → new` parameter change.
pub enum InvalidationPlan {
    /// Drop entries whose expansion intersects these removed combinations.
    Exact { removed: Vec<ParamCombo> },
    /// Drop entries carrying any of these removed `(field, value)` pairs.
    Conservative { removed_values: Vec<(String, Value)> },
}

/// Expand array-valued fields into the cartesian product of one-scalar-per-
/// field combinations. An empty array yields zero combinations.
pub fn recombine_to_single_valued(params: &Filter) -> Vec<ParamCombo> {
    let mut combos: Vec<ParamCombo> = vec![ParamCombo::new()];
    for (key, value) in params.iter() {
        let alternatives = value.alternatives();
        let mut next = Vec::with_capacity(combos.len() * alternatives.len().max(1));
        for combo in &combos {
            for alt in &alternatives {
                let mut c = combo.clone();
                c.insert(key.clone(), (*alt).clone());
                next.push(c);
            }
        }
        combos = next;
    }
    combos
}

/// Compute the plan for a channel parameter change `old → new`.
pub fn plan(old: &Filter, new: &Filter) -> InvalidationPlan {
    let width = old.multi_valued_fields().max(new.multi_valued_fields());
    if width > MAX_MULTI_VALUED_FIELDS {
        return InvalidationPlan::Conservative {
            removed_values: removed_single_field_values(old, new),
        };
    }

    let new_combos = recombine_to_single_valued(new);
    let removed = recombine_to_single_valued(old)
        .into_iter()
        .filter(|combo| !new_combos.contains(combo))
        .collect();
    InvalidationPlan::Exact { removed }
}

/// Whether a cache entry keyed by `entry_params` must be dropped under `plan`.
pub fn affects(plan: &InvalidationPlan, entry_params: &Filter) -> bool {
    match plan {
        InvalidationPlan::Exact { removed } => {
            if removed.is_empty() {
                return false;
            }
            recombine_to_single_valued(entry_params)
                .iter()
                .any(|combo| removed.contains(combo))
        }
        InvalidationPlan::Conservative { removed_values } => {
            entry_params.iter().any(|(key, value)| {
                value.alternatives().iter().any(|alt| {
                    removed_values
                        .iter()
                        .any(|(rk, rv)| rk == key && rv == *alt)
                })
            })
        }
    }
}

/// Per-field set difference `values(old) − values(new)`.
fn removed_single_field_values(old: &Filter, new: &Filter) -> Vec<(String, Value)> {
    let mut removed = Vec::new();
    for (key, value) in old.iter() {
        let kept: Vec<&Value> = match new.get(key) {
            Some(v) => v.alternatives(),
            None => Vec::new(),
        };
        for alt in value.alternatives() {
            if !kept.iter().any(|k| *k == alt) {
                removed.push((key.clone(), alt.clone()));
            }
        }
    }
    removed
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterValue;
    use serde_json::json;

    fn multi(key: &str, values: &[&str]) -> (String, FilterValue) {
        (
            key.to_string(),
            FilterValue::Many(values.iter().map(|v| json!(v)).collect()),
        )
    }

    #[test]
    fn expansion_is_cartesian() {
        let params = Filter::new()
            .with("team", 1)
            .with("status", json!(["a", "b"]));
        let combos = recombine_to_single_valued(&params);
        assert_eq!(combos.len(), 2);
        assert!(combos.iter().any(|c| c["status"] == json!("a")));
        assert!(combos.iter().any(|c| c["status"] == json!("b")));
        assert!(combos.iter().all(|c| c["team"] == json!(1)));
    }

    #[test]
    fn empty_array_yields_no_combinations() {
        let params = Filter::new().with("status", json!([]));
        assert!(recombine_to_single_valued(&params).is_empty());
    }

    #[test]
    fn worked_example_from_narrowing() {
        // old={team:1, status:[a,b]}, new={team:1, status:[b]}
        let old = Filter::new().with("team", 1).with("status", json!(["a", "b"]));
        let new = Filter::new().with("team", 1).with("status", json!(["b"]));
        let plan = plan(&old, &new);

        let dropped = Filter::new().with("team", 1).with("status", "a");
        let kept = Filter::new().with("team", 1).with("status", "b");
        assert!(affects(&plan, &dropped));
        assert!(!affects(&plan, &kept));
    }

    #[test]
    fn unchanged_params_affect_nothing() {
        let params = Filter::new().with("status", json!(["a", "b"]));
        let plan = plan(&params, &params.clone());
        assert!(!affects(&plan, &Filter::new().with("status", "a")));
        assert!(!affects(&plan, &Filter::new().with("status", "b")));
    }

    #[test]
    fn wide_filters_degrade_to_conservative_policy() {
        let mut old_fields = vec![multi("a", &["1", "2"]), multi("b", &["1", "2"])];
        old_fields.push(multi("c", &["1", "2"]));
        old_fields.push(multi("d", &["1", "2"]));
        let old: Filter = old_fields.into_iter().collect();

        // Narrow field "a" only.
        let new_fields = vec![
            multi("a", &["1"]),
            multi("b", &["1", "2"]),
            multi("c", &["1", "2"]),
            multi("d", &["1", "2"]),
        ];
        let new: Filter = new_fields.into_iter().collect();

        let plan = plan(&old, &new);
        assert!(matches!(plan, InvalidationPlan::Conservative { .. }));
        // Any entry touching the removed value a=2 is dropped.
        assert!(affects(&plan, &Filter::new().with("a", "2").with("b", "1")));
        // Entries touching only surviving values are kept.
        assert!(!affects(&plan, &Filter::new().with("a", "1").with("b", "2")));
    }
}
