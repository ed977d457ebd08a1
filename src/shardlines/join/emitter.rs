//! Phase 4: verify key equality on full rows and emit joined records.

use log::debug;

use crate::shardlines::store::ShardStore;
use crate::shardlines::values::{JsonObject, JsonValue};

use super::context::JoinContext;
use super::driver::ResolvedJoin;
use super::error::JoinResult;

const LEFT_SUFFIX: &str = "_l";
const RIGHT_SUFFIX: &str = "_r";

/// Consume the shipped join data: for every batch, load each listed local
/// lhs row and test it against every shipped rhs row. Hash agreement got
/// the pair here; only full key-tuple equality emits a row. The emitter is
/// the only writer to the output shard.
pub(crate) fn emit_joined(
    ctx: &mut JoinContext,
    lhs_store: &ShardStore,
    plan: &ResolvedJoin,
    output: &mut ShardStore,
) -> JoinResult<u64> {
    let batches = ctx.take_join_data();
    debug!(
        "phase 4 rank={}: emitting from {} join-data batches",
        lhs_store.rank(),
        batches.len()
    );

    let mut emitted = 0u64;
    for batch in batches {
        let rhs_rows = batch.payload.into_rows(output)?;
        for lhs_index in batch.lhs_indices {
            let lhs_row = lhs_store.at(lhs_index)?;
            for rhs_row in &rhs_rows {
                if !keys_equal(&lhs_row, &plan.left_on, rhs_row, &plan.right_on) {
                    continue;
                }
                let joined = join_records(&lhs_row, &plan.left_columns, rhs_row, &plan.right_columns);
                output.append_local(&joined)?;
                emitted += 1;
            }
        }
    }

    debug!("phase 4 rank={}: emitted {emitted} records", lhs_store.rank());
    Ok(emitted)
}

/// Deep value-by-value comparison of the two key tuples. An absent key
/// column reads as null, matching how the hasher treated it.
pub(crate) fn keys_equal(
    lhs: &JsonObject,
    left_on: &[String],
    rhs: &JsonObject,
    right_on: &[String],
) -> bool {
    left_on.iter().zip(right_on).all(|(left_col, right_col)| {
        let left_value = lhs.get(left_col).unwrap_or(&JsonValue::Null);
        let right_value = rhs.get(right_col).unwrap_or(&JsonValue::Null);
        left_value == right_value
    })
}

/// Build one output record: the lhs projection with `_l` appended to each
/// field name, then the rhs projection with `_r`.
pub(crate) fn join_records(
    lhs: &JsonObject,
    left_columns: &[String],
    rhs: &JsonObject,
    right_columns: &[String],
) -> JsonObject {
    let mut record = JsonObject::with_capacity(lhs.len() + rhs.len());
    append_fields(&mut record, lhs, left_columns, LEFT_SUFFIX);
    append_fields(&mut record, rhs, right_columns, RIGHT_SUFFIX);
    record
}

fn append_fields(record: &mut JsonObject, source: &JsonObject, projection: &[String], suffix: &str) {
    if projection.is_empty() {
        for (key, value) in source.iter() {
            record.insert(format!("{key}{suffix}"), value.clone());
        }
        return;
    }
    for key in projection {
        if let Some(value) = source.get(key) {
            record.insert(format!("{key}{suffix}"), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(text: &str) -> JsonObject {
        serde_json::from_str(text).unwrap()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn keys_compare_value_by_value() {
        let on = cols(&["k"]);
        assert!(keys_equal(
            &record(r#"{"k": 2, "a": "y"}"#),
            &on,
            &record(r#"{"k": 2, "b": 10}"#),
            &on
        ));
        // Same hash bucket is not enough: int vs double must not match.
        assert!(!keys_equal(
            &record(r#"{"k": 1}"#),
            &on,
            &record(r#"{"k": 1.0}"#),
            &on
        ));
    }

    #[test]
    fn missing_key_matches_null_and_missing() {
        let on = cols(&["k"]);
        assert!(keys_equal(
            &record(r#"{"a": "q"}"#),
            &on,
            &record(r#"{"k": null, "b": "r"}"#),
            &on
        ));
        assert!(keys_equal(
            &record(r#"{"a": "q"}"#),
            &on,
            &record(r#"{"a": "s"}"#),
            &on
        ));
        assert!(!keys_equal(
            &record(r#"{"k": 1}"#),
            &on,
            &record(r#"{"a": "s"}"#),
            &on
        ));
    }

    #[test]
    fn sides_may_join_on_differently_named_columns() {
        assert!(keys_equal(
            &record(r#"{"id": 7}"#),
            &cols(&["id"]),
            &record(r#"{"ref": 7}"#),
            &cols(&["ref"])
        ));
    }

    #[test]
    fn joined_record_suffixes_all_fields() {
        let joined = join_records(
            &record(r#"{"k": 2, "a": "y"}"#),
            &[],
            &record(r#"{"k": 2, "b": 10}"#),
            &[],
        );
        assert_eq!(joined, record(r#"{"k_l": 2, "a_l": "y", "k_r": 2, "b_r": 10}"#));
    }

    #[test]
    fn projections_drop_unlisted_fields_including_keys() {
        let joined = join_records(
            &record(r#"{"k": 1, "a": "x", "c": 9}"#),
            &cols(&["a"]),
            &record(r#"{"k": 1, "b": "y", "c": 8}"#),
            &cols(&["b"]),
        );
        assert_eq!(joined, record(r#"{"a_l": "x", "b_r": "y"}"#));
    }

    #[test]
    fn projected_fields_missing_from_the_row_are_skipped() {
        let joined = join_records(
            &record(r#"{"a": 1}"#),
            &cols(&["a", "ghost"]),
            &record(r#"{"b": 2}"#),
            &cols(&["b"]),
        );
        assert_eq!(joined, record(r#"{"a_l": 1, "b_r": 2}"#));
    }
}
