use ahash::{AHashMap, RandomState};
use dashmap::DashMap;
use rayon::prelude::*;
use tracing::{info, instrument};

use crate::error::{FlowError, Result};
use crate::record::{AttributeKey, FlowRow, FlowTable, Record};

// ─────────────────────────────────────────────────────────────
//  Group records by their full attribute tuple and count them
// ─────────────────────────────────────────────────────────────
//
// The `id` and the discriminator never take part in the key: two records
// fall in the same group iff every categorical attribute is equal, with
// null equal to null. An attribute a record does not carry at all counts
// as null, so records from different sources still group together.

/// Union of the attribute names seen across `records`, in first-seen order.
pub fn schema_of(records: &[Record]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for rec in records {
        for name in rec.attributes.keys() {
            if !names.iter().any(|n| n == name) {
                names.push(name.clone());
            }
        }
    }
    names
}

fn key_for(record: &Record, schema: &[String]) -> AttributeKey {
    schema
        .iter()
        .map(|name| {
            let value = record.attributes.get(name).cloned().flatten();
            (name.clone(), value)
        })
        .collect()
}

/// Single pass grouping. Rows come out in the order their group was first seen.
pub fn aggregate(records: &[Record]) -> FlowTable {
    let schema = schema_of(records);
    group(records, schema)
}

/// Like [`aggregate`], but with the column order fixed by the caller.
/// A record carrying an attribute outside `schema` is rejected before any
/// grouping happens.
pub fn aggregate_with_schema(records: &[Record], schema: &[String]) -> Result<FlowTable> {
    for rec in records {
        if let Some(extra) = rec.attributes.keys().find(|k| !schema.contains(*k)) {
            return Err(FlowError::UnknownAttribute {
                name: extra.clone(),
                context: format!("record {}", rec.id),
            });
        }
    }
    Ok(group(records, schema.to_vec()))
}

#[instrument(skip_all, fields(records = records.len(), attributes = schema.len()))]
fn group(records: &[Record], schema: Vec<String>) -> FlowTable {
    // heuristic pre-allocation, flows are usually far fewer than records
    let mut index: AHashMap<AttributeKey, usize> = AHashMap::with_capacity(records.len() / 8);
    let mut rows: Vec<FlowRow> = Vec::new();

    for rec in records {
        let key = key_for(rec, &schema);
        match index.get(&key) {
            Some(&i) => rows[i].count += 1,
            None => {
                index.insert(key.clone(), rows.len());
                rows.push(FlowRow::new(key, 1));
            }
        }
    }

    info!(groups = rows.len(), "aggregated flow table");
    FlowTable::from_unique(schema, rows)
}

/// Parallel grouping over a shared `DashMap`. Produces the same set of
/// groups as [`aggregate`]; rows are sorted by their tuple since the map
/// has no stable order.
#[instrument(skip_all, fields(records = records.len()))]
pub fn aggregate_par(records: &[Record]) -> FlowTable {
    let schema = schema_of(records);
    let counts: DashMap<AttributeKey, u64, RandomState> =
        DashMap::with_hasher(RandomState::new());

    records.par_iter().for_each(|rec| {
        *counts.entry(key_for(rec, &schema)).or_insert(0) += 1;
    });

    let rows: Vec<FlowRow> = counts
        .into_iter()
        .map(|(key, count)| FlowRow::new(key, count))
        .collect();

    info!(groups = rows.len(), "aggregated flow table in parallel");
    FlowTable::from_unique(schema, rows).sorted()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: u64, a: Option<&str>, b: Option<&str>) -> Record {
        Record::new(id, id as i64).with("a", a).with("b", b)
    }

    fn sample() -> Vec<Record> {
        vec![
            rec(1, Some("X"), Some("Y")),
            rec(2, Some("X"), Some("Y")),
            rec(3, Some("X"), None),
            rec(4, Some("X"), None),
            rec(5, Some("X"), Some("Z")),
            rec(6, None, None),
        ]
    }

    #[test]
    fn test_counts_sum_to_record_count() {
        let table = aggregate(&sample());
        assert_eq!(table.total(), 6);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_null_groups_with_null_and_id_is_ignored() {
        let table = aggregate(&sample());
        let nulls = table
            .rows()
            .iter()
            .find(|r| r.get("a") == Some("X") && r.get("b").is_none())
            .unwrap();
        assert_eq!(nulls.count, 2);
    }

    #[test]
    fn test_groups_are_unique_and_first_seen() {
        let table = aggregate(&sample());
        let keys: Vec<_> = table.rows().iter().map(|r| r.attributes.clone()).collect();
        for (i, k) in keys.iter().enumerate() {
            assert!(!keys[i + 1..].contains(k));
        }
        assert_eq!(table.rows()[0].get("b"), Some("Y"));
        assert_eq!(table.rows()[0].count, 2);
    }

    #[test]
    fn test_missing_attribute_counts_as_null() {
        let records = vec![
            Record::new(1, 0).with("a", Some("X")),
            Record::new(2, 0).with("a", Some("X")).with("b", None),
        ];
        let table = aggregate(&records);
        assert_eq!(table.attributes(), ["a".to_string(), "b".to_string()]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0].count, 2);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let records: Vec<Record> = (0..2_000u64)
            .map(|i| {
                let a = ["X", "Y", "Z"][(i % 3) as usize];
                let b = if i % 5 == 0 { None } else { Some(["P", "Q"][(i % 2) as usize]) };
                rec(i, Some(a), b)
            })
            .collect();

        let seq = aggregate(&records).sorted();
        let par = aggregate_par(&records);
        assert_eq!(seq, par);
        assert_eq!(par.total(), 2_000);
    }

    #[test]
    fn test_schema_rejects_unknown_attribute() {
        let err = aggregate_with_schema(&sample(), &["a".to_string()]).unwrap_err();
        assert!(matches!(err, FlowError::UnknownAttribute { name, .. } if name == "b"));
    }

    #[test]
    fn test_schema_keeps_caller_order() {
        let table = aggregate_with_schema(&sample(), &["b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(table.attributes(), ["b".to_string(), "a".to_string()]);
        assert_eq!(table.total(), 6);
    }

    #[test]
    fn test_empty_input() {
        let table = aggregate(&[]);
        assert!(table.is_empty());
        assert_eq!(table.total(), 0);
    }
}
