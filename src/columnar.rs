use std::fs::{self, File};
use std::path::Path;

use arrow2::array::{Array, MutablePrimitiveArray, MutableUtf8Array, MutableArray};
use arrow2::chunk::Chunk;
use arrow2::datatypes::{DataType, Field, Schema};
use arrow2::io::parquet::write::{
    transverse, CompressionOptions, Encoding, FileWriter, RowGroupIterator, Version, WriteOptions,
};
use tracing::info;

use crate::error::Result;
use crate::record::FlowTable;

pub const COUNT_COLUMN: &str = "count";

const WRITE_OPTIONS: WriteOptions = WriteOptions {
    write_statistics: true,
    compression: CompressionOptions::Uncompressed,
    version: Version::V2,
    data_pagesize_limit: None,
};

// ─────────────────────────────────────────────────────────────
//  Schema: one nullable Utf8 column per attribute + UInt64 count
// ─────────────────────────────────────────────────────────────
pub fn schema(table: &FlowTable) -> Schema {
    let mut fields: Vec<Field> = table
        .attributes()
        .iter()
        .map(|name| Field::new(name.as_str(), DataType::Utf8, true))
        .collect();
    fields.push(Field::new(COUNT_COLUMN, DataType::UInt64, false));
    Schema::from(fields)
}

/// Column-major copy of the flow table, columns in schema order.
pub fn to_chunk(table: &FlowTable) -> Result<Chunk<Box<dyn Array>>> {
    let rows = table.rows();
    let mut arrays: Vec<Box<dyn Array>> = Vec::with_capacity(table.attributes().len() + 1);

    for name in table.attributes() {
        let mut col = MutableUtf8Array::<i32>::with_capacity(rows.len());
        for r in rows {
            match r.get(name) {
                Some(v) => col.push(Some(v)),
                None => col.push_null(),
            }
        }
        arrays.push(col.as_box());
    }

    let mut counts = MutablePrimitiveArray::<u64>::with_capacity(rows.len());
    for r in rows {
        counts.push(Some(r.count));
    }
    arrays.push(counts.as_box());

    Ok(Chunk::try_new(arrays)?)
}

/// Writes the flow table as a single row group Parquet file, creating the
/// parent directory when needed.
pub fn write_parquet(table: &FlowTable, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let schema = schema(table);
    let chunk = to_chunk(table)?;

    let encodings: Vec<Vec<Encoding>> = schema
        .fields
        .iter()
        .map(|f| transverse(&f.data_type, |_| Encoding::Plain))
        .collect();

    let row_groups =
        RowGroupIterator::try_new(vec![Ok(chunk)].into_iter(), &schema, WRITE_OPTIONS, encodings)?;

    let file = File::create(path)?;
    let mut writer = FileWriter::try_new(file, schema, WRITE_OPTIONS)?;
    for group in row_groups {
        writer.write(group?)?;
    }
    writer.end(None)?;

    info!(path = %path.display(), rows = table.len(), "wrote flow table parquet");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow2::array::{PrimitiveArray, Utf8Array};
    use crate::record::{AttributeKey, FlowRow};

    fn table() -> FlowTable {
        let mut a = AttributeKey::new();
        a.insert("region".into(), Some("North".into()));
        a.insert("channel".into(), None);
        let mut b = AttributeKey::new();
        b.insert("region".into(), Some("South".into()));
        b.insert("channel".into(), Some("Dealer".into()));

        FlowTable::from_rows(
            vec!["region".into(), "channel".into()],
            vec![FlowRow::new(a, 4), FlowRow::new(b, 6)],
        )
        .unwrap()
    }

    #[test]
    fn test_schema_columns() {
        let s = schema(&table());
        let names: Vec<_> = s.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["region", "channel", "count"]);
        assert_eq!(s.fields[2].data_type, DataType::UInt64);
    }

    #[test]
    fn test_chunk_values_and_nulls() {
        let chunk = to_chunk(&table()).unwrap();
        assert_eq!(chunk.len(), 2);

        let arrays = chunk.arrays();
        let channel = arrays[1].as_any().downcast_ref::<Utf8Array<i32>>().unwrap();
        assert!(channel.is_null(0));
        assert_eq!(channel.value(1), "Dealer");

        let counts = arrays[2].as_any().downcast_ref::<PrimitiveArray<u64>>().unwrap();
        assert_eq!(counts.values().as_slice(), &[4, 6]);
    }
}
