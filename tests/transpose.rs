use anyhow::Result;
use msgsplit::codec::ABSENT;
use msgsplit::io::compression::Compression;
use msgsplit::io::sink::COLUMN_SUFFIX;
use msgsplit::testing::{record, split_values, value};
use msgsplit::{DirSinks, TransposeConfig, transpose};
use serde_json::{Value, json};
use std::fs;
use std::path::Path;

fn read_column(dir: &Path, name: &str) -> Result<Vec<Vec<u8>>> {
    let bytes = fs::read(dir.join(format!("{name}{COLUMN_SUFFIX}")))?;
    Ok(split_values(&bytes)?)
}

#[test]
fn columns_are_row_aligned_on_disk() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = [
        record(&[("a", json!(1)), ("b", json!(2))]),
        record(&[("a", json!(3))]),
        record(&[("b", json!(4)), ("a", json!(5))]),
    ]
    .concat();

    let sinks = DirSinks::new(tmp.path(), COLUMN_SUFFIX, Compression::None)?;
    let metrics = transpose(&input[..], sinks, &TransposeConfig::default())?;
    assert_eq!(metrics.records_read, 3);

    assert_eq!(
        read_column(tmp.path(), "a")?,
        [value(&json!(1)), value(&json!(3)), value(&json!(5))]
    );
    assert_eq!(
        read_column(tmp.path(), "b")?,
        [value(&json!(2)), vec![ABSENT], value(&json!(4))]
    );
    Ok(())
}

#[test]
fn every_column_has_one_slot_per_record() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let keys = ["id", "name", "score", "tags", "rare"];
    let records: Vec<Vec<(&str, Value)>> = (0..97u64)
        .map(|i| {
            keys.iter()
                .enumerate()
                .filter(|(k, _)| i % (*k as u64 + 1) == 0)
                .map(|(k, name)| (*name, json!(i * 10 + k as u64)))
                .collect()
        })
        .collect();
    let input: Vec<u8> = records.iter().flat_map(|fields| record(fields)).collect();

    let sinks = DirSinks::new(tmp.path(), COLUMN_SUFFIX, Compression::None)?;
    transpose(&input[..], sinks, &TransposeConfig::default())?;

    for (k, name) in keys.iter().enumerate() {
        let column = read_column(tmp.path(), name)?;
        assert_eq!(column.len(), records.len(), "column {name}");
        for (row, slot) in column.iter().enumerate() {
            let present = records[row].iter().any(|(key, _)| key == name);
            if present {
                assert_eq!(*slot, value(&json!(row as u64 * 10 + k as u64)));
            } else {
                assert_eq!(*slot, [ABSENT], "column {name} row {row}");
            }
        }
    }
    Ok(())
}

#[test]
fn keys_are_escaped_into_file_names() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let input = record(&[("dir/key", json!(true)), ("50%", json!(null))]);
    let sinks = DirSinks::new(tmp.path(), COLUMN_SUFFIX, Compression::None)?;
    transpose(&input[..], sinks, &TransposeConfig::default())?;

    assert!(tmp.path().join("dir%2Fkey.col.msg").is_file());
    assert!(tmp.path().join("50%25.col.msg").is_file());
    Ok(())
}

#[test]
fn truncated_input_leaves_flushed_columns() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut input = [record(&[("a", json!(1))]), record(&[("a", json!(2))])].concat();
    input.extend_from_slice(&record(&[("a", json!("unfinished"))])[..4]);

    let sinks = DirSinks::new(tmp.path(), COLUMN_SUFFIX, Compression::None)?;
    let err = transpose(&input[..], sinks, &TransposeConfig::default()).unwrap_err();
    assert!(err.is_decode());

    assert_eq!(
        read_column(tmp.path(), "a")?,
        [value(&json!(1)), value(&json!(2))]
    );
    Ok(())
}

#[cfg(feature = "compression-gzip")]
#[test]
fn gzip_columns_decompress_to_plain_columns() -> Result<()> {
    use msgsplit::io::compression::auto_detect_reader;
    use std::io::Read;

    let tmp = tempfile::tempdir()?;
    let input = [record(&[("a", json!("x"))]), record(&[("b", json!(1))])].concat();
    let sinks = DirSinks::new(tmp.path(), COLUMN_SUFFIX, Compression::Gzip)?;
    transpose(&input[..], sinks, &TransposeConfig::default())?;

    let path = tmp.path().join("a.col.msg.gz");
    let mut reader = auto_detect_reader(fs::File::open(&path)?, &path)?;
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    assert_eq!(bytes, [value(&json!("x")), vec![ABSENT]].concat());
    Ok(())
}
