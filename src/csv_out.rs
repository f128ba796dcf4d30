//! Optional CSV output (§6 "Batch emitted artifacts"): one row per object,
//! `path` followed by the union of all tags across the batch sorted by
//! name (including `#errors`); commas and newlines in values are replaced
//! by `;` and space respectively. This isn't a general CSV dialect (no
//! quoting, no escaping beyond the two substitutions), so no CSV crate is
//! pulled in for it — a plain `Write` is all §6 calls for.

use std::collections::BTreeSet;
use std::io::{self, Write};

use crate::spill::ObjectResult;

pub fn write_csv<W: Write>(writer: &mut W, records: &[ObjectResult]) -> io::Result<()> {
    let mut columns: BTreeSet<String> = BTreeSet::new();
    for record in records {
        columns.extend(record.initial_tags.keys().cloned());
        columns.extend(record.changed_tags.keys().cloned());
    }
    columns.insert("errors".to_string());
    let column_order: Vec<String> = columns.into_iter().collect();

    write!(writer, "path")?;
    for column in &column_order {
        let header = if column == "errors" {
            format!("#{column}")
        } else {
            column.clone()
        };
        write!(writer, ",{}", escape(&header))?;
    }
    writeln!(writer)?;

    for record in records {
        write!(writer, "{}", escape(&record.object_path))?;
        for column in &column_order {
            let value = if column == "errors" {
                record.errors.join("\n")
            } else {
                record
                    .changed_tags
                    .get(column)
                    .or_else(|| record.initial_tags.get(column))
                    .cloned()
                    .unwrap_or_default()
            };
            write!(writer, ",{}", escape(&value))?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

fn escape(value: &str) -> String {
    value.replace(',', ";").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn escapes_commas_and_newlines() {
        assert_eq!(escape("a,b\nc"), "a;b c");
    }

    #[test]
    fn writes_header_and_rows() {
        let record = ObjectResult {
            object_path: "/o".to_string(),
            initial_tags: [("k".to_string(), "v,1".to_string())].into_iter().collect(),
            changed_tags: HashMap::new(),
            errors: vec!["bad".to_string()],
            trace_log: Vec::new(),
            rule_log: HashMap::new(),
            property_log: HashMap::new(),
            profiling: HashMap::new(),
        };
        let mut buf = Vec::new();
        write_csv(&mut buf, &[record]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("path,#errors,k\n") || text.starts_with("path,k,#errors\n"));
        assert!(text.contains("v;1"));
        assert!(text.contains("bad"));
    }
}
