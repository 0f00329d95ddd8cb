use cellstore_core::models::Row;

/// Sort rows by primary id and keep the first row per primary
pub fn merge_rows(mut rows: Vec<Row>) -> Vec<Row> {
    // Stable: the row listed first for a primary wins
    rows.sort_by(|a, b| a.primary().cmp(b.primary()));
    rows.dedup_by(|later, earlier| later.primary() == earlier.primary());
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellstore_core::models::{CellRow, GeometryRef, IndexLevel, SecondaryRow};

    fn cell(token: &str, primary: &str) -> Row {
        Row::Cell(CellRow {
            level: IndexLevel::Fine,
            token: token.into(),
            primary: primary.into(),
            geometry: GeometryRef::IndexOnly(primary.into()),
        })
    }

    #[test]
    fn test_dedupes_across_ranges_and_levels() {
        let rows = vec![
            cell("01", "b"),
            cell("02", "a"),
            cell("03", "b"),
            Row::Cell(CellRow {
                level: IndexLevel::Coarse,
                token: "0".into(),
                primary: "a".into(),
                geometry: GeometryRef::IndexOnly("a".into()),
            }),
            Row::Secondary(SecondaryRow { secondary: "x".into(), primary: "c".into() }),
        ];
        let merged = merge_rows(rows);
        let primaries: Vec<&str> = merged.iter().map(Row::primary).collect();
        assert_eq!(primaries, vec!["a", "b", "c"]);
        // First occurrence kept
        assert_eq!(merged[1].key(), "cell!1!01!b");
    }

    #[test]
    fn test_empty() {
        assert!(merge_rows(Vec::new()).is_empty());
    }
}
