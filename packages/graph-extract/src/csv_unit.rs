//! Unit building for CSV/spreadsheet files (§4.3 "Unit build", csv case):
//! detect a header row, then pack data rows into token-bounded chunks that
//! each begin with the header row so every chunk is self-describing.

use graph_loaders::TokenEncoder;

use crate::units::Unit;

/// Heuristic header-row detection: a header row has a markedly lower
/// numeric-cell ratio than the row immediately below it, or shares at least
/// one cell (case-insensitively) with a small set of common header
/// keywords.
const HEADER_KEYWORDS: &[&str] = &[
    "id", "name", "date", "description", "type", "status", "amount", "email",
    "category", "title", "value", "quantity", "price",
];

fn numeric_ratio(row: &[String]) -> f64 {
    if row.is_empty() {
        return 0.0;
    }
    let numeric = row
        .iter()
        .filter(|cell| !cell.trim().is_empty() && cell.trim().parse::<f64>().is_ok())
        .count();
    numeric as f64 / row.len() as f64
}

fn matches_header_keyword(row: &[String]) -> bool {
    row.iter()
        .any(|cell| HEADER_KEYWORDS.contains(&cell.trim().to_ascii_lowercase().as_str()))
}

/// Returns true if `rows[0]` looks like a header row relative to `rows[1]`.
/// With fewer than two rows there is nothing to compare, so the first row
/// is assumed to be a header (the common case of a header-only or
/// single-data-row file).
pub fn has_header_row(rows: &[Vec<String>]) -> bool {
    let Some(first) = rows.first() else {
        return false;
    };
    if matches_header_keyword(first) {
        return true;
    }
    let Some(second) = rows.get(1) else {
        return true;
    };
    numeric_ratio(first) < numeric_ratio(second)
}

fn render_row(row: &[String]) -> String {
    row.join(",")
}

/// Packs CSV/spreadsheet rows into units of at most `max_tokens`, each
/// opening with the header row (when one was detected) so that every unit
/// can be understood in isolation.
pub fn build_csv_units(rows: &[Vec<String>], max_tokens: usize, encoder: &dyn TokenEncoder) -> Vec<Unit> {
    if rows.is_empty() {
        return Vec::new();
    }

    let header = if has_header_row(rows) {
        Some(render_row(&rows[0]))
    } else {
        None
    };
    let data_rows = if header.is_some() { &rows[1..] } else { &rows[..] };

    let header_tokens = header.as_deref().map(|h| encoder.count(h)).unwrap_or(0);
    let mut units = Vec::new();
    let mut buf: Vec<String> = header.clone().into_iter().collect();
    let mut buf_tokens = header_tokens;

    for row in data_rows {
        let rendered = render_row(row);
        let rtoks = encoder.count(&rendered);
        let has_data_rows = buf.len() > header.iter().count();
        if buf_tokens + rtoks > max_tokens && has_data_rows {
            units.push(Unit {
                text: buf.join("\n"),
            });
            buf = header.clone().into_iter().collect();
            buf_tokens = header_tokens;
        }
        buf.push(rendered);
        buf_tokens += rtoks;
    }

    if buf.len() > header.iter().count() {
        units.push(Unit {
            text: buf.join("\n"),
        });
    } else if units.is_empty() && header.is_some() {
        units.push(Unit {
            text: buf.join("\n"),
        });
    }

    units
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_loaders::ApproximateEncoder;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn detects_header_by_keyword() {
        let rows = vec![row(&["id", "name", "amount"]), row(&["1", "Alice", "42"])];
        assert!(has_header_row(&rows));
    }

    #[test]
    fn detects_header_by_numeric_ratio() {
        let rows = vec![
            row(&["foo", "bar", "baz"]),
            row(&["1", "2", "3"]),
            row(&["4", "5", "6"]),
        ];
        assert!(has_header_row(&rows));
    }

    #[test]
    fn all_numeric_rows_have_no_header() {
        let rows = vec![row(&["1", "2", "3"]), row(&["4", "5", "6"])];
        assert!(!has_header_row(&rows));
    }

    #[test]
    fn every_chunk_starts_with_header() {
        let encoder = ApproximateEncoder::o200k_base();
        let mut rows = vec![row(&["id", "name"])];
        for i in 0..30 {
            rows.push(row(&[&i.to_string(), "value"]));
        }
        let units = build_csv_units(&rows, 10, &encoder);
        assert!(units.len() > 1);
        for unit in &units {
            assert!(unit.text.starts_with("id,name"));
        }
    }
}
