//! Unit building for text files (§4.3 "Unit build", text case): split into
//! semantic segments (sentences, with table awareness), then pack segments
//! into token-bounded chunks.

use graph_loaders::TokenEncoder;

use crate::sentence::split_sentences;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Sentence(String),
    /// A markdown table: `lines[0]` is the header row, `lines[1]` the
    /// `|---|---|` delimiter, the rest are data rows.
    Table(Vec<String>),
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 1
}

fn is_table_delimiter(line: &str) -> bool {
    let trimmed = line.trim();
    if !is_table_row(trimmed) {
        return false;
    }
    trimmed
        .trim_matches('|')
        .split('|')
        .all(|cell| {
            let cell = cell.trim();
            !cell.is_empty() && cell.chars().all(|c| matches!(c, '-' | ':'))
        })
}

/// Splits `text` into sentence and table segments (§4.3: "Markdown tables
/// (header row + delimiter row `|---|---|`) are a single segment").
pub fn split_segments(text: &str) -> Vec<Segment> {
    let lines: Vec<&str> = text.lines().collect();
    let mut segments = Vec::new();
    let mut prose_buf = String::new();
    let mut i = 0;

    while i < lines.len() {
        let is_table_start = is_table_row(lines[i])
            && lines.get(i + 1).map(|l| is_table_delimiter(l)).unwrap_or(false);

        if is_table_start {
            if !prose_buf.trim().is_empty() {
                for s in split_sentences(&prose_buf) {
                    segments.push(Segment::Sentence(s));
                }
            }
            prose_buf.clear();

            let mut table_lines = vec![lines[i].to_string(), lines[i + 1].to_string()];
            let mut j = i + 2;
            while j < lines.len() && is_table_row(lines[j]) {
                table_lines.push(lines[j].to_string());
                j += 1;
            }
            segments.push(Segment::Table(table_lines));
            i = j;
            continue;
        }

        prose_buf.push_str(lines[i]);
        prose_buf.push(' ');
        i += 1;
    }

    if !prose_buf.trim().is_empty() {
        for s in split_sentences(&prose_buf) {
            segments.push(Segment::Sentence(s));
        }
    }

    segments
}

#[derive(Debug, Clone)]
pub struct Unit {
    pub text: String,
}

/// Packs segments into chunks so `tokens(chunk) <= max_tokens` (default
/// 500). When a table segment itself exceeds `max_tokens`, it is split
/// across multiple chunks, each re-prefixed with the header and delimiter
/// rows so every chunk is self-describing (§4.3).
pub fn build_units(text: &str, max_tokens: usize, encoder: &dyn TokenEncoder) -> Vec<Unit> {
    let segments = split_segments(text);
    let mut units = Vec::new();
    let mut current_lines: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;

    let flush = |current_lines: &mut Vec<String>, current_tokens: &mut usize, units: &mut Vec<Unit>| {
        if !current_lines.is_empty() {
            units.push(Unit {
                text: current_lines.join("\n"),
            });
            current_lines.clear();
            *current_tokens = 0;
        }
    };

    for segment in segments {
        match segment {
            Segment::Sentence(s) => {
                let stoks = encoder.count(&s);
                if current_tokens + stoks > max_tokens && !current_lines.is_empty() {
                    flush(&mut current_lines, &mut current_tokens, &mut units);
                }
                current_lines.push(s);
                current_tokens += stoks;
            }
            Segment::Table(lines) => {
                let whole = lines.join("\n");
                let table_tokens = encoder.count(&whole);
                if table_tokens <= max_tokens {
                    if current_tokens + table_tokens > max_tokens && !current_lines.is_empty() {
                        flush(&mut current_lines, &mut current_tokens, &mut units);
                    }
                    current_lines.push(whole);
                    current_tokens += table_tokens;
                } else {
                    flush(&mut current_lines, &mut current_tokens, &mut units);
                    split_oversized_table(&lines, max_tokens, encoder, &mut units);
                }
            }
        }
    }
    flush(&mut current_lines, &mut current_tokens, &mut units);
    units
}

fn split_oversized_table(
    lines: &[String],
    max_tokens: usize,
    encoder: &dyn TokenEncoder,
    units: &mut Vec<Unit>,
) {
    let header = lines[0].clone();
    let delimiter = lines[1].clone();
    let header_tokens = encoder.count(&format!("{header}\n{delimiter}"));

    let mut buf = vec![header.clone(), delimiter.clone()];
    let mut buf_tokens = header_tokens;

    for row in &lines[2..] {
        let rtoks = encoder.count(row);
        if buf_tokens + rtoks > max_tokens && buf.len() > 2 {
            units.push(Unit {
                text: buf.join("\n"),
            });
            buf = vec![header.clone(), delimiter.clone()];
            buf_tokens = header_tokens;
        }
        buf.push(row.clone());
        buf_tokens += rtoks;
    }
    if buf.len() > 2 {
        units.push(Unit {
            text: buf.join("\n"),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_loaders::ApproximateEncoder;

    #[test]
    fn packs_sentences_within_token_budget() {
        let encoder = ApproximateEncoder::o200k_base();
        let text = "One sentence here. Another sentence follows. A third one too.";
        let units = build_units(text, 4, &encoder);
        assert!(units.len() > 1);
        for unit in &units {
            assert!(encoder.count(&unit.text) <= 10);
        }
    }

    #[test]
    fn table_is_a_single_segment_when_small() {
        let table = "| Name | Age |\n|---|---|\n| Alice | 30 |\n| Bob | 40 |";
        let segments = split_segments(table);
        assert_eq!(segments.len(), 1);
        assert!(matches!(segments[0], Segment::Table(_)));
    }

    #[test]
    fn oversized_table_repeats_header_per_chunk() {
        let encoder = ApproximateEncoder::o200k_base();
        let mut table = String::from("| Name | Age |\n|---|---|\n");
        for i in 0..50 {
            table.push_str(&format!("| Person{i} | {i} |\n"));
        }
        let units = build_units(table.trim_end(), 20, &encoder);
        assert!(units.len() > 1);
        for unit in &units {
            assert!(unit.text.starts_with("| Name | Age |"));
            assert!(unit.text.lines().nth(1).unwrap().contains("---"));
        }
    }
}
