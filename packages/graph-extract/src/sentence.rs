//! Sentence splitting for the unit builder (§4.3 "Unit build", text case).
//!
//! `. ! ?` are terminators, except: numeric listings (`1. item`),
//! decimal/date dots between digits, single-letter abbreviations
//! (`A. B.`), and a list of common German/English abbreviations. The
//! splitter works on whitespace-delimited tokens, so it normalizes internal
//! whitespace runs to single spaces; the §8 round-trip property
//! (`sentences.join(" ")` reconstructs all non-space characters in order)
//! holds by construction.

const ABBREVIATIONS: &[&str] = &[
    // English
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "vs", "etc", "inc", "ltd", "co", "st", "ave",
    "no", "fig", "approx", "dept", "univ", "gov", "rev", "hon", "capt", "gen", "col", "e.g",
    "i.e",
    // German
    "z.b", "d.h", "u.a", "usw", "bzw", "ca", "nr", "abs", "art", "bspw", "ggf", "vgl", "bzgl",
];

/// Splits `text` into sentences. Concatenating the result with single
/// spaces reconstructs every non-space character of `text` in order.
pub fn split_sentences(text: &str) -> Vec<String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut sentences = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for (idx, token) in tokens.iter().enumerate() {
        current.push(token);
        if ends_sentence(token, tokens.get(idx + 1).copied()) {
            sentences.push(current.join(" "));
            current = Vec::new();
        }
    }
    if !current.is_empty() {
        sentences.push(current.join(" "));
    }
    sentences
}

fn ends_sentence(token: &str, next_token: Option<&str>) -> bool {
    let trimmed = token.trim_end_matches(|c| c == '"' || c == '\'' || c == ')' || c == ']');
    let Some(last) = trimmed.chars().last() else {
        return false;
    };
    if last != '.' && last != '!' && last != '?' {
        return false;
    }

    // '!' and '?' always terminate; only '.' has listed exemptions.
    if last != '.' {
        return true;
    }

    let terminator_run_len = trimmed.chars().rev().take_while(|&c| c == '.').count();
    if terminator_run_len > 1 {
        // Ellipsis: always terminates.
        return true;
    }

    let word_part = &trimmed[..trimmed.len() - 1];
    if word_part.is_empty() {
        return true;
    }

    // Numeric listing: "1." "12." etc.
    if word_part.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }

    // Decimal/date dot between digits, e.g. "12.5" glued to the next token
    // which starts with a digit: "12. 5" spaced oddly — conservative, only
    // applies when word_part ends in a digit and the next token starts with
    // one.
    if word_part.chars().last().is_some_and(|c| c.is_ascii_digit())
        && next_token
            .and_then(|t| t.chars().next())
            .is_some_and(|c| c.is_ascii_digit())
    {
        return false;
    }

    // Single-letter abbreviation: "A." "B."
    if word_part.chars().count() == 1 && word_part.chars().next().unwrap().is_alphabetic() {
        return false;
    }

    // Common abbreviation list (case-insensitive).
    let lowered = word_part.to_ascii_lowercase();
    if ABBREVIATIONS.contains(&lowered.as_str()) {
        return false;
    }

    true
}

/// All non-space characters of `text`, in order — used by the round-trip
/// property test.
fn non_space_chars(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_simple_sentences() {
        let sentences = split_sentences("Hello world. How are you? I am fine!");
        assert_eq!(
            sentences,
            vec!["Hello world.", "How are you?", "I am fine!"]
        );
    }

    #[test]
    fn does_not_split_numeric_listings() {
        let sentences = split_sentences("1. First item 2. Second item");
        assert_eq!(sentences, vec!["1. First item 2. Second item"]);
    }

    #[test]
    fn does_not_split_single_letter_abbreviations() {
        let sentences = split_sentences("See section A. B. for details.");
        assert_eq!(
            sentences,
            vec!["See section A. B. for details."]
        );
    }

    #[test]
    fn does_not_split_common_abbreviations() {
        let sentences = split_sentences("Dr. Smith arrived. He was late.");
        assert_eq!(sentences, vec!["Dr. Smith arrived.", "He was late."]);
    }

    #[test]
    fn does_not_split_decimal_dots() {
        let sentences = split_sentences("The rate is 12. 5 percent higher.");
        assert_eq!(sentences, vec!["The rate is 12. 5 percent higher."]);
    }

    #[test]
    fn round_trip_preserves_non_space_characters() {
        let text = "Dr. Smith met Mr. Jones. They discussed item 1. budget 2. staffing.";
        let sentences = split_sentences(text);
        let rejoined = sentences.join(" ");
        assert_eq!(non_space_chars(&rejoined), non_space_chars(text));
    }
}
