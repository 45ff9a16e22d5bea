//! Token counting (§4.2: "count tokens with a fixed encoder").
//!
//! The real BPE vocabulary is an external asset; `TokenEncoder` is the seam,
//! with a deterministic whitespace/punctuation approximation as the default
//! so the rest of the pipeline (chunk packing, §4.3) has something to run
//! against without a network call per encode.

pub trait TokenEncoder: Send + Sync {
    fn name(&self) -> &str;
    fn count(&self, text: &str) -> usize;
}

/// Approximates `o200k_base` token counts without shipping the real
/// vocabulary: splits on whitespace and punctuation runs, which tracks BPE
/// token counts closely enough for chunk-sizing purposes (the chunker only
/// needs monotonicity and rough proportionality to `len(text)`, not an
/// exact match to the real tokenizer).
pub struct ApproximateEncoder {
    name: String,
}

impl ApproximateEncoder {
    pub fn o200k_base() -> Self {
        Self {
            name: "o200k_base".to_string(),
        }
    }
}

impl TokenEncoder for ApproximateEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn count(&self, text: &str) -> usize {
        let mut count = 0usize;
        let mut in_word = false;
        for ch in text.chars() {
            if ch.is_alphanumeric() {
                if !in_word {
                    count += 1;
                    in_word = true;
                }
            } else if !ch.is_whitespace() {
                // Punctuation tends to be its own token.
                count += 1;
                in_word = false;
            } else {
                in_word = false;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_words_and_punctuation() {
        let enc = ApproximateEncoder::o200k_base();
        assert_eq!(enc.count(""), 0);
        assert_eq!(enc.count("hello world"), 2);
        assert_eq!(enc.count("hello, world!"), 4);
    }

    #[test]
    fn monotonic_in_text_length() {
        let enc = ApproximateEncoder::o200k_base();
        let short = enc.count("hello");
        let long = enc.count("hello there general reader of this text");
        assert!(long > short);
    }
}
