//! Frame scanner: pulls DTC tokens out of free-text notification payloads.
//!
//! Adapters emit whatever text they like around the codes, so the scanner
//! only looks for whole tokens of the form `[PBCU]` + four digits. Each call
//! is independent; a code split across two notifications is not recovered.

use std::sync::LazyLock;

use regex::Regex;

// `[0-9]` rather than `\d`: the latter also matches non-ASCII digits.
static RE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[PBCU][0-9]{4}\b").unwrap());

static RE_EXACT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[PBCU][0-9]{4}$").unwrap());

/// Decode a payload and return every code token in it, in order.
///
/// Invalid UTF-8 is replaced with U+FFFD, which is not a word character,
/// so garbage bytes next to a code act as a token boundary.
pub fn scan(raw: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(raw);
    scan_text(&text).map(str::to_string).collect()
}

/// Lazily yield code tokens from already-decoded text.
pub fn scan_text(text: &str) -> impl Iterator<Item = &str> {
    RE_TOKEN.find_iter(text).map(|m| m.as_str())
}

/// Whether `s` is exactly one well-formed code token.
pub fn is_code(s: &str) -> bool {
    RE_EXACT.is_match(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_tokens_in_order() {
        let tokens = scan(b"random P0300 noise B9999 P0171");
        assert_eq!(tokens, vec!["P0300", "B9999", "P0171"]);
    }

    #[test]
    fn all_four_prefixes() {
        let tokens = scan(b"P0100,B1000;C1201|U0100");
        assert_eq!(tokens, vec!["P0100", "B1000", "C1201", "U0100"]);
    }

    #[test]
    fn rejects_embedded_tokens() {
        assert!(scan(b"XP0300").is_empty());
        assert!(scan(b"P03001").is_empty());
        assert!(scan(b"P0300A").is_empty());
        assert!(scan(b"_P0300").is_empty());
        assert!(scan(b"P030").is_empty());
    }

    #[test]
    fn rejects_other_letters_and_lowercase() {
        assert!(scan(b"A0300 X1234 p0300 b1000").is_empty());
    }

    #[test]
    fn rejects_non_ascii_digits() {
        // Arabic-Indic digits are \d in Unicode mode but not valid DTC digits.
        assert!(scan("P\u{0660}\u{0661}\u{0662}\u{0663}".as_bytes()).is_empty());
    }

    #[test]
    fn malformed_utf8_never_fails() {
        let mut raw = vec![0xFF, 0xFE];
        raw.extend_from_slice(b"P0420");
        raw.extend_from_slice(&[0xC3, 0x28, 0x80]);
        raw.extend_from_slice(b" C1300");
        assert_eq!(scan(&raw), vec!["P0420", "C1300"]);
    }

    #[test]
    fn arbitrary_bytes_only_yield_well_formed_tokens() {
        // Deterministic pseudo-random byte soup with some codes sprinkled in.
        let mut seed: u32 = 0x2545_F491;
        let mut raw = Vec::new();
        for i in 0..4096 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            raw.push((seed & 0xFF) as u8);
            if i % 97 == 0 {
                raw.extend_from_slice(b" P0301 ");
            }
        }
        let tokens = scan(&raw);
        assert!(!tokens.is_empty());
        assert!(tokens.iter().all(|t| is_code(t)));
    }

    #[test]
    fn empty_and_truncated_payloads() {
        assert!(scan(b"").is_empty());
        assert!(scan(b"P03").is_empty());
        assert!(scan(b"\r\n>").is_empty());
    }

    #[test]
    fn adapter_style_output() {
        let tokens = scan(b"43 01 33 00 00\r\nDTC: P0133\r\nDTC: P0217\r\n>");
        assert_eq!(tokens, vec!["P0133", "P0217"]);
    }

    #[test]
    fn lazy_iteration_from_text() {
        let mut iter = scan_text("P0300 P0301");
        assert_eq!(iter.next(), Some("P0300"));
        assert_eq!(iter.next(), Some("P0301"));
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn exact_code_check() {
        assert!(is_code("P0300"));
        assert!(is_code("U0100"));
        assert!(!is_code(" P0300"));
        assert!(!is_code("P03000"));
        assert!(!is_code("Q0300"));
    }
}
