//! Byte-signature scanning for engine-internal functions whose symbols are
//! absent from stripped binaries (spec.md §4.1).
//!
//! Grounded on `Signature.h`'s `bytes`/`mask` pair ("0xFF = keep, 0 =
//! wildcard/skip") from the original's IDA-style signature format; the
//! AVX2/common dual search-path split in the original is collapsed here
//! into one linear scan since this port has no SIMD requirement to justify
//! the duplication.

/// A byte pattern with optional wildcard positions, matched against a
/// function's compiled bytes. `None` at a position means "any byte".
#[derive(Debug, Clone)]
pub struct Signature {
    pattern: Vec<Option<u8>>,
}

impl Signature {
    pub fn new(pattern: Vec<Option<u8>>) -> Self {
        Signature { pattern }
    }

    /// Parse an IDA-style signature string, e.g. `"48 8B ?? 89 45"`, where
    /// `??` or `?` is a wildcard byte.
    pub fn from_ida_string(s: &str) -> Self {
        let pattern = s
            .split_whitespace()
            .map(|tok| if tok.contains('?') { None } else { u8::from_str_radix(tok, 16).ok() })
            .collect();
        Signature { pattern }
    }

    pub fn len(&self) -> usize {
        self.pattern.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty()
    }

    fn matches_at(&self, haystack: &[u8], offset: usize) -> bool {
        self.pattern.iter().enumerate().all(|(i, expected)| match expected {
            None => true,
            Some(byte) => haystack[offset + i] == *byte,
        })
    }
}

/// Result of scanning one region of code for a signature (spec.md §4.1:
/// "returning one or zero matches; multiple matches mean ambiguity and must
/// not be patched").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Zero,
    One(usize),
    Ambiguous,
}

/// Scan `haystack` for every occurrence of `sig`, collapsing the result to
/// [`MatchResult`]: callers must never patch an [`MatchResult::Ambiguous`]
/// site.
pub fn scan(haystack: &[u8], sig: &Signature) -> MatchResult {
    if sig.is_empty() || haystack.len() < sig.len() {
        return MatchResult::Zero;
    }
    let mut found: Option<usize> = None;
    for offset in 0..=(haystack.len() - sig.len()) {
        if sig.matches_at(haystack, offset) {
            match found {
                None => found = Some(offset),
                Some(_) => return MatchResult::Ambiguous,
            }
        }
    }
    match found {
        Some(offset) => MatchResult::One(offset),
        None => MatchResult::Zero,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_unique_match() {
        let haystack = [0x11, 0x22, 0x33, 0x44, 0x55];
        let sig = Signature::new(vec![Some(0x22), None, Some(0x44)]);
        assert_eq!(scan(&haystack, &sig), MatchResult::One(1));
    }

    #[test]
    fn returns_zero_when_absent() {
        let haystack = [0x11, 0x22, 0x33];
        let sig = Signature::new(vec![Some(0xFF)]);
        assert_eq!(scan(&haystack, &sig), MatchResult::Zero);
    }

    #[test]
    fn returns_ambiguous_on_multiple_matches() {
        let haystack = [0x90, 0x90, 0x90, 0x90];
        let sig = Signature::new(vec![Some(0x90), Some(0x90)]);
        assert_eq!(scan(&haystack, &sig), MatchResult::Ambiguous);
    }

    #[test]
    fn parses_ida_style_string_with_wildcards() {
        let sig = Signature::from_ida_string("48 8B ?? 89 45");
        assert_eq!(sig.len(), 5);
        let haystack = [0x48, 0x8B, 0xAB, 0x89, 0x45];
        assert_eq!(scan(&haystack, &sig), MatchResult::One(0));
    }
}
