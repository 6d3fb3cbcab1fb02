use std::fmt::Display;

/// Single byte of a [`Pattern`]. `mask` selects the nibbles of `sig` which must match, a zero
/// nibble in `mask` is a wildcard.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PatternByte {
    pub sig: u8,
    pub mask: u8,
}
impl PatternByte {
    #[inline(always)]
    pub fn is_match(&self, byte: u8) -> bool {
        byte & self.mask == self.sig
    }
    /// No wildcard nibbles
    pub const fn is_exact(&self) -> bool {
        self.mask == 0xff
    }
}

/// Number of bytes described by pattern text: 2 characters per byte plus a space between
/// each pair of bytes.
pub const fn pattern_size(text: &str) -> usize {
    (text.len() + 1) / 3
}

const fn parse_nibble(c: u8) -> (u8, u8) {
    match c {
        b'0'..=b'9' => (c - b'0', 0xf),
        b'A'..=b'F' => (c - b'A' + 0xa, 0xf),
        b'?' => (0, 0),
        _ => panic!("pattern nibble must be an uppercase hex digit or '?'"),
    }
}

const fn parse_byte(hi: u8, lo: u8) -> PatternByte {
    let (hi_sig, hi_mask) = parse_nibble(hi);
    let (lo_sig, lo_mask) = parse_nibble(lo);
    PatternByte {
        sig: hi_sig << 4 | lo_sig,
        mask: hi_mask << 4 | lo_mask,
    }
}

/// Parse pattern text such as `"48 8D 0? ?? EB"` into `N` pattern bytes.
///
/// Malformed text panics, which turns into a compile error when evaluated in a `const` item
/// (see [`pattern!`]).
pub const fn parse_pattern<const N: usize>(text: &str) -> [PatternByte; N] {
    let text = text.as_bytes();
    if N == 0 {
        panic!("pattern must match at least one byte");
    }
    if text.len() != N * 3 - 1 {
        panic!("pattern text length must be 3 characters per byte minus one");
    }
    let mut bytes = [PatternByte { sig: 0, mask: 0 }; N];
    let mut i = 0;
    while i < N {
        let at = i * 3;
        if i + 1 < N && text[at + 2] != b' ' {
            panic!("pattern bytes must be separated by a single space");
        }
        bytes[i] = parse_byte(text[at], text[at + 1]);
        i += 1;
    }
    bytes
}

/// Build a `'static` [`Pattern`] from a string literal, validated at compile time.
///
/// ```
/// use modsleuth_scanner::pattern;
///
/// let lea = pattern!("48 8D 0? ?? ?? ?? ??");
/// assert_eq!(7, lea.len());
/// ```
#[macro_export]
macro_rules! pattern {
    ($text:expr) => {{
        const TEXT: &str = $text;
        const BYTES: [$crate::PatternByte; $crate::pattern_size(TEXT)] =
            $crate::parse_pattern(TEXT);
        $crate::Pattern::from_bytes(&BYTES)
    }};
}

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Pattern {
    bytes: &'static [PatternByte],
}
impl Pattern {
    /// Panics if `bytes` is empty.
    pub const fn from_bytes(bytes: &'static [PatternByte]) -> Self {
        if bytes.is_empty() {
            panic!("pattern must match at least one byte");
        }
        Self { bytes }
    }
    #[allow(clippy::len_without_is_empty)]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }
    pub fn bytes(&self) -> &'static [PatternByte] {
        self.bytes
    }
    /// Whether the pattern matches `data` starting at `index`. A pattern running past the end
    /// of `data` does not match.
    #[inline(always)]
    pub fn is_match(&self, data: &[u8], index: usize) -> bool {
        index
            .checked_add(self.len())
            .and_then(|end| data.get(index..end))
            .is_some_and(|window| window.iter().zip(self.bytes).all(|(b, p)| p.is_match(*b)))
    }
}
impl Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn nibble(f: &mut std::fmt::Formatter<'_>, sig: u8, mask: u8) -> std::fmt::Result {
            if mask == 0 {
                write!(f, "?")
            } else {
                write!(f, "{:X}", sig)
            }
        }
        for (i, b) in self.bytes.iter().enumerate() {
            if i != 0 {
                write!(f, " ")?;
            }
            nibble(f, b.sig >> 4, b.mask >> 4)?;
            nibble(f, b.sig & 0xf, b.mask & 0xf)?;
        }
        Ok(())
    }
}
impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pattern(\"{self}\")")
    }
}

/// Scan `data` for every (possibly overlapping) occurrence of `pattern`, calling `on_match`
/// with the offset of each match and collecting whatever it returns.
///
/// Results are in ascending order of match offset.
pub fn scan<T, I, F>(data: &[u8], pattern: &Pattern, mut on_match: F) -> Vec<T>
where
    F: FnMut(usize) -> I,
    I: IntoIterator<Item = T>,
{
    let mut matches = vec![];

    // last offset at which the whole pattern still fits
    let Some(last) = data.len().checked_sub(pattern.len()) else {
        return matches;
    };
    let candidates = &data[..=last];

    match pattern.bytes.first() {
        Some(first) if first.is_exact() => {
            for i in memchr::memchr_iter(first.sig, candidates) {
                if pattern.is_match(data, i) {
                    matches.extend(on_match(i));
                }
            }
        }
        _ => {
            for i in 0..candidates.len() {
                if pattern.is_match(data, i) {
                    matches.extend(on_match(i));
                }
            }
        }
    }

    matches
}

/// Offsets of every occurrence of `pattern` in `data`
pub fn scan_offsets(data: &[u8], pattern: &Pattern) -> Vec<usize> {
    scan(data, pattern, Some)
}
