// Slot identity and the write-once call-site header.
//
// Every per-call-site table is a flat array indexed by SlotId: no hashing on
// the hot path, one base + offset load per access. The first RESERVED_SLOTS
// rows belong to the profiler itself; user call sites start right after.

use std::fmt;

/// Rows kept for the profiler's own accounting.
pub const RESERVED_SLOTS: usize = 32;

/// Maximum number of user call sites. Build-time constant.
pub const MAX_USER_SLOTS: usize = 128;

pub const CAPACITY: usize = RESERVED_SLOTS + MAX_USER_SLOTS;

/// Storage for the source file name, terminator byte included.
pub const FILE_NAME_BYTES: usize = 144;

/// Storage for the function / site name, terminator byte included.
pub const FUNC_NAME_BYTES: usize = 96;

#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub u32);

impl SlotId {
    /// Returned by registration once the relevant range is full.
    pub const SENTINEL: SlotId = SlotId(u32::MAX);

    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline(always)]
    pub fn is_sentinel(self) -> bool {
        self == Self::SENTINEL
    }

    /// True for any id that can index the slot tables.
    #[inline(always)]
    pub fn in_bounds(self) -> bool {
        self.index() < CAPACITY
    }

    #[inline]
    pub fn is_reserved(self) -> bool {
        self.index() < RESERVED_SLOTS
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sentinel() {
            f.write_str("<sentinel>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Inline UTF-8 string of at most `N - 1` bytes.
///
/// Longer input is truncated on a character boundary, so the stored text is
/// always valid UTF-8 and one byte is always left over, mirroring a
/// NUL-terminated fixed buffer.
#[derive(Clone, Copy)]
pub struct BoundedStr<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> BoundedStr<N> {
    pub const MAX_LEN: usize = N - 1;

    pub fn new(s: &str) -> Self {
        let mut end = s.len().min(Self::MAX_LEN);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut buf = [0u8; N];
        buf[..end].copy_from_slice(&s.as_bytes()[..end]);
        Self { buf, len: end }
    }

    pub fn as_str(&self) -> &str {
        // Only ever filled from a &str cut on a char boundary.
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> PartialEq for BoundedStr<N> {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl<const N: usize> Eq for BoundedStr<N> {}

impl<const N: usize> fmt::Debug for BoundedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl<const N: usize> fmt::Display for BoundedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a registered call site. Written once at registration and never
/// touched again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotHeader {
    id: SlotId,
    file: BoundedStr<FILE_NAME_BYTES>,
    function: BoundedStr<FUNC_NAME_BYTES>,
    line: u32,
}

impl SlotHeader {
    pub(crate) fn new(id: SlotId, file: &str, function: &str, line: u32) -> Self {
        Self {
            id,
            file: BoundedStr::new(file),
            function: BoundedStr::new(function),
            line,
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn file(&self) -> &str {
        self.file.as_str()
    }

    pub fn function(&self) -> &str {
        self.function.as_str()
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    /// (file, function, line) as stored, i.e. after truncation.
    pub(crate) fn key(&self) -> (&str, &str, u32) {
        (self.file(), self.function(), self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_out_of_bounds() {
        assert!(SlotId::SENTINEL.is_sentinel());
        assert!(!SlotId::SENTINEL.in_bounds());
        assert!(SlotId((CAPACITY - 1) as u32).in_bounds());
        assert!(!SlotId(CAPACITY as u32).in_bounds());
    }

    #[test]
    fn reserved_range_boundary() {
        assert!(SlotId(0).is_reserved());
        assert!(SlotId((RESERVED_SLOTS - 1) as u32).is_reserved());
        assert!(!SlotId(RESERVED_SLOTS as u32).is_reserved());
    }

    #[test]
    fn bounded_str_keeps_short_input() {
        let s = BoundedStr::<16>::new("main.rs");
        assert_eq!(s.as_str(), "main.rs");
        assert_eq!(s.len(), 7);
    }

    #[test]
    fn bounded_str_truncates_leaving_terminator_room() {
        let long = "x".repeat(FILE_NAME_BYTES * 2);
        let s = BoundedStr::<FILE_NAME_BYTES>::new(&long);
        assert_eq!(s.len(), FILE_NAME_BYTES - 1);
        assert!(s.as_str().chars().all(|c| c == 'x'));
    }

    #[test]
    fn bounded_str_never_splits_a_character() {
        // 'é' is two bytes; 8-byte storage leaves 7 bytes of text, which
        // would cut the fourth 'é' in half.
        let s = BoundedStr::<8>::new("éééé");
        assert_eq!(s.as_str(), "ééé");
        assert_eq!(s.len(), 6);
    }

    #[test]
    fn header_is_truncated_per_field() {
        let file = "f".repeat(500);
        let func = "g".repeat(500);
        let header = SlotHeader::new(SlotId(40), &file, &func, 7);
        assert_eq!(header.file().len(), FILE_NAME_BYTES - 1);
        assert_eq!(header.function().len(), FUNC_NAME_BYTES - 1);
        assert_eq!(header.line(), 7);
        assert_eq!(header.id(), SlotId(40));
    }
}
