use std::fmt;
use std::str;

/// UTF-8 text of at most `N` bytes, stored inline without any heap allocation.
///
/// Longer input is truncated to the longest prefix that fits into `N` bytes and ends on a
/// character boundary, so a multi-byte character is never split and nothing is ever written
/// past the end of the inline buffer.
///
/// The value is plain data that is valid for any bit pattern. This matters because it is stored
/// inside block headers that misbehaving caller code may have overwritten: an out-of-range length
/// is clamped to `N` and invalid UTF-8 is cut off at the first invalid byte when reading.
///
/// # Examples
///
/// ```
/// use tracked_alloc::BoundedText;
///
/// let text = BoundedText::<8>::new("allocator");
/// assert_eq!(text.as_str(), "allocato");
///
/// // Multi-byte characters are never split.
/// let text = BoundedText::<4>::new("añño");
/// assert_eq!(text.as_str(), "añ");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct BoundedText<const N: usize> {
    len: usize,
    bytes: [u8; N],
}

impl<const N: usize> BoundedText<N> {
    /// The maximum number of bytes this text can hold.
    pub const CAPACITY: usize = N;

    /// Empty text.
    pub const EMPTY: Self = Self {
        len: 0,
        bytes: [0; N],
    };

    /// Creates bounded text from `text`, truncating it to at most `N` bytes.
    #[must_use]
    pub fn new(text: &str) -> Self {
        let len = floor_char_boundary(text, N);

        let mut bytes = [0; N];
        for (dst, src) in bytes.iter_mut().zip(text.as_bytes().iter().take(len)) {
            *dst = *src;
        }

        Self { len, bytes }
    }

    /// The stored text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        let stored = self.bytes.get(..self.len.min(N)).unwrap_or_default();

        match str::from_utf8(stored) {
            Ok(text) => text,
            Err(e) => stored
                .get(..e.valid_up_to())
                .and_then(|valid| str::from_utf8(valid).ok())
                .unwrap_or_default(),
        }
    }

    /// Length of the stored text in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_str().len()
    }

    /// Whether the stored text is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

impl<const N: usize> Default for BoundedText<N> {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl<const N: usize> From<&str> for BoundedText<N> {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl<const N: usize> fmt::Debug for BoundedText<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl<const N: usize> fmt::Display for BoundedText<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The largest index `<= max` that is a character boundary of `text`.
fn floor_char_boundary(text: &str, max: usize) -> usize {
    if text.len() <= max {
        return text.len();
    }

    (0..=max)
        .rev()
        .find(|&index| text.is_char_boundary(index))
        .unwrap_or(0)
}
