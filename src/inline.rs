use std::fmt;

/// A byte string stored inline in a fixed `N`-byte buffer.
///
/// Payloads placed in a shared region cannot own heap memory, so keys and
/// other variable-length fields are copied into one of these.
#[derive(Clone, Copy)]
pub struct InlineStr<const N: usize> {
    len: u16,
    bytes: [u8; N],
}

impl<const N: usize> InlineStr<N> {
    pub const CAPACITY: usize = N;

    /// Copy `bytes` in, or return `None` if they do not fit.
    pub fn new(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > N || bytes.len() > u16::MAX as usize {
            return None;
        }
        let mut s = Self::default();
        s.bytes[..bytes.len()].copy_from_slice(bytes);
        s.len = bytes.len() as u16;
        Some(s)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> Default for InlineStr<N> {
    fn default() -> Self {
        InlineStr {
            len: 0,
            bytes: [0; N],
        }
    }
}

impl<const N: usize> PartialEq for InlineStr<N> {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl<const N: usize> Eq for InlineStr<N> {}

impl<const N: usize> PartialEq<[u8]> for InlineStr<N> {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl<const N: usize> fmt::Debug for InlineStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_exactly() {
        let s = InlineStr::<4>::new(b"abcd").unwrap();
        assert_eq!(s.as_bytes(), b"abcd");
        assert_eq!(s.len(), 4);
        assert!(InlineStr::<4>::new(b"abcde").is_none());
    }

    #[test]
    fn equality_ignores_spare_capacity() {
        let a = InlineStr::<16>::new(b"tag").unwrap();
        let b = InlineStr::<16>::new(b"tag").unwrap();
        assert_eq!(a, b);
        assert!(a == *b"tag".as_slice());
        assert!(InlineStr::<16>::default().is_empty());
        assert_eq!(format!("{a:?}"), "\"tag\"");
    }
}
