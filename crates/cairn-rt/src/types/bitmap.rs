/// Marks which of a type's local declarations can be resolved without a
/// target check.
///
/// Bit `i` refers to the `i`-th declaration after the class-chain prefix.
/// Up to 63 declarations fit in an inline word; larger types carry a side
/// byte array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveBitmap {
    Short(u64),
    Large(Box<[u8]>),
}

impl ResolveBitmap {
    pub const SHORT_BITS: usize = 63;

    pub fn from_flags(flags: &[bool]) -> Self {
        if flags.len() <= Self::SHORT_BITS {
            let word = flags
                .iter()
                .enumerate()
                .filter(|(_, &set)| set)
                .fold(0u64, |word, (i, _)| word | (1 << i));
            ResolveBitmap::Short(word)
        } else {
            let mut bytes = vec![0u8; flags.len().div_ceil(8)];
            for (i, _) in flags.iter().enumerate().filter(|(_, &set)| set) {
                bytes[i / 8] |= 1 << (i % 8);
            }
            ResolveBitmap::Large(bytes.into_boxed_slice())
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        match self {
            ResolveBitmap::Short(word) => index < Self::SHORT_BITS && word & (1 << index) != 0,
            ResolveBitmap::Large(bytes) => bytes
                .get(index / 8)
                .is_some_and(|byte| byte & (1 << (index % 8)) != 0),
        }
    }

    fn capacity(&self) -> usize {
        match self {
            ResolveBitmap::Short(_) => Self::SHORT_BITS,
            ResolveBitmap::Large(bytes) => bytes.len() * 8,
        }
    }

    /// Indices of set bits, ascending.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.capacity()).filter(move |&i| self.contains(i))
    }
}
