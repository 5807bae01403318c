/// Fixed-capacity bit vector, sized once at construction.
///
/// Bit N lives in word N / 64, bit N % 64, the same layout the APLIC and
/// IMSIC register files expose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    words: Box<[u64]>,
    len: usize,
}

impl Bitmap {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(64)].into_boxed_slice(),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, bit: usize) -> bool {
        bit < self.len && self.words[bit / 64] & (1u64 << (bit % 64)) != 0
    }

    pub fn set(&mut self, bit: usize) {
        if bit < self.len {
            self.words[bit / 64] |= 1u64 << (bit % 64);
        }
    }

    pub fn clear(&mut self, bit: usize) {
        if bit < self.len {
            self.words[bit / 64] &= !(1u64 << (bit % 64));
        }
    }

    pub fn assign(&mut self, bit: usize, value: bool) {
        if value {
            self.set(bit);
        } else {
            self.clear(bit);
        }
    }

    /// Number of 64-bit words backing the bitmap
    pub fn words64(&self) -> usize {
        self.words.len()
    }

    pub fn word64(&self, idx: usize) -> u64 {
        self.words.get(idx).copied().unwrap_or(0)
    }

    pub fn set_word64(&mut self, idx: usize, val: u64) {
        let mask = self.valid_mask64(idx);
        if let Some(w) = self.words.get_mut(idx) {
            *w = val & mask;
        }
    }

    pub fn word32(&self, idx: usize) -> u32 {
        (self.word64(idx / 2) >> (32 * (idx % 2))) as u32
    }

    /// Index of the lowest bit set in both `self` and `other`
    pub fn first_common(&self, other: &Bitmap) -> Option<usize> {
        self.words
            .iter()
            .zip(other.words.iter())
            .enumerate()
            .find_map(|(w, (a, b))| {
                let both = a & b;
                (both != 0).then(|| w * 64 + both.trailing_zeros() as usize)
            })
    }

    /// Indices of all set bits in ascending order
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(w * 64 + bit)
            })
        })
    }

    fn valid_mask64(&self, idx: usize) -> u64 {
        let start = idx * 64;
        if start >= self.len {
            0
        } else if self.len - start >= 64 {
            u64::MAX
        } else {
            (1u64 << (self.len - start)) - 1
        }
    }
}
