pub type Distance = u32;
pub type Container = u64;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Ord, PartialOrd)]
pub struct Hamming(pub Container);

impl Hamming {
    pub const BITS: u32 = Container::BITS;
    pub const BYTES: usize = std::mem::size_of::<Container>();
    pub const MIN_DIST: Distance = 0;
    pub const MAX_DIST: Distance = Hamming::BITS;

    pub fn from_le_slice(bytes: &[u8]) -> Self {
        assert_eq!(Hamming::BYTES, bytes.len());
        let array: [u8; Hamming::BYTES] = bytes
            .try_into()
            .expect("the slice is of the incorrect length");
        Self(Container::from_le_bytes(array))
    }

    pub fn to_le_bytes(self) -> [u8; Hamming::BYTES] {
        self.0.to_le_bytes()
    }

    pub fn distance_to(self, other: Self) -> Distance {
        (self.0 ^ other.0).count_ones()
    }

    pub fn distance(a: Container, b: Container) -> Distance {
        Hamming(a).distance_to(Hamming(b))
    }
}

impl std::fmt::Display for Hamming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hamming_distances() {
        assert_eq!(0, Hamming(0).distance_to(Hamming(0)));
        assert_eq!(
            0,
            Hamming(Container::MAX).distance_to(Hamming(Container::MAX))
        );
        assert_eq!(3, Hamming(0b101).distance_to(Hamming(0b010)));
        assert_eq!(
            Hamming(0b101).distance_to(Hamming(0b010)),
            Hamming(0b010).distance_to(Hamming(0b101))
        );
    }

    #[test]
    fn le_roundtrip() {
        let h = Hamming(0xdead_beef_0123_4567);
        assert_eq!(h, Hamming::from_le_slice(&h.to_le_bytes()));
        assert_eq!(0x67, h.to_le_bytes()[0]);
    }

    #[test]
    fn display_is_hex() {
        assert_eq!("00000000000000ff", Hamming(0xff).to_string());
    }
}
