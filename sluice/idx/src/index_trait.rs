pub trait IndexRef: Copy + Eq {
    fn index(&self) -> usize;
    fn new(input: usize) -> Self;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impl_index;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct StateIdx(u32);
    impl_index!(StateIdx);

    #[test]
    fn conversions_agree_with_the_raw_value() {
        let idx = StateIdx::from(7_u32);
        assert_eq!(idx.index(), 7);
        assert_eq!(StateIdx::from(7_usize), idx);
        assert_eq!(StateIdx::new(3), StateIdx(3));
        assert_eq!(idx.to_string(), "7");
    }
}
