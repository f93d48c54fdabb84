use tssbridge_types::BlockNumber;

/// Next block range to fetch: `[cursor, min(head, cursor + max_batch - 1)]`,
/// or `None` while the chain has not reached the cursor.
pub fn next_range(
    cursor: BlockNumber,
    head: BlockNumber,
    max_batch: u64,
) -> Option<(BlockNumber, BlockNumber)> {
    if head < cursor {
        return None;
    }
    let span = max_batch.max(1) - 1;
    Some((cursor, head.min(cursor.saturating_add(span))))
}

/// Signing ranges of the active epoch: consecutive windows of `size` blocks
/// counted from `anchor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeAlignment {
    pub size: u16,
    /// Block of the latest `RangeSizeChanged` or `EpochStart`.
    pub anchor: BlockNumber,
}

impl RangeAlignment {
    pub fn new(size: u16, anchor: BlockNumber) -> Self {
        Self { size, anchor }
    }

    /// `(block + 1 - anchor) mod size`; zero on the last block of a range.
    pub fn offset(&self, block: BlockNumber) -> u64 {
        if self.size == 0 {
            return 1;
        }
        let size = self.size as u64;
        // anchor may be ahead of block while a size change is being replayed
        let distance = (block + 1) as i128 - self.anchor as i128;
        distance.rem_euclid(size as i128) as u64
    }

    pub fn is_boundary(&self, block: BlockNumber) -> bool {
        self.size != 0 && block >= self.anchor && self.offset(block) == 0
    }

    /// First block of the range that `block` closes.
    pub fn range_start(&self, block: BlockNumber) -> BlockNumber {
        (block + 1).saturating_sub(self.size as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_range() {
        assert_eq!(next_range(100, 99, 10), None);
        assert_eq!(next_range(100, 100, 10), Some((100, 100)));
        assert_eq!(next_range(100, 150, 10), Some((100, 109)));
        assert_eq!(next_range(100, 105, 10), Some((100, 105)));
        assert_eq!(next_range(100, 150, 0), Some((100, 100)));
    }

    #[test]
    fn test_ranges_cover_without_gaps() {
        let mut cursor = 0;
        let mut seen = Vec::new();
        while let Some((from, to)) = next_range(cursor, 37, 10) {
            seen.extend(from..=to);
            cursor = to + 1;
        }
        assert_eq!(seen, (0..=37).collect::<Vec<_>>());
    }

    #[test]
    fn test_boundaries_from_anchor() {
        let range = RangeAlignment::new(3, 100);
        let boundaries: Vec<_> = (100..=110).filter(|b| range.is_boundary(*b)).collect();
        assert_eq!(boundaries, vec![102, 105, 108]);
        assert_eq!(range.offset(103), 1);
        assert_eq!(range.range_start(105), 103);
    }

    #[test]
    fn test_zero_size_never_fires() {
        let range = RangeAlignment::new(0, 100);
        assert!((0..200).all(|b| !range.is_boundary(b)));
    }
}
