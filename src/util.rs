/// Number of sectors needed to hold `size` bytes.
pub fn sector_count_from_size(size: u64, sector_size: u64) -> u64 {
    if size == 0 {
        return 0;
    }

    ((size - 1) / sector_size) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_counts() {
        assert_eq!(sector_count_from_size(0, 4096), 0);
        assert_eq!(sector_count_from_size(1, 4096), 1);
        assert_eq!(sector_count_from_size(4096, 4096), 1);
        assert_eq!(sector_count_from_size(4097, 4096), 2);
        assert_eq!(sector_count_from_size(12288, 4096), 3);
    }
}
