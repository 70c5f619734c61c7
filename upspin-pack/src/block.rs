/// Default block size: files are chunked into blocks with a target size of
/// 1 MiB so that each block is independently fetchable and offset/size in
/// the entry allow random access without fetching the whole file.
pub const DEFAULT_BLOCK_SIZE: usize = 1 << 20;

/// Splits `data` into fixed-size chunks of at most `block_size` bytes. The
/// empty input produces a single empty block, so zero-length files still
/// get one (empty) block descriptor.
pub fn chunk(data: &[u8], block_size: usize) -> Vec<&[u8]> {
    if data.is_empty() {
        return vec![&data[0..0]];
    }
    data.chunks(block_size.max(1)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_respect_block_size() {
        let data = vec![0u8; 2500];
        let chunks = chunk(&data, 1000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1000);
        assert_eq!(chunks[2].len(), 500);
    }

    #[test]
    fn empty_data_is_one_empty_block() {
        let chunks = chunk(&[], 1000);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }
}
