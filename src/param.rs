/// size of one payload block
pub const BLOCK_SIZE: usize = 512;
/// size of one mapping window (one host page)
pub const WINDOW_SIZE: usize = 4096;
/// payload blocks covered by one window
pub const BLOCKS_PER_WINDOW: u32 = (WINDOW_SIZE / BLOCK_SIZE) as u32;
/// on-disk sentinel for "no such block"
pub const NONE_BLOCK: u32 = u32::MAX;
/// length of the name field in a control block
pub const NAME_SIZE: usize = 128;
/// fill byte for the padding between the bitmap and the payload
pub const PAD_BYTE: u8 = 0xFF;
/// block holding the root directory
pub const ROOT_BLOCK: u32 = 0;
