//! On-disk block layouts.
//!
//! Every occupied payload block starts with a [`BlockHeader`] linking
//! it into a doubly-chained list. The first block of a chain also
//! carries a [`Fcb`] with the file's metadata. Four fixed shapes share
//! the 512-byte cell; all of them are `#[repr(C)]` plain-old-data and
//! move through [`bytemuck`] at the device boundary.

use bytemuck::{Pod, Zeroable};

use crate::param::{BLOCK_SIZE, NAME_SIZE, NONE_BLOCK};

/// bytes of chain header at the start of every occupied block
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();
/// bytes of control block in a chain's first block
pub const FCB_SIZE: usize = size_of::<Fcb>();
/// data bytes in the first block of a file
pub const FIRST_FILE_DATA: usize = BLOCK_SIZE - HEADER_SIZE - FCB_SIZE;
/// data bytes in a continuation file block
pub const FILE_DATA: usize = BLOCK_SIZE - HEADER_SIZE;
/// child slots in the first block of a directory
pub const FIRST_DIR_SLOTS: usize =
    (BLOCK_SIZE - HEADER_SIZE - FCB_SIZE - size_of::<u32>()) / size_of::<u32>();
/// child slots in a continuation directory block
pub const DIR_SLOTS: usize = (BLOCK_SIZE - HEADER_SIZE) / size_of::<u32>();

/// Converts an on-disk block index field to an option.
pub fn slot(raw: u32) -> Option<u32> {
    (raw != NONE_BLOCK).then_some(raw)
}

/// Chain header at the start of every occupied block.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BlockHeader {
    /// previous block of the chain, `NONE_BLOCK` for the first
    pub previous_block: u32,
    /// next block of the chain, `NONE_BLOCK` for the last
    pub next_block: u32,
    /// position of this block in its chain, 0 for the first
    pub block_in_file: u32,
}

impl BlockHeader {
    /// Header of a fresh single-block chain.
    pub fn first() -> Self {
        Self {
            previous_block: NONE_BLOCK,
            next_block: NONE_BLOCK,
            block_in_file: 0,
        }
    }

    /// Decodes just the header prefix of a raw block.
    pub fn decode(raw: &[u8; BLOCK_SIZE]) -> Self {
        bytemuck::pod_read_unaligned(&raw[..HEADER_SIZE])
    }

    pub fn previous(&self) -> Option<u32> {
        slot(self.previous_block)
    }

    pub fn next(&self) -> Option<u32> {
        slot(self.next_block)
    }
}

/// Control block stored after the header in the first block of every
/// file and directory.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Fcb {
    /// first block of the parent directory, `NONE_BLOCK` for the root
    pub parent_dir: u32,
    /// index of this chain's first block, repeated here
    pub self_block: u32,
    /// NUL-padded name
    pub name: [u8; NAME_SIZE],
    pub size_bytes: u32,
    pub size_blocks: u32,
    /// 0 for a file, 1 for a directory
    pub is_dir: u32,
}

impl Fcb {
    pub fn new(parent: Option<u32>, self_block: u32, name: &str, is_dir: bool) -> Self {
        let mut fcb = Self {
            parent_dir: parent.unwrap_or(NONE_BLOCK),
            self_block,
            name: [0; NAME_SIZE],
            size_bytes: 0,
            size_blocks: 1,
            is_dir: is_dir as u32,
        };
        fcb.set_name(name);
        fcb
    }

    /// Name bytes up to the first NUL.
    pub fn name_bytes(&self) -> &[u8] {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
        &self.name[..end]
    }

    pub fn name_matches(&self, name: &str) -> bool {
        self.name_bytes() == name.as_bytes()
    }

    pub fn set_name(&mut self, name: &str) {
        self.name.fill(0);
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_SIZE);
        self.name[..len].copy_from_slice(&bytes[..len]);
    }

    pub fn parent(&self) -> Option<u32> {
        slot(self.parent_dir)
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir != 0
    }
}

/// Common prefix of both first-block shapes: header, then control
/// block. Enough to identify a chain without knowing its type.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ChainHead {
    pub header: BlockHeader,
    pub fcb: Fcb,
}

impl ChainHead {
    pub fn decode(raw: &[u8; BLOCK_SIZE]) -> Self {
        bytemuck::pod_read_unaligned(&raw[..size_of::<Self>()])
    }
}

/// First block of a file: header, control block, leading data bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FirstFileBlock {
    pub header: BlockHeader,
    pub fcb: Fcb,
    pub data: [u8; FIRST_FILE_DATA],
}

/// Continuation block of a file: header, data bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FileBlock {
    pub header: BlockHeader,
    pub data: [u8; FILE_DATA],
}

/// First block of a directory: header, control block, entry count and
/// the leading child index slots. Open slots hold `NONE_BLOCK`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FirstDirBlock {
    pub header: BlockHeader,
    pub fcb: Fcb,
    /// live entries across the whole chain
    pub num_entries: u32,
    pub children: [u32; FIRST_DIR_SLOTS],
}

/// Continuation block of a directory: header, more child index slots.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DirBlock {
    pub header: BlockHeader,
    pub children: [u32; DIR_SLOTS],
}

/// A 512-byte on-disk block image.
pub trait DiskBlock: Pod {
    fn decode(raw: &[u8; BLOCK_SIZE]) -> Self {
        bytemuck::pod_read_unaligned(raw)
    }

    fn encode(&self) -> [u8; BLOCK_SIZE] {
        let mut raw = [0u8; BLOCK_SIZE];
        raw.copy_from_slice(bytemuck::bytes_of(self));
        raw
    }
}

impl DiskBlock for FirstFileBlock {}
impl DiskBlock for FileBlock {}
impl DiskBlock for FirstDirBlock {}
impl DiskBlock for DirBlock {}

// every shape must fill its 512-byte cell exactly
const _: () = assert!(size_of::<FirstFileBlock>() == BLOCK_SIZE);
const _: () = assert!(size_of::<FileBlock>() == BLOCK_SIZE);
const _: () = assert!(size_of::<FirstDirBlock>() == BLOCK_SIZE);
const _: () = assert!(size_of::<DirBlock>() == BLOCK_SIZE);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_constants() {
        assert_eq!(HEADER_SIZE, 12);
        assert_eq!(FCB_SIZE, 148);
        assert_eq!(FIRST_FILE_DATA, 352);
        assert_eq!(FILE_DATA, 500);
        assert_eq!(FIRST_DIR_SLOTS, 87);
        assert_eq!(DIR_SLOTS, 125);
    }

    #[test]
    fn slot_maps_sentinel_to_none() {
        assert_eq!(slot(NONE_BLOCK), None);
        assert_eq!(slot(0), Some(0));
        assert_eq!(slot(41), Some(41));
    }

    #[test]
    fn fcb_name_round_trip() {
        let mut fcb = Fcb::new(Some(3), 7, "notes.txt", false);
        assert_eq!(fcb.name_bytes(), b"notes.txt");
        assert!(fcb.name_matches("notes.txt"));
        assert!(!fcb.name_matches("notes"));

        fcb.set_name("n");
        assert_eq!(fcb.name_bytes(), b"n");

        // a full-length name occupies the whole field with no NUL
        let long = "x".repeat(NAME_SIZE);
        fcb.set_name(&long);
        assert_eq!(fcb.name_bytes().len(), NAME_SIZE);
        assert!(fcb.name_matches(&long));
    }

    #[test]
    fn first_dir_block_field_offsets() {
        let mut block = FirstDirBlock {
            header: BlockHeader::first(),
            fcb: Fcb::new(None, 0, "/", true),
            num_entries: 7,
            children: [NONE_BLOCK; FIRST_DIR_SLOTS],
        };
        block.children[0] = 9;

        let raw = block.encode();
        // num_entries sits right after the header and control block
        let at = HEADER_SIZE + FCB_SIZE;
        assert_eq!(raw[at..at + 4], 7u32.to_ne_bytes());
        assert_eq!(raw[at + 4..at + 8], 9u32.to_ne_bytes());

        let back = FirstDirBlock::decode(&raw);
        assert_eq!(back.num_entries, 7);
        assert_eq!(back.children[0], 9);
        assert_eq!(back.children[1], NONE_BLOCK);
    }

    #[test]
    fn file_block_round_trip() {
        let mut block = FileBlock {
            header: BlockHeader {
                previous_block: 4,
                next_block: NONE_BLOCK,
                block_in_file: 2,
            },
            data: [0; FILE_DATA],
        };
        block.data[..5].copy_from_slice(b"hello");

        let back = FileBlock::decode(&block.encode());
        assert_eq!(back.header.previous(), Some(4));
        assert_eq!(back.header.next(), None);
        assert_eq!(back.header.block_in_file, 2);
        assert_eq!(&back.data[..5], b"hello");
    }

    #[test]
    fn chain_head_matches_both_first_blocks() {
        let file = FirstFileBlock {
            header: BlockHeader::first(),
            fcb: Fcb::new(Some(0), 5, "a", false),
            data: [0xAB; FIRST_FILE_DATA],
        };
        let head = ChainHead::decode(&file.encode());
        assert_eq!(head.fcb.self_block, 5);
        assert!(!head.fcb.is_dir());

        let dir = FirstDirBlock {
            header: BlockHeader::first(),
            fcb: Fcb::new(Some(0), 6, "d", true),
            num_entries: 0,
            children: [NONE_BLOCK; FIRST_DIR_SLOTS],
        };
        let head = ChainHead::decode(&dir.encode());
        assert_eq!(head.fcb.self_block, 6);
        assert!(head.fcb.is_dir());
    }
}
