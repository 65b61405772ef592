use std::path::Path;

use log::debug;

use crate::disk::{Disk, Presence};
use crate::error::{FsError, Result};
use crate::layout::{
    BlockHeader, ChainHead, DIR_SLOTS, DirBlock, DiskBlock, Fcb, FILE_DATA, FIRST_DIR_SLOTS,
    FIRST_FILE_DATA, FileBlock, FirstDirBlock, FirstFileBlock,
};
use crate::param::{BLOCK_SIZE, NAME_SIZE, NONE_BLOCK, ROOT_BLOCK};

/// A directory position: its first block and its parent's first block.
///
/// Handles carry block indices only. Pointers into the device's mapped
/// window would dangle as soon as any other block is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirHandle {
    block: u32,
    parent: Option<u32>,
}

impl DirHandle {
    pub fn block(&self) -> u32 {
        self.block
    }
}

/// An open file: its first block and the directory that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    first_block: u32,
    parent: u32,
}

impl FileHandle {
    pub fn first_block(&self) -> u32 {
        self.first_block
    }
}

/// A handle to an on-disk chain. [`ChainFs::remove`] accepts any of
/// them; the control block on disk tells files and directories apart.
pub trait Handle {
    fn first_block(&self) -> u32;
    /// First block of the owning directory, `None` only for the root.
    fn parent_block(&self) -> Option<u32>;
}

impl Handle for DirHandle {
    fn first_block(&self) -> u32 {
        self.block
    }

    fn parent_block(&self) -> Option<u32> {
        self.parent
    }
}

impl Handle for FileHandle {
    fn first_block(&self) -> u32 {
        self.first_block
    }

    fn parent_block(&self) -> Option<u32> {
        Some(self.parent)
    }
}

/// Metadata snapshot of a file or directory.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub first_block: u32,
    pub size_bytes: u32,
    pub size_blocks: u32,
    pub is_dir: bool,
}

/// Whole-image tallies returned by [`ChainFs::check`].
#[derive(Debug, Clone, Copy)]
pub struct CheckStats {
    pub directories: u32,
    pub files: u32,
    pub used_blocks: u32,
}

/// Location of one child entry within a directory chain.
#[derive(Debug, Clone, Copy)]
struct ChildSlot {
    /// first block of the child chain
    child: u32,
    /// block whose slot array holds the entry
    holder: u32,
    /// slot index within that array
    slot: usize,
}

/// The filesystem: a directory tree threaded through block chains.
///
/// All operations are synchronous and single-threaded; the only state
/// besides the device is what the handles carry.
pub struct ChainFs {
    disk: Disk,
}

impl ChainFs {
    /// Creates a fresh filesystem at `path` with `num_blocks` payload
    /// blocks. Block 0 becomes the root directory "/".
    pub fn format<P: AsRef<Path>>(path: P, num_blocks: u32) -> Result<Self> {
        let mut disk = Disk::create(path.as_ref(), num_blocks)?;

        let root = FirstDirBlock {
            header: BlockHeader::first(),
            fcb: Fcb::new(None, ROOT_BLOCK, "/", true),
            num_entries: 0,
            children: [NONE_BLOCK; FIRST_DIR_SLOTS],
        };
        disk.write_block(ROOT_BLOCK, &root.encode())?;

        debug!("formatted {:?}: {num_blocks} blocks", path.as_ref());
        Ok(Self { disk })
    }

    /// Reopens the filesystem stored at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut disk = Disk::resume(path.as_ref())?;

        let mut raw = [0u8; BLOCK_SIZE];
        if disk.read_block(ROOT_BLOCK, &mut raw)? == Presence::Absent {
            return Err(FsError::Corruption("root block is not allocated"));
        }
        let head = ChainHead::decode(&raw);
        if !head.fcb.is_dir() || head.fcb.self_block != ROOT_BLOCK || head.fcb.name_bytes() != b"/"
        {
            return Err(FsError::Corruption("block 0 is not the root directory"));
        }

        Ok(Self { disk })
    }

    /// Flushes both mappings, then unmaps and closes the image.
    pub fn close(self) -> Result<()> {
        self.disk.close()
    }

    /// Flushes outstanding changes to the host file.
    pub fn flush(&self) -> Result<()> {
        self.disk.flush()
    }

    /// Handle to the root directory.
    pub fn root(&self) -> DirHandle {
        DirHandle {
            block: ROOT_BLOCK,
            parent: None,
        }
    }

    /// Number of unallocated blocks on the device.
    pub fn free_blocks(&self) -> u32 {
        self.disk.free_blocks()
    }

    /// Creates an empty file named `name` in `dir`.
    pub fn create_file(&mut self, dir: &DirHandle, name: &str) -> Result<FileHandle> {
        check_name(name)?;
        match self.lookup(dir.block, name) {
            Ok(_) => return Err(FsError::AlreadyExists),
            Err(FsError::NotFound) => {}
            Err(err) => return Err(err),
        }

        // claim the file's block before any directory growth, so the
        // two allocations never land on the same scan result
        let first_block = self.reserve_block()?;
        if let Err(err) = self.link_child(dir.block, first_block) {
            self.disk.free_block(first_block)?;
            return Err(err);
        }

        let block = FirstFileBlock {
            header: BlockHeader::first(),
            fcb: Fcb::new(Some(dir.block), first_block, name, false),
            data: [0; FIRST_FILE_DATA],
        };
        self.write_typed(first_block, &block)?;

        debug!("created file {name:?} at block {first_block}");
        Ok(FileHandle {
            first_block,
            parent: dir.block,
        })
    }

    /// Opens the entry named `name` in `dir`.
    pub fn open_file(&mut self, dir: &DirHandle, name: &str) -> Result<FileHandle> {
        let (entry, _) = self.lookup(dir.block, name)?;
        Ok(FileHandle {
            first_block: entry.child,
            parent: dir.block,
        })
    }

    /// Names of every entry in `dir`, in slot order.
    pub fn read_dir(&mut self, dir: &DirHandle) -> Result<Vec<String>> {
        let children = self.children(dir.block)?;
        let mut names = Vec::with_capacity(children.len());
        for entry in children {
            let head = self.read_head(entry.child)?;
            names.push(String::from_utf8_lossy(head.fcb.name_bytes()).into_owned());
        }
        Ok(names)
    }

    /// Writes `src` into `file`, starting at the beginning of the
    /// file, overwriting existing content and growing the chain as
    /// needed. Returns the number of bytes written; a short count
    /// means the device filled up mid-write (everything already
    /// written stays in place).
    pub fn write(&mut self, file: &FileHandle, src: &[u8]) -> Result<usize> {
        let mut head = self.read_first_file(file.first_block)?;
        if head.fcb.is_dir() {
            return Err(FsError::NotAFile);
        }

        let take = src.len().min(FIRST_FILE_DATA);
        head.data[..take].copy_from_slice(&src[..take]);
        let mut written = take;
        let mut remaining = &src[take..];

        let mut tail_index = file.first_block;
        let mut tail_header = head.header;

        while !remaining.is_empty() {
            match tail_header.next() {
                Some(next) => {
                    // overwrite an existing continuation block
                    let mut block = FileBlock::decode(&self.read_raw(next)?);
                    let take = remaining.len().min(FILE_DATA);
                    block.data[..take].copy_from_slice(&remaining[..take]);
                    self.write_typed(next, &block)?;
                    written += take;
                    remaining = &remaining[take..];
                    tail_index = next;
                    tail_header = block.header;
                }
                None => {
                    // out of chain: hang a fresh block off the tail
                    let grown = match self.reserve_block() {
                        Ok(block) => block,
                        Err(FsError::NoSpace) => break,
                        Err(err) => return Err(err),
                    };
                    let take = remaining.len().min(FILE_DATA);
                    let mut block = FileBlock {
                        header: BlockHeader {
                            previous_block: tail_index,
                            next_block: NONE_BLOCK,
                            block_in_file: tail_header.block_in_file + 1,
                        },
                        data: [0; FILE_DATA],
                    };
                    block.data[..take].copy_from_slice(&remaining[..take]);
                    self.write_typed(grown, &block)?;

                    if tail_index == file.first_block {
                        head.header.next_block = grown;
                    } else {
                        let mut tail = FileBlock::decode(&self.read_raw(tail_index)?);
                        tail.header.next_block = grown;
                        self.write_typed(tail_index, &tail)?;
                    }
                    head.fcb.size_blocks += 1;

                    written += take;
                    remaining = &remaining[take..];
                    tail_index = grown;
                    tail_header = block.header;
                }
            }
        }

        // the size is a high-water mark: shorter writes never shrink it
        head.fcb.size_bytes = head.fcb.size_bytes.max(written as u32);
        self.write_typed(file.first_block, &head)?;

        if written < src.len() {
            debug!(
                "short write to block {}: {written} of {} bytes",
                file.first_block,
                src.len()
            );
        }
        Ok(written)
    }

    /// Reads from the start of `file` until `dst` is full or the chain
    /// ends. Returns the number of bytes produced.
    pub fn read(&mut self, file: &FileHandle, dst: &mut [u8]) -> Result<usize> {
        let head = self.read_first_file(file.first_block)?;
        if head.fcb.is_dir() {
            return Err(FsError::NotAFile);
        }

        let take = dst.len().min(FIRST_FILE_DATA);
        dst[..take].copy_from_slice(&head.data[..take]);
        let mut produced = take;
        let mut next = head.header.next();

        while produced < dst.len() {
            let Some(index) = next else {
                break; // chain ended before the request was satisfied
            };
            let block = FileBlock::decode(&self.read_raw(index)?);
            let take = (dst.len() - produced).min(FILE_DATA);
            dst[produced..produced + take].copy_from_slice(&block.data[..take]);
            produced += take;
            next = block.header.next();
        }
        Ok(produced)
    }

    /// Moves `dir` into the child directory `name`, or to its parent
    /// for `".."` (a no-op at the root).
    pub fn change_dir(&mut self, dir: &mut DirHandle, name: &str) -> Result<()> {
        if name == ".." {
            let Some(parent) = dir.parent else {
                return Ok(());
            };
            let head = self.read_head(parent)?;
            *dir = DirHandle {
                block: parent,
                parent: head.fcb.parent(),
            };
            return Ok(());
        }

        let (entry, fcb) = self.lookup(dir.block, name)?;
        if !fcb.is_dir() {
            return Err(FsError::NotADirectory);
        }
        *dir = DirHandle {
            block: entry.child,
            parent: Some(dir.block),
        };
        Ok(())
    }

    /// Creates a directory named `name` in `dir` and descends into it:
    /// on return `dir` points at the new directory.
    pub fn mkdir(&mut self, dir: &mut DirHandle, name: &str) -> Result<()> {
        // allocate and link exactly like a file, then rewrite the
        // first block with the directory shape
        let file = self.create_file(dir, name)?;
        let block = FirstDirBlock {
            header: BlockHeader::first(),
            fcb: Fcb::new(Some(dir.block), file.first_block, name, true),
            num_entries: 0,
            children: [NONE_BLOCK; FIRST_DIR_SLOTS],
        };
        self.write_typed(file.first_block, &block)?;

        debug!("created directory {name:?} at block {}", file.first_block);
        *dir = DirHandle {
            block: file.first_block,
            parent: Some(dir.block),
        };
        Ok(())
    }

    /// Removes the file or directory behind `handle`, freeing every
    /// block it reached (directories recursively) and compacting the
    /// parent's entry array. Returns a handle to the parent directory.
    pub fn remove<H: Handle>(&mut self, handle: H) -> Result<DirHandle> {
        let target = handle.first_block();
        let Some(parent) = handle.parent_block() else {
            return Err(FsError::BadArgument("cannot remove the root directory"));
        };

        self.remove_chain(target)?;
        self.unlink_child(parent, target)?;

        let head = self.read_head(parent)?;
        Ok(DirHandle {
            block: parent,
            parent: head.fcb.parent(),
        })
    }

    /// Verifies the structural invariants of the whole image: chain
    /// links and positions, control blocks, directory counters,
    /// density and name uniqueness, and agreement between the bitmap
    /// and what the root can reach. Returns Corruption on the first
    /// violation.
    pub fn check(&mut self) -> Result<CheckStats> {
        let mut owned = vec![false; self.disk.num_blocks() as usize];
        let mut stats = CheckStats {
            directories: 0,
            files: 0,
            used_blocks: 0,
        };
        self.check_tree(ROOT_BLOCK, None, &mut owned, &mut stats)?;
        stats.used_blocks = owned.iter().filter(|&&block| block).count() as u32;

        // the bitmap may not mark anything the tree does not reach,
        // and everything the tree reaches must be marked
        let mut probe = [0u8; BLOCK_SIZE];
        for index in 0..self.disk.num_blocks() {
            let marked = self.disk.read_block(index, &mut probe)? == Presence::Present;
            if marked != owned[index as usize] {
                return Err(FsError::Corruption("bitmap disagrees with the directory tree"));
            }
        }
        Ok(stats)
    }

    /// Walks the chain at `first`, verifying both link directions and
    /// the position counters, and claiming each block in `owned`.
    /// A block claimed twice also covers cyclic chains.
    fn check_chain(&mut self, first: u32, owned: &mut [bool]) -> Result<Vec<u32>> {
        let mut header = BlockHeader::decode(&self.read_raw(first)?);
        if header.previous().is_some() || header.block_in_file != 0 {
            return Err(FsError::Corruption("first block header is not first"));
        }
        claim(owned, first)?;

        let mut blocks = vec![first];
        while let Some(next) = header.next() {
            let next_header = BlockHeader::decode(&self.read_raw(next)?);
            if next_header.previous() != blocks.last().copied() {
                return Err(FsError::Corruption("chain back-link does not match"));
            }
            if next_header.block_in_file as usize != blocks.len() {
                return Err(FsError::Corruption("chain position out of sequence"));
            }
            claim(owned, next)?;
            blocks.push(next);
            header = next_header;
        }
        Ok(blocks)
    }

    fn check_tree(
        &mut self,
        first: u32,
        parent: Option<u32>,
        owned: &mut [bool],
        stats: &mut CheckStats,
    ) -> Result<()> {
        let head = self.read_head(first)?;
        if head.fcb.parent() != parent {
            return Err(FsError::Corruption("control block names the wrong parent"));
        }

        let chain = self.check_chain(first, owned)?;
        if head.fcb.size_blocks as usize != chain.len() {
            return Err(FsError::Corruption("size_blocks does not match the chain"));
        }

        if !head.fcb.is_dir() {
            stats.files += 1;
            let capacity = FIRST_FILE_DATA + (chain.len() - 1) * FILE_DATA;
            if head.fcb.size_bytes as usize > capacity {
                return Err(FsError::Corruption("size_bytes exceeds the chain capacity"));
            }
            return Ok(());
        }
        stats.directories += 1;

        // flatten the slot arrays; the chain is acyclic at this point
        let dir = FirstDirBlock::decode(&self.read_raw(first)?);
        let mut slots: Vec<u32> = dir.children.to_vec();
        let mut next = dir.header.next();
        while let Some(block) = next {
            let cont = DirBlock::decode(&self.read_raw(block)?);
            slots.extend(cont.children);
            next = cont.header.next();
        }

        let live = slots.iter().filter(|&&slot| slot != NONE_BLOCK).count();
        if live != dir.num_entries as usize {
            return Err(FsError::Corruption("num_entries does not match the live slots"));
        }
        if let Some(gap) = slots.iter().position(|&slot| slot == NONE_BLOCK)
            && slots[gap..].iter().any(|&slot| slot != NONE_BLOCK)
        {
            return Err(FsError::Corruption("directory entries are not dense"));
        }

        let mut names = Vec::with_capacity(live);
        for &child in slots.iter().filter(|&&slot| slot != NONE_BLOCK) {
            names.push(self.read_head(child)?.fcb.name);
            self.check_tree(child, Some(first), owned, stats)?;
        }
        names.sort_unstable();
        if names.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(FsError::Corruption("duplicate name in directory"));
        }
        Ok(())
    }

    /// Metadata of the file or directory behind `handle`.
    pub fn stat<H: Handle>(&mut self, handle: &H) -> Result<Stat> {
        let head = self.read_head(handle.first_block())?;
        Ok(Stat {
            first_block: head.fcb.self_block,
            size_bytes: head.fcb.size_bytes,
            size_blocks: head.fcb.size_blocks,
            is_dir: head.fcb.is_dir(),
        })
    }

    /// Reads block `index`, which must be allocated.
    fn read_raw(&mut self, index: u32) -> Result<[u8; BLOCK_SIZE]> {
        let mut raw = [0u8; BLOCK_SIZE];
        match self.disk.read_block(index, &mut raw)? {
            Presence::Present => Ok(raw),
            Presence::Absent => Err(FsError::Corruption("chain references a free block")),
        }
    }

    /// Reads the header and control block of the chain at `first`.
    fn read_head(&mut self, first: u32) -> Result<ChainHead> {
        let head = ChainHead::decode(&self.read_raw(first)?);
        if head.fcb.self_block != first {
            return Err(FsError::Corruption("control block does not match its block"));
        }
        Ok(head)
    }

    fn read_first_file(&mut self, first: u32) -> Result<FirstFileBlock> {
        let block = FirstFileBlock::decode(&self.read_raw(first)?);
        if block.fcb.self_block != first {
            return Err(FsError::Corruption("control block does not match its block"));
        }
        Ok(block)
    }

    fn read_first_dir(&mut self, first: u32) -> Result<FirstDirBlock> {
        let block = FirstDirBlock::decode(&self.read_raw(first)?);
        if block.fcb.self_block != first {
            return Err(FsError::Corruption("control block does not match its block"));
        }
        if !block.fcb.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(block)
    }

    fn write_typed<B: DiskBlock>(&mut self, index: u32, block: &B) -> Result<()> {
        self.disk.write_block(index, &block.encode())
    }

    /// Claims the first free block by writing zeros there.
    fn reserve_block(&mut self) -> Result<u32> {
        let Some(index) = self.disk.first_free_from(0) else {
            return Err(FsError::NoSpace);
        };
        self.disk.write_block(index, &[0u8; BLOCK_SIZE])?;
        Ok(index)
    }

    /// Collects every live child entry of the directory chain rooted
    /// at `first`, in slot order across the whole chain.
    fn children(&mut self, first: u32) -> Result<Vec<ChildSlot>> {
        let head = self.read_first_dir(first)?;
        let expected = head.num_entries as usize;
        let mut out = Vec::with_capacity(expected);

        push_live_slots(&mut out, first, &head.children);

        let mut next = head.header.next();
        let mut visited = 0u32;
        while let Some(block) = next {
            visited += 1;
            if visited > self.disk.num_blocks() {
                return Err(FsError::Corruption("directory chain does not terminate"));
            }
            let cont = DirBlock::decode(&self.read_raw(block)?);
            push_live_slots(&mut out, block, &cont.children);
            next = cont.header.next();
        }

        if out.len() < expected {
            return Err(FsError::Corruption("directory chain shorter than num_entries"));
        }
        out.truncate(expected);
        Ok(out)
    }

    /// Finds the entry named `name` in the directory at `dir_block`.
    fn lookup(&mut self, dir_block: u32, name: &str) -> Result<(ChildSlot, Fcb)> {
        for entry in self.children(dir_block)? {
            let head = self.read_head(entry.child)?;
            if head.fcb.name_matches(name) {
                return Ok((entry, head.fcb));
            }
        }
        Err(FsError::NotFound)
    }

    /// Walks to the tail block of the directory chain at `first`.
    /// Returns its index, and its decoded form unless it is the first
    /// block itself.
    fn dir_tail(&mut self, first: u32, head: &FirstDirBlock) -> Result<(u32, Option<DirBlock>)> {
        let mut index = first;
        let mut tail = None;
        let mut next = head.header.next();
        let mut visited = 0u32;
        while let Some(block) = next {
            visited += 1;
            if visited > self.disk.num_blocks() {
                return Err(FsError::Corruption("directory chain does not terminate"));
            }
            let cont = DirBlock::decode(&self.read_raw(block)?);
            index = block;
            next = cont.header.next();
            tail = Some(cont);
        }
        Ok((index, tail))
    }

    /// Places `child` in the first open slot of the directory chain at
    /// `dir_first`, growing the chain by one continuation block when
    /// the tail is full. Bumps `num_entries` and persists every block
    /// it touches.
    fn link_child(&mut self, dir_first: u32, child: u32) -> Result<()> {
        let mut head = self.read_first_dir(dir_first)?;
        // the dense-entry invariant keeps every open slot in the tail
        let (tail_index, mut tail) = self.dir_tail(dir_first, &head)?;

        match &mut tail {
            None => {
                if let Some(open) = first_open_slot(&head.children) {
                    head.children[open] = child;
                    head.num_entries += 1;
                    return self.write_typed(dir_first, &head);
                }
            }
            Some(block) => {
                if let Some(open) = first_open_slot(&block.children) {
                    block.children[open] = child;
                    self.write_typed(tail_index, block)?;
                    head.num_entries += 1;
                    return self.write_typed(dir_first, &head);
                }
            }
        }

        // every slot in the tail is taken: grow the chain
        let grown = self.reserve_block()?;
        let tail_position = match &tail {
            None => head.header.block_in_file,
            Some(block) => block.header.block_in_file,
        };
        let mut cont = DirBlock {
            header: BlockHeader {
                previous_block: tail_index,
                next_block: NONE_BLOCK,
                block_in_file: tail_position + 1,
            },
            children: [NONE_BLOCK; DIR_SLOTS],
        };
        cont.children[0] = child;
        self.write_typed(grown, &cont)?;

        match tail {
            None => head.header.next_block = grown,
            Some(mut block) => {
                block.header.next_block = grown;
                self.write_typed(tail_index, &block)?;
            }
        }
        head.num_entries += 1;
        head.fcb.size_blocks += 1;
        self.write_typed(dir_first, &head)?;

        debug!("directory at block {dir_first} grew continuation block {grown}");
        Ok(())
    }

    /// Frees every block reachable from the chain at `first`,
    /// recursing into child chains when the head is a directory.
    fn remove_chain(&mut self, first: u32) -> Result<()> {
        let head = self.read_head(first)?;
        if head.fcb.is_dir() {
            // depth is bounded by the block count
            for entry in self.children(first)? {
                self.remove_chain(entry.child)?;
            }
        }

        // continuation blocks first, the head last
        let mut next = head.header.next();
        let mut visited = 0u32;
        while let Some(block) = next {
            visited += 1;
            if visited > self.disk.num_blocks() {
                return Err(FsError::Corruption("chain does not terminate"));
            }
            next = BlockHeader::decode(&self.read_raw(block)?).next();
            self.disk.free_block(block)?;
        }
        self.disk.free_block(first)?;
        Ok(())
    }

    /// Overwrites one slot of the directory chain at `dir_first`.
    fn set_child_slot(&mut self, dir_first: u32, holder: u32, slot: usize, value: u32) -> Result<()> {
        if holder == dir_first {
            let mut head = self.read_first_dir(dir_first)?;
            head.children[slot] = value;
            self.write_typed(dir_first, &head)
        } else {
            let mut block = DirBlock::decode(&self.read_raw(holder)?);
            block.children[slot] = value;
            self.write_typed(holder, &block)
        }
    }

    /// Removes the entry for `child` from the directory at
    /// `parent_first`, keeping the entry array dense: the chain's last
    /// entry moves into the vacated slot and the tail slot is blanked.
    fn unlink_child(&mut self, parent_first: u32, child: u32) -> Result<()> {
        let entries = self.children(parent_first)?;
        let position = entries
            .iter()
            .position(|entry| entry.child == child)
            .ok_or(FsError::Corruption("removed entry missing from its directory"))?;
        let vacated = entries[position];
        let last = entries[entries.len() - 1];

        if vacated.holder == last.holder && vacated.slot == last.slot {
            self.set_child_slot(parent_first, last.holder, last.slot, NONE_BLOCK)?;
        } else {
            self.set_child_slot(parent_first, vacated.holder, vacated.slot, last.child)?;
            self.set_child_slot(parent_first, last.holder, last.slot, NONE_BLOCK)?;
        }

        let mut head = self.read_first_dir(parent_first)?;
        head.num_entries -= 1;
        self.write_typed(parent_first, &head)?;

        self.trim_dir_tail(parent_first)
    }

    /// Frees the tail continuation block of the directory at `first`
    /// if it no longer holds any entry, detaching it from the block
    /// before it.
    fn trim_dir_tail(&mut self, first: u32) -> Result<()> {
        let mut head = self.read_first_dir(first)?;
        let Some(mut cursor) = head.header.next() else {
            return Ok(());
        };

        let mut prev_index = first;
        let mut block = DirBlock::decode(&self.read_raw(cursor)?);
        let mut visited = 0u32;
        while let Some(next) = block.header.next() {
            visited += 1;
            if visited > self.disk.num_blocks() {
                return Err(FsError::Corruption("directory chain does not terminate"));
            }
            prev_index = cursor;
            cursor = next;
            block = DirBlock::decode(&self.read_raw(cursor)?);
        }

        if block.children.iter().any(|&slot| slot != NONE_BLOCK) {
            return Ok(());
        }

        if prev_index == first {
            head.header.next_block = NONE_BLOCK;
        } else {
            let mut prev = DirBlock::decode(&self.read_raw(prev_index)?);
            prev.header.next_block = NONE_BLOCK;
            self.write_typed(prev_index, &prev)?;
        }
        head.fcb.size_blocks -= 1;
        self.write_typed(first, &head)?;
        self.disk.free_block(cursor)?;

        debug!("freed empty directory continuation block {cursor}");
        Ok(())
    }
}

fn claim(owned: &mut [bool], block: u32) -> Result<()> {
    if owned[block as usize] {
        return Err(FsError::Corruption("block belongs to more than one chain"));
    }
    owned[block as usize] = true;
    Ok(())
}

fn first_open_slot(children: &[u32]) -> Option<usize> {
    children.iter().position(|&slot| slot == NONE_BLOCK)
}

fn push_live_slots(out: &mut Vec<ChildSlot>, holder: u32, children: &[u32]) {
    for (slot, &child) in children.iter().enumerate() {
        if child != NONE_BLOCK {
            out.push(ChildSlot { child, holder, slot });
        }
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > NAME_SIZE {
        return Err(FsError::BadArgument("name must be 1 to 128 bytes"));
    }
    if name.as_bytes().contains(&0) {
        return Err(FsError::BadArgument("name may not contain NUL"));
    }
    if name == "/" || name == ".." {
        return Err(FsError::BadArgument("reserved name"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation() {
        assert!(check_name("a").is_ok());
        assert!(check_name(&"x".repeat(NAME_SIZE)).is_ok());

        assert!(check_name("").is_err());
        assert!(check_name(&"x".repeat(NAME_SIZE + 1)).is_err());
        assert!(check_name("bad\0name").is_err());
        assert!(check_name("/").is_err());
        assert!(check_name("..").is_err());
    }

    #[test]
    fn open_slot_scan() {
        assert_eq!(first_open_slot(&[NONE_BLOCK, 3]), Some(0));
        assert_eq!(first_open_slot(&[3, 4, NONE_BLOCK]), Some(2));
        assert_eq!(first_open_slot(&[3, 4]), None);
    }
}
