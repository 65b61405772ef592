// Image layout:
// [ block count (4 bytes LE) | bitmap (1 byte per block) | 0xFF padding
//   up to a 4096 boundary | payload blocks (512 bytes each) ]

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use log::{debug, trace};
use memmap2::{MmapMut, MmapOptions};

use crate::bitmap;
use crate::error::{FsError, Result};
use crate::param::{BLOCK_SIZE, BLOCKS_PER_WINDOW, PAD_BYTE, WINDOW_SIZE};

/// Outcome of reading a block: free blocks have no contents to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
}

/// One mapped 4096-byte view of the payload region.
struct Window {
    map: MmapMut,
    /// index of the first payload block the view covers
    first_block: u32,
}

/// Block device over a single host file.
///
/// The meta region (count, bitmap, padding) stays mapped for the
/// device's lifetime; the payload is mapped one window at a time, so
/// any block access may unmap the bytes a previous access touched.
/// Block contents are therefore always copied in and out.
pub struct Disk {
    file: File,
    /// count + bitmap + padding, mapped for the device's lifetime
    meta: MmapMut,
    window: Option<Window>,
    num_blocks: u32,
    free_blocks: u32,
    /// byte offset of payload block 0 in the host file
    payload_start: u64,
}

impl Disk {
    /// Creates a device with `num_blocks` payload blocks at `path`,
    /// truncating any existing file. The bitmap starts all-free and no
    /// payload window is mapped.
    pub fn create(path: &Path, num_blocks: u32) -> Result<Self> {
        if num_blocks == 0 {
            return Err(FsError::BadArgument("block count must be at least 1"));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let meta_len = Self::meta_len(num_blocks);
        file.set_len(meta_len as u64 + num_blocks as u64 * BLOCK_SIZE as u64)?;

        // Safety: the image file stays owned by this device for the
        // lifetime of the mapping.
        let mut meta = unsafe { MmapOptions::new().len(meta_len).map_mut(&file)? };

        let bitmap_end = size_of::<u32>() + num_blocks as usize;
        meta[..size_of::<u32>()].copy_from_slice(&num_blocks.to_le_bytes());
        meta[size_of::<u32>()..bitmap_end].fill(bitmap::FREE);
        meta[bitmap_end..].fill(PAD_BYTE);

        debug!("created image at {path:?} with {num_blocks} blocks");

        Ok(Self {
            file,
            meta,
            window: None,
            num_blocks,
            free_blocks: num_blocks,
            payload_start: meta_len as u64,
        })
    }

    /// Reopens an existing device, recomputing the free-block count
    /// from the bitmap. A file shorter than the layout demands is
    /// extended, never truncated.
    pub fn resume(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut count = [0u8; size_of::<u32>()];
        file.read_exact_at(&mut count, 0)?;
        let num_blocks = u32::from_le_bytes(count);
        if num_blocks == 0 {
            return Err(FsError::Corruption("zero block count in image header"));
        }

        let meta_len = Self::meta_len(num_blocks);
        let expected = meta_len as u64 + num_blocks as u64 * BLOCK_SIZE as u64;
        if file.metadata()?.len() < expected {
            file.set_len(expected)?;
        }

        // Safety: as in `create`.
        let meta = unsafe { MmapOptions::new().len(meta_len).map_mut(&file)? };

        let free_blocks =
            bitmap::count_free(&meta[size_of::<u32>()..size_of::<u32>() + num_blocks as usize])?;

        debug!("resumed image at {path:?}: {num_blocks} blocks, {free_blocks} free");

        Ok(Self {
            file,
            meta,
            window: None,
            num_blocks,
            free_blocks,
            payload_start: meta_len as u64,
        })
    }

    /// Copies the block at `index` into `dst`. Returns
    /// [`Presence::Absent`] without touching `dst` if the bitmap says
    /// the block is free.
    pub fn read_block(&mut self, index: u32, dst: &mut [u8; BLOCK_SIZE]) -> Result<Presence> {
        self.check_index(index)?;
        if !bitmap::is_used(self.bitmap(), index as usize)? {
            return Ok(Presence::Absent);
        }
        let view = self.block_view(index)?;
        dst.copy_from_slice(view);
        Ok(Presence::Present)
    }

    /// Copies `src` into the block at `index`, marking it used.
    pub fn write_block(&mut self, index: u32, src: &[u8; BLOCK_SIZE]) -> Result<()> {
        self.check_index(index)?;
        let view = self.block_view(index)?;
        view.copy_from_slice(src);
        let index = index as usize;
        if !bitmap::set(self.bitmap_mut(), index, true)? {
            self.free_blocks -= 1;
            trace!("block {index} allocated, {} free", self.free_blocks);
        }
        Ok(())
    }

    /// Marks the block at `index` free. The payload is not cleared.
    pub fn free_block(&mut self, index: u32) -> Result<()> {
        self.check_index(index)?;
        if bitmap::set(self.bitmap_mut(), index as usize, false)? {
            self.free_blocks += 1;
            trace!("block {index} freed, {} free", self.free_blocks);
        }
        Ok(())
    }

    /// Returns the first free block at or after `start`, if any.
    pub fn first_free_from(&self, start: u32) -> Option<u32> {
        bitmap::first_free_from(self.bitmap(), start as usize).map(|index| index as u32)
    }

    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    pub fn free_blocks(&self) -> u32 {
        self.free_blocks
    }

    /// Flushes both mappings to the host file.
    pub fn flush(&self) -> Result<()> {
        self.meta.flush()?;
        if let Some(window) = &self.window {
            window.map.flush()?;
        }
        Ok(())
    }

    /// Flushes, then unmaps both regions and closes the descriptor.
    pub fn close(self) -> Result<()> {
        self.flush()
        // mappings and fd drop here
    }

    fn check_index(&self, index: u32) -> Result<()> {
        if index >= self.num_blocks {
            return Err(FsError::BadArgument("block index out of range"));
        }
        Ok(())
    }

    /// Meta region length: count plus bitmap, rounded up to a page.
    fn meta_len(num_blocks: u32) -> usize {
        (size_of::<u32>() + num_blocks as usize).next_multiple_of(WINDOW_SIZE)
    }

    fn bitmap(&self) -> &[u8] {
        &self.meta[size_of::<u32>()..size_of::<u32>() + self.num_blocks as usize]
    }

    fn bitmap_mut(&mut self) -> &mut [u8] {
        &mut self.meta[size_of::<u32>()..size_of::<u32>() + self.num_blocks as usize]
    }

    /// Maps the window covering `index` if it is not the current one
    /// and returns the block's bytes. The slice dies with the next
    /// block access.
    fn block_view(&mut self, index: u32) -> Result<&mut [u8]> {
        let first = index / BLOCKS_PER_WINDOW * BLOCKS_PER_WINDOW;
        if self.window.as_ref().is_none_or(|w| w.first_block != first) {
            trace!("mapping payload window at block {first}");
            let offset = self.payload_start + u64::from(first) * BLOCK_SIZE as u64;
            // the last window is shorter when the count is not a
            // multiple of BLOCKS_PER_WINDOW
            let len = WINDOW_SIZE.min((self.num_blocks - first) as usize * BLOCK_SIZE);
            // Safety: as in `create`; the previous window unmaps on drop.
            let map = unsafe { MmapOptions::new().offset(offset).len(len).map_mut(&self.file)? };
            self.window = Some(Window { map, first_block: first });
        }
        let window = self.window.as_mut().expect("window mapped above");
        let at = (index - window.first_block) as usize * BLOCK_SIZE;
        Ok(&mut window.map[at..at + BLOCK_SIZE])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        (dir, path)
    }

    fn pattern(fill: u8) -> [u8; BLOCK_SIZE] {
        [fill; BLOCK_SIZE]
    }

    #[test]
    fn create_lays_out_the_image() {
        let (_dir, path) = scratch("disk.img");
        let disk = Disk::create(&path, 8).unwrap();
        assert_eq!(disk.num_blocks(), 8);
        assert_eq!(disk.free_blocks(), 8);
        disk.close().unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(raw.len(), 4096 + 8 * BLOCK_SIZE);
        assert_eq!(raw[..4], 8u32.to_le_bytes());
        assert!(raw[4..12].iter().all(|&b| b == bitmap::FREE));
        assert!(raw[12..4096].iter().all(|&b| b == PAD_BYTE));
    }

    #[test]
    fn zero_blocks_is_rejected() {
        let (_dir, path) = scratch("disk.img");
        assert!(matches!(
            Disk::create(&path, 0),
            Err(FsError::BadArgument(_))
        ));
    }

    #[test]
    fn read_of_free_block_reports_absent() {
        let (_dir, path) = scratch("disk.img");
        let mut disk = Disk::create(&path, 8).unwrap();

        let mut dst = pattern(0x5A);
        assert_eq!(disk.read_block(3, &mut dst).unwrap(), Presence::Absent);
        // dst must be untouched
        assert_eq!(dst, pattern(0x5A));
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_dir, path) = scratch("disk.img");
        let mut disk = Disk::create(&path, 8).unwrap();

        disk.write_block(5, &pattern(0xC3)).unwrap();
        assert_eq!(disk.free_blocks(), 7);

        let mut dst = pattern(0);
        assert_eq!(disk.read_block(5, &mut dst).unwrap(), Presence::Present);
        assert_eq!(dst, pattern(0xC3));

        // rewriting an allocated block does not change the counter
        disk.write_block(5, &pattern(0x11)).unwrap();
        assert_eq!(disk.free_blocks(), 7);
    }

    #[test]
    fn reads_across_window_boundaries() {
        let (_dir, path) = scratch("disk.img");
        let mut disk = Disk::create(&path, 20).unwrap();

        // blocks 7, 8 and 19 live in three different windows
        for &(index, fill) in &[(7u32, 0x17u8), (8, 0x18), (19, 0x19)] {
            disk.write_block(index, &pattern(fill)).unwrap();
        }
        for &(index, fill) in &[(7u32, 0x17u8), (8, 0x18), (19, 0x19)] {
            let mut dst = pattern(0);
            assert_eq!(disk.read_block(index, &mut dst).unwrap(), Presence::Present);
            assert_eq!(dst, pattern(fill), "block {index}");
        }
    }

    #[test]
    fn short_final_window() {
        let (_dir, path) = scratch("disk.img");
        // 12 blocks: the second window covers only 4 of them
        let mut disk = Disk::create(&path, 12).unwrap();
        disk.write_block(11, &pattern(0xEE)).unwrap();

        let mut dst = pattern(0);
        assert_eq!(disk.read_block(11, &mut dst).unwrap(), Presence::Present);
        assert_eq!(dst, pattern(0xEE));
    }

    #[test]
    fn free_block_releases() {
        let (_dir, path) = scratch("disk.img");
        let mut disk = Disk::create(&path, 8).unwrap();

        disk.write_block(2, &pattern(1)).unwrap();
        assert_eq!(disk.free_blocks(), 7);

        disk.free_block(2).unwrap();
        assert_eq!(disk.free_blocks(), 8);
        // freeing twice is a no-op
        disk.free_block(2).unwrap();
        assert_eq!(disk.free_blocks(), 8);

        let mut dst = pattern(0);
        assert_eq!(disk.read_block(2, &mut dst).unwrap(), Presence::Absent);
    }

    #[test]
    fn out_of_range_is_bad_argument() {
        let (_dir, path) = scratch("disk.img");
        let mut disk = Disk::create(&path, 8).unwrap();
        let mut buf = pattern(0);

        assert!(matches!(
            disk.read_block(8, &mut buf),
            Err(FsError::BadArgument(_))
        ));
        assert!(matches!(
            disk.write_block(100, &buf),
            Err(FsError::BadArgument(_))
        ));
        assert!(matches!(disk.free_block(8), Err(FsError::BadArgument(_))));
    }

    #[test]
    fn first_free_scans_from_start() {
        let (_dir, path) = scratch("disk.img");
        let mut disk = Disk::create(&path, 8).unwrap();

        disk.write_block(0, &pattern(0)).unwrap();
        disk.write_block(1, &pattern(0)).unwrap();
        disk.write_block(3, &pattern(0)).unwrap();

        assert_eq!(disk.first_free_from(0), Some(2));
        assert_eq!(disk.first_free_from(3), Some(4));
        assert_eq!(disk.first_free_from(8), None);

        for index in 0..8 {
            disk.write_block(index, &pattern(0)).unwrap();
        }
        assert_eq!(disk.first_free_from(0), None);
    }

    #[test]
    fn resume_recomputes_free_count() {
        let (_dir, path) = scratch("disk.img");
        let mut disk = Disk::create(&path, 10).unwrap();
        disk.write_block(0, &pattern(0xAA)).unwrap();
        disk.write_block(9, &pattern(0xBB)).unwrap();
        disk.close().unwrap();

        let mut disk = Disk::resume(&path).unwrap();
        assert_eq!(disk.num_blocks(), 10);
        assert_eq!(disk.free_blocks(), 8);

        let mut dst = pattern(0);
        assert_eq!(disk.read_block(9, &mut dst).unwrap(), Presence::Present);
        assert_eq!(dst, pattern(0xBB));
    }

    #[test]
    fn resume_rejects_damaged_bitmap() {
        let (_dir, path) = scratch("disk.img");
        Disk::create(&path, 8).unwrap().close().unwrap();

        // poke a nonsense state byte for block 2
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.write_at(&[0x42], 4 + 2).unwrap();

        assert!(matches!(
            Disk::resume(&path),
            Err(FsError::Corruption(_))
        ));
    }

    #[test]
    fn read_rejects_damaged_bitmap() {
        let (_dir, path) = scratch("disk.img");
        let mut disk = Disk::create(&path, 8).unwrap();

        // the meta mapping is shared with the file, so an out-of-band
        // write shows up in the mapped bitmap
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.write_at(&[0x42], 4 + 5).unwrap();

        let mut dst = pattern(0);
        assert!(matches!(
            disk.read_block(5, &mut dst),
            Err(FsError::Corruption(_))
        ));
    }
}
