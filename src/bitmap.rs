//! Allocation bitmap primitives.
//!
//! The map holds one byte per block: 0x00 free, 0x01 used. Any other
//! value means the image was damaged outside this library and the
//! block states can no longer be trusted.

use crate::error::{FsError, Result};

/// bitmap byte for a free block
pub const FREE: u8 = 0x00;
/// bitmap byte for a used block
pub const USED: u8 = 0x01;

/// Returns whether the block at `index` is marked used.
pub fn is_used(map: &[u8], index: usize) -> Result<bool> {
    match map[index] {
        FREE => Ok(false),
        USED => Ok(true),
        _ => Err(FsError::Corruption("bitmap byte outside {0, 1}")),
    }
}

/// Marks the block at `index` used or free.
/// Returns the previous state.
pub fn set(map: &mut [u8], index: usize, used: bool) -> Result<bool> {
    let was = is_used(map, index)?;
    map[index] = if used { USED } else { FREE };
    Ok(was)
}

/// Returns the first free index at or after `start`, scanning to the
/// end of the map.
pub fn first_free_from(map: &[u8], start: usize) -> Option<usize> {
    map.get(start..)?
        .iter()
        .position(|&cell| cell == FREE)
        .map(|found| start + found)
}

/// Counts the free cells in the whole map.
pub fn count_free(map: &[u8]) -> Result<u32> {
    let mut free = 0;
    for index in 0..map.len() {
        if !is_used(map, index)? {
            free += 1;
        }
    }
    Ok(free)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_finds_first_free() {
        let map = [USED, USED, FREE, USED, FREE];
        assert_eq!(first_free_from(&map, 0), Some(2));
        assert_eq!(first_free_from(&map, 3), Some(4));
        assert_eq!(first_free_from(&map, 5), None);
    }

    #[test]
    fn scan_on_full_map() {
        let map = [USED; 4];
        assert_eq!(first_free_from(&map, 0), None);
    }

    #[test]
    fn set_reports_previous_state() {
        let mut map = [FREE; 3];
        assert!(!set(&mut map, 1, true).unwrap());
        assert!(set(&mut map, 1, true).unwrap());
        assert!(set(&mut map, 1, false).unwrap());
        assert_eq!(map, [FREE; 3]);
    }

    #[test]
    fn damaged_cell_is_corruption() {
        let mut map = [FREE, 0x07, FREE];
        assert!(matches!(is_used(&map, 1), Err(FsError::Corruption(_))));
        assert!(matches!(set(&mut map, 1, true), Err(FsError::Corruption(_))));
        assert!(matches!(count_free(&map), Err(FsError::Corruption(_))));
    }

    #[test]
    fn count_free_counts() {
        let map = [FREE, USED, FREE, FREE, USED];
        assert_eq!(count_free(&map).unwrap(), 3);
    }
}
