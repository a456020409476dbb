//! Scoped pinning of host memory for upload commands
//!
//! A [`Pinned`] guard borrows plain-old-data for as long as an upload needs a
//! stable address. The borrow keeps the memory from moving or being freed, and
//! the pin ends when the guard drops, including during unwinding.

use bytemuck::Pod;

/// A stable view of host memory
pub struct Pinned<'a> {
    bytes: &'a [u8],
}

/// Pin a single value
pub fn pin_value<T: Pod>(value: &T) -> Pinned<'_> {
    Pinned::from_bytes(bytemuck::bytes_of(value))
}

/// Pin a contiguous batch of values
pub fn pin_slice<T: Pod>(values: &[T]) -> Pinned<'_> {
    Pinned::from_bytes(bytemuck::cast_slice(values))
}

impl<'a> Pinned<'a> {
    fn from_bytes(bytes: &'a [u8]) -> Self {
        log::trace!("Pinned {} bytes at {:p}", bytes.len(), bytes.as_ptr());
        Self { bytes }
    }

    /// Raw address, valid only while the guard is alive
    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

impl Drop for Pinned<'_> {
    fn drop(&mut self) {
        log::trace!("Unpinned {} bytes at {:p}", self.bytes.len(), self.bytes.as_ptr());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct Params {
        scale: f32,
        offset: [f32; 2],
        _pad: f32,
    }

    #[test]
    fn test_pin_slice_exposes_original_address() {
        let data = [1u16, 2, 3, 4];
        let pinned = pin_slice(&data);
        assert_eq!(pinned.as_ptr(), data.as_ptr() as *const u8);
        assert_eq!(pinned.byte_len(), 8);
        assert_eq!(pinned.as_bytes(), bytemuck::cast_slice::<u16, u8>(&data));
    }

    #[test]
    fn test_pin_value_covers_whole_struct() {
        let params = Params { scale: 2.0, offset: [0.5, -0.5], _pad: 0.0 };
        let pinned = pin_value(&params);
        assert_eq!(pinned.byte_len(), std::mem::size_of::<Params>());
        assert_eq!(&pinned.as_bytes()[0..4], &2.0f32.to_ne_bytes());
    }

    #[test]
    fn test_empty_slice() {
        let data: [u32; 0] = [];
        let pinned = pin_slice(&data);
        assert!(pinned.is_empty());
        assert!(pinned.as_bytes().is_empty());
    }

    #[test]
    fn test_pin_released_on_unwind() {
        let data = vec![7u32; 16];
        let result = std::panic::catch_unwind(|| {
            let pinned = pin_slice(&data);
            assert_eq!(pinned.byte_len(), 64);
            panic!("transfer failed");
        });
        assert!(result.is_err());
        // the borrow ended with the guard, so the data can be mutated again
        let mut data = data;
        data[0] = 1;
        assert_eq!(data[0], 1);
    }
}
