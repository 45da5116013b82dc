#![warn(clippy::all, clippy::pedantic)]
// widths are asserted before every narrowing cast
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

//! A growable, bit-addressed buffer with a single read/write cursor.
//!
//! Bit `n` of the buffer lives in bit `n % 32` of storage unit `n / 32`, so the
//! serialized form produced by [`BitBuffer::to_bytes`] is little-endian both in
//! byte order and in bit order.
//!
//! Reads never fail: bits past the logical length read as zero. Like writes,
//! reads move the cursor and extend the length when the cursor passes it.
//! Width arguments outside the documented ranges are programming errors and
//! panic.

const UNIT_BITS: usize = 32;

/// Widest integer that survives a round trip through `f64`.
pub const MAX_INT_BITS: usize = 53;

fn mask(value: u32, size: usize) -> u32 {
    if size >= UNIT_BITS {
        value
    } else {
        value & ((1 << size) - 1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitBuffer {
    units: Vec<u32>,
    len: usize,
    index: usize,
}

impl BitBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a byte string. The cursor starts at bit 0 and the length is
    /// `bytes.len() * 8`.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let units = bytes
            .chunks(4)
            .map(|chunk| {
                let mut word = [0; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                u32::from_le_bytes(word)
            })
            .collect();

        Self {
            units,
            len: bytes.len() * 8,
            index: 0,
        }
    }

    fn unit(&self, i: usize) -> u32 {
        self.units.get(i).copied().unwrap_or(0)
    }

    fn unit_mut(&mut self, i: usize) -> &mut u32 {
        if i >= self.units.len() {
            self.units.resize(i + 1, 0);
        }
        &mut self.units[i]
    }

    fn advance(&mut self, size: usize) {
        self.index += size;
        if self.index > self.len {
            self.len = self.index;
        }
    }

    /// Writes the low `size` bits of `value`.
    ///
    /// # Panics
    ///
    /// Panics if `size > 32`.
    pub fn write_unit(&mut self, size: usize, value: u32) {
        assert!(size <= UNIT_BITS, "unit width {size} out of range 0..=32");
        if size == 0 {
            return;
        }

        let value = mask(value, size);
        let offset = self.index % UNIT_BITS;
        let i = self.index / UNIT_BITS;

        let low_bits = (UNIT_BITS - offset).min(size);
        let low_mask = mask(u32::MAX, low_bits) << offset;
        let unit = self.unit_mut(i);
        *unit = (*unit & !low_mask) | ((value << offset) & low_mask);

        if size > low_bits {
            // straddles a unit boundary, so 0 < low_bits < 32 here
            let high_mask = mask(u32::MAX, size - low_bits);
            let unit = self.unit_mut(i + 1);
            *unit = (*unit & !high_mask) | (value >> low_bits);
        }

        self.advance(size);
    }

    /// Reads `size` bits as an unsigned value. Bits past the length read as
    /// zero.
    ///
    /// # Panics
    ///
    /// Panics if `size > 32`.
    pub fn read_unit(&mut self, size: usize) -> u32 {
        assert!(size <= UNIT_BITS, "unit width {size} out of range 0..=32");
        if size == 0 {
            return 0;
        }

        let offset = self.index % UNIT_BITS;
        let i = self.index / UNIT_BITS;

        let mut value = self.unit(i) >> offset;
        let low_bits = UNIT_BITS - offset;
        if size > low_bits {
            value |= self.unit(i + 1) << low_bits;
        }

        let available = self.len.saturating_sub(self.index).min(size);
        self.advance(size);

        mask(value, available)
    }

    /// # Panics
    ///
    /// Panics if `size > 53`.
    pub fn write_uint(&mut self, size: usize, value: u64) {
        assert!(size <= MAX_INT_BITS, "int width {size} out of range 0..=53");
        if size > UNIT_BITS {
            self.write_unit(UNIT_BITS, value as u32);
            self.write_unit(size - UNIT_BITS, (value >> UNIT_BITS) as u32);
        } else {
            self.write_unit(size, value as u32);
        }
    }

    /// # Panics
    ///
    /// Panics if `size > 53`.
    pub fn read_uint(&mut self, size: usize) -> u64 {
        assert!(size <= MAX_INT_BITS, "int width {size} out of range 0..=53");
        if size > UNIT_BITS {
            let low = u64::from(self.read_unit(UNIT_BITS));
            let high = u64::from(self.read_unit(size - UNIT_BITS));
            low | (high << UNIT_BITS)
        } else {
            u64::from(self.read_unit(size))
        }
    }

    /// Writes `value` as a `size`-bit two's complement integer, wrapping
    /// modulo `2^size`.
    ///
    /// # Panics
    ///
    /// Panics if `size > 53`.
    pub fn write_int(&mut self, size: usize, value: i64) {
        self.write_uint(size, value as u64);
    }

    /// # Panics
    ///
    /// Panics if `size > 53`.
    pub fn read_int(&mut self, size: usize) -> i64 {
        let value = self.read_uint(size);
        if size > 0 && value >= 1 << (size - 1) {
            value as i64 - (1 << size)
        } else {
            value as i64
        }
    }

    /// # Panics
    ///
    /// Panics unless `size` is 32 or 64.
    pub fn write_float(&mut self, size: usize, value: f64) {
        match size {
            32 => self.write_bytes(&(value as f32).to_le_bytes()),
            64 => self.write_bytes(&value.to_le_bytes()),
            _ => panic!("float width {size} is not 32 or 64"),
        }
    }

    /// # Panics
    ///
    /// Panics unless `size` is 32 or 64.
    pub fn read_float(&mut self, size: usize) -> f64 {
        match size {
            32 => {
                let mut bytes = [0; 4];
                self.read_into(&mut bytes);
                f64::from(f32::from_le_bytes(bytes))
            }
            64 => {
                let mut bytes = [0; 8];
                self.read_into(&mut bytes);
                f64::from_le_bytes(bytes)
            }
            _ => panic!("float width {size} is not 32 or 64"),
        }
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn read_f32(&mut self) -> f32 {
        let mut bytes = [0; 4];
        self.read_into(&mut bytes);
        f32::from_le_bytes(bytes)
    }

    /// Writes a signed fixed-point number with `integer` integer bits and
    /// `fraction` fractional bits.
    ///
    /// # Panics
    ///
    /// Panics if `integer + fraction > 53`.
    pub fn write_fixed(&mut self, integer: usize, fraction: usize, value: f64) {
        let size = integer + fraction;
        assert!(size <= MAX_INT_BITS, "fixed width {size} out of range 0..=53");
        let stored = (value * 2f64.powi(fraction as i32)).round();
        self.write_int(size, stored as i64);
    }

    /// # Panics
    ///
    /// Panics if `integer + fraction > 53`.
    pub fn read_fixed(&mut self, integer: usize, fraction: usize) -> f64 {
        let size = integer + fraction;
        assert!(size <= MAX_INT_BITS, "fixed width {size} out of range 0..=53");
        self.read_int(size) as f64 / 2f64.powi(fraction as i32)
    }

    /// # Panics
    ///
    /// Panics if `integer + fraction > 53`.
    pub fn write_ufixed(&mut self, integer: usize, fraction: usize, value: f64) {
        let size = integer + fraction;
        assert!(size <= MAX_INT_BITS, "fixed width {size} out of range 0..=53");
        let stored = (value * 2f64.powi(fraction as i32)).round();
        self.write_uint(size, stored as u64);
    }

    /// # Panics
    ///
    /// Panics if `integer + fraction > 53`.
    pub fn read_ufixed(&mut self, integer: usize, fraction: usize) -> f64 {
        let size = integer + fraction;
        assert!(size <= MAX_INT_BITS, "fixed width {size} out of range 0..=53");
        self.read_uint(size) as f64 / 2f64.powi(fraction as i32)
    }

    fn put_byte(&mut self, byte: u8) {
        let shift = self.index % UNIT_BITS;
        let unit = self.unit_mut(self.index / UNIT_BITS);
        *unit = (*unit & !(0xff << shift)) | (u32::from(byte) << shift);
        self.advance(8);
    }

    fn take_byte(&mut self) -> u8 {
        let available = self.len.saturating_sub(self.index).min(8);
        let byte = self.unit(self.index / UNIT_BITS) >> (self.index % UNIT_BITS);
        self.advance(8);
        mask(byte, available) as u8
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.index % 8 != 0 {
            for &byte in bytes {
                self.write_unit(8, byte.into());
            }
            return;
        }

        let mut rest = bytes;
        while self.index % UNIT_BITS != 0 {
            match rest.split_first() {
                Some((&byte, tail)) => {
                    self.put_byte(byte);
                    rest = tail;
                }
                None => return,
            }
        }

        let chunks = rest.chunks_exact(4);
        let tail = chunks.remainder();
        for chunk in chunks {
            let i = self.index / UNIT_BITS;
            *self.unit_mut(i) = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.advance(UNIT_BITS);
        }
        for &byte in tail {
            self.put_byte(byte);
        }
    }

    fn read_into(&mut self, out: &mut [u8]) {
        if self.index % 8 != 0 {
            for byte in out {
                *byte = self.read_unit(8) as u8;
            }
            return;
        }

        let mut rest = out;
        while !rest.is_empty() {
            if self.index % UNIT_BITS == 0 && rest.len() >= 4 && self.fits(UNIT_BITS) {
                let (head, tail) = rest.split_at_mut(4);
                head.copy_from_slice(&self.unit(self.index / UNIT_BITS).to_le_bytes());
                self.advance(UNIT_BITS);
                rest = tail;
            } else {
                let (head, tail) = rest.split_at_mut(1);
                head[0] = self.take_byte();
                rest = tail;
            }
        }
    }

    #[must_use]
    pub fn read_bytes(&mut self, count: usize) -> Vec<u8> {
        let mut bytes = vec![0; count];
        self.read_into(&mut bytes);
        bytes
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_unit(1, value.into());
    }

    pub fn read_bool(&mut self) -> bool {
        self.read_unit(1) != 0
    }

    /// Zero-fills `size` bits.
    pub fn write_pad(&mut self, size: usize) {
        let mut remaining = size;
        while remaining > 0 {
            let step = remaining.min(UNIT_BITS);
            self.write_unit(step, 0);
            remaining -= step;
        }
    }

    /// Skips `size` bits without reading them.
    pub fn read_pad(&mut self, size: usize) {
        self.advance(size);
    }

    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn write_align(&mut self, size: usize) {
        assert!(size > 0, "alignment must be non-zero");
        self.write_pad((size - self.index % size) % size);
    }

    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn read_align(&mut self, size: usize) {
        assert!(size > 0, "alignment must be non-zero");
        self.read_pad((size - self.index % size) % size);
    }

    /// Logical length in bits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Truncates or zero-extends the buffer. The cursor is clamped to the new
    /// length.
    pub fn set_len(&mut self, size: usize) {
        if size < self.len {
            self.units.truncate((size + UNIT_BITS - 1) / UNIT_BITS);
            let partial = size % UNIT_BITS;
            if partial != 0 {
                if let Some(last) = self.units.last_mut() {
                    *last = mask(*last, partial);
                }
            }
        }

        self.len = size;
        if self.index > size {
            self.index = size;
        }
    }

    /// Cursor position in bits.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Moves the cursor. Seeking past the end extends the length.
    pub fn set_index(&mut self, index: usize) {
        self.index = index;
        if index > self.len {
            self.len = index;
        }
    }

    /// Whether `size` more bits can be consumed without passing the end.
    #[must_use]
    pub fn fits(&self, size: usize) -> bool {
        self.index
            .checked_add(size)
            .map_or(false, |end| end <= self.len)
    }

    /// Bits left between the cursor and the end.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.len - self.index
    }

    pub fn reset(&mut self) {
        self.units.clear();
        self.len = 0;
        self.index = 0;
    }

    /// Serializes the buffer into `ceil(len / 8)` bytes. Bits of the final
    /// byte past the length are zero.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let byte_len = (self.len + 7) / 8;
        let mut bytes: Vec<u8> = self
            .units
            .iter()
            .flat_map(|unit| unit.to_le_bytes())
            .take(byte_len)
            .collect();
        bytes.resize(byte_len, 0);

        let partial = self.len % 8;
        if partial != 0 {
            if let Some(last) = bytes.last_mut() {
                *last &= (1 << partial) - 1;
            }
        }

        bytes
    }
}

impl From<&[u8]> for BitBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn assert_cursor_within(buffer: &BitBuffer) {
        assert!(
            buffer.index() <= buffer.len(),
            "cursor {} past length {}",
            buffer.index(),
            buffer.len()
        );
    }

    #[test]
    fn unit_round_trip_all_widths_and_offsets() {
        let values = [0, 1, 0x5a5a_5a5a, 0xdead_beef, u32::MAX];

        for offset in 0..40 {
            for width in 0..=32 {
                for &value in &values {
                    let mut buffer = BitBuffer::new();
                    buffer.write_pad(offset);
                    buffer.write_unit(width, value);
                    assert_cursor_within(&buffer);

                    buffer.set_index(offset);
                    let read = buffer.read_unit(width);
                    assert_eq!(
                        read,
                        mask(value, width),
                        "width {width} at offset {offset}"
                    );
                    assert_eq!(buffer.index(), offset + width);
                }
            }
        }
    }

    #[test]
    fn write_does_not_clobber_neighbours() {
        let mut buffer = BitBuffer::new();
        buffer.write_unit(32, u32::MAX);
        buffer.write_unit(32, u32::MAX);

        buffer.set_index(28);
        buffer.write_unit(8, 0);

        buffer.set_index(0);
        assert_eq!(buffer.read_unit(28), 0x0fff_ffff);
        assert_eq!(buffer.read_unit(8), 0);
        assert_eq!(buffer.read_unit(28), 0x0fff_ffff);
    }

    #[test]
    fn int_wraps_around_width() {
        let mut buffer = BitBuffer::new();
        buffer.write_int(8, -1);
        buffer.write_int(12, -2048);
        buffer.write_int(40, -3);
        buffer.write_uint(53, (1 << 53) - 1);

        buffer.set_index(0);
        assert_eq!(buffer.read_uint(8), 0xff);
        buffer.set_index(0);
        assert_eq!(buffer.read_int(8), -1);
        assert_eq!(buffer.read_int(12), -2048);
        assert_eq!(buffer.read_int(40), -3);
        assert_eq!(buffer.read_uint(53), (1 << 53) - 1);
    }

    #[test]
    fn bytes_round_trip_at_any_offset() {
        let data: Vec<u8> = (0..=255u8).rev().chain(0..17).collect();

        for offset in 0..=40 {
            let mut buffer = BitBuffer::new();
            buffer.write_pad(offset);
            buffer.write_bytes(&data);
            assert_eq!(buffer.len(), offset + data.len() * 8);

            buffer.set_index(offset);
            assert_eq!(buffer.read_bytes(data.len()), data, "offset {offset}");
        }
    }

    #[test]
    fn from_bytes_matches_to_bytes() {
        let data = b"version 4.00\nabc";
        let buffer = BitBuffer::from_bytes(data);
        assert_eq!(buffer.len(), data.len() * 8);
        assert_eq!(buffer.to_bytes(), data);
    }

    #[test]
    fn floats_are_little_endian() {
        let mut buffer = BitBuffer::new();
        buffer.write_f32(1.5);
        buffer.write_float(64, -0.25);
        assert_eq!(&buffer.to_bytes()[..4], &1.5f32.to_le_bytes());

        buffer.set_index(0);
        assert_eq!(buffer.read_float(32), 1.5);
        assert_eq!(buffer.read_float(64), -0.25);
    }

    #[test]
    fn unaligned_floats() {
        let mut buffer = BitBuffer::new();
        buffer.write_bool(true);
        buffer.write_f32(-123.456);
        buffer.write_bool(false);
        buffer.write_float(64, 1e300);

        buffer.set_index(0);
        assert!(buffer.read_bool());
        assert_eq!(buffer.read_f32(), -123.456);
        assert!(!buffer.read_bool());
        assert_eq!(buffer.read_float(64), 1e300);
    }

    #[test]
    fn fixed_point_round_trip() {
        let mut value = -128.0;
        while value < 127.99 {
            let mut buffer = BitBuffer::new();
            buffer.write_fixed(8, 8, value);
            buffer.set_index(0);
            assert_abs_diff_eq!(buffer.read_fixed(8, 8), value, epsilon = 1.0 / 256.0);
            value += 0.37;
        }

        let mut buffer = BitBuffer::new();
        buffer.write_ufixed(4, 12, 3.141_59);
        buffer.set_index(0);
        assert_abs_diff_eq!(buffer.read_ufixed(4, 12), 3.141_59, epsilon = 1.0 / 4096.0);
    }

    #[test]
    fn reads_past_end_are_zero() {
        let mut buffer = BitBuffer::new();
        buffer.write_unit(12, 0xabc);

        assert_eq!(buffer.read_unit(32), 0);
        assert_eq!(buffer.read_uint(53), 0);
        assert_eq!(buffer.read_bytes(5), vec![0; 5]);
        assert_eq!(buffer.read_f32(), 0.0);
        assert_cursor_within(&buffer);

        buffer.set_index(0);
        assert_eq!(buffer.read_unit(12), 0xabc);
    }

    #[test]
    fn straddling_read_masks_unwritten_tail() {
        let mut buffer = BitBuffer::new();
        buffer.write_unit(4, 0xf);

        buffer.set_index(0);
        assert_eq!(buffer.read_unit(8), 0xf);
        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn set_len_truncates_and_clamps_cursor() {
        let mut buffer = BitBuffer::new();
        buffer.write_unit(32, u32::MAX);
        buffer.write_unit(32, u32::MAX);

        buffer.set_len(20);
        assert_eq!(buffer.len(), 20);
        assert_eq!(buffer.index(), 20);

        buffer.set_len(64);
        assert_eq!(buffer.index(), 20);
        buffer.set_index(0);
        assert_eq!(buffer.read_unit(20), 0xfffff);
        assert_eq!(buffer.read_unit(32), 0);
        assert_eq!(buffer.read_unit(12), 0);
    }

    #[test]
    fn to_bytes_truncates_partial_byte() {
        let mut buffer = BitBuffer::new();
        buffer.write_unit(11, 0x7ff);
        assert_eq!(buffer.to_bytes(), vec![0xff, 0x07]);

        buffer.set_len(3);
        assert_eq!(buffer.to_bytes(), vec![0x07]);
    }

    #[test]
    fn pad_and_align() {
        let mut buffer = BitBuffer::new();
        buffer.write_bool(true);
        buffer.write_align(8);
        assert_eq!(buffer.index(), 8);
        buffer.write_align(8);
        assert_eq!(buffer.index(), 8);
        buffer.write_pad(5);
        buffer.write_align(32);
        assert_eq!(buffer.len(), 32);
        assert_eq!(buffer.to_bytes(), vec![1, 0, 0, 0]);

        buffer.set_index(3);
        buffer.read_align(16);
        assert_eq!(buffer.index(), 16);
        buffer.read_pad(24);
        assert_eq!(buffer.len(), 40);
    }

    #[test]
    fn fits_and_reset() {
        let mut buffer = BitBuffer::from_bytes(&[1, 2, 3]);
        assert!(buffer.fits(24));
        assert!(!buffer.fits(25));
        buffer.read_unit(20);
        assert!(buffer.fits(4));
        assert_eq!(buffer.remaining(), 4);

        buffer.reset();
        assert!(buffer.is_empty());
        assert_eq!(buffer.index(), 0);
        assert_eq!(buffer.to_bytes(), Vec::<u8>::new());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn unit_width_is_asserted() {
        BitBuffer::new().write_unit(33, 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn int_width_is_asserted() {
        BitBuffer::new().read_uint(54);
    }
}
