use filemesh_bits::BitBuffer;
use glam::{Vec2, Vec3};

pub fn null_terminated_prefix(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.is_empty() {
        return None;
    }
    bytes.splitn(2, |&b| b == 0).next()
}

/// Splits a blob of NUL-terminated names. A missing final terminator is
/// tolerated, invalid UTF-8 is replaced.
pub fn split_names(blob: &[u8]) -> Vec<String> {
    let mut pieces: Vec<&[u8]> = blob.split(|&b| b == 0).collect();
    if pieces.last().map_or(false, |last| last.is_empty()) {
        pieces.pop();
    }

    pieces
        .into_iter()
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect()
}

/// Concatenates names into a NUL-terminated blob, returning each name's
/// offset into it.
pub fn join_names<'a>(names: impl IntoIterator<Item = &'a str>) -> (Vec<u8>, Vec<usize>) {
    let mut blob = Vec::new();
    let mut offsets = Vec::new();

    for name in names {
        offsets.push(blob.len());
        blob.extend_from_slice(name.as_bytes());
        blob.push(0);
    }

    (blob, offsets)
}

/// Capacity to reserve for `count` records of `record_bits` each, bounded by
/// what is left in the buffer so garbage counts can't force huge allocations.
pub fn capacity_hint(buffer: &BitBuffer, count: usize, record_bits: usize) -> usize {
    count.min(buffer.remaining() / record_bits.max(1))
}

/// Little-endian field readers used by the mesh layout.
pub trait ReadExt {
    fn read_u8(&mut self) -> u8;
    fn read_u16(&mut self) -> u16;
    fn read_u32(&mut self) -> u32;
    fn read_i32(&mut self) -> i32;
    fn read_vec2(&mut self) -> Vec2;
    fn read_vec3(&mut self) -> Vec3;
    fn skip_bytes(&mut self, count: usize);
}

impl ReadExt for BitBuffer {
    fn read_u8(&mut self) -> u8 {
        self.read_unit(8) as u8
    }

    fn read_u16(&mut self) -> u16 {
        self.read_unit(16) as u16
    }

    fn read_u32(&mut self) -> u32 {
        self.read_unit(32)
    }

    fn read_i32(&mut self) -> i32 {
        self.read_int(32) as i32
    }

    fn read_vec2(&mut self) -> Vec2 {
        let x = self.read_f32();
        let y = self.read_f32();
        Vec2::new(x, y)
    }

    fn read_vec3(&mut self) -> Vec3 {
        let x = self.read_f32();
        let y = self.read_f32();
        let z = self.read_f32();
        Vec3::new(x, y, z)
    }

    fn skip_bytes(&mut self, count: usize) {
        self.read_pad(count * 8);
    }
}

pub trait WriteExt {
    fn write_u8(&mut self, value: u8);
    fn write_u16(&mut self, value: u16);
    fn write_u32(&mut self, value: u32);
    fn write_i32(&mut self, value: i32);
    fn write_vec2(&mut self, value: Vec2);
    fn write_vec3(&mut self, value: Vec3);
}

impl WriteExt for BitBuffer {
    fn write_u8(&mut self, value: u8) {
        self.write_unit(8, value.into());
    }

    fn write_u16(&mut self, value: u16) {
        self.write_unit(16, value.into());
    }

    fn write_u32(&mut self, value: u32) {
        self.write_unit(32, value);
    }

    fn write_i32(&mut self, value: i32) {
        self.write_int(32, value.into());
    }

    fn write_vec2(&mut self, value: Vec2) {
        self.write_f32(value.x);
        self.write_f32(value.y);
    }

    fn write_vec3(&mut self, value: Vec3) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_blob() {
        let (blob, offsets) = join_names(["Root", "", "Head"]);
        assert_eq!(blob, b"Root\0\0Head\0");
        assert_eq!(offsets, vec![0, 5, 6]);
        assert_eq!(split_names(&blob), vec!["Root", "", "Head"]);
    }

    #[test]
    fn split_tolerates_missing_terminator() {
        assert_eq!(split_names(b"a\0bc"), vec!["a", "bc"]);
        assert!(split_names(b"").is_empty());
        assert_eq!(split_names(b"\xffJaw\0"), vec!["\u{fffd}Jaw"]);
    }

    #[test]
    fn prefix_stops_at_nul() {
        assert_eq!(null_terminated_prefix(b"Head\0Root"), Some(&b"Head"[..]));
        assert_eq!(null_terminated_prefix(b"Head"), Some(&b"Head"[..]));
        assert_eq!(null_terminated_prefix(b""), None);
    }

    #[test]
    fn fields_are_little_endian() {
        let mut buffer = BitBuffer::new();
        buffer.write_u16(0x0102);
        buffer.write_i32(-2);
        buffer.write_vec2(Vec2::new(1.0, 2.0));
        assert_eq!(&buffer.to_bytes()[..6], &[0x02, 0x01, 0xfe, 0xff, 0xff, 0xff]);

        buffer.set_index(0);
        assert_eq!(buffer.read_u16(), 0x0102);
        assert_eq!(buffer.read_i32(), -2);
        assert_eq!(buffer.read_vec2(), Vec2::new(1.0, 2.0));
    }
}
