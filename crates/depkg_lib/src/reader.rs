use byteorder::{ByteOrder, LittleEndian};

use crate::tables::{VER_NAME_NUMBER, VER_WIDE_OBJECT_INDEX};
use crate::{BuildDescriptor, ScriptError};

/// Positioned cursor over a raw script-body blob.
///
/// All multi-byte values are little-endian. The build descriptor gates the
/// encoding of object and name references, which changed across package
/// versions.
pub struct ScriptReader<'a> {
    buf: &'a [u8],
    pos: usize,
    build: BuildDescriptor,
}

impl<'a> ScriptReader<'a> {
    pub fn new(buf: &'a [u8], build: BuildDescriptor) -> Self {
        Self { buf, pos: 0, build }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ScriptError> {
        if self.remaining() < n {
            return Err(ScriptError::Truncated {
                pos: self.pos,
                need: n,
                remaining: self.remaining(),
            });
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn get_u8(&mut self) -> Result<u8, ScriptError> {
        if self.remaining() < 1 {
            return Err(ScriptError::Eof(self.pos));
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn get_u16(&mut self) -> Result<u16, ScriptError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn get_u32(&mut self) -> Result<u32, ScriptError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn get_i32(&mut self) -> Result<i32, ScriptError> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn get_f32(&mut self) -> Result<f32, ScriptError> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    /// Variable-length signed index: bit 7 of the first byte is the sign,
    /// bit 6 a continuation flag over the low 6 bits; subsequent bytes carry
    /// 7 value bits each with bit 7 as the continuation flag.
    pub fn get_compact_index(&mut self) -> Result<i32, ScriptError> {
        let start = self.pos;
        let b0 = self.get_u8()?;
        let negative = b0 & 0x80 != 0;
        let mut value = (b0 & 0x3F) as i64;
        if b0 & 0x40 != 0 {
            let mut shift = 6u32;
            loop {
                let b = self.get_u8()?;
                value |= ((b & 0x7F) as i64) << shift;
                if b & 0x80 == 0 {
                    break;
                }
                shift += 7;
                if shift > 27 {
                    return Err(ScriptError::MalformedCompactIndex(start));
                }
            }
        }
        Ok(if negative { -value as i32 } else { value as i32 })
    }

    /// NUL-terminated narrow string.
    pub fn get_string(&mut self) -> Result<String, ScriptError> {
        let mut bytes = Vec::new();
        loop {
            let b = self.get_u8()?;
            if b == 0 {
                break;
            }
            bytes.push(b);
        }
        Ok(String::from_utf8_lossy(&bytes).to_string())
    }

    /// NUL-terminated string of 16-bit units.
    pub fn get_unicode_string(&mut self) -> Result<String, ScriptError> {
        let mut out = String::new();
        loop {
            let c = self.get_u16()?;
            if c == 0 {
                break;
            }
            out.push(char::from_u32(c as u32).unwrap_or('\u{FFFD}'));
        }
        Ok(out)
    }

    /// Object reference: compact index in old packages, plain i32 later.
    pub fn get_object_index(&mut self) -> Result<i32, ScriptError> {
        if self.build.package_version < VER_WIDE_OBJECT_INDEX {
            self.get_compact_index()
        } else {
            self.get_i32()
        }
    }

    /// Name reference: table index plus, in later packages, an instance
    /// number that only disambiguates duplicates and never affects dispatch.
    pub fn get_name_index(&mut self) -> Result<(u32, u32), ScriptError> {
        let index = self.get_u32()?;
        let number = if self.build.package_version >= VER_NAME_NUMBER {
            self.get_u32()?
        } else {
            0
        };
        Ok((index, number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BuildFamily;

    fn build(version: u16) -> BuildDescriptor {
        BuildDescriptor {
            package_version: version,
            licensee_version: 0,
            family: BuildFamily::Mainline,
        }
    }

    #[test]
    fn fixed_width_reads() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let mut r = ScriptReader::new(&data, build(512));
        assert_eq!(r.get_u8().unwrap(), 0x01);
        assert_eq!(r.get_u16().unwrap(), 0x0302);
        assert_eq!(r.get_u32().unwrap(), 0x07060504);
        assert!(r.is_empty());
        assert!(matches!(r.get_u8(), Err(ScriptError::Eof(7))));
    }

    #[test]
    fn truncated_multibyte_read() {
        let data = [0x01, 0x02];
        let mut r = ScriptReader::new(&data, build(512));
        match r.get_u32() {
            Err(ScriptError::Truncated { pos, need, remaining }) => {
                assert_eq!((pos, need, remaining), (0, 4, 2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn compact_index_small_values() {
        let data = [0x00, 0x05, 0x85];
        let mut r = ScriptReader::new(&data, build(100));
        assert_eq!(r.get_compact_index().unwrap(), 0);
        assert_eq!(r.get_compact_index().unwrap(), 5);
        assert_eq!(r.get_compact_index().unwrap(), -5);
    }

    #[test]
    fn compact_index_multibyte() {
        // 70 = 0b100_0110: low six bits in byte 0, one continuation byte
        let data = [0x46, 0x01, 0xC6, 0x01];
        let mut r = ScriptReader::new(&data, build(100));
        assert_eq!(r.get_compact_index().unwrap(), 70);
        assert_eq!(r.get_compact_index().unwrap(), -70);
    }

    #[test]
    fn compact_index_overlong_is_malformed() {
        let data = [0x40, 0x80, 0x80, 0x80, 0x80, 0x80];
        let mut r = ScriptReader::new(&data, build(100));
        assert!(matches!(
            r.get_compact_index(),
            Err(ScriptError::MalformedCompactIndex(0))
        ));
    }

    #[test]
    fn object_index_encoding_is_version_gated() {
        let data = [0x85];
        let mut r = ScriptReader::new(&data, build(100));
        assert_eq!(r.get_object_index().unwrap(), -5);

        let data = [0xFB, 0xFF, 0xFF, 0xFF];
        let mut r = ScriptReader::new(&data, build(512));
        assert_eq!(r.get_object_index().unwrap(), -5);
    }

    #[test]
    fn name_index_number_is_version_gated() {
        let data = [0x07, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];
        let mut r = ScriptReader::new(&data, build(512));
        assert_eq!(r.get_name_index().unwrap(), (7, 2));

        let data = [0x07, 0x00, 0x00, 0x00];
        let mut r = ScriptReader::new(&data, build(200));
        assert_eq!(r.get_name_index().unwrap(), (7, 0));
    }

    #[test]
    fn strings() {
        let data = [b'H', b'i', 0x00, b'!', 0x00];
        let mut r = ScriptReader::new(&data, build(512));
        assert_eq!(r.get_string().unwrap(), "Hi");
        assert_eq!(r.get_string().unwrap(), "!");

        let data = [0x48, 0x00, 0x69, 0x00, 0x00, 0x00];
        let mut r = ScriptReader::new(&data, build(512));
        assert_eq!(r.get_unicode_string().unwrap(), "Hi");
    }
}
