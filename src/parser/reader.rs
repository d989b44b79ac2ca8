use byteorder::{LittleEndian, ReadBytesExt};
use std::io;

use crate::limits::MAX_VECTOR_ENTRIES;

fn eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "unexpected end")
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

/// A cursor over a borrowed byte slice.
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, pos: 0 }
    }

    // Basic operations --------------------------------------------------------
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_byte(&mut self) -> Result<u8, io::Error> {
        self.next().ok_or_else(eof)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], io::Error> {
        if len > self.remaining() {
            return Err(eof());
        }
        let bytes = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Split off the next `len` bytes as their own reader.
    pub fn sub_reader(&mut self, len: usize) -> Result<Reader<'a>, io::Error> {
        Ok(Reader::new(self.read_bytes(len)?))
    }

    // Read and interpret types ------------------------------------------------

    // le
    pub fn read_u32(&mut self) -> Result<u32, io::Error> {
        io::Cursor::new(self.read_bytes(4)?).read_u32::<LittleEndian>()
    }

    pub fn read_vu32(&mut self) -> Result<u32, io::Error> {
        read_vu(&mut || self.read_byte(), 32).map(|v| v as u32)
    }

    pub fn read_vu64(&mut self) -> Result<u64, io::Error> {
        read_vu(&mut || self.read_byte(), 64)
    }

    pub fn read_vs32(&mut self) -> Result<i32, io::Error> {
        read_vs(&mut || self.read_byte(), 32).map(|v| v as i32)
    }

    pub fn read_vs64(&mut self) -> Result<i64, io::Error> {
        read_vs(&mut || self.read_byte(), 64)
    }

    /// A signed 33-bit integer whose first byte was already consumed.
    pub fn read_vs33_from(&mut self, first: u8) -> Result<i64, io::Error> {
        let mut first = Some(first);
        read_vs(
            &mut || match first.take() {
                Some(byte) => Ok(byte),
                None => self.read_byte(),
            },
            33,
        )
    }

    pub fn read_f32(&mut self) -> Result<f32, io::Error> {
        io::Cursor::new(self.read_bytes(4)?).read_f32::<LittleEndian>()
    }

    pub fn read_f64(&mut self) -> Result<f64, io::Error> {
        io::Cursor::new(self.read_bytes(8)?).read_f64::<LittleEndian>()
    }

    pub fn read_v128(&mut self) -> Result<[u8; 16], io::Error> {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(self.read_bytes(16)?);
        Ok(buf)
    }

    /// A vector length. Every entry takes at least one byte, so a count larger
    /// than what is left is malformed.
    pub fn read_count(&mut self) -> Result<u32, io::Error> {
        let count = self.read_vu32()?;
        if count > MAX_VECTOR_ENTRIES || count as usize > self.remaining() {
            return Err(invalid("vector length exceeds the remaining input"));
        }
        Ok(count)
    }

    pub fn read_string(&mut self) -> Result<String, io::Error> {
        let bytes = self.read_u8vec()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| invalid("malformed UTF-8 encoding"))
    }

    pub fn read_u8vec(&mut self) -> Result<&'a [u8], io::Error> {
        let len = self.read_vu32()?;
        self.read_bytes(len as usize)
    }
}

impl Iterator for Reader<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<Self::Item> {
        let byte = self.bytes.get(self.pos).copied()?;
        self.pos += 1;
        Some(byte)
    }
}

fn read_vu<F>(reader: &mut F, size: u32) -> Result<u64, io::Error>
where
    F: FnMut() -> Result<u8, io::Error>,
{
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let b = reader()?;
        if shift >= size {
            return Err(invalid("integer representation too long"));
        }
        // bits past `size` in the last byte must be zero
        if shift + 7 > size && (b & 0x7f) >> (size - shift) != 0 {
            return Err(invalid("integer too large"));
        }
        result |= ((b & 0x7f) as u64) << shift;
        shift += 7;
        if b & 0x80 == 0 {
            return Ok(result);
        }
    }
}

fn read_vs<F>(reader: &mut F, size: u32) -> Result<i64, io::Error>
where
    F: FnMut() -> Result<u8, io::Error>,
{
    let mut result: i64 = 0;
    let mut shift = 0;
    loop {
        let b = reader()?;
        if shift >= size {
            return Err(invalid("integer representation too long"));
        }
        // bits past `size` in the last byte must all copy the sign bit
        if shift + 7 > size {
            let unused = (b & 0x7f) >> (size - shift - 1);
            if unused != 0 && unused != 0x7f >> (size - shift - 1) {
                return Err(invalid("integer too large"));
            }
        }
        result |= ((b & 0x7f) as i64) << shift;
        shift += 7;
        if b & 0x80 == 0 {
            if shift < 64 && b & 0x40 != 0 {
                result |= -1i64 << shift;
            }
            return Ok(result);
        }
    }
}

#[test]
fn test_read_u32() {
    let read = |v: Vec<u8>| -> u32 { Reader::new(&v).read_u32().expect("Failed to read u32") };

    assert_eq!(read(vec![0b00000000, 0b00000000, 0b00000000, 0b00000000]), 0);
    assert_eq!(read(vec![0b00000001, 0b00000000, 0b00000000, 0b00000000]), 1);
    assert_eq!(read(vec![0b00000000, 0b00000001, 0b00000000, 0b00000000]), 256);
    assert_eq!(read(vec![0b10000000, 0b10000000, 0b00000000, 0b00000000]), 32896);
    assert_eq!(read(vec![0b00000000, 0b00000000, 0b00000000, 0b10000000]), 2147483648);
    assert_eq!(read(vec![0x00, 0x61, 0x73, 0x6d]), 0x6d736100);
    assert_eq!(read(vec![0b11111111, 0b11111111, 0b11111111, 0b11111111]), 4294967295);
    assert!(Reader::new(&[1, 2, 3]).read_u32().is_err());
}

#[test]
fn test_read_vu32() {
    let read = |v: Vec<u8>| Reader::new(&v).read_vu32().expect("Failed to read vu32");

    assert_eq!(read(vec![0]), 0);
    assert_eq!(read(vec![1]), 1);
    assert_eq!(read(vec![0b11100101, 0b10001110, 0b00100110]), 624485);
    assert_eq!(read(vec![0x7f]), 127);
    assert_eq!(read(vec![0x80, 0x7f]), 16256);
    assert_eq!(read(vec![0xb4, 0x07]), 0x3b4);
    assert_eq!(read(vec![0x8c, 0x08]), 0x40c);
    assert_eq!(read(vec![0xff, 0xff, 0xff, 0xff, 0xf]), 0xffffffff);
    assert_eq!(read(vec![128, 128, 128, 128, 8]), 0x80000000);
    // redundant padding is allowed
    assert_eq!(read(vec![0x81, 0x80, 0x80, 0x00]), 1);
}

#[test]
fn test_read_vu32_overflow() {
    let read = |v: Vec<u8>| Reader::new(&v).read_vu32();

    assert!(read(vec![0xff, 0xff, 0xff, 0xff, 0x1f]).is_err());
    assert!(read(vec![0x80, 0x80, 0x80, 0x80, 0x80, 0x00]).is_err());
    assert_eq!(
        read(vec![0x80, 0x80]).unwrap_err().kind(),
        io::ErrorKind::UnexpectedEof
    );
}

#[test]
fn test_read_vu64() {
    let read = |v: Vec<u8>| Reader::new(&v).read_vu64().expect("Failed to read vu64");

    assert_eq!(read(vec![0]), 0);
    assert_eq!(read(vec![0b11100101, 0b10001110, 0b00100110]), 624485);
    assert_eq!(read(vec![0xff, 0xff, 0xff, 0xff, 0xf]), 0xffffffff);
    assert_eq!(
        read(vec![0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]),
        u64::MAX
    );
}

#[test]
fn test_read_vs32() {
    let read = |v: Vec<u8>| Reader::new(&v).read_vs32().expect("Failed to read vs32");

    assert_eq!(read(vec![0]), 0);
    assert_eq!(read(vec![1]), 1);
    assert_eq!(read(vec![0b11100101, 0b10001110, 0b00100110]), 624485);
    assert_eq!(read(vec![0xb4, 0x07]), 0x3b4);
    assert_eq!(read(vec![0x7f]), -1);
    assert_eq!(read(vec![0x80, 0x7f]), -128);
    assert_eq!(read(vec![0b10011011, 0b11110001, 0b01011001]), -624485);
    // this is different as a 32 than a 64
    assert_eq!(read(vec![128, 128, 128, 128, 120]), 0x80000000u32 as i32);
    assert!(Reader::new(&[128, 128, 128, 128, 0x70]).read_vs32().is_err());
}

#[test]
fn test_read_vs64() {
    let read = |v: Vec<u8>| Reader::new(&v).read_vs64().expect("Failed to read vs64");

    assert_eq!(read(vec![0x7f]), -1);
    assert_eq!(read(vec![0b10011011, 0b11110001, 0b01011001]), -624485);
    assert_eq!(
        read(vec![128, 128, 128, 128, 128, 128, 128, 252, 255, 0]),
        0x7ff8000000000000
    );
    assert_eq!(
        read(vec![128, 128, 128, 128, 128, 128, 128, 128, 128, 127]),
        (0x8000000000000000u64 as i64)
    );
}

#[test]
fn test_read_vs33() {
    assert_eq!(Reader::new(&[]).read_vs33_from(0x05).unwrap(), 5);
    assert_eq!(Reader::new(&[0x01]).read_vs33_from(0x80).unwrap(), 128);
    assert_eq!(Reader::new(&[]).read_vs33_from(0x7f).unwrap(), -1);
}

#[test]
fn test_read_f32() {
    let read = |v: Vec<u8>| Reader::new(&v).read_f32().expect("Failed to read f32");

    assert!(read(vec![0, 0, 192, 127]).is_nan());
    assert_eq!(read(vec![0, 0, 0, 0]), 0.0);
    assert_eq!(read(vec![219, 15, 201, 64]), 6.28318548202514648);
    assert_eq!(read(vec![255, 255, 127, 127]), 3.4028234e+38);
    assert_eq!(read(vec![249, 2, 21, 80]), 1.0e10);
}

#[test]
fn test_read_f64() {
    let read = |v: Vec<u8>| Reader::new(&v).read_f64().expect("Failed to read f64");

    assert!(read(vec![0, 0, 0, 0, 0, 0, 248, 127]).is_nan());
    assert_eq!(read(vec![24, 45, 68, 84, 251, 33, 25, 64]), 6.28318530717958623);
    assert_eq!(read(vec![125, 195, 148, 37, 173, 73, 178, 84]), 1.0e100);
}

#[test]
fn test_read_v128() {
    let bytes: Vec<u8> = (0..16).collect();
    let mut reader = Reader::new(&bytes);
    assert_eq!(
        reader.read_v128().unwrap(),
        [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
    );
    assert!(reader.is_empty());
}

#[test]
fn test_read_string() {
    let mut reader = Reader::new(&[3, b'e', b'n', b'v', 2, 0xc3, 0x28]);
    assert_eq!(reader.read_string().unwrap(), "env");
    assert_eq!(
        reader.read_string().unwrap_err().to_string(),
        "malformed UTF-8 encoding"
    );
}

#[test]
fn test_read_count() {
    assert_eq!(Reader::new(&[2, 0, 0]).read_count().unwrap(), 2);
    assert!(Reader::new(&[3, 0, 0]).read_count().is_err());
}
