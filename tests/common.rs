//! Common test utilities shared between integration tests
#![allow(dead_code)]

pub const TYPE: u8 = 1;
pub const IMPORT: u8 = 2;
pub const FUNCTION: u8 = 3;
pub const TABLE: u8 = 4;
pub const MEMORY: u8 = 5;
pub const GLOBAL: u8 = 6;
pub const EXPORT: u8 = 7;
pub const START: u8 = 8;
pub const ELEMENT: u8 = 9;
pub const CODE: u8 = 10;
pub const DATA: u8 = 11;
pub const DATA_COUNT: u8 = 12;

pub fn leb_u32(mut value: u32) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

pub fn leb_i32(mut value: i32) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// A length-prefixed byte vector.
pub fn sized(bytes: &[u8]) -> Vec<u8> {
    let mut out = leb_u32(bytes.len() as u32);
    out.extend_from_slice(bytes);
    out
}

pub fn name(s: &str) -> Vec<u8> {
    sized(s.as_bytes())
}

pub fn func_type(params: &[u8], results: &[u8]) -> Vec<u8> {
    let mut out = vec![0x60];
    out.extend(sized(params));
    out.extend(sized(results));
    out
}

/// A code section entry: local runs, then the instruction bytes (which must
/// include the final `end`).
pub fn body(locals: &[(u32, u8)], code: &[u8]) -> Vec<u8> {
    let mut inner = leb_u32(locals.len() as u32);
    for (count, value_type) in locals {
        inner.extend(leb_u32(*count));
        inner.push(*value_type);
    }
    inner.extend_from_slice(code);
    sized(&inner)
}

/// Assembles a binary module, section by section.
#[derive(Default)]
pub struct ModuleBytes {
    bytes: Vec<u8>,
}

impl ModuleBytes {
    pub fn new() -> ModuleBytes {
        ModuleBytes {
            bytes: vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00],
        }
    }

    /// A section holding a vector of `entries`.
    pub fn section(mut self, id: u8, entries: &[Vec<u8>]) -> ModuleBytes {
        let mut payload = leb_u32(entries.len() as u32);
        for entry in entries {
            payload.extend_from_slice(entry);
        }
        self.bytes.push(id);
        self.bytes.extend(sized(&payload));
        self
    }

    /// A section whose payload is written as is.
    pub fn raw(mut self, id: u8, payload: &[u8]) -> ModuleBytes {
        self.bytes.push(id);
        self.bytes.extend(sized(payload));
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

#[test]
fn leb_encoding() {
    assert_eq!(leb_u32(624485), vec![0xe5, 0x8e, 0x26]);
    assert_eq!(leb_i32(-1), vec![0x7f]);
    assert_eq!(leb_i32(-128), vec![0x80, 0x7f]);
    assert_eq!(leb_i32(64), vec![0xc0, 0x00]);
}
