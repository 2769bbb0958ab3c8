//! The static canonical Huffman code of RFC 7541 Appendix B (spec §4.2).
//!
//! Encoding writes each byte's `(code, length)` pair via `BitWriter` and pads
//! the final byte with the high-order bits of the EOS code (all ones).
//! Decoding walks a multi-level lookup table: a 9-bit root indexed directly
//! by the next 9 bits of input, with 6-bit child tables for codes that run
//! longer, built once by "hole-filling" every index whose prefix matches a
//! short code.

use std::sync::OnceLock;

use thiserror::Error;

use crate::bitstream::{mask32, BitWriter};

const ROOT_BITS: u32 = 9;
const CHILD_BITS: u32 = 6;

/// `(code, bit_length)` for each of the 256 byte symbols, RFC 7541 App. B.
#[rustfmt::skip]
const SYMBOLS: [(u32, u8); 256] = [
    (0x1ff8, 13), (0x7fffd8, 23), (0xfffffe2, 28), (0xfffffe3, 28), (0xfffffe4, 28), (0xfffffe5, 28), (0xfffffe6, 28), (0xfffffe7, 28),
    (0xfffffe8, 28), (0xffffea, 24), (0x3ffffffc, 30), (0xfffffe9, 28), (0xfffffea, 28), (0x3ffffffd, 30), (0xfffffeb, 28), (0xfffffec, 28),
    (0xfffffed, 28), (0xfffffee, 28), (0xfffffef, 28), (0xffffff0, 28), (0xffffff1, 28), (0xffffff2, 28), (0x3ffffffe, 30), (0xffffff3, 28),
    (0xffffff4, 28), (0xffffff5, 28), (0xffffff6, 28), (0xffffff7, 28), (0xffffff8, 28), (0xffffff9, 28), (0xffffffa, 28), (0xffffffb, 28),
    (0x14, 6), (0x3f8, 10), (0x3f9, 10), (0xffa, 12), (0x1ff9, 13), (0x15, 6), (0xf8, 8), (0x7fa, 11),
    (0x3fa, 10), (0x3fb, 10), (0xf9, 8), (0x7fb, 11), (0xfa, 8), (0x16, 6), (0x17, 6), (0x18, 6),
    (0x0, 5), (0x1, 5), (0x2, 5), (0x19, 6), (0x1a, 6), (0x1b, 6), (0x1c, 6), (0x1d, 6),
    (0x1e, 6), (0x1f, 6), (0x5c, 7), (0xfb, 8), (0x7ffc, 15), (0x20, 6), (0xffb, 12), (0x3fc, 10),
    (0x1ffa, 13), (0x21, 6), (0x5d, 7), (0x5e, 7), (0x5f, 7), (0x60, 7), (0x61, 7), (0x62, 7),
    (0x63, 7), (0x64, 7), (0x65, 7), (0x66, 7), (0x67, 7), (0x68, 7), (0x69, 7), (0x6a, 7),
    (0x6b, 7), (0x6c, 7), (0x6d, 7), (0x6e, 7), (0x6f, 7), (0x70, 7), (0x71, 7), (0x72, 7),
    (0xfc, 8), (0x73, 7), (0xfd, 8), (0x1ffb, 13), (0x7fff0, 19), (0x1ffc, 13), (0x3ffc, 14), (0x22, 6),
    (0x7ffd, 15), (0x3, 5), (0x23, 6), (0x4, 5), (0x24, 6), (0x5, 5), (0x25, 6), (0x26, 6),
    (0x27, 6), (0x6, 5), (0x74, 7), (0x75, 7), (0x28, 6), (0x29, 6), (0x2a, 6), (0x7, 5),
    (0x2b, 6), (0x76, 7), (0x2c, 6), (0x8, 5), (0x9, 5), (0x2d, 6), (0x77, 7), (0x78, 7),
    (0x79, 7), (0x7a, 7), (0x7b, 7), (0x7ffe, 15), (0x7fc, 11), (0x3ffd, 14), (0x1ffd, 13), (0xffffffc, 28),
    (0xfffe6, 20), (0x3fffd2, 22), (0xfffe7, 20), (0xfffe8, 20), (0x3fffd3, 22), (0x3fffd4, 22), (0x3fffd5, 22), (0x7fffd9, 23),
    (0x3fffd6, 22), (0x7fffda, 23), (0x7fffdb, 23), (0x7fffdc, 23), (0x7fffdd, 23), (0x7fffde, 23), (0xffffeb, 24), (0x7fffdf, 23),
    (0xffffec, 24), (0xffffed, 24), (0x3fffd7, 22), (0x7fffe0, 23), (0xffffee, 24), (0x7fffe1, 23), (0x7fffe2, 23), (0x7fffe3, 23),
    (0x7fffe4, 23), (0x1fffdc, 21), (0x3fffd8, 22), (0x7fffe5, 23), (0x3fffd9, 22), (0x7fffe6, 23), (0x7fffe7, 23), (0xffffef, 24),
    (0x3fffda, 22), (0x1fffdd, 21), (0xfffe9, 20), (0x3fffdb, 22), (0x3fffdc, 22), (0x7fffe8, 23), (0x7fffe9, 23), (0x1fffde, 21),
    (0x7fffea, 23), (0x3fffdd, 22), (0x3fffde, 22), (0xfffff0, 24), (0x1fffdf, 21), (0x3fffdf, 22), (0x7fffeb, 23), (0x7fffec, 23),
    (0x1fffe0, 21), (0x1fffe1, 21), (0x3fffe0, 22), (0x1fffe2, 21), (0x7fffed, 23), (0x3fffe1, 22), (0x7fffee, 23), (0x7fffef, 23),
    (0xfffea, 20), (0x3fffe2, 22), (0x3fffe3, 22), (0x3fffe4, 22), (0x7ffff0, 23), (0x3fffe5, 22), (0x3fffe6, 22), (0x7ffff1, 23),
    (0x3ffffe0, 26), (0x3ffffe1, 26), (0xfffeb, 20), (0x7fff1, 19), (0x3fffe7, 22), (0x7ffff2, 23), (0x3fffe8, 22), (0x1ffffec, 25),
    (0x3ffffe2, 26), (0x3ffffe3, 26), (0x3ffffe4, 26), (0x7ffffde, 27), (0x7ffffdf, 27), (0x3ffffe5, 26), (0xfffff1, 24), (0x1ffffed, 25),
    (0x7fff2, 19), (0x1fffe3, 21), (0x3ffffe6, 26), (0x7ffffe0, 27), (0x7ffffe1, 27), (0x3ffffe7, 26), (0x7ffffe2, 27), (0xfffff2, 24),
    (0x1fffe4, 21), (0x1fffe5, 21), (0x3ffffe8, 26), (0x3ffffe9, 26), (0xffffffd, 28), (0x7ffffe3, 27), (0x7ffffe4, 27), (0x7ffffe5, 27),
    (0xfffec, 20), (0xfffff3, 24), (0xfffed, 20), (0x1fffe6, 21), (0x3fffe9, 22), (0x1fffe7, 21), (0x1fffe8, 21), (0x7ffff3, 23),
    (0x3fffea, 22), (0x3fffeb, 22), (0x1ffffee, 25), (0x1ffffef, 25), (0xfffff4, 24), (0xfffff5, 24), (0x3ffffea, 26), (0x7ffff4, 23),
    (0x3ffffeb, 26), (0x7ffffe6, 27), (0x3ffffec, 26), (0x3ffffed, 26), (0x7ffffe7, 27), (0x7ffffe8, 27), (0x7ffffe9, 27), (0x7ffffea, 27),
    (0x7ffffeb, 27), (0xffffffe, 28), (0x7ffffec, 27), (0x7ffffed, 27), (0x7ffffee, 27), (0x7ffffef, 27), (0x7fffff0, 27), (0x3ffffee, 26),
];

/// 30-bit all-ones EOS code (RFC 7541 App. B, symbol 256). Never a valid
/// decode target; used only to pad the final encoded byte.
const EOS_CODE: u32 = 0x3fff_ffff;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HuffmanError {
    #[error("huffman code does not match any symbol")]
    InvalidCode,
    #[error("huffman padding is not all-ones or exceeds 7 bits")]
    InvalidPadding,
}

/// Precomputes the total bit length of `data`'s Huffman encoding, so callers
/// can size a buffer before writing.
#[must_use]
pub fn encoded_bit_length(data: &[u8]) -> usize {
    data.iter()
        .map(|&b| usize::from(SYMBOLS[b as usize].1))
        .sum()
}

/// Huffman-encodes `data`, padding the final byte with one bits (the MSB
/// prefix of the EOS code).
#[must_use]
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut writer = BitWriter::new();
    for &byte in data {
        let (code, length) = SYMBOLS[byte as usize];
        writer.write_code(code, length);
    }
    let pad_bits = (8 - writer.bits_written() % 8) % 8;
    if pad_bits > 0 {
        writer.write_bits(0xff, pad_bits as u8);
    }
    writer.into_inner()
}

#[derive(Clone, Copy)]
enum Slot {
    Empty,
    Terminal { symbol: u8, length: u8 },
    Pointer { table: u16 },
}

struct DecodeTables {
    tables: Vec<Vec<Slot>>,
}

fn insert(tables: &mut Vec<Vec<Slot>>, mut table_idx: usize, code: u32, length: u8, symbol: u8) {
    let mut consumed: u8 = 0;
    loop {
        let bits = if table_idx == 0 { ROOT_BITS } else { CHILD_BITS } as u8;
        let available = length - consumed;
        if available <= bits {
            let remaining_value = code & mask32(available);
            let hole_count = 1u32 << (bits - available);
            let base = remaining_value << (bits - available);
            for h in 0..hole_count {
                tables[table_idx][(base + h) as usize] = Slot::Terminal { symbol, length };
            }
            return;
        }
        let shift = available - bits;
        let remaining_value = code & mask32(available);
        let idx = (remaining_value >> shift) as usize;
        let next = match tables[table_idx][idx] {
            Slot::Pointer { table } => table as usize,
            Slot::Empty => {
                let new_idx = tables.len();
                tables.push(vec![Slot::Empty; 1usize << CHILD_BITS]);
                tables[table_idx][idx] = Slot::Pointer {
                    table: new_idx as u16,
                };
                new_idx
            }
            Slot::Terminal { .. } => unreachable!("RFC 7541 codes are prefix-free"),
        };
        table_idx = next;
        consumed += bits;
    }
}

fn build_tables() -> DecodeTables {
    let mut tables = vec![vec![Slot::Empty; 1usize << ROOT_BITS]];
    for (symbol, &(code, length)) in SYMBOLS.iter().enumerate() {
        insert(&mut tables, 0, code, length, symbol as u8);
    }
    DecodeTables { tables }
}

static DECODE_TABLES: OnceLock<DecodeTables> = OnceLock::new();

fn decode_tables() -> &'static DecodeTables {
    DECODE_TABLES.get_or_init(build_tables)
}

fn peek_window(data: &[u8], bit_pos: usize) -> u32 {
    let total_bits = data.len() * 8;
    let mut window: u32 = 0;
    for i in 0..32u32 {
        let pos = bit_pos + i as usize;
        let bit = if pos < total_bits {
            (data[pos / 8] >> (7 - pos % 8)) & 1
        } else {
            0
        };
        window = (window << 1) | u32::from(bit);
    }
    window
}

/// Decodes a Huffman-encoded byte string (RFC 7541 §5.2). Padding beyond the
/// last full symbol must be all-ones and no longer than 7 bits; anything
/// else, including a decoded EOS symbol, is a hard error.
pub fn decode(data: &[u8]) -> Result<Vec<u8>, HuffmanError> {
    let tables = decode_tables();
    let total_bits = data.len() * 8;
    let mut bit_pos = 0usize;
    let mut out = Vec::with_capacity(data.len() * 2);

    while bit_pos < total_bits {
        let remaining = total_bits - bit_pos;
        let window = peek_window(data, bit_pos);
        let mut table_idx = 0usize;
        let mut shift = 32u32;
        let found = loop {
            let bits = if table_idx == 0 { ROOT_BITS } else { CHILD_BITS };
            shift -= bits;
            let idx = ((window >> shift) & mask32(bits as u8)) as usize;
            match tables.tables[table_idx][idx] {
                Slot::Terminal { symbol, length } => break Some((symbol, length)),
                Slot::Pointer { table } => table_idx = table as usize,
                Slot::Empty => break None,
            }
        };

        match found {
            Some((symbol, length)) if usize::from(length) <= remaining => {
                out.push(symbol);
                bit_pos += usize::from(length);
            }
            _ => {
                if remaining > 7 {
                    return Err(HuffmanError::InvalidCode);
                }
                let pad = (window >> (32 - remaining)) & mask32(remaining as u8);
                if pad != mask32(remaining as u8) {
                    return Err(HuffmanError::InvalidPadding);
                }
                bit_pos = total_bits;
            }
        }
    }
    Ok(out)
}
