//! HPACK representation reader (spec §4.3, RFC 7541 §6). Every
//! representation HPACK defines packs its pattern bits and prefix into a
//! single byte, so each iteration of the decode loop starts byte-aligned.

use bytes::Bytes;

use crate::bitstream::BitReader;
use crate::error::HpackError;

use super::encoder::HeaderField;
use super::table::HeaderTable;

pub struct Decoder {
    table: HeaderTable,
}

impl Decoder {
    #[must_use]
    pub fn new(dynamic_table_size: u32) -> Self {
        Self {
            table: HeaderTable::new(dynamic_table_size),
        }
    }

    /// Raises or lowers the ceiling our own table may grow to, in response
    /// to a local configuration change to `HEADER_TABLE_SIZE`.
    pub fn set_max_dynamic_table_size(&mut self, max_size: u32) {
        self.table.set_max_capacity(max_size);
    }

    /// Decodes one concatenated HPACK block (a HEADERS frame plus any
    /// CONTINUATION frames already joined end-to-end) into an ordered
    /// header list.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<HeaderField>, HpackError> {
        let mut reader = BitReader::new(data);
        let mut fields = Vec::new();
        let mut seen_header = false;
        let total_bits = data.len() * 8;

        while reader.bit_offset() < total_bits {
            let start = reader.bit_offset();
            let (first, _) = reader.peek_bits(start, 1);
            if first == 1 {
                reader.read_bits(1)?;
                let index = reader.read_integer(7)?;
                if index == 0 {
                    return Err(HpackError::ZeroIndex);
                }
                let (name, value) = self.table.field(index)?;
                fields.push(HeaderField { name, value });
                seen_header = true;
                continue;
            }

            let (two, _) = reader.peek_bits(start, 2);
            if two == 0b01 {
                reader.read_bits(2)?;
                let name_index = reader.read_integer(6)?;
                let (name, value) = self.read_literal(&mut reader, name_index)?;
                self.table.prepend(name.clone(), value.clone());
                fields.push(HeaderField { name, value });
                seen_header = true;
                continue;
            }

            let (three, _) = reader.peek_bits(start, 3);
            if three == 0b001 {
                if seen_header {
                    return Err(HpackError::SizeUpdateAfterHeader);
                }
                reader.read_bits(3)?;
                let size = reader.read_integer(5)?;
                self.table.update_size(size as u32)?;
                continue;
            }

            // Remaining patterns are 0000 (without indexing) and 0001
            // (never indexed); neither touches the dynamic table.
            reader.read_bits(4)?;
            let name_index = reader.read_integer(4)?;
            let (name, value) = self.read_literal(&mut reader, name_index)?;
            fields.push(HeaderField { name, value });
            seen_header = true;
        }

        Ok(fields)
    }

    fn read_literal(
        &self,
        reader: &mut BitReader<'_>,
        name_index: u64,
    ) -> Result<(Bytes, Bytes), HpackError> {
        let name = if name_index == 0 {
            Bytes::from(reader.read_string()?)
        } else {
            self.table.field(name_index)?.0
        };
        let value = Bytes::from(reader.read_string()?);
        Ok((name, value))
    }
}
