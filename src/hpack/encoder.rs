//! HPACK representation writer (spec §4.3, RFC 7541 §6).

use bytes::Bytes;

use crate::bitstream::BitWriter;
use crate::error::HpackError;

use super::table::HeaderTable;

/// A validated, ordered header field ready for wire encoding. Pseudo-header
/// ordering, uniqueness, and hop-by-hop filtering are the caller's
/// responsibility (see `Request::header_list`); this type only carries the
/// already-decided name/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Bytes,
    pub value: Bytes,
}

impl HeaderField {
    #[must_use]
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

pub struct Encoder {
    table: HeaderTable,
    huffman_enabled: bool,
    pending_size_update: Option<u32>,
}

impl Encoder {
    #[must_use]
    pub fn new(dynamic_table_size: u32, huffman_enabled: bool) -> Self {
        Self {
            table: HeaderTable::new(dynamic_table_size),
            huffman_enabled,
            pending_size_update: None,
        }
    }

    /// Called when the peer's SETTINGS_HEADER_TABLE_SIZE changes the ceiling
    /// our dynamic table may use. A size update representation is queued to
    /// precede the next header block we write.
    pub fn set_peer_max_dynamic_table_size(&mut self, max_size: u32) {
        self.table.set_max_capacity(max_size);
        self.pending_size_update = Some(self.table.capacity());
    }

    #[must_use]
    pub fn dynamic_table_capacity(&self) -> u32 {
        self.table.capacity()
    }

    /// Encodes `fields` into one HPACK block, enforcing `max_header_list_size`
    /// as a hard local cap on the cumulative `name.len + value.len + 32`
    /// contribution (spec §9 Open Question: treated as advisory from the
    /// RFC's perspective but enforced here, failing only this request).
    pub fn encode(
        &mut self,
        fields: &[HeaderField],
        max_header_list_size: u32,
    ) -> Result<Bytes, HpackError> {
        let total_size: u64 = fields
            .iter()
            .map(|f| f.name.len() as u64 + f.value.len() as u64 + 32)
            .sum();
        if total_size > u64::from(max_header_list_size) {
            return Err(HpackError::HeaderListTooLarge {
                size: total_size.min(u64::from(u32::MAX)) as u32,
                max: max_header_list_size,
            });
        }

        let mut writer = BitWriter::new();
        if let Some(size) = self.pending_size_update.take() {
            writer.write_bits(0b001, 3);
            writer.write_integer(u64::from(size), 5);
        }

        for field in fields {
            self.encode_field(&mut writer, field);
        }
        Ok(Bytes::from(writer.into_inner()))
    }

    fn encode_field(&mut self, writer: &mut BitWriter, field: &HeaderField) {
        if let Some(index) = self.table.index_of(&field.name, &field.value) {
            writer.write_bits(1, 1);
            writer.write_integer(index, 7);
            return;
        }
        if let Some(index) = self.table.index_of_name(&field.name) {
            writer.write_bits(0b01, 2);
            writer.write_integer(index, 6);
            self.write_string(writer, &field.value);
        } else {
            writer.write_bits(0b01, 2);
            writer.write_integer(0, 6);
            self.write_string(writer, &field.name);
            self.write_string(writer, &field.value);
        }
        self.table.prepend(field.name.clone(), field.value.clone());
    }

    fn write_string(&self, writer: &mut BitWriter, bytes: &[u8]) {
        if !self.huffman_enabled {
            writer.write_string(bytes, false);
            return;
        }
        // Only compress when it actually shrinks the string; otherwise the
        // raw form is cheaper on the wire.
        let huffman_bits = crate::huffman::encoded_bit_length(bytes);
        let huffman_bytes = (huffman_bits + 7) / 8;
        writer.write_string(bytes, huffman_bytes < bytes.len());
    }
}
