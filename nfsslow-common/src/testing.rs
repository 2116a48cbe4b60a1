//! Builds raw records the way the probe program lays them out.

use crate::schema::{ByteOrder, CompiledSchema, FieldType, SchemaVersion, Slot};

pub struct RecordBuilder {
    schema: CompiledSchema,
    data: Vec<u8>,
    order_index: usize,
}

impl RecordBuilder {
    pub fn new(version: SchemaVersion) -> RecordBuilder {
        let descriptor = version.descriptor().expect("known schema version");
        let schema = CompiledSchema::compile(&descriptor).expect("valid schema");
        let data = vec![0; schema.record_len()];
        RecordBuilder {
            schema,
            data,
            order_index: 0,
        }
    }

    fn slot(&self, path: &str) -> Slot {
        *self
            .schema
            .slot(path)
            .unwrap_or_else(|| panic!("no field {:?} in schema", path))
    }

    pub fn set(&mut self, path: &str, value: u64) -> &mut Self {
        let slot = self.slot(path);
        let width = match slot.ty {
            FieldType::Unsigned(w) => w,
            _ => panic!("{:?} is not an integer field", path),
        };
        self.write_unsigned(slot.offset, width, slot.order, value);
        self
    }

    pub fn text(&mut self, path: &str, text: &str) -> &mut Self {
        let slot = self.slot(path);
        assert!(text.len() <= slot.width(), "{:?} does not fit {:?}", text, path);
        let field = &mut self.data[slot.offset..slot.offset + slot.width()];
        field.fill(0);
        field[..text.len()].copy_from_slice(text.as_bytes());
        self
    }

    pub fn bytes(&mut self, path: &str, bytes: &[u8]) -> &mut Self {
        let slot = self.slot(path);
        assert!(bytes.len() <= slot.width(), "too many bytes for {:?}", path);
        self.data[slot.offset..slot.offset + bytes.len()].copy_from_slice(bytes);
        self
    }

    /// Appends a step to the call path, bumping its counter the way the
    /// probe program does.
    pub fn call(&mut self, id: u8, delta_us: u32) -> &mut Self {
        let i = self.order_index;
        let ids = self.slot("point_ids");
        let deltas = self.slot("point_deltas");
        let counts = self.slot("call_counts");

        self.data[ids.offset + i] = id;
        self.write_unsigned(deltas.offset + i * 4, 4, ByteOrder::Native, delta_us as u64);
        if (id as usize) < counts.width() {
            let count = &mut self.data[counts.offset + id as usize];
            *count = count.saturating_add(1);
        }

        self.order_index += 1;
        let order_index = self.order_index as u64;
        self.set("order_index", order_index)
    }

    pub fn build(&self) -> Vec<u8> {
        self.data.clone()
    }

    fn write_unsigned(&mut self, offset: usize, width: usize, order: ByteOrder, value: u64) {
        let bytes = match order {
            ByteOrder::Native => value.to_ne_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        let src = match order {
            ByteOrder::Native if cfg!(target_endian = "little") => &bytes[..width],
            ByteOrder::Native => &bytes[8 - width..],
            ByteOrder::Big => &bytes[8 - width..],
        };
        self.data[offset..offset + width].copy_from_slice(src);
    }
}
