use crate::errors::TableError;

/// Bit position → label mapping for a `BITS` wide field.
///
/// An empty label marks a reserved bit: it is skipped when set. Set bits past
/// the end of the table come out as `"Bit <N>"`.
#[derive(Debug, Clone, Copy)]
pub struct FlagTable<const BITS: u32> {
    labels: &'static [&'static str],
}

pub type FlagTable32 = FlagTable<32>;
pub type FlagTable64 = FlagTable<64>;

impl<const BITS: u32> FlagTable<BITS> {
    pub fn new(
        name: &'static str,
        labels: &'static [&'static str],
    ) -> Result<FlagTable<BITS>, TableError> {
        if BITS == 0 || BITS > u64::BITS {
            return Err(TableError::UnsupportedWidth {
                table: name,
                width: BITS,
            });
        }
        if labels.len() > BITS as usize {
            return Err(TableError::TooLong {
                table: name,
                len: labels.len(),
                width: BITS,
            });
        }
        Ok(FlagTable { labels })
    }

    /// Labels for every set bit, ascending by bit index.
    pub fn decode(&self, bits: u64) -> Vec<String> {
        (0..BITS)
            .filter(|i| (bits >> i) & 0x1 == 0x1)
            .filter_map(|i| match self.labels.get(i as usize) {
                Some(label) if label.is_empty() => None,
                Some(label) => Some(label.to_string()),
                None => Some(format!("Bit {}", i)),
            })
            .collect()
    }
}

pub fn decode_enum(value: u64, names: &[&str]) -> String {
    usize::try_from(value)
        .ok()
        .and_then(|i| names.get(i))
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("UNKNOWN_TYPE: {}", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABC: &[&str] = &["A", "B", "C"];

    #[test]
    fn named_bits_in_order() {
        let table = FlagTable32::new("abc", ABC).unwrap();
        assert_eq!(table.decode(0b0000_0101), vec!["A", "C"]);
        assert!(table.decode(0).is_empty());
    }

    #[test]
    fn bits_past_table_are_numbered() {
        let table = FlagTable32::new("abc", ABC).unwrap();
        assert_eq!(table.decode(0b10_0011), vec!["A", "B", "Bit 5"]);
        assert_eq!(table.decode(1 << 31), vec!["Bit 31"]);
    }

    #[test]
    fn bits_past_field_width_are_ignored() {
        let table = FlagTable32::new("abc", ABC).unwrap();
        assert_eq!(table.decode(1 << 40 | 1), vec!["A"]);

        let wide = FlagTable64::new("abc", ABC).unwrap();
        assert_eq!(wide.decode(1 << 40 | 1 << 63), vec!["Bit 40", "Bit 63"]);
    }

    #[test]
    fn empty_label_is_skipped() {
        const RESERVED: &[&str] = &["A", "", "C"];
        let table = FlagTable32::new("reserved", RESERVED).unwrap();
        assert_eq!(table.decode(0b111), vec!["A", "C"]);
    }

    #[test]
    fn labels_ascend_and_appear_once() {
        let table = FlagTable64::new("abc", ABC).unwrap();
        let bits = 0xf0f0_0000_0000_0f0fu64;
        let labels = table.decode(bits);
        assert_eq!(labels.len(), bits.count_ones() as usize);

        let indices: Vec<u32> = labels
            .iter()
            .map(|l| match l.as_str() {
                "A" => 0,
                "B" => 1,
                "C" => 2,
                other => other.trim_start_matches("Bit ").parse().unwrap(),
            })
            .collect();
        assert!(indices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn overlong_tables_are_rejected() {
        const LONG_33: &[&str] = &["x"; 33];
        const LONG_65: &[&str] = &["x"; 65];
        const FULL_64: &[&str] = &["x"; 64];

        assert_eq!(
            FlagTable32::new("long", LONG_33).unwrap_err(),
            TableError::TooLong {
                table: "long",
                len: 33,
                width: 32
            }
        );
        assert!(FlagTable32::new("long", &LONG_33[..32]).is_ok());
        assert!(FlagTable64::new("long", LONG_65).is_err());
        assert!(FlagTable64::new("full", FULL_64).is_ok());
    }

    #[test]
    fn unsupported_width() {
        assert!(FlagTable::<128>::new("wide", ABC).is_err());
    }

    #[test]
    fn enum_values() {
        assert_eq!(decode_enum(1, ABC), "B");
        assert_eq!(decode_enum(3, ABC), "UNKNOWN_TYPE: 3");
        assert_eq!(decode_enum(u64::MAX, ABC), format!("UNKNOWN_TYPE: {}", u64::MAX));
    }
}
