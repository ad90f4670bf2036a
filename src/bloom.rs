/*!
Split-block bloom filters, the Parquet-compatible probabilistic membership
structure used to prune data files by value.

A filter is a power-of-two number of 256-bit blocks (8 x 32-bit words). The
low 32 bits of a value's XXH64 hash select the block, the high 32 bits are
multiplied with eight salt constants to select one bit per word. Lookups
check all eight bits, so the structure has no false negatives.
*/

use xxhash_rust::xxh64::xxh64;

use crate::error::{Error, Result};
use crate::model::values::Value;

/// Salt constants multiplied with the hash to derive the eight bit
/// positions of a block. Must match Parquet's for interoperability.
const SALT: [u32; 8] = [
    0x47b6137b, 0x44974d91, 0x8824ad5b, 0xa2b7289d, 0x705495c7, 0x2df1424b, 0x9efc4947, 0x5c6bfb31,
];

/// Magic bytes of a serialized filter and of a filter sidecar file.
const BLOOM_MAGIC: &[u8; 5] = b"BLOOM";
/// Serialization format version.
const BLOOM_VERSION: u8 = 1;
/// Bytes per 256-bit block.
const BYTES_PER_BLOCK: usize = 32;

/// Suffix appended to a data file path to name its bloom filter sidecar.
pub const BLOOM_FILTER_SUFFIX: &str = ".bf";

/// The sidecar path for a data file.
pub fn bloom_filter_path(data_file_path: &str) -> String {
    format!("{}{}", data_file_path, BLOOM_FILTER_SUFFIX)
}

type Block = [u32; 8];

/// A split-block bloom filter.
#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilter {
    blocks: Vec<Block>,
    item_count: u32,
    fpp: f64,
}

impl BloomFilter {
    /// Size a filter for the expected item count and target false positive
    /// rate, with no byte cap.
    pub fn new(expected_items: usize, fpp: f64) -> Self {
        Self::with_max_bytes(expected_items, fpp, usize::MAX)
    }

    /// Size a filter for the expected item count and target false positive
    /// rate, clamped to at most `max_bytes` of block data.
    pub fn with_max_bytes(expected_items: usize, fpp: f64, max_bytes: usize) -> Self {
        let ln2 = std::f64::consts::LN_2;
        let bits = -(expected_items.max(1) as f64) * fpp.ln() / (ln2 * ln2);
        let mut num_blocks = ((bits / 256.0).ceil().max(1.0) as usize).next_power_of_two();
        while num_blocks > 1 && num_blocks * BYTES_PER_BLOCK > max_bytes {
            num_blocks /= 2;
        }
        BloomFilter {
            blocks: vec![[0u32; 8]; num_blocks],
            item_count: 0,
            fpp,
        }
    }

    /// Number of 256-bit blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Number of items added.
    pub fn item_count(&self) -> u32 {
        self.item_count
    }

    /// The target false positive rate the filter was sized for.
    pub fn fpp(&self) -> f64 {
        self.fpp
    }

    /// Modulus-avoiding block reduction: low 32 bits of the hash scaled
    /// into the block range.
    fn block_index(&self, hash: u64) -> usize {
        let low = hash & 0xFFFF_FFFF;
        ((low * self.blocks.len() as u64) >> 32) as usize
    }

    /// One bit per word, selected by the top 5 bits of the salted product
    /// of the high 32 bits of the hash.
    fn mask(hash: u64) -> Block {
        let high = (hash >> 32) as u32;
        let mut mask = [0u32; 8];
        for (word, salt) in mask.iter_mut().zip(SALT.iter()) {
            *word = 1 << (high.wrapping_mul(*salt) >> 27);
        }
        mask
    }

    /// Insert a pre-computed hash.
    pub fn add_hash(&mut self, hash: u64) {
        let index = self.block_index(hash);
        let mask = Self::mask(hash);
        for (word, bit) in self.blocks[index].iter_mut().zip(mask.iter()) {
            *word |= bit;
        }
        self.item_count += 1;
    }

    /// Whether a pre-computed hash may have been inserted. No false
    /// negatives; false positives at roughly the target rate.
    pub fn might_contain_hash(&self, hash: u64) -> bool {
        let index = self.block_index(hash);
        let mask = Self::mask(hash);
        self.blocks[index]
            .iter()
            .zip(mask.iter())
            .all(|(word, bit)| word & bit == *bit)
    }

    /// Insert a value. Nulls never participate.
    pub fn add(&mut self, value: &Value) {
        if let Some(hash) = hash_value(value) {
            self.add_hash(hash);
        }
    }

    /// Whether a value may have been inserted.
    pub fn might_contain(&self, value: &Value) -> bool {
        match hash_value(value) {
            Some(hash) => self.might_contain_hash(hash),
            None => false,
        }
    }

    /// Merge another filter of equal block count into this one by bitwise OR.
    pub fn merge(&mut self, other: &BloomFilter) -> Result<()> {
        if self.blocks.len() != other.blocks.len() {
            return Err(Error::InvalidFormat(format!(
                "bloom filter block counts {} and {}",
                self.blocks.len(),
                other.blocks.len()
            )));
        }
        for (left, right) in self.blocks.iter_mut().zip(other.blocks.iter()) {
            for (word, other_word) in left.iter_mut().zip(right.iter()) {
                *word |= other_word;
            }
        }
        self.item_count += other.item_count;
        Ok(())
    }

    /// Serialize: `BLOOM` magic, version byte, block count, item count,
    /// target false positive rate, then the raw block words little-endian.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes =
            Vec::with_capacity(5 + 1 + 4 + 4 + 8 + self.blocks.len() * BYTES_PER_BLOCK);
        bytes.extend_from_slice(BLOOM_MAGIC);
        bytes.push(BLOOM_VERSION);
        bytes.extend_from_slice(&(self.blocks.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.item_count.to_le_bytes());
        bytes.extend_from_slice(&self.fpp.to_le_bytes());
        for block in &self.blocks {
            for word in block {
                bytes.extend_from_slice(&word.to_le_bytes());
            }
        }
        bytes
    }

    /// Rebuild a filter from its serialized form.
    pub fn deserialize(bytes: &[u8]) -> Result<BloomFilter> {
        let mut cursor = Cursor::new(bytes);
        cursor.expect_magic()?;
        let num_blocks = cursor.read_u32()? as usize;
        let item_count = cursor.read_u32()?;
        let fpp = f64::from_le_bytes(cursor.read_array::<8>()?);
        let mut blocks = Vec::with_capacity(num_blocks);
        for _ in 0..num_blocks {
            let mut block = [0u32; 8];
            for word in block.iter_mut() {
                *word = u32::from_le_bytes(cursor.read_array::<4>()?);
            }
            blocks.push(block);
        }
        Ok(BloomFilter {
            blocks,
            item_count,
            fpp,
        })
    }
}

/// Hash a value with XXH64 seed 0 using the canonical byte rules: strings
/// as UTF-8, int and long as the 8-byte little-endian signed value, binary,
/// fixed and UUID as their raw bytes, floats as their IEEE bit pattern.
pub fn hash_value(value: &Value) -> Option<u64> {
    let hash = match value {
        Value::String(s) => xxh64(s.as_bytes(), 0),
        Value::Int(i) => xxh64(&(*i as i64).to_le_bytes(), 0),
        Value::Long(l) => xxh64(&l.to_le_bytes(), 0),
        Value::Date(d) => xxh64(&(*d as i64).to_le_bytes(), 0),
        Value::Time(t)
        | Value::Timestamp(t)
        | Value::Timestamptz(t)
        | Value::TimestampNs(t)
        | Value::TimestamptzNs(t) => xxh64(&t.to_le_bytes(), 0),
        Value::Boolean(b) => xxh64(&[u8::from(*b)], 0),
        Value::Float(f) => xxh64(&f.to_bits().to_le_bytes(), 0),
        Value::Double(d) => xxh64(&d.to_bits().to_le_bytes(), 0),
        Value::Uuid(u) => xxh64(u.as_bytes(), 0),
        Value::Fixed(b) | Value::Binary(b) => xxh64(b, 0),
        Value::Decimal(d) => xxh64(&d.to_bytes(), 0),
    };
    Some(hash)
}

/// One named filter inside a sidecar file.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    /// Field id the filter covers.
    pub field_id: u32,
    /// Field name, for inspection.
    pub name: String,
    /// The filter.
    pub filter: BloomFilter,
}

/// Serialize a set of per-field filters into a sidecar file: the shared
/// magic and version, a record count, then per record the field id, name
/// and serialized filter, each length-prefixed.
pub fn write_filter_file(filters: &[FieldFilter]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(BLOOM_MAGIC);
    bytes.push(BLOOM_VERSION);
    bytes.extend_from_slice(&(filters.len() as u32).to_le_bytes());
    for field in filters {
        bytes.extend_from_slice(&field.field_id.to_le_bytes());
        bytes.extend_from_slice(&(field.name.len() as u32).to_le_bytes());
        bytes.extend_from_slice(field.name.as_bytes());
        let filter = field.filter.serialize();
        bytes.extend_from_slice(&(filter.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&filter);
    }
    bytes
}

/// Read a sidecar file back into per-field filters.
pub fn read_filter_file(bytes: &[u8]) -> Result<Vec<FieldFilter>> {
    let mut cursor = Cursor::new(bytes);
    cursor.expect_magic()?;
    let count = cursor.read_u32()? as usize;
    let mut filters = Vec::with_capacity(count);
    for _ in 0..count {
        let field_id = cursor.read_u32()?;
        let name_len = cursor.read_u32()? as usize;
        let name = String::from_utf8(cursor.read_bytes(name_len)?.to_vec())?;
        let filter_len = cursor.read_u32()? as usize;
        let filter = BloomFilter::deserialize(cursor.read_bytes(filter_len)?)?;
        filters.push(FieldFilter {
            field_id,
            name,
            filter,
        });
    }
    Ok(filters)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, offset: 0 }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.offset + len > self.bytes.len() {
            return Err(Error::InvalidFormat("bloom filter framing".to_string()));
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        Ok(self.read_bytes(N)?.try_into()?)
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array::<4>()?))
    }

    fn expect_magic(&mut self) -> Result<()> {
        if self.read_bytes(5)? != BLOOM_MAGIC {
            return Err(Error::InvalidFormat("bloom filter magic".to_string()));
        }
        let version = self.read_bytes(1)?[0];
        if version != BLOOM_VERSION {
            return Err(Error::InvalidFormat(format!(
                "bloom filter version {}",
                version
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let mut filter = BloomFilter::new(1000, 0.01);
        for word in ["apple", "banana", "cherry"] {
            filter.add(&Value::String(word.to_string()));
        }
        for word in ["apple", "banana", "cherry"] {
            assert!(filter.might_contain(&Value::String(word.to_string())));
        }
        assert_eq!(filter.item_count(), 3);
    }

    #[test]
    fn test_observed_fpr_near_target() {
        let target = 0.01;
        let mut filter = BloomFilter::new(1000, target);
        for i in 0..1000 {
            filter.add(&Value::Long(i));
        }
        // probe a disjoint key range
        let probes = 10_000;
        let false_positives = (0..probes)
            .filter(|i| filter.might_contain(&Value::Long(1_000_000 + i)))
            .count();
        let observed = false_positives as f64 / probes as f64;
        assert!(
            observed <= 2.0 * target,
            "observed fpr {} over twice the target {}",
            observed,
            target
        );
    }

    #[test]
    fn test_block_count_is_power_of_two_and_clamped() {
        let filter = BloomFilter::new(1000, 0.01);
        assert!(filter.num_blocks().is_power_of_two());

        let clamped = BloomFilter::with_max_bytes(1_000_000, 0.001, 1024);
        assert!(clamped.num_blocks().is_power_of_two());
        assert!(clamped.num_blocks() * 32 <= 1024);

        let tiny = BloomFilter::with_max_bytes(1, 0.5, 1);
        assert_eq!(tiny.num_blocks(), 1);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut filter = BloomFilter::new(64, 0.05);
        for i in 0..64 {
            filter.add(&Value::Int(i));
        }
        let bytes = filter.serialize();
        assert_eq!(&bytes[0..5], b"BLOOM");
        let back = BloomFilter::deserialize(&bytes).unwrap();
        assert_eq!(filter, back);
    }

    #[test]
    fn test_merge_by_or() {
        let mut left = BloomFilter::new(100, 0.01);
        let mut right = BloomFilter::new(100, 0.01);
        left.add(&Value::String("left".to_string()));
        right.add(&Value::String("right".to_string()));
        left.merge(&right).unwrap();
        assert!(left.might_contain(&Value::String("left".to_string())));
        assert!(left.might_contain(&Value::String("right".to_string())));
        assert_eq!(left.item_count(), 2);

        let mismatched = BloomFilter::with_max_bytes(100, 0.01, 32);
        assert!(left.merge(&mismatched).is_err());
    }

    #[test]
    fn test_int_and_long_hash_identically() {
        // both hash as the 8-byte little-endian signed value
        assert_eq!(
            hash_value(&Value::Int(42)),
            hash_value(&Value::Long(42))
        );
    }

    #[test]
    fn test_filter_file_roundtrip() {
        let mut name_filter = BloomFilter::new(100, 0.01);
        name_filter.add(&Value::String("alice".to_string()));
        let mut id_filter = BloomFilter::new(100, 0.01);
        id_filter.add(&Value::Long(7));

        let fields = vec![
            FieldFilter {
                field_id: 2,
                name: "name".to_string(),
                filter: name_filter,
            },
            FieldFilter {
                field_id: 1,
                name: "id".to_string(),
                filter: id_filter,
            },
        ];
        let bytes = write_filter_file(&fields);
        let back = read_filter_file(&bytes).unwrap();
        assert_eq!(fields, back);
        assert!(back[0].filter.might_contain(&Value::String("alice".to_string())));
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            bloom_filter_path("s3://b/t/data/f1.parquet"),
            "s3://b/t/data/f1.parquet.bf"
        );
    }
}
