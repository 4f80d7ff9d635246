use crate::error::{BenchError, Result};

/// Size of the fixed record header: checksum, key length, value length.
pub const HEADER_SIZE: usize = 4 + 4 + 4;

/// One key/value assignment in a unit file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// A checksum-verified record borrowed from a unit's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
}

impl<'a> RecordRef<'a> {
    /// Parse and verify the record at the start of `data` without copying.
    ///
    /// Returns the record and the number of bytes it occupies. Length
    /// fields are only trusted once they fit inside `data`.
    pub fn parse(data: &'a [u8]) -> Result<(Self, usize)> {
        if data.len() < HEADER_SIZE {
            return Err(BenchError::SerializationError(
                "Data too short for record header".to_string(),
            ));
        }

        let checksum = read_u32(data, 0);
        let key_len = read_u32(data, 4) as u64;
        let value_len = read_u32(data, 8) as u64;

        let end = HEADER_SIZE as u64 + key_len + value_len;
        if end > data.len() as u64 {
            return Err(BenchError::SerializationError(format!(
                "Record of {} bytes extends past end of data ({} bytes)",
                end,
                data.len()
            )));
        }
        let end = end as usize;
        let key_end = HEADER_SIZE + key_len as usize;

        let actual = crc32fast::hash(&data[4..end]);
        if actual != checksum {
            return Err(BenchError::ChecksumMismatch {
                expected: checksum,
                actual,
            });
        }

        let record = RecordRef {
            key: &data[HEADER_SIZE..key_end],
            value: &data[key_end..end],
        };
        Ok((record, end))
    }

    /// Offset of the value relative to the start of the record.
    pub fn value_offset(&self) -> usize {
        HEADER_SIZE + self.key.len()
    }

    pub fn to_record(&self) -> Record {
        Record::new(self.key, self.value)
    }
}

impl Record {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Serialize the record to bytes
    /// Format: [CRC32: 4B][KeyLen: 4B][ValueLen: 4B][Key][Value]
    ///
    /// Keys and values are limited only by the 32-bit length fields.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let key_len = length_field("Key", self.key.len())?;
        let value_len = length_field("Value", self.value.len())?;

        let mut buffer = Vec::with_capacity(self.serialized_size());
        buffer.extend_from_slice(&[0u8; 4]);
        buffer.extend_from_slice(&key_len.to_le_bytes());
        buffer.extend_from_slice(&value_len.to_le_bytes());
        buffer.extend_from_slice(&self.key);
        buffer.extend_from_slice(&self.value);

        // Checksum covers everything after the checksum field
        let checksum = crc32fast::hash(&buffer[4..]);
        buffer[0..4].copy_from_slice(&checksum.to_le_bytes());

        Ok(buffer)
    }

    /// Deserialize the record at the start of `data`.
    ///
    /// Returns the record and the number of bytes it occupies.
    pub fn deserialize(data: &[u8]) -> Result<(Self, usize)> {
        let (record, used) = RecordRef::parse(data)?;
        Ok((record.to_record(), used))
    }

    pub fn serialized_size(&self) -> usize {
        HEADER_SIZE + self.key.len() + self.value.len()
    }
}

fn length_field(what: &str, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        BenchError::SerializationError(format!(
            "{} length {} does not fit a 32-bit length field",
            what, len
        ))
    })
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let record = Record::new("abc", "defg");
        let bytes = record.serialize().unwrap();

        assert_eq!(bytes.len(), HEADER_SIZE + 3 + 4);
        assert_eq!(read_u32(&bytes, 4), 3);
        assert_eq!(read_u32(&bytes, 8), 4);
        assert_eq!(&bytes[HEADER_SIZE..], b"abcdefg");
        assert_eq!(read_u32(&bytes, 0), crc32fast::hash(&bytes[4..]));
    }

    #[test]
    fn test_deserialize_reports_consumed_length() {
        let mut data = Record::new("k1", "v1").serialize().unwrap();
        data.extend(Record::new("key2", "value2").serialize().unwrap());

        let (first, used) = Record::deserialize(&data).unwrap();
        assert_eq!(first, Record::new("k1", "v1"));

        let (second, used2) = Record::deserialize(&data[used..]).unwrap();
        assert_eq!(second, Record::new("key2", "value2"));
        assert_eq!(used + used2, data.len());
    }

    #[test]
    fn test_parse_borrows_key_and_value() {
        let data = Record::new("key", "value").serialize().unwrap();
        let (record, used) = RecordRef::parse(&data).unwrap();

        assert_eq!(record.key, b"key");
        assert_eq!(record.value, b"value");
        assert_eq!(used, data.len());
        assert_eq!(&data[record.value_offset()..used], b"value");
    }

    #[test]
    fn test_empty_value_is_valid() {
        let data = Record::new("k", "").serialize().unwrap();
        let (record, _) = Record::deserialize(&data).unwrap();
        assert!(record.value.is_empty());
    }

    #[test]
    fn test_flipped_bit_detected() {
        let mut data = Record::new("key", "value").serialize().unwrap();
        let last = data.len() - 1;
        data[last] ^= 0x01;

        let err = Record::deserialize(&data).unwrap_err();
        assert!(matches!(err, BenchError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_truncated_record_rejected() {
        let data = Record::new("key", "value").serialize().unwrap();
        assert!(Record::deserialize(&data[..data.len() - 2]).is_err());
        assert!(Record::deserialize(&data[..HEADER_SIZE - 1]).is_err());
    }

    #[test]
    fn test_large_key_and_value_accepted() {
        let record = Record::new(vec![b'k'; 70 * 1024], vec![b'v'; 2 * 1024 * 1024]);
        let data = record.serialize().unwrap();

        let (decoded, used) = Record::deserialize(&data).unwrap();
        assert_eq!(used, data.len());
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_corrupt_length_field_rejected_without_allocation() {
        let mut data = Record::new("k", "v").serialize().unwrap();
        data[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            Record::deserialize(&data),
            Err(BenchError::SerializationError(_))
        ));
    }
}
