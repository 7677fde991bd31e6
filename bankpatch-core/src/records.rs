use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image::{Image, ImageError, WriteKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record is {got} bytes but the table holds {expected}-byte records")]
    SizeMismatch { expected: usize, got: usize },

    #[error("record index {index:#X} is outside a table of {count:#X} records")]
    IndexOutOfBounds { index: usize, count: usize },

    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Where a table's first record lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableLocation {
    /// File offset of a 3-byte little-endian CPU pointer to the table, usually
    /// the operand of an instruction that indexes it.
    Indirect { pointer: usize },
    /// File offset of the table itself.
    Direct { base: usize },
}

/// Reads and writes fixed-width records of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCodec {
    pub location: TableLocation,
    pub record_size: usize,
    pub count: usize,
}

impl RecordCodec {
    pub fn indirect(pointer: usize, record_size: usize, count: usize) -> Self {
        RecordCodec {
            location: TableLocation::Indirect { pointer },
            record_size,
            count,
        }
    }

    pub fn direct(base: usize, record_size: usize, count: usize) -> Self {
        RecordCodec {
            location: TableLocation::Direct { base },
            record_size,
            count,
        }
    }

    /// File offset of record 0.
    pub fn base(&self, image: &Image) -> Result<usize, RecordError> {
        match self.location {
            TableLocation::Direct { base } => Ok(base),
            TableLocation::Indirect { pointer } => {
                let cpu = image.read_u24(pointer)?;
                Ok(image.to_file(cpu)?)
            }
        }
    }

    fn offset(&self, image: &Image, index: usize) -> Result<usize, RecordError> {
        if index >= self.count {
            return Err(RecordError::IndexOutOfBounds {
                index,
                count: self.count,
            });
        }
        Ok(self.base(image)? + index * self.record_size)
    }

    pub fn read(&self, image: &Image, index: usize) -> Result<Vec<u8>, RecordError> {
        let addr = self.offset(image, index)?;
        Ok(image.read_at(addr, self.record_size)?.to_vec())
    }

    pub fn read_all(&self, image: &Image) -> Result<Vec<Vec<u8>>, RecordError> {
        (0..self.count).map(|i| self.read(image, i)).collect()
    }

    pub fn write(&self, image: &mut Image, index: usize, data: &[u8]) -> Result<(), RecordError> {
        if data.len() != self.record_size {
            return Err(RecordError::SizeMismatch {
                expected: self.record_size,
                got: data.len(),
            });
        }
        let addr = self.offset(image, index)?;
        image.write_at(addr, data, WriteKind::NoMark)?;
        Ok(())
    }

    pub fn read_record<T: FixedRecord>(&self, image: &Image, index: usize) -> Result<T, RecordError> {
        self.check_type::<T>()?;
        Ok(T::from_bytes(&self.read(image, index)?))
    }

    pub fn write_record<T: FixedRecord>(
        &self,
        image: &mut Image,
        index: usize,
        record: &T,
    ) -> Result<(), RecordError> {
        self.check_type::<T>()?;
        self.write(image, index, &record.to_bytes())
    }

    fn check_type<T: FixedRecord>(&self) -> Result<(), RecordError> {
        if T::SIZE != self.record_size {
            return Err(RecordError::SizeMismatch {
                expected: self.record_size,
                got: T::SIZE,
            });
        }
        Ok(())
    }
}

/// A typed view of one fixed-width record.
pub trait FixedRecord: Sized {
    const SIZE: usize;

    /// `bytes` is always exactly `SIZE` long.
    fn from_bytes(bytes: &[u8]) -> Self;

    fn to_bytes(&self) -> Vec<u8>;
}
