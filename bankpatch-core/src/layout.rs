use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::freespace::SpaceManager;
use crate::image::{Image, MemoryMap};
use crate::{PatchError, Result};

/// Parse `0x`/`$`-prefixed hex or plain decimal.
pub fn parse_number(text: &str) -> std::result::Result<u64, std::num::ParseIntError> {
    let t = text.trim();
    if let Some(hex) = t
        .strip_prefix("0x")
        .or_else(|| t.strip_prefix("0X"))
        .or_else(|| t.strip_prefix('$'))
    {
        u64::from_str_radix(hex, 16)
    } else {
        t.parse::<u64>()
    }
}

// JSON has no hex literals, so addresses may also be given as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Int(u64),
    Text(String),
}

impl RawNumber {
    fn value(self) -> std::result::Result<u64, String> {
        match self {
            RawNumber::Int(v) => Ok(v),
            RawNumber::Text(t) => parse_number(&t).map_err(|e| format!("bad number '{}': {}", t, e)),
        }
    }
}

pub(crate) fn de_usize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<usize, D::Error> {
    let v = RawNumber::deserialize(d)?
        .value()
        .map_err(serde::de::Error::custom)?;
    usize::try_from(v).map_err(serde::de::Error::custom)
}

pub(crate) fn de_u32<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u32, D::Error> {
    let v = RawNumber::deserialize(d)?
        .value()
        .map_err(serde::de::Error::custom)?;
    u32::try_from(v).map_err(serde::de::Error::custom)
}

pub(crate) fn de_opt_usize<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<usize>, D::Error> {
    match Option::<RawNumber>::deserialize(d)? {
        None => Ok(None),
        Some(raw) => {
            let v = raw.value().map_err(serde::de::Error::custom)?;
            usize::try_from(v).map(Some).map_err(serde::de::Error::custom)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeRange {
    #[serde(deserialize_with = "de_usize")]
    pub start: usize,
    #[serde(deserialize_with = "de_usize")]
    pub end: usize,
}

/// Static description of a cartridge: how it maps into CPU space, how large
/// it should be, and which byte ranges are free for new code and data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLayout {
    #[serde(default)]
    pub map: MemoryMap,
    #[serde(default, deserialize_with = "de_opt_usize")]
    pub expand_to: Option<usize>,
    #[serde(default)]
    pub free: Vec<FreeRange>,
}

impl ImageLayout {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Wrap raw cartridge bytes in an [`Image`] with this layout's free space.
    pub fn build(&self, mut data: Vec<u8>) -> Result<Image> {
        if let Some(size) = self.expand_to {
            if size < data.len() {
                return Err(PatchError::Config(format!(
                    "expand_to {:#X} is smaller than the {:#X}-byte image",
                    size,
                    data.len()
                )));
            }
            data.resize(size, 0xFF);
        }

        for range in &self.free {
            if range.start >= range.end || range.end > data.len() {
                return Err(PatchError::Config(format!(
                    "free range {:#X}..{:#X} is empty or outside the {:#X}-byte image",
                    range.start,
                    range.end,
                    data.len()
                )));
            }
        }

        let space = SpaceManager::with_free_ranges(self.free.iter().map(|r| r.start..r.end));
        log::debug!(
            "image {:#X} bytes, {:?}, {:#X} bytes free",
            data.len(),
            self.map,
            space.total_free()
        );
        Ok(Image::with_space(data, self.map, space))
    }
}
