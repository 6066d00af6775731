use std::str::FromStr;

use crate::error::{Error, Result};

pub const DEFAULT_SAMPLE_RATE: u32 = 100;
pub const DEFAULT_ARC_BATCH_SIZE: usize = 32;
pub const DEFAULT_DIMENSION: &str = "seconds";
pub const DEFAULT_DIMENSION_ABBREV: char = 's';

/// Longest dimension label the histogram header can carry.
pub const MAX_DIMENSION_LEN: usize = 15;

#[cfg(target_pointer_width = "64")]
pub const DEFAULT_POINTER_WIDTH: PointerWidth = PointerWidth::Bits64;
#[cfg(not(target_pointer_width = "64"))]
pub const DEFAULT_POINTER_WIDTH: PointerWidth = PointerWidth::Bits32;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Configuration {
    /// Pointer width of the profiled target. Determines address sizes and
    /// alignment of the persisted records.
    pub pointer_width: PointerWidth,
    /// Tick frequency of the sampler in Hz, persisted as `prof_rate`.
    pub sample_rate: u32,
    /// Number of arc records handed to the store per write.
    pub arc_batch_size: usize,
    pub dimension: String,
    pub dimension_abbrev: char,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            pointer_width: DEFAULT_POINTER_WIDTH,
            sample_rate: DEFAULT_SAMPLE_RATE,
            arc_batch_size: DEFAULT_ARC_BATCH_SIZE,
            dimension: DEFAULT_DIMENSION.to_owned(),
            dimension_abbrev: DEFAULT_DIMENSION_ABBREV,
        }
    }
}

impl Configuration {
    pub fn from_json(json: &str) -> Result<Self> {
        let configuration: Self = serde_json::from_str(json)
            .map_err(|e| Error::InvalidArgument(format!("configuration: {}", e)))?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn validate(&self) -> Result<()> {
        if self.arc_batch_size == 0 {
            return Err(Error::InvalidArgument(
                "arc_batch_size must be at least 1".to_owned(),
            ));
        }
        if self.dimension.len() > MAX_DIMENSION_LEN {
            return Err(Error::InvalidArgument(format!(
                "dimension {:?} is longer than {} bytes",
                self.dimension, MAX_DIMENSION_LEN
            )));
        }
        if !self.dimension_abbrev.is_ascii() {
            return Err(Error::InvalidArgument(format!(
                "dimension_abbrev {:?} is not ASCII",
                self.dimension_abbrev
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum PointerWidth {
    #[serde(rename = "32")]
    Bits32,
    #[serde(rename = "64")]
    Bits64,
}

impl PointerWidth {
    /// Size of an address on the target, in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }

    /// Largest address representable on the target.
    pub const fn max_address(self) -> u64 {
        match self {
            Self::Bits32 => u32::MAX as u64,
            Self::Bits64 => u64::MAX,
        }
    }
}

impl FromStr for PointerWidth {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "32" => Ok(Self::Bits32),
            "64" => Ok(Self::Bits64),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let configuration = Configuration::default();
        assert!(configuration.validate().is_ok());
        assert_eq!(configuration.arc_batch_size, 32);
        assert_eq!(configuration.dimension, "seconds");
    }

    #[test]
    fn test_from_json_partial() {
        let configuration =
            Configuration::from_json(r#"{"pointer_width": "32", "sample_rate": 1000}"#).unwrap();
        assert_eq!(configuration.pointer_width, PointerWidth::Bits32);
        assert_eq!(configuration.sample_rate, 1000);
        assert_eq!(configuration.arc_batch_size, DEFAULT_ARC_BATCH_SIZE);
    }

    #[test]
    fn test_from_json_rejects_zero_batch() {
        let err = Configuration::from_json(r#"{"arc_batch_size": 0}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_rejects_long_dimension() {
        let configuration = Configuration {
            dimension: "a-very-long-dimension".to_owned(),
            ..Configuration::default()
        };
        assert!(configuration.validate().is_err());
    }

    #[test]
    fn test_pointer_width_from_str() {
        assert_eq!("32".parse::<PointerWidth>(), Ok(PointerWidth::Bits32));
        assert_eq!("64".parse::<PointerWidth>(), Ok(PointerWidth::Bits64));
        assert!("16".parse::<PointerWidth>().is_err());
    }
}
