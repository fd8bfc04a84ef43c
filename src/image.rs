//! Flash jobs and the images they are made of
//!
//! A [FlashJob] is an ordered list of [FlashImage]s together with the chip
//! the caller expects to find on the other end of the wire. Jobs arrive from
//! the outside world as a [JobRequest], whose addresses are still text, and
//! are validated into a [FlashJob] before they can be submitted.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::Error;

/// Target chips a job may be tagged with
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[non_exhaustive]
#[strum(serialize_all = "lowercase")]
pub enum Chip {
    /// ESP32
    Esp32,
    /// ESP32-C3, ESP8685
    Esp32c3,
    /// ESP32-S2
    Esp32s2,
    /// ESP32-S3
    Esp32s3,
    /// ESP8266
    Esp8266,
}

/// Well-known image placement for a chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSlot {
    /// What is usually stored in this slot
    pub label: &'static str,
    /// Flash offset of the slot
    pub address: u32,
}

impl Chip {
    /// The default image layout for this chip
    pub fn image_slots(self) -> &'static [ImageSlot] {
        const ESP8266: &[ImageSlot] = &[ImageSlot {
            label: "firmware",
            address: 0x0,
        }];
        const ESP32: &[ImageSlot] = &[
            ImageSlot {
                label: "partition-table",
                address: 0x8000,
            },
            ImageSlot {
                label: "firmware",
                address: 0x10000,
            },
        ];

        match self {
            Chip::Esp8266 => ESP8266,
            Chip::Esp32 | Chip::Esp32c3 | Chip::Esp32s2 | Chip::Esp32s3 => ESP32,
        }
    }
}

/// One file to be written at a flash offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashImage {
    /// Name of the image in storage
    pub name: String,
    /// Flash offset the image is written to
    pub address: u32,
}

impl FlashImage {
    pub fn new(name: impl Into<String>, address: u32) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }
}

impl FromStr for FlashImage {
    type Err = Error;

    /// Parse `name@address`, e.g. `partition-table.bin@0x8000`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, address) = s
            .rsplit_once('@')
            .ok_or_else(|| Error::MalformedImage(s.to_owned()))?;

        Ok(Self::new(name, parse_address(address)?))
    }
}

/// A validated, non-empty unit of work for the flashing worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashJob {
    target: String,
    images: Vec<FlashImage>,
}

impl FlashJob {
    /// Create a new job, rejecting one without images
    pub fn new(target: impl Into<String>, images: Vec<FlashImage>) -> Result<Self, Error> {
        if images.is_empty() {
            return Err(Error::EmptyJob);
        }

        Ok(Self {
            target: target.into(),
            images,
        })
    }

    /// The chip tag as given by the submitter
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The chip tag, if it names a known chip
    pub fn chip(&self) -> Option<Chip> {
        Chip::from_str(&self.target.to_lowercase()).ok()
    }

    pub fn images(&self) -> &[FlashImage] {
        &self.images
    }
}

/// A flash address as written by a submitter
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawAddress {
    Number(u64),
    Text(String),
}

/// Image entry of an incoming job description
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ImageRequest {
    pub name: String,
    pub address: RawAddress,
}

/// An incoming job description, before validation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct JobRequest {
    #[serde(rename = "targetChipId", alias = "target")]
    pub target_chip_id: String,
    #[serde(alias = "files", default)]
    pub images: Vec<ImageRequest>,
}

impl JobRequest {
    /// Read a job description from TOML text
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        toml::from_str(text).map_err(Error::InvalidJob)
    }
}

impl TryFrom<JobRequest> for FlashJob {
    type Error = Error;

    fn try_from(request: JobRequest) -> Result<Self, Self::Error> {
        let images = request
            .images
            .into_iter()
            .map(|image| {
                let address = match image.address {
                    RawAddress::Number(n) => {
                        u32::try_from(n).map_err(|_| Error::InvalidAddress(n.to_string()))?
                    }
                    RawAddress::Text(text) => parse_address(&text)?,
                };
                Ok(FlashImage::new(image.name, address))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        FlashJob::new(request.target_chip_id, images)
    }
}

/// Parse a flash address
///
/// Text prefixed with `0x` (or `0X`) is read as hexadecimal, anything else as
/// decimal. Surrounding whitespace is ignored.
pub fn parse_address(text: &str) -> Result<u32, Error> {
    let trimmed = text.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => trimmed.parse::<u32>(),
    };

    parsed.map_err(|_| Error::InvalidAddress(text.to_owned()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn addresses_are_hex_or_decimal() {
        assert_eq!(parse_address("0x8000").unwrap(), 0x8000);
        assert_eq!(parse_address("0X10000").unwrap(), 0x10000);
        assert_eq!(parse_address(" 4096 ").unwrap(), 4096);
        assert_eq!(parse_address("0").unwrap(), 0);

        assert!(matches!(parse_address("0x"), Err(Error::InvalidAddress(_))));
        assert!(matches!(
            parse_address("8000h"),
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(parse_address("-1"), Err(Error::InvalidAddress(_))));
        assert!(matches!(
            parse_address("0x100000000"),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn image_from_name_and_address() {
        let image: FlashImage = "app.bin@0x10000".parse().unwrap();
        assert_eq!(image, FlashImage::new("app.bin", 0x10000));

        assert!(matches!(
            "app.bin".parse::<FlashImage>(),
            Err(Error::MalformedImage(_))
        ));
        assert!(matches!(
            "app.bin@0x1g".parse::<FlashImage>(),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn empty_jobs_are_rejected() {
        assert!(matches!(
            FlashJob::new("esp32", vec![]),
            Err(Error::EmptyJob)
        ));
    }

    #[test]
    fn job_request_accepts_both_field_spellings() {
        let request = JobRequest::from_toml(
            r#"
            targetChipId = "esp32"
            [[images]]
            name = "part.bin"
            address = "0x8000"
            [[images]]
            name = "app.bin"
            address = 65536
            "#,
        )
        .unwrap();
        let job = FlashJob::try_from(request).unwrap();

        assert_eq!(job.chip(), Some(Chip::Esp32));
        assert_eq!(
            job.images(),
            &[
                FlashImage::new("part.bin", 0x8000),
                FlashImage::new("app.bin", 0x10000),
            ]
        );

        let request = JobRequest::from_toml(
            r#"
            target = "ESP8266"
            files = [{ name = "fw.bin", address = "0" }]
            "#,
        )
        .unwrap();
        let job = FlashJob::try_from(request).unwrap();

        assert_eq!(job.target(), "ESP8266");
        assert_eq!(job.chip(), Some(Chip::Esp8266));
    }

    #[test]
    fn job_request_without_images_is_empty() {
        let request = JobRequest::from_toml(r#"target = "esp32""#).unwrap();
        assert!(matches!(FlashJob::try_from(request), Err(Error::EmptyJob)));
    }

    #[test]
    fn unknown_target_is_kept_verbatim() {
        let job = FlashJob::new("esp99", vec![FlashImage::new("a.bin", 0)]).unwrap();
        assert_eq!(job.target(), "esp99");
        assert_eq!(job.chip(), None);
    }

    #[test]
    fn default_slots() {
        assert_eq!(Chip::Esp8266.image_slots()[0].address, 0x0);

        let addresses = Chip::Esp32s3
            .image_slots()
            .iter()
            .map(|slot| slot.address)
            .collect::<Vec<_>>();
        assert_eq!(addresses, vec![0x8000, 0x10000]);
    }
}
