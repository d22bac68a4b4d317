//! Legacy advertising payload.
//!
//! Built from typed AD structures; the 31-byte limit is checked when the
//! payload is built rather than left to the host stack.

use crate::consts::ADV_MAX_LEN;
use crate::error::AdvertisementError;

pub const AD_FLAGS: u8 = 0x01;
pub const AD_SERVICES_16_COMPLETE: u8 = 0x03;
pub const AD_COMPLETE_LOCAL_NAME: u8 = 0x09;
pub const AD_APPEARANCE: u8 = 0x19;

/// LE General Discoverable, BR/EDR not supported.
pub const FLAGS_GENERAL_LE_ONLY: u8 = 0x06;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    bytes: Vec<u8>,
}

impl Advertisement {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `(ad_type, data)` pairs in payload order.
    pub fn structures(&self) -> impl Iterator<Item = (u8, &[u8])> + '_ {
        let mut rest = self.bytes.as_slice();
        std::iter::from_fn(move || {
            let (&len, tail) = rest.split_first()?;
            let len = len as usize;
            if len == 0 || tail.len() < len {
                return None;
            }
            let (ad, next) = tail.split_at(len);
            rest = next;
            Some((ad[0], &ad[1..]))
        })
    }

    fn find(&self, ad_type: u8) -> Option<&[u8]> {
        self.structures().find(|(t, _)| *t == ad_type).map(|(_, d)| d)
    }

    pub fn local_name(&self) -> Option<&str> {
        std::str::from_utf8(self.find(AD_COMPLETE_LOCAL_NAME)?).ok()
    }

    pub fn appearance(&self) -> Option<u16> {
        let d = self.find(AD_APPEARANCE)?;
        Some(u16::from_le_bytes([*d.first()?, *d.get(1)?]))
    }

    pub fn services_16(&self) -> Vec<u16> {
        self.find(AD_SERVICES_16_COMPLETE)
            .map(|d| {
                d.chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct AdvertisementBuilder {
    bytes: Vec<u8>,
    error: Option<AdvertisementError>,
}

impl AdvertisementBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn raw(mut self, ad_type: u8, data: &[u8]) -> Self {
        // length byte counts the type byte as well
        self.bytes.push((data.len() + 1) as u8);
        self.bytes.push(ad_type);
        self.bytes.extend_from_slice(data);
        self
    }

    pub fn flags(self, flags: u8) -> Self {
        self.raw(AD_FLAGS, &[flags])
    }

    pub fn services_16(self, uuids: &[u16]) -> Self {
        if uuids.is_empty() {
            return self;
        }
        let data: Vec<u8> = uuids.iter().flat_map(|u| u.to_le_bytes()).collect();
        self.raw(AD_SERVICES_16_COMPLETE, &data)
    }

    pub fn appearance(self, appearance: u16) -> Self {
        self.raw(AD_APPEARANCE, &appearance.to_le_bytes())
    }

    pub fn full_name(mut self, name: &str) -> Self {
        if name.is_empty() {
            self.error.get_or_insert(AdvertisementError::EmptyName);
            return self;
        }
        self.raw(AD_COMPLETE_LOCAL_NAME, name.as_bytes())
    }

    pub fn build(self) -> Result<Advertisement, AdvertisementError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.bytes.len() > ADV_MAX_LEN {
            return Err(AdvertisementError::TooLong(self.bytes.len()));
        }
        Ok(Advertisement { bytes: self.bytes })
    }
}

/// Flags, service list, keyboard appearance and the GAP name.
pub fn create_advertisement_data(
    name: &str,
    services: &[u16],
    appearance: u16,
) -> Result<Advertisement, AdvertisementError> {
    AdvertisementBuilder::new()
        .flags(FLAGS_GENERAL_LE_ONLY)
        .services_16(services)
        .appearance(appearance)
        .full_name(name)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{PERIPHERAL_APPEARANCE, UUID_HID_SERVICE};

    #[test]
    fn keyboard_payload_layout() {
        let adv =
            create_advertisement_data("MP-keyboard", &[UUID_HID_SERVICE], PERIPHERAL_APPEARANCE)
                .unwrap();
        let mut expected = b"\x02\x01\x06\x03\x03\x12\x18\x03\x19\xc1\x03\x0c\x09".to_vec();
        expected.extend_from_slice(b"MP-keyboard");
        assert_eq!(adv.as_bytes(), expected.as_slice());
        assert_eq!(adv.local_name(), Some("MP-keyboard"));
        assert_eq!(adv.appearance(), Some(0x03C1));
        assert_eq!(adv.services_16(), vec![0x1812]);
    }

    #[test]
    fn longest_name_that_fits() {
        // 3 + 4 + 4 + 2 header bytes leave 18 for the name
        let name = "N".repeat(18);
        let adv = create_advertisement_data(&name, &[UUID_HID_SERVICE], PERIPHERAL_APPEARANCE)
            .unwrap();
        assert_eq!(adv.as_bytes().len(), ADV_MAX_LEN);

        let name = "N".repeat(19);
        let err = create_advertisement_data(&name, &[UUID_HID_SERVICE], PERIPHERAL_APPEARANCE)
            .unwrap_err();
        assert_eq!(err, AdvertisementError::TooLong(32));
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = create_advertisement_data("", &[UUID_HID_SERVICE], PERIPHERAL_APPEARANCE)
            .unwrap_err();
        assert_eq!(err, AdvertisementError::EmptyName);
    }
}
