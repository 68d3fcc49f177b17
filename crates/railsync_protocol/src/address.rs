//! Track addresses.
//!
//! A track address locates a point along a track number as a kilometre number
//! plus a distance in metres from that kilometre's post. Metres are kept in
//! whole millimetres so that addresses are exact, hashable and totally ordered.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Kilometre number of a track address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KmNumber(pub u32);

impl KmNumber {
    /// Creates a new kilometre number.
    pub const fn new(number: u32) -> Self {
        Self(number)
    }

    /// Returns the following kilometre number.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for KmNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

impl FromStr for KmNumber {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::InvalidKmNumber(s.to_string()));
        }
        trimmed
            .parse::<u32>()
            .map(Self)
            .map_err(|_| ProtocolError::InvalidKmNumber(s.to_string()))
    }
}

/// Number of a switch joint (1, 2, 3, 5, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JointNumber(pub u32);

impl fmt::Display for JointNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JointNumber {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        s.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|_| ProtocolError::InvalidJointNumber(s.to_string()))
    }
}

/// A track address: kilometre number plus metres from the kilometre post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackMeter {
    km: KmNumber,
    millimeters: u64,
}

impl TrackMeter {
    /// Creates an address from a kilometre number and metres (rounded to mm).
    pub fn new(km: KmNumber, meters: f64) -> Self {
        let millimeters = if meters.is_finite() && meters > 0.0 {
            (meters * 1000.0).round() as u64
        } else {
            0
        };
        Self { km, millimeters }
    }

    /// Returns the kilometre number.
    pub fn km(&self) -> KmNumber {
        self.km
    }

    /// Returns the distance from the kilometre post in metres.
    pub fn meters(&self) -> f64 {
        self.millimeters as f64 / 1000.0
    }

    /// Builds an address from the registry's split `km` / `m` fields.
    pub fn from_split(km: &str, meters: &str) -> ProtocolResult<Self> {
        let km = KmNumber::from_str(km)
            .map_err(|_| ProtocolError::InvalidTrackMeter(format!("{km}+{meters}")))?;
        let meters = meters
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|m| m.is_finite() && *m >= 0.0)
            .ok_or_else(|| ProtocolError::InvalidTrackMeter(format!("{km}+{meters}")))?;
        Ok(Self::new(km, meters))
    }
}

impl fmt::Display for TrackMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}+{:04}.{:03}",
            self.km,
            self.millimeters / 1000,
            self.millimeters % 1000
        )
    }
}

impl FromStr for TrackMeter {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        let (km, meters) = s
            .split_once('+')
            .ok_or_else(|| ProtocolError::InvalidTrackMeter(s.to_string()))?;
        Self::from_split(km, meters).map_err(|_| ProtocolError::InvalidTrackMeter(s.to_string()))
    }
}

impl Serialize for TrackMeter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Accepted encodings of an address on read.
#[derive(Deserialize)]
#[serde(untagged)]
enum TrackMeterRepr {
    Text(String),
    Split { km: SplitPart, m: SplitPart },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SplitPart {
    Text(String),
    Number(f64),
}

impl SplitPart {
    fn into_text(self) -> String {
        match self {
            SplitPart::Text(text) => text,
            SplitPart::Number(n) if n.fract() == 0.0 => format!("{}", n as u64),
            SplitPart::Number(n) => format!("{n}"),
        }
    }
}

impl<'de> Deserialize<'de> for TrackMeter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match TrackMeterRepr::deserialize(deserializer)? {
            TrackMeterRepr::Text(text) => text.parse().map_err(D::Error::custom),
            TrackMeterRepr::Split { km, m } => {
                TrackMeter::from_split(&km.into_text(), &m.into_text()).map_err(D::Error::custom)
            }
        }
    }
}

/// An inclusive range of kilometre numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KmRange {
    /// First kilometre of the range.
    pub start: KmNumber,
    /// Last kilometre of the range (inclusive).
    pub end: KmNumber,
}

impl KmRange {
    /// Creates a new range. The bounds are swapped if given in reverse.
    pub fn new(start: KmNumber, end: KmNumber) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// Returns a range covering a single kilometre.
    pub fn single(km: KmNumber) -> Self {
        Self { start: km, end: km }
    }

    /// Returns true if the range contains the kilometre.
    pub fn contains(&self, km: KmNumber) -> bool {
        self.start <= km && km <= self.end
    }

    /// Splits a set of kilometres into maximal runs of consecutive numbers.
    pub fn contiguous(kms: &BTreeSet<KmNumber>) -> Vec<KmRange> {
        let mut ranges: Vec<KmRange> = Vec::new();
        for &km in kms {
            match ranges.last_mut() {
                Some(last) if last.end.next() == km => last.end = km,
                _ => ranges.push(KmRange::single(km)),
            }
        }
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn display_pads_km_and_meters() {
        let address = TrackMeter::new(KmNumber(12), 345.678);
        assert_eq!(address.to_string(), "0012+0345.678");
        assert_eq!(TrackMeter::new(KmNumber(3), 0.5).to_string(), "0003+0000.500");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("12-345".parse::<TrackMeter>().is_err());
        assert!("ab+1.0".parse::<TrackMeter>().is_err());
        assert!("0001+x".parse::<TrackMeter>().is_err());
        assert!("".parse::<KmNumber>().is_err());
    }

    #[test]
    fn split_encoding_is_merged_on_read() {
        let split: TrackMeter = serde_json::from_str(r#"{"km":"0012","m":"0345.678"}"#).unwrap();
        let text: TrackMeter = serde_json::from_str(r#""0012+0345.678""#).unwrap();
        assert_eq!(split, text);

        let numeric: TrackMeter = serde_json::from_str(r#"{"km":12,"m":345.678}"#).unwrap();
        assert_eq!(numeric, text);
    }

    #[test]
    fn serializes_as_single_string() {
        let address = TrackMeter::new(KmNumber(7), 12.0);
        assert_eq!(serde_json::to_string(&address).unwrap(), r#""0007+0012.000""#);
    }

    #[test]
    fn ordering_follows_km_then_meters() {
        let a = TrackMeter::new(KmNumber(1), 999.0);
        let b = TrackMeter::new(KmNumber(2), 0.0);
        let c = TrackMeter::new(KmNumber(2), 0.001);
        assert!(a < b && b < c);
    }

    #[test]
    fn contiguous_ranges() {
        let kms: BTreeSet<_> = [1, 2, 3, 5, 7, 8].into_iter().map(KmNumber).collect();
        let ranges = KmRange::contiguous(&kms);
        assert_eq!(
            ranges,
            vec![
                KmRange::new(KmNumber(1), KmNumber(3)),
                KmRange::single(KmNumber(5)),
                KmRange::new(KmNumber(7), KmNumber(8)),
            ]
        );
        assert!(ranges[0].contains(KmNumber(2)));
        assert!(!ranges[0].contains(KmNumber(4)));
    }

    proptest! {
        #[test]
        fn text_form_parses_back(km in 0u32..10_000, mm in 0u64..2_000_000) {
            let address = TrackMeter::new(KmNumber(km), mm as f64 / 1000.0);
            let parsed: TrackMeter = address.to_string().parse().unwrap();
            prop_assert_eq!(parsed, address);
        }
    }
}
