//! A geocoder for straight, axis-aligned alignments.
//!
//! Every alignment runs along the x axis at its own y offset. Kilometre `k`
//! covers `x` in `[k * 1000, (k + 1) * 1000)`, so an address can be read
//! straight off a coordinate.

use parking_lot::RwLock;
use railsync_engine::{AddressPoint, AlignmentRef, Geocoder, IntId, LayoutBranch, SyncResult};
use railsync_protocol::{Coordinate, KmNumber, KmRange, TrackMeter};
use std::collections::{HashMap, HashSet};

/// Default distance between generated points, metres.
pub const DEFAULT_POINT_SPACING: f64 = 250.0;

#[derive(Debug, Clone, Copy)]
struct Line {
    first_km: KmNumber,
    km_count: u32,
    y: f64,
}

impl Line {
    fn contains(&self, km: KmNumber) -> bool {
        km.0 >= self.first_km.0 && km.0 < self.first_km.0 + self.km_count
    }
}

/// Geocoder over registered straight alignments.
#[derive(Debug)]
pub struct StraightLineGeocoder {
    spacing: f64,
    lines: RwLock<HashMap<AlignmentRef, Line>>,
    failing: RwLock<HashSet<AlignmentRef>>,
}

impl Default for StraightLineGeocoder {
    fn default() -> Self {
        Self::new(DEFAULT_POINT_SPACING)
    }
}

impl StraightLineGeocoder {
    /// Creates a geocoder generating a point every `spacing` metres.
    pub fn new(spacing: f64) -> Self {
        Self {
            spacing,
            lines: RwLock::new(HashMap::new()),
            failing: RwLock::new(HashSet::new()),
        }
    }

    /// Registers an alignment covering `km_count` kilometres from `first_km`.
    pub fn add(&self, alignment: AlignmentRef, first_km: u32, km_count: u32) {
        let y = match alignment {
            AlignmentRef::ReferenceLine(id) => id.0 as f64 * 10.0,
            AlignmentRef::LocationTrack(id) => id.0 as f64 * 10.0 + 5.0,
        };
        self.lines.write().insert(
            alignment,
            Line {
                first_km: KmNumber(first_km),
                km_count,
                y,
            },
        );
    }

    /// Registers a track number's reference line.
    pub fn add_reference_line(&self, track_number_id: i64, first_km: u32, km_count: u32) {
        self.add(AlignmentRef::ReferenceLine(IntId(track_number_id)), first_km, km_count);
    }

    /// Registers a location track.
    pub fn add_location_track(&self, location_track_id: i64, first_km: u32, km_count: u32) {
        self.add(AlignmentRef::LocationTrack(IntId(location_track_id)), first_km, km_count);
    }

    /// Makes an alignment impossible to geocode.
    pub fn fail(&self, alignment: AlignmentRef) {
        self.failing.write().insert(alignment);
    }

    /// Location of an address on an alignment, if registered.
    pub fn coordinate(&self, alignment: AlignmentRef, address: TrackMeter) -> Option<Coordinate> {
        let line = *self.lines.read().get(&alignment)?;
        Some(Coordinate::new(
            f64::from(address.km().0) * 1000.0 + address.meters(),
            line.y,
        ))
    }

    fn points(&self, line: &Line) -> Vec<AddressPoint> {
        let length = f64::from(line.km_count) * 1000.0;
        let start_x = f64::from(line.first_km.0) * 1000.0;
        let mut points = Vec::new();
        let mut m = 0.0;
        while m < length {
            let x = start_x + m;
            let km = (x / 1000.0).floor();
            points.push(AddressPoint {
                address: TrackMeter::new(KmNumber(km as u32), x - km * 1000.0),
                coordinate: Coordinate::new(x, line.y),
                m,
            });
            m += self.spacing;
        }
        points
    }
}

impl Geocoder for StraightLineGeocoder {
    fn points_for_address_range(
        &self,
        _branch: LayoutBranch,
        alignment: AlignmentRef,
        range: Option<&KmRange>,
    ) -> SyncResult<Option<Vec<AddressPoint>>> {
        if self.failing.read().contains(&alignment) {
            return Ok(None);
        }
        let Some(line) = self.lines.read().get(&alignment).copied() else {
            return Ok(None);
        };
        let points = self
            .points(&line)
            .into_iter()
            .filter(|p| range.map_or(true, |r| r.contains(p.address.km())))
            .collect();
        Ok(Some(points))
    }

    fn address_for_point(
        &self,
        _branch: LayoutBranch,
        track_number_id: IntId,
        point: Coordinate,
    ) -> SyncResult<Option<TrackMeter>> {
        let alignment = AlignmentRef::ReferenceLine(track_number_id);
        if self.failing.read().contains(&alignment) || point.x < 0.0 {
            return Ok(None);
        }
        let Some(line) = self.lines.read().get(&alignment).copied() else {
            return Ok(None);
        };
        let km = (point.x / 1000.0).floor();
        let km_number = KmNumber(km as u32);
        if !line.contains(km_number) {
            return Ok(None);
        }
        Ok(Some(TrackMeter::new(km_number, point.x - km * 1000.0)))
    }
}
