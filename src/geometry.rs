//! Static track geometry
//!
//! Each block maps to a [`Segment`]: two endpoints and an optional quadratic
//! control point. Curved segments are sampled by arc length so equal progress
//! covers equal distance; straight or degenerate segments fall back to linear
//! interpolation with a fixed chord heading.

use std::collections::HashMap;
use std::path::Path;

use kurbo::{ParamCurve, ParamCurveArclen, Point, QuadBez};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, SyncError};

/// Absolute accuracy for arc-length evaluation, in layout units
const ARCLEN_ACCURACY: f64 = 1e-4;

/// Curves shorter than this are sampled linearly
const MIN_ARC_LENGTH: f64 = 1e-6;

/// Heading finite-difference step as a fraction of segment length
const HEADING_STEP: f64 = 1e-3;

/// Role of a segment in the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    #[default]
    Main,
    Loop,
    Siding,
}

/// Position and heading at one point along a segment.
///
/// Heading is in radians, measured from the +x axis toward +y.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub point: Point,
    pub heading: f64,
}

#[derive(Debug, Clone)]
enum Sampler {
    ArcLength { curve: QuadBez, length: f64 },
    Linear { heading: f64 },
}

/// Geometry of one block.
#[derive(Debug, Clone)]
pub struct Segment {
    from: Point,
    to: Point,
    control: Option<Point>,
    kind: SegmentKind,
    sampler: Sampler,
}

impl Segment {
    pub fn straight(from: Point, to: Point, kind: SegmentKind) -> Self {
        Self { from, to, control: None, kind, sampler: Sampler::Linear { heading: chord_heading(from, to) } }
    }

    /// Quadratic curve through `control`.
    ///
    /// Falls back to linear sampling when the arc length is unusable.
    pub fn curved(from: Point, control: Point, to: Point, kind: SegmentKind) -> Self {
        let curve = QuadBez::new(from, control, to);
        let length = curve.arclen(ARCLEN_ACCURACY);

        let sampler = if length.is_finite() && length > MIN_ARC_LENGTH {
            Sampler::ArcLength { curve, length }
        } else {
            debug!("Degenerate curve {:?} -> {:?}, sampling linearly", from, to);
            Sampler::Linear { heading: chord_heading(from, to) }
        };

        Self { from, to, control: Some(control), kind, sampler }
    }

    pub fn from(&self) -> Point {
        self.from
    }

    pub fn to(&self) -> Point {
        self.to
    }

    pub fn control(&self) -> Option<Point> {
        self.control
    }

    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    /// Whether samples follow true arc length
    pub fn has_arc_length(&self) -> bool {
        matches!(self.sampler, Sampler::ArcLength { .. })
    }

    pub fn length(&self) -> f64 {
        match &self.sampler {
            Sampler::ArcLength { length, .. } => *length,
            Sampler::Linear { .. } => self.from.distance(self.to),
        }
    }

    /// Sample at `fraction` of the way along, clamped to `[0, 1]`.
    pub fn sample(&self, fraction: f64) -> Sample {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };

        match &self.sampler {
            Sampler::Linear { heading } => {
                Sample { point: self.from.lerp(self.to, fraction), heading: *heading }
            }
            Sampler::ArcLength { curve, length } => {
                let at = |distance: f64| curve.eval(curve.inv_arclen(distance, ARCLEN_ACCURACY));

                let distance = fraction * length;
                let point = at(distance);
                let step = length * HEADING_STEP;

                // Backward difference at the far end
                let (ahead, behind) = if distance + step <= *length {
                    (at(distance + step), point)
                } else {
                    (point, at(distance - step))
                };

                let delta = ahead - behind;
                let heading = if delta.hypot() > f64::EPSILON {
                    delta.atan2()
                } else {
                    chord_heading(self.from, self.to)
                };

                Sample { point, heading }
            }
        }
    }
}

fn chord_heading(from: Point, to: Point) -> f64 {
    (to - from).atan2()
}

#[derive(Debug, Deserialize)]
struct LayoutSpec {
    segments: Vec<SegmentSpec>,
}

#[derive(Debug, Deserialize)]
struct SegmentSpec {
    id: String,
    from: [f64; 2],
    to: [f64; 2],
    #[serde(default)]
    control: Option<[f64; 2]>,
    #[serde(default)]
    kind: SegmentKind,
}

impl SegmentSpec {
    fn into_segment(self) -> Result<(String, Segment)> {
        let mut coords = self.from.iter().chain(&self.to).chain(self.control.iter().flatten());
        if coords.any(|c| !c.is_finite()) {
            return Err(SyncError::parse("track layout", format!("segment {} has non-finite coordinates", self.id)));
        }

        let from = Point::new(self.from[0], self.from[1]);
        let to = Point::new(self.to[0], self.to[1]);
        let segment = match self.control {
            Some([x, y]) => Segment::curved(from, Point::new(x, y), to, self.kind),
            None => Segment::straight(from, to, self.kind),
        };
        Ok((self.id, segment))
    }
}

/// Block id to segment table, constant for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct TrackLayout {
    segments: HashMap<String, Segment>,
}

impl TrackLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a segment, replacing any previous one for the block.
    pub fn with_segment(mut self, block_id: impl Into<String>, segment: Segment) -> Self {
        self.segments.insert(block_id.into(), segment);
        self
    }

    pub fn get(&self, block_id: &str) -> Option<&Segment> {
        self.segments.get(block_id)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = &str> {
        self.segments.keys().map(String::as_str)
    }

    /// Parse a layout document.
    ///
    /// ```yaml
    /// segments:
    ///   - { id: B1, from: [50, 300], to: [150, 300] }
    ///   - { id: B8, from: [250, 300], control: [260, 180], to: [400, 180], kind: loop }
    /// ```
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let spec: LayoutSpec =
            serde_yaml_ng::from_str(yaml).map_err(|e| SyncError::parse("track layout", e))?;

        let mut segments = HashMap::with_capacity(spec.segments.len());
        for entry in spec.segments {
            let (id, segment) = entry.into_segment()?;
            if segments.insert(id.clone(), segment).is_some() {
                return Err(SyncError::parse("track layout", format!("duplicate segment {id}")));
            }
        }
        Ok(Self { segments })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|source| SyncError::Config { path: path.to_path_buf(), source })?;
        let layout = Self::from_yaml_str(&yaml)?;
        debug!("Loaded {} segments from {}", layout.len(), path.display());
        Ok(layout)
    }

    /// Layout for the reference network: a seven-block main line, a passing
    /// loop from B2 to B6 and two sidings.
    pub fn demo() -> Self {
        let main = |x0: f64, x1: f64| {
            Segment::straight(Point::new(x0, 300.0), Point::new(x1, 300.0), SegmentKind::Main)
        };

        Self::new()
            .with_segment("B1", main(50.0, 150.0))
            .with_segment("B2", main(150.0, 250.0))
            .with_segment("B3", main(250.0, 350.0))
            .with_segment("B4", main(350.0, 450.0))
            .with_segment("B5", main(450.0, 550.0))
            .with_segment("B6", main(550.0, 650.0))
            .with_segment("B7", main(650.0, 750.0))
            .with_segment(
                "B8",
                Segment::curved(
                    Point::new(250.0, 300.0),
                    Point::new(260.0, 180.0),
                    Point::new(400.0, 180.0),
                    SegmentKind::Loop,
                ),
            )
            .with_segment(
                "B9",
                Segment::curved(
                    Point::new(400.0, 180.0),
                    Point::new(540.0, 180.0),
                    Point::new(550.0, 300.0),
                    SegmentKind::Loop,
                ),
            )
            .with_segment(
                "B10",
                Segment::curved(
                    Point::new(550.0, 300.0),
                    Point::new(620.0, 300.0),
                    Point::new(680.0, 400.0),
                    SegmentKind::Siding,
                ),
            )
            .with_segment(
                "B11",
                Segment::curved(
                    Point::new(350.0, 300.0),
                    Point::new(400.0, 300.0),
                    Point::new(460.0, 400.0),
                    SegmentKind::Siding,
                ),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::f64::consts::FRAC_PI_2;

    const EPS: f64 = 1e-3;

    #[test]
    fn straight_segment_interpolates_linearly() {
        let segment = Segment::straight(Point::new(0.0, 0.0), Point::new(100.0, 0.0), SegmentKind::Main);
        let sample = segment.sample(0.25);

        assert!(!segment.has_arc_length());
        assert!((sample.point.x - 25.0).abs() < EPS);
        assert!(sample.heading.abs() < EPS);
        assert!((segment.length() - 100.0).abs() < EPS);
    }

    #[test]
    fn fractions_are_clamped() {
        let segment = Segment::straight(Point::new(0.0, 0.0), Point::new(0.0, 10.0), SegmentKind::Siding);
        assert_eq!(segment.sample(-3.0).point, Point::new(0.0, 0.0));
        assert_eq!(segment.sample(7.0).point, Point::new(0.0, 10.0));
        assert_eq!(segment.sample(f64::NAN).point, Point::new(0.0, 0.0));
        assert!((segment.sample(0.5).heading - FRAC_PI_2).abs() < EPS);
    }

    #[test]
    fn curved_segment_samples_by_distance_not_parameter() {
        // Control point skewed towards the start makes parameter speed uneven
        let segment = Segment::curved(
            Point::new(0.0, 0.0),
            Point::new(5.0, 80.0),
            Point::new(100.0, 0.0),
            SegmentKind::Loop,
        );
        assert!(segment.has_arc_length());

        let samples: Vec<Point> = (0..=10).map(|i| segment.sample(i as f64 / 10.0).point).collect();
        let expected = segment.length() / 10.0;
        for pair in samples.windows(2) {
            let chord = pair[0].distance(pair[1]);
            // Chords undershoot the arc slightly on a curve
            assert!(chord <= expected + EPS && chord > expected * 0.95, "uneven spacing: {chord} vs {expected}");
        }
    }

    #[test]
    fn curve_heading_follows_tangent_at_both_ends() {
        let segment = Segment::curved(
            Point::new(0.0, 0.0),
            Point::new(0.0, 100.0),
            Point::new(100.0, 100.0),
            SegmentKind::Loop,
        );

        assert!((segment.sample(0.0).heading - FRAC_PI_2).abs() < 0.05);
        assert!(segment.sample(1.0).heading.abs() < 0.05);
    }

    #[test]
    fn degenerate_curve_falls_back_to_linear() {
        let p = Point::new(10.0, 10.0);
        let segment = Segment::curved(p, p, p, SegmentKind::Main);

        assert!(!segment.has_arc_length());
        assert_eq!(segment.sample(0.7).point, p);
        assert!(segment.sample(0.7).heading.is_finite());
    }

    #[test]
    fn demo_layout_covers_reference_blocks() {
        let layout = TrackLayout::demo();
        assert_eq!(layout.len(), 11);
        for id in (1..=11).map(|n| format!("B{n}")) {
            assert!(layout.get(&id).is_some(), "missing {id}");
        }
        assert_eq!(layout.get("B8").unwrap().kind(), SegmentKind::Loop);
        assert_eq!(layout.get("B2").unwrap().to(), layout.get("B8").unwrap().from());
        assert_eq!(layout.get("B9").unwrap().to(), layout.get("B6").unwrap().from());
        assert!(layout.get("B12").is_none());
    }

    #[test]
    fn layout_parses_from_yaml() {
        let yaml = r#"
segments:
  - { id: B1, from: [0, 0], to: [100, 0] }
  - { id: X1, from: [100, 0], control: [150, 0], to: [150, 50], kind: siding }
"#;
        let layout = TrackLayout::from_yaml_str(yaml).unwrap();
        assert_eq!(layout.len(), 2);
        assert_eq!(layout.get("B1").unwrap().kind(), SegmentKind::Main);
        assert!(layout.get("X1").unwrap().has_arc_length());
    }

    #[test]
    fn layout_rejects_duplicates_and_bad_coordinates() {
        let duplicate = "segments:\n  - { id: B1, from: [0, 0], to: [1, 0] }\n  - { id: B1, from: [0, 0], to: [2, 0] }\n";
        assert!(TrackLayout::from_yaml_str(duplicate).is_err());

        let infinite = "segments:\n  - { id: B1, from: [0, 0], to: [.inf, 0] }\n";
        assert!(TrackLayout::from_yaml_str(infinite).is_err());
    }

    proptest! {
        #[test]
        fn prop_samples_are_finite(
            fraction in -1.0f64..2.0,
            cx in -500.0f64..500.0,
            cy in -500.0f64..500.0,
        ) {
            let segment = Segment::curved(Point::new(0.0, 0.0), Point::new(cx, cy), Point::new(200.0, 0.0), SegmentKind::Loop);
            let sample = segment.sample(fraction);
            prop_assert!(sample.point.x.is_finite() && sample.point.y.is_finite());
            prop_assert!(sample.heading.is_finite());
        }
    }
}
