use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::fs::File;
use std::path::Path;

/// Segments shorter than this are treated as unit length when projecting.
const MIN_SEGMENT_LEN_SQ: f64 = 1e-12;
/// Rays nearly parallel to a segment never register a hit.
const PARALLEL_EPS: f64 = 1e-9;

pub const DEFAULT_TRACK_WIDTH: f64 = 112.0;
pub const WORLD_WIDTH: f64 = 900.0;
pub const WORLD_HEIGHT: f64 = 600.0;

// =============================================================================
// Geometry primitives
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub a: Point,
    pub b: Point,
    pub dx: f64,
    pub dy: f64,
    pub length: f64,
}

impl Segment {
    pub fn new(a: Point, b: Point) -> Self {
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        Self {
            a,
            b,
            dx,
            dy,
            length: dx.hypot(dy),
        }
    }
}

/// Nearest-point mapping of a world position onto the centerline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Arclength fraction in `[0, 1)`.
    pub progress: f64,
    pub distance: f64,
    /// Positive on the left of the direction of travel.
    pub signed_distance: f64,
    pub tangent_angle: f64,
    pub point: Point,
    pub segment_index: usize,
}

impl Projection {
    fn fallback(x: f64, y: f64) -> Self {
        Self {
            progress: 0.0,
            distance: 0.0,
            signed_distance: 0.0,
            tangent_angle: 0.0,
            point: Point::new(x, y),
            segment_index: 0,
        }
    }
}

/// Progress difference through the `[0, 1)` seam: a jump of more than half a
/// lap is read as a wrap in the other direction.
pub fn wrapped_progress_delta(previous: f64, current: f64) -> f64 {
    let delta = current - previous;
    if delta > 0.5 {
        delta - 1.0
    } else if delta < -0.5 {
        delta + 1.0
    } else {
        delta
    }
}

fn cross(ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    ax * by - ay * bx
}

/// Distance along the ray `origin + t·dir` to segment `a→b`, if the ray hits
/// it (`t >= 0`, `u ∈ [0, 1]`).
pub fn ray_segment_distance(origin: Point, dir_x: f64, dir_y: f64, seg: &Segment) -> Option<f64> {
    let denom = cross(dir_x, dir_y, seg.dx, seg.dy);
    if denom.abs() < PARALLEL_EPS {
        return None;
    }
    let qx = seg.a.x - origin.x;
    let qy = seg.a.y - origin.y;
    let t = cross(qx, qy, seg.dx, seg.dy) / denom;
    let u = cross(qx, qy, dir_x, dir_y) / denom;
    (t >= 0.0 && (0.0..=1.0).contains(&u)).then_some(t)
}

// =============================================================================
// Collaborator interface
// =============================================================================

/// Read-only view of a closed track used by the simulation.
pub trait TrackGeometry {
    fn centerline(&self) -> &[Point];
    /// `cumulative_lengths()[i]` is the arclength from sample 0 to sample `i`;
    /// it has one more entry than the centerline (the closing length).
    fn cumulative_lengths(&self) -> &[f64];
    fn total_length(&self) -> f64;
    fn boundary_segments(&self) -> &[Segment];
    fn width(&self) -> f64;
    fn start_index(&self) -> usize;
    fn project(&self, x: f64, y: f64) -> Projection;

    fn half_width(&self) -> f64 {
        self.width() * 0.5
    }
}

// =============================================================================
// Track
// =============================================================================

/// On-disk form of a track: a closed centerline and a width.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackFile {
    #[serde(default = "default_width")]
    pub width: f64,
    pub centerline: Vec<Point>,
}

fn default_width() -> f64 {
    DEFAULT_TRACK_WIDTH
}

#[derive(Debug, Clone)]
pub struct Track {
    width: f64,
    centerline: Vec<Point>,
    left_boundary: Vec<Point>,
    right_boundary: Vec<Point>,
    segments: Vec<Segment>,
    boundary_segments: Vec<Segment>,
    cumulative_lengths: Vec<f64>,
    total_length: f64,
    start_index: usize,
}

impl Track {
    /// Build boundaries, segments and arclength tables from a closed
    /// centerline (the last point connects back to the first).
    pub fn from_centerline(centerline: Vec<Point>, width: f64) -> Self {
        let n = centerline.len();
        let half_width = width * 0.5;

        let mut left_boundary = Vec::with_capacity(n);
        let mut right_boundary = Vec::with_capacity(n);
        for i in 0..n {
            let prev = centerline[(i + n - 1) % n];
            let next = centerline[(i + 1) % n];
            let tx = next.x - prev.x;
            let ty = next.y - prev.y;
            let len = tx.hypot(ty);
            let len = if len > 0.0 { len } else { 1.0 };
            let (nx, ny) = (-ty / len, tx / len);
            let p = centerline[i];
            left_boundary.push(Point::new(p.x + nx * half_width, p.y + ny * half_width));
            right_boundary.push(Point::new(p.x - nx * half_width, p.y - ny * half_width));
        }

        let segments = closed_segments(&centerline);
        let mut boundary_segments = closed_segments(&left_boundary);
        boundary_segments.extend(closed_segments(&right_boundary));

        let mut cumulative_lengths = Vec::with_capacity(n + 1);
        cumulative_lengths.push(0.0);
        for (i, seg) in segments.iter().enumerate() {
            cumulative_lengths.push(cumulative_lengths[i] + seg.length);
        }
        let total = cumulative_lengths.last().copied().unwrap_or(0.0);
        let total_length = if total > 0.0 { total } else { 1.0 };

        let start_index = centerline
            .iter()
            .enumerate()
            .fold((0, f64::INFINITY), |(best_i, best_y), (i, p)| {
                if p.y < best_y { (i, p.y) } else { (best_i, best_y) }
            })
            .0;

        Self {
            width,
            centerline,
            left_boundary,
            right_boundary,
            segments,
            boundary_segments,
            cumulative_lengths,
            total_length,
            start_index,
        }
    }

    /// Axis-aligned ellipse sampled counter-clockwise.
    pub fn ellipse(
        center: Point,
        radius_x: f64,
        radius_y: f64,
        samples: usize,
        width: f64,
    ) -> Self {
        let samples = samples.max(3);
        let centerline = (0..samples)
            .map(|i| {
                let angle = TAU * i as f64 / samples as f64;
                Point::new(
                    center.x + radius_x * angle.cos(),
                    center.y + radius_y * angle.sin(),
                )
            })
            .collect();
        Self::from_centerline(centerline, width)
    }

    pub fn circle(center: Point, radius: f64, samples: usize, width: f64) -> Self {
        Self::ellipse(center, radius, radius, samples, width)
    }

    /// The oval used when no track file is supplied.
    pub fn default_oval() -> Self {
        Self::ellipse(
            Point::new(WORLD_WIDTH * 0.5, WORLD_HEIGHT * 0.5),
            WORLD_WIDTH * 0.36,
            WORLD_HEIGHT * 0.3,
            300,
            DEFAULT_TRACK_WIDTH,
        )
    }

    pub fn from_file(file: TrackFile) -> Self {
        Self::from_centerline(file.centerline, file.width)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let handle = File::open(path).with_context(|| format!("open track {}", path.display()))?;
        let reader = std::io::BufReader::new(handle);
        let file: TrackFile = serde_json::from_reader(reader)
            .with_context(|| format!("parse track {}", path.display()))?;
        anyhow::ensure!(
            file.centerline.len() >= 3,
            "track {} needs at least 3 centerline points",
            path.display()
        );
        Ok(Self::from_file(file))
    }

    pub fn left_boundary(&self) -> &[Point] {
        &self.left_boundary
    }

    pub fn right_boundary(&self) -> &[Point] {
        &self.right_boundary
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

fn closed_segments(points: &[Point]) -> Vec<Segment> {
    let n = points.len();
    (0..n)
        .map(|i| Segment::new(points[i], points[(i + 1) % n]))
        .collect()
}

impl TrackGeometry for Track {
    fn centerline(&self) -> &[Point] {
        &self.centerline
    }

    fn cumulative_lengths(&self) -> &[f64] {
        &self.cumulative_lengths
    }

    fn total_length(&self) -> f64 {
        self.total_length
    }

    fn boundary_segments(&self) -> &[Segment] {
        &self.boundary_segments
    }

    fn width(&self) -> f64 {
        self.width
    }

    fn start_index(&self) -> usize {
        self.start_index
    }

    fn project(&self, x: f64, y: f64) -> Projection {
        let mut best_dist_sq = f64::INFINITY;
        let mut best: Option<Projection> = None;

        for (i, seg) in self.segments.iter().enumerate() {
            let len_sq = seg.dx * seg.dx + seg.dy * seg.dy;
            let len_sq = if len_sq > MIN_SEGMENT_LEN_SQ { len_sq } else { 1.0 };

            let wx = x - seg.a.x;
            let wy = y - seg.a.y;
            let t = ((wx * seg.dx + wy * seg.dy) / len_sq).clamp(0.0, 1.0);

            let px = seg.a.x + seg.dx * t;
            let py = seg.a.y + seg.dy * t;
            let dx = x - px;
            let dy = y - py;
            let dist_sq = dx * dx + dy * dy;

            if dist_sq < best_dist_sq {
                best_dist_sq = dist_sq;
                let side = cross(seg.dx, seg.dy, dx, dy);
                let distance = dist_sq.sqrt();
                let along = self.cumulative_lengths[i] + seg.length * t;
                best = Some(Projection {
                    progress: (along / self.total_length).rem_euclid(1.0),
                    distance,
                    signed_distance: if side >= 0.0 { distance } else { -distance },
                    tangent_angle: seg.dy.atan2(seg.dx),
                    point: Point::new(px, py),
                    segment_index: i,
                });
            }
        }

        best.unwrap_or_else(|| Projection::fallback(x, y))
    }
}
