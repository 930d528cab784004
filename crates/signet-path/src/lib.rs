//! Signet vector paths
//!
//! In-memory model for hand-drawn signature strokes and the compact binary
//! codec used to persist them:
//!
//! ```text
//! ┌──────────────┐   codec::encode    ┌──────────────────────────────┐
//! │     Path     │ ─────────────────► │ tag:i32 │ count:i32 │ f32… │ …
//! │ [PathCommand]│ ◄───────────────── │  (little-endian, no header)  │
//! └──────────────┘   codec::decode    └──────────────────────────────┘
//! ```
//!
//! Coordinates are `f32` throughout, so a path survives the codec bit for bit.

pub mod codec;
pub mod geometry;

pub use codec::{decode, encode, DecodeError};
pub use geometry::{Alignment, Transform};

use serde::{Deserialize, Serialize};

// ============================================================================
// Points and rectangles
// ============================================================================

/// A 2D coordinate with single-precision components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle given by its origin (minimum corner) and size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub origin: Point,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const ZERO: Rect = Rect {
        origin: Point::ZERO,
        width: 0.0,
        height: 0.0,
    };

    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            origin: Point::new(x, y),
            width,
            height,
        }
    }

    /// Smallest rectangle spanning both corners, whichever order they come in.
    pub fn from_corners(a: Point, b: Point) -> Self {
        let min_x = a.x.min(b.x);
        let min_y = a.y.min(b.y);
        Self::new(min_x, min_y, a.x.max(b.x) - min_x, a.y.max(b.y) - min_y)
    }

    pub fn min_x(&self) -> f32 {
        self.origin.x
    }

    pub fn min_y(&self) -> f32 {
        self.origin.y
    }

    pub fn max_x(&self) -> f32 {
        self.origin.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.origin.y + self.height
    }

    pub fn mid_x(&self) -> f32 {
        self.origin.x + self.width / 2.0
    }

    pub fn mid_y(&self) -> f32 {
        self.origin.y + self.height / 2.0
    }

    /// Same size, moved so that its origin sits at `(0, 0)`.
    pub fn normalized(&self) -> Rect {
        Rect {
            origin: Point::ZERO,
            ..*self
        }
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect::from_corners(
            Point::new(
                self.min_x().min(other.min_x()),
                self.min_y().min(other.min_y()),
            ),
            Point::new(
                self.max_x().max(other.max_x()),
                self.max_y().max(other.max_y()),
            ),
        )
    }

    pub(crate) fn aspect_ratio(&self) -> f32 {
        self.width / self.height
    }
}

// ============================================================================
// Commands
// ============================================================================

/// A single drawing command.
///
/// Curve commands name their endpoint first, matching how they are built;
/// the codec writes control points before the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PathCommand {
    MoveTo(Point),
    LineTo(Point),
    QuadCurveTo {
        point: Point,
        control: Point,
    },
    CubicCurveTo {
        point: Point,
        control1: Point,
        control2: Point,
    },
    ClosePath,
}

/// Discriminant of a [`PathCommand`], with its fixed wire tag and arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    MoveTo,
    LineTo,
    QuadCurveTo,
    CubicCurveTo,
    ClosePath,
}

impl CommandKind {
    pub const ALL: [CommandKind; 5] = [
        CommandKind::MoveTo,
        CommandKind::LineTo,
        CommandKind::QuadCurveTo,
        CommandKind::CubicCurveTo,
        CommandKind::ClosePath,
    ];

    /// Wire tag. These values are part of the persisted format and never change.
    pub const fn tag(self) -> i32 {
        match self {
            CommandKind::MoveTo => 0,
            CommandKind::LineTo => 1,
            CommandKind::QuadCurveTo => 2,
            CommandKind::CubicCurveTo => 3,
            CommandKind::ClosePath => 4,
        }
    }

    pub const fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(CommandKind::MoveTo),
            1 => Some(CommandKind::LineTo),
            2 => Some(CommandKind::QuadCurveTo),
            3 => Some(CommandKind::CubicCurveTo),
            4 => Some(CommandKind::ClosePath),
            _ => None,
        }
    }

    /// Number of points the command carries.
    pub const fn arity(self) -> usize {
        match self {
            CommandKind::MoveTo | CommandKind::LineTo => 1,
            CommandKind::QuadCurveTo => 2,
            CommandKind::CubicCurveTo => 3,
            CommandKind::ClosePath => 0,
        }
    }
}

impl PathCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            PathCommand::MoveTo(_) => CommandKind::MoveTo,
            PathCommand::LineTo(_) => CommandKind::LineTo,
            PathCommand::QuadCurveTo { .. } => CommandKind::QuadCurveTo,
            PathCommand::CubicCurveTo { .. } => CommandKind::CubicCurveTo,
            PathCommand::ClosePath => CommandKind::ClosePath,
        }
    }

    /// Every point the command references, control points included.
    pub fn points(&self) -> impl Iterator<Item = Point> {
        let (buf, len): ([Point; 3], usize) = match *self {
            PathCommand::MoveTo(p) | PathCommand::LineTo(p) => ([p, p, p], 1),
            PathCommand::QuadCurveTo { point, control } => ([control, point, point], 2),
            PathCommand::CubicCurveTo {
                point,
                control1,
                control2,
            } => ([control1, control2, point], 3),
            PathCommand::ClosePath => ([Point::ZERO; 3], 0),
        };
        buf.into_iter().take(len)
    }

    fn map_points(&self, f: impl Fn(Point) -> Point) -> PathCommand {
        match *self {
            PathCommand::MoveTo(p) => PathCommand::MoveTo(f(p)),
            PathCommand::LineTo(p) => PathCommand::LineTo(f(p)),
            PathCommand::QuadCurveTo { point, control } => PathCommand::QuadCurveTo {
                point: f(point),
                control: f(control),
            },
            PathCommand::CubicCurveTo {
                point,
                control1,
                control2,
            } => PathCommand::CubicCurveTo {
                point: f(point),
                control1: f(control1),
                control2: f(control2),
            },
            PathCommand::ClosePath => PathCommand::ClosePath,
        }
    }
}

// ============================================================================
// Path
// ============================================================================

/// Ordered sequence of drawing commands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path {
    commands: Vec<PathCommand>,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[PathCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn push(&mut self, command: PathCommand) {
        self.commands.push(command);
    }

    pub fn move_to(&mut self, point: impl Into<Point>) -> &mut Self {
        self.push(PathCommand::MoveTo(point.into()));
        self
    }

    pub fn line_to(&mut self, point: impl Into<Point>) -> &mut Self {
        self.push(PathCommand::LineTo(point.into()));
        self
    }

    pub fn quad_to(&mut self, point: impl Into<Point>, control: impl Into<Point>) -> &mut Self {
        self.push(PathCommand::QuadCurveTo {
            point: point.into(),
            control: control.into(),
        });
        self
    }

    pub fn cubic_to(
        &mut self,
        point: impl Into<Point>,
        control1: impl Into<Point>,
        control2: impl Into<Point>,
    ) -> &mut Self {
        self.push(PathCommand::CubicCurveTo {
            point: point.into(),
            control1: control1.into(),
            control2: control2.into(),
        });
        self
    }

    pub fn close(&mut self) -> &mut Self {
        self.push(PathCommand::ClosePath);
        self
    }

    /// Number of subpaths, i.e. of `MoveTo` commands.
    pub fn subpath_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, PathCommand::MoveTo(_)))
            .count()
    }

    /// Box over every referenced point, control points included.
    ///
    /// This is the control-polygon box: it always contains the rendered
    /// curve but may be looser than its exact bounds. A path without any
    /// points yields [`Rect::ZERO`].
    pub fn bounding_box(&self) -> Rect {
        let mut points = self.commands.iter().flat_map(PathCommand::points);
        let Some(first) = points.next() else {
            return Rect::ZERO;
        };
        let (min, max) = points.fold((first, first), |(min, max), p| {
            (
                Point::new(min.x.min(p.x), min.y.min(p.y)),
                Point::new(max.x.max(p.x), max.y.max(p.y)),
            )
        });
        Rect::from_corners(min, max)
    }

    pub fn transformed(&self, transform: &Transform) -> Path {
        self.commands
            .iter()
            .map(|c| c.map_points(|p| transform.apply(p)))
            .collect()
    }
}

impl FromIterator<PathCommand> for Path {
    fn from_iter<I: IntoIterator<Item = PathCommand>>(iter: I) -> Self {
        Self {
            commands: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<PathCommand>> for Path {
    fn from(commands: Vec<PathCommand>) -> Self {
        Self { commands }
    }
}

impl<'a> IntoIterator for &'a Path {
    type Item = &'a PathCommand;
    type IntoIter = std::slice::Iter<'a, PathCommand>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature_like() -> Path {
        let mut path = Path::new();
        path.move_to((0.0, 0.0))
            .line_to((10.0, 0.0))
            .cubic_to((10.0, 10.0), (10.0, 5.0), (10.0, 8.0))
            .close();
        path
    }

    #[test]
    fn test_tags_round_trip_through_kind() {
        for kind in CommandKind::ALL {
            assert_eq!(CommandKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(CommandKind::from_tag(5), None);
        assert_eq!(CommandKind::from_tag(-1), None);
    }

    #[test]
    fn test_points_order_puts_controls_first() {
        let cubic = PathCommand::CubicCurveTo {
            point: Point::new(3.0, 3.0),
            control1: Point::new(1.0, 1.0),
            control2: Point::new(2.0, 2.0),
        };
        let xs: Vec<f32> = cubic.points().map(|p| p.x).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
        assert_eq!(PathCommand::ClosePath.points().count(), 0);
    }

    #[test]
    fn test_bounding_box_includes_control_points() {
        let mut path = Path::new();
        path.move_to((0.0, 0.0)).quad_to((10.0, 0.0), (5.0, -7.5));
        assert_eq!(path.bounding_box(), Rect::new(0.0, -7.5, 10.0, 7.5));
    }

    #[test]
    fn test_bounding_box_of_signature_path() {
        assert_eq!(
            signature_like().bounding_box(),
            Rect::new(0.0, 0.0, 10.0, 10.0)
        );
    }

    #[test]
    fn test_bounding_box_without_points_is_zero() {
        assert_eq!(Path::new().bounding_box(), Rect::ZERO);
        let closed: Path = vec![PathCommand::ClosePath].into();
        assert_eq!(closed.bounding_box(), Rect::ZERO);
    }

    #[test]
    fn test_subpath_count() {
        let mut path = signature_like();
        path.move_to((20.0, 0.0)).line_to((25.0, 5.0));
        assert_eq!(path.subpath_count(), 2);
        assert_eq!(path.len(), 6);
    }

    #[test]
    fn test_rect_union_and_normalized() {
        let a = Rect::new(1.0, 1.0, 2.0, 2.0);
        let b = Rect::new(-1.0, 2.0, 1.0, 4.0);
        assert_eq!(a.union(&b), Rect::new(-1.0, 1.0, 4.0, 5.0));
        assert_eq!(b.normalized(), Rect::new(0.0, 0.0, 1.0, 4.0));
    }
}
