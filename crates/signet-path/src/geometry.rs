//! Fit transforms for placing a path into a target rectangle.
//!
//! Renderers scale a signature uniformly so that it fills one axis of the
//! target box and align it along the other axis.

use crate::{Point, Rect};
use serde::{Deserialize, Serialize};

/// Placement along the axis that is not constrained by the fit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    Min,
    #[default]
    Mid,
    Max,
}

impl Alignment {
    fn horizontal(self, rect: &Rect) -> f32 {
        match self {
            Alignment::Min => rect.min_x(),
            Alignment::Mid => rect.mid_x(),
            Alignment::Max => rect.max_x(),
        }
    }

    fn vertical(self, rect: &Rect) -> f32 {
        match self {
            Alignment::Min => rect.min_y(),
            Alignment::Mid => rect.mid_y(),
            Alignment::Max => rect.max_y(),
        }
    }
}

/// Uniform scale followed by a translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub scale: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        scale: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Scale `source` to fill `bounds` along whichever axis is tighter.
    ///
    /// Returns `None` when the source is degenerate along the chosen axis.
    pub fn fit(source: &Rect, bounds: &Rect, alignment: Alignment) -> Option<Self> {
        if source.aspect_ratio() < bounds.aspect_ratio() {
            Self::fit_height(source, bounds, alignment)
        } else {
            Self::fit_width(source, bounds, alignment)
        }
    }

    /// Match widths; `alignment` places the result vertically.
    pub fn fit_width(source: &Rect, bounds: &Rect, alignment: Alignment) -> Option<Self> {
        let scale = bounds.width / source.width;
        Self::finite(Transform {
            scale,
            tx: bounds.mid_x() - source.mid_x() * scale,
            ty: alignment.vertical(bounds) - alignment.vertical(source) * scale,
        })
    }

    /// Match heights; `alignment` places the result horizontally.
    pub fn fit_height(source: &Rect, bounds: &Rect, alignment: Alignment) -> Option<Self> {
        let scale = bounds.height / source.height;
        Self::finite(Transform {
            scale,
            tx: alignment.horizontal(bounds) - alignment.horizontal(source) * scale,
            ty: bounds.mid_y() - source.mid_y() * scale,
        })
    }

    fn finite(transform: Transform) -> Option<Self> {
        (transform.scale.is_finite() && transform.tx.is_finite() && transform.ty.is_finite())
            .then_some(transform)
    }

    pub fn apply(&self, point: Point) -> Point {
        Point::new(
            point.x * self.scale + self.tx,
            point.y * self.scale + self.ty,
        )
    }

    pub fn apply_rect(&self, rect: &Rect) -> Rect {
        Rect::from_corners(
            self.apply(rect.origin),
            self.apply(Point::new(rect.max_x(), rect.max_y())),
        )
    }
}

impl Rect {
    pub fn scaled_to_fit(&self, bounds: &Rect, alignment: Alignment) -> Option<Rect> {
        Transform::fit(self, bounds, alignment).map(|t| t.apply_rect(self))
    }

    pub fn scaled_to_fit_width(&self, bounds: &Rect, alignment: Alignment) -> Option<Rect> {
        Transform::fit_width(self, bounds, alignment).map(|t| t.apply_rect(self))
    }

    pub fn scaled_to_fit_height(&self, bounds: &Rect, alignment: Alignment) -> Option<Rect> {
        Transform::fit_height(self, bounds, alignment).map(|t| t.apply_rect(self))
    }
}
