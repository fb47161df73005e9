//! Spatial kinds and their transform data.

use glam::{Vec2, Vec3};

/// Which transform a base type carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpatialKind {
    /// No transform.
    Plain,
    /// 2D transform with draw ordering.
    Planar,
    /// UI rectangle.
    Ui,
    /// 3D transform.
    Volumetric,
}

/// Transform data for one node.
#[derive(Debug, Clone, PartialEq)]
pub enum Spatial {
    Plain,
    Planar {
        position: Vec2,
        rotation: f32,
        scale: Vec2,
        z_index: i32,
        z_relative: bool,
        y_sort: bool,
    },
    Ui {
        position: Vec2,
        rotation: f32,
        scale: Vec2,
        size: Vec2,
    },
    Volumetric {
        position: Vec3,
        /// Euler angles in radians.
        rotation: Vec3,
        scale: Vec3,
    },
}

/// A position applied to a freshly added node, overriding whatever it was
/// built with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionOverride {
    Planar(Vec2),
    Volumetric(Vec3),
}

impl Spatial {
    /// Identity transform for `kind`.
    pub fn identity(kind: SpatialKind) -> Self {
        match kind {
            SpatialKind::Plain => Spatial::Plain,
            SpatialKind::Planar => Spatial::Planar {
                position: Vec2::ZERO,
                rotation: 0.0,
                scale: Vec2::ONE,
                z_index: 0,
                z_relative: true,
                y_sort: false,
            },
            SpatialKind::Ui => Spatial::Ui {
                position: Vec2::ZERO,
                rotation: 0.0,
                scale: Vec2::ONE,
                size: Vec2::ZERO,
            },
            SpatialKind::Volumetric => Spatial::Volumetric {
                position: Vec3::ZERO,
                rotation: Vec3::ZERO,
                scale: Vec3::ONE,
            },
        }
    }

    pub fn kind(&self) -> SpatialKind {
        match self {
            Spatial::Plain => SpatialKind::Plain,
            Spatial::Planar { .. } => SpatialKind::Planar,
            Spatial::Ui { .. } => SpatialKind::Ui,
            Spatial::Volumetric { .. } => SpatialKind::Volumetric,
        }
    }

    /// Planar position for 2D and UI nodes.
    pub fn position_2d(&self) -> Option<Vec2> {
        match self {
            Spatial::Planar { position, .. } | Spatial::Ui { position, .. } => Some(*position),
            _ => None,
        }
    }

    /// Position for 3D nodes.
    pub fn position_3d(&self) -> Option<Vec3> {
        match self {
            Spatial::Volumetric { position, .. } => Some(*position),
            _ => None,
        }
    }

    /// Sets the position if `pos` matches this node's dimensionality.
    /// Returns `false` when it does not.
    pub fn apply_position(&mut self, pos: PositionOverride) -> bool {
        match (self, pos) {
            (
                Spatial::Planar { position, .. } | Spatial::Ui { position, .. },
                PositionOverride::Planar(p),
            ) => {
                *position = p;
                true
            }
            (Spatial::Volumetric { position, .. }, PositionOverride::Volumetric(p)) => {
                *position = p;
                true
            }
            _ => false,
        }
    }

    /// Planar rotation for 2D and UI nodes.
    pub fn rotation_2d(&self) -> Option<f32> {
        match self {
            Spatial::Planar { rotation, .. } | Spatial::Ui { rotation, .. } => Some(*rotation),
            _ => None,
        }
    }

    pub fn set_rotation_2d(&mut self, value: f32) {
        if let Spatial::Planar { rotation, .. } | Spatial::Ui { rotation, .. } = self {
            *rotation = value;
        }
    }
}
