use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    /// Cut-off distance; 0 means unlimited.
    pub distance: f32,
    pub decay: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotLight {
    pub distance: f32,
    pub decay: f32,
    /// Outer cone half-angle in radians.
    pub angle: f32,
    /// Fraction of the cone that is attenuated, 0..=1.
    pub penumbra: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Ambient,
    Directional,
    Point(PointLight),
    Spot(SpotLight),
    Hemisphere { ground_color: Vec3 },
}

/// Light component attached to a scene node. Position and direction come
/// from the node's world matrix (lights shine down their local -Z).
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub color: Vec3,
    pub intensity: f32,
    pub kind: LightKind,
    pub cast_shadow: bool,
}

impl Light {
    #[must_use]
    pub fn new_ambient(color: Vec3, intensity: f32) -> Self {
        Self::with_kind(LightKind::Ambient, color, intensity)
    }

    #[must_use]
    pub fn new_directional(color: Vec3, intensity: f32) -> Self {
        Self::with_kind(LightKind::Directional, color, intensity)
    }

    #[must_use]
    pub fn new_point(color: Vec3, intensity: f32, distance: f32) -> Self {
        Self::with_kind(
            LightKind::Point(PointLight {
                distance,
                decay: 2.0,
            }),
            color,
            intensity,
        )
    }

    #[must_use]
    pub fn new_spot(color: Vec3, intensity: f32, distance: f32, angle: f32) -> Self {
        Self::with_kind(
            LightKind::Spot(SpotLight {
                distance,
                decay: 2.0,
                angle,
                penumbra: 0.0,
            }),
            color,
            intensity,
        )
    }

    #[must_use]
    pub fn new_hemisphere(sky: Vec3, ground: Vec3, intensity: f32) -> Self {
        Self::with_kind(LightKind::Hemisphere { ground_color: ground }, sky, intensity)
    }

    fn with_kind(kind: LightKind, color: Vec3, intensity: f32) -> Self {
        Self {
            color,
            intensity,
            kind,
            cast_shadow: false,
        }
    }
}
