use glam::{Affine3A, EulerRot, Mat3, Mat3A, Quat, Vec3, Vec3A};

use crate::utils::Dirty;

/// Local TRS state of a node plus its derived matrices.
///
/// Setters mark the local matrix stale; it is recomposed on the next
/// [`compose_local`](Self::compose_local), which in turn flags the world
/// matrix for recomputation. The world matrix is only rewritten by
/// [`update_world`](Self::update_world).
#[derive(Debug, Clone)]
pub struct Transform {
    position: Vec3,
    rotation: Quat,
    scale: Vec3,

    local: Dirty<Affine3A>,
    world: Affine3A,
    world_needs_update: bool,

    /// Recompose the local matrix automatically during traversal. When off,
    /// the node is only visited if an ancestor forces it.
    pub auto_update: bool,
}

impl Transform {
    #[must_use]
    pub fn new() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            local: Dirty::valid(Affine3A::IDENTITY),
            world: Affine3A::IDENTITY,
            world_needs_update: true,
            auto_update: true,
        }
    }

    // ========================================================================
    // TRS
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    #[inline]
    #[must_use]
    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    #[inline]
    #[must_use]
    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    /// Overwrites the whole local TRS state.
    pub fn set_local(&mut self, position: Vec3, rotation: Quat, scale: Vec3) {
        self.position = position;
        self.rotation = rotation;
        self.scale = scale;
        self.local.invalidate();
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.local.invalidate();
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
        self.local.invalidate();
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.local.invalidate();
    }

    /// XYZ-order Euler angles in radians.
    pub fn set_rotation_euler(&mut self, x: f32, y: f32, z: f32) {
        self.set_rotation(Quat::from_euler(EulerRot::XYZ, x, y, z));
    }

    #[must_use]
    pub fn rotation_euler(&self) -> Vec3 {
        let (x, y, z) = self.rotation.to_euler(EulerRot::XYZ);
        Vec3::new(x, y, z)
    }

    /// Rotates so that local -Z faces `target`. Both `target` and `up` are in
    /// the parent's space. Degenerate configurations leave the rotation as is.
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        let forward = (target - self.position).normalize_or_zero();
        let right = forward.cross(up);
        if forward == Vec3::ZERO || right.length_squared() < 1e-8 {
            return;
        }
        let right = right.normalize();
        let new_up = right.cross(forward);
        self.set_rotation(Quat::from_mat3(&Mat3::from_cols(right, new_up, -forward)));
    }

    /// Replaces the local matrix, decomposing it back into TRS. Shear is lost.
    pub fn set_local_matrix(&mut self, matrix: Affine3A) {
        let (translation, rotation, scale) = decompose(&matrix);
        self.position = translation;
        self.rotation = rotation;
        self.scale = scale;
        self.local.set(matrix);
        self.world_needs_update = true;
    }

    // ========================================================================
    // Matrices
    // ========================================================================

    /// Recomposes the local matrix (`T * R * S`) if it is stale.
    ///
    /// Returns `true` when it recomposed.
    pub fn compose_local(&mut self) -> bool {
        let (position, rotation, scale) = (self.position, self.rotation, self.scale);
        let (_, recomposed) = self
            .local
            .get_or_update(|| Affine3A::from_scale_rotation_translation(scale, rotation, position));
        if recomposed {
            self.world_needs_update = true;
        }
        recomposed
    }

    /// Current local matrix, recomposing first if needed.
    pub fn local_matrix(&mut self) -> Affine3A {
        self.compose_local();
        *self.local.last_value()
    }

    /// Local matrix if it is current.
    #[must_use]
    pub fn cached_local_matrix(&self) -> Option<&Affine3A> {
        self.local.get()
    }

    #[inline]
    #[must_use]
    pub fn is_local_dirty(&self) -> bool {
        !self.local.is_valid()
    }

    /// World matrix as of the last [`update_world`](Self::update_world).
    #[inline]
    #[must_use]
    pub fn world_matrix(&self) -> &Affine3A {
        &self.world
    }

    #[inline]
    #[must_use]
    pub fn world_needs_update(&self) -> bool {
        self.world_needs_update
    }

    /// Forces the next [`update_world`](Self::update_world) to recompute.
    pub fn mark_world_dirty(&mut self) {
        self.world_needs_update = true;
    }

    /// Updates this node's world matrix from its parent's.
    ///
    /// Composes the local matrix when `auto_update` is on, then recomputes
    /// the world matrix if it was flagged or `force` is set. Returns `true`
    /// when the world matrix was recomputed; children must then be forced.
    pub fn update_world(&mut self, parent_world: Option<&Affine3A>, force: bool) -> bool {
        if self.auto_update {
            self.compose_local();
        }
        if !(self.world_needs_update || force) {
            return false;
        }
        let local = *self.local.last_value();
        self.world = match parent_world {
            Some(parent) => *parent * local,
            None => local,
        };
        self.world_needs_update = false;
        true
    }

    // ========================================================================
    // Decomposed world state
    // ========================================================================

    #[must_use]
    pub fn world_position(&self) -> Vec3 {
        self.world.translation.into()
    }

    #[must_use]
    pub fn world_quaternion(&self) -> Quat {
        decompose(&self.world).1
    }

    #[must_use]
    pub fn world_scale(&self) -> Vec3 {
        decompose(&self.world).2
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits an affine matrix into translation, rotation and scale.
///
/// A mirrored basis (negative determinant) is expressed by negating the X
/// scale, so the remaining basis is a proper rotation and the quaternion is
/// always a valid unit quaternion.
#[must_use]
pub fn decompose(m: &Affine3A) -> (Vec3, Quat, Vec3) {
    let translation: Vec3 = m.translation.into();
    let mut sx = m.matrix3.x_axis.length();
    let sy = m.matrix3.y_axis.length();
    let sz = m.matrix3.z_axis.length();
    if m.matrix3.determinant() < 0.0 {
        sx = -sx;
    }

    let inv = |s: f32| if s == 0.0 { 0.0 } else { 1.0 / s };
    let basis = Mat3A::from_cols(
        m.matrix3.x_axis * inv(sx),
        m.matrix3.y_axis * inv(sy),
        m.matrix3.z_axis * inv(sz),
    );

    (translation, quat_from_rotation(&basis), Vec3::new(sx, sy, sz))
}

/// Closed-form quaternion from a (nearly) orthonormal basis, branching on the
/// largest diagonal term for numerical stability.
fn quat_from_rotation(r: &Mat3A) -> Quat {
    let col = |c: Vec3A| (c.x, c.y, c.z);
    let (m11, m21, m31) = col(r.x_axis);
    let (m12, m22, m32) = col(r.y_axis);
    let (m13, m23, m33) = col(r.z_axis);
    let trace = m11 + m22 + m33;

    let q = if trace > 0.0 {
        let s = 0.5 / (trace + 1.0).sqrt();
        Quat::from_xyzw((m32 - m23) * s, (m13 - m31) * s, (m21 - m12) * s, 0.25 / s)
    } else if m11 > m22 && m11 > m33 {
        let s = 2.0 * (1.0 + m11 - m22 - m33).sqrt();
        Quat::from_xyzw(0.25 * s, (m12 + m21) / s, (m13 + m31) / s, (m32 - m23) / s)
    } else if m22 > m33 {
        let s = 2.0 * (1.0 + m22 - m11 - m33).sqrt();
        Quat::from_xyzw((m12 + m21) / s, 0.25 * s, (m23 + m32) / s, (m13 - m31) / s)
    } else {
        let s = 2.0 * (1.0 + m33 - m11 - m22).sqrt();
        Quat::from_xyzw((m13 + m31) / s, (m23 + m32) / s, 0.25 * s, (m21 - m12) / s)
    };

    if q.is_finite() && q.length_squared() > 0.0 {
        q.normalize()
    } else {
        Quat::IDENTITY
    }
}
