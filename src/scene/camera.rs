use glam::{Affine3A, Mat4, Vec3, Vec4};

/// Camera projection settings plus a world placement.
///
/// The renderer never mutates a camera; it reads a [`CameraView`] from it
/// once per frame.
#[derive(Debug, Clone)]
pub struct Camera {
    pub projection_type: ProjectionType,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    /// Half-height of the orthographic view volume.
    pub ortho_size: f32,
    /// Camera-to-world placement.
    pub world: Affine3A,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionType {
    Perspective,
    Orthographic,
}

impl Camera {
    /// `fov_degrees` is the vertical field of view.
    #[must_use]
    pub fn new_perspective(fov_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            projection_type: ProjectionType::Perspective,
            fov: fov_degrees.to_radians(),
            aspect,
            near,
            far,
            ortho_size: 10.0,
            world: Affine3A::IDENTITY,
        }
    }

    #[must_use]
    pub fn new_orthographic(size: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            projection_type: ProjectionType::Orthographic,
            fov: 50f32.to_radians(),
            aspect,
            near,
            far,
            ortho_size: size,
            world: Affine3A::IDENTITY,
        }
    }

    /// Places the camera at `eye` looking at `target`.
    pub fn look_at(&mut self, eye: Vec3, target: Vec3, up: Vec3) {
        self.world = Affine3A::look_at_rh(eye, target, up).inverse();
    }

    #[must_use]
    pub fn projection_matrix(&self) -> Mat4 {
        match self.projection_type {
            ProjectionType::Perspective => {
                Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
            }
            ProjectionType::Orthographic => {
                let h = self.ortho_size;
                let w = h * self.aspect;
                Mat4::orthographic_rh(-w, w, -h, h, self.near, self.far)
            }
        }
    }

    #[must_use]
    pub fn view(&self) -> CameraView {
        CameraView::new(Mat4::from(self.world.inverse()), self.projection_matrix())
    }
}

/// Per-frame matrices the renderer reads from the camera collaborator.
#[derive(Debug, Clone, Copy)]
pub struct CameraView {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub position: Vec3,
    pub frustum: Frustum,
}

impl CameraView {
    #[must_use]
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        let view_projection = projection * view;
        Self {
            view,
            projection,
            view_projection,
            position: view.inverse().w_axis.truncate(),
            frustum: Frustum::from_matrix(view_projection),
        }
    }

    /// Distance in front of the camera: the negated view-space Z.
    #[inline]
    #[must_use]
    pub fn depth_of(&self, world_point: Vec3) -> f32 {
        -self.view.transform_point3(world_point).z
    }
}

/// Six clip planes, normals pointing inward.
#[derive(Debug, Clone, Copy, Default)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Gribb-Hartmann extraction for a `[0, 1]` depth range.
    #[must_use]
    pub fn from_matrix(m: Mat4) -> Self {
        let rows = [m.row(0), m.row(1), m.row(2), m.row(3)];
        let mut planes = [
            rows[3] + rows[0], // left
            rows[3] - rows[0], // right
            rows[3] + rows[1], // bottom
            rows[3] - rows[1], // top
            rows[2],           // near
            rows[3] - rows[2], // far
        ];
        for plane in &mut planes {
            let length = plane.truncate().length();
            if length > 0.0 {
                *plane /= length;
            }
        }
        Self { planes }
    }

    #[must_use]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|p| p.truncate().dot(center) + p.w >= -radius)
    }
}
