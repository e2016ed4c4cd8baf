//! Vector and matrix math for rig transforms
//!
//! Rotations are euler angles in degrees, composed Z * Y * X. All matrix
//! work goes through plain `[[f32; 4]; 4]` arrays; rig transforms are rigid
//! (rotation + translation), so the inverse is the cheap transpose form.

use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// 3D Vector
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };
    pub const X: Vec3 = Vec3 { x: 1.0, y: 0.0, z: 0.0 };
    pub const Y: Vec3 = Vec3 { x: 0.0, y: 1.0, z: 0.0 };
    pub const Z: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 1.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Vec3) -> Vec3 {
        Vec3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn len(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn normalize(self) -> Vec3 {
        let l = self.len();
        if l == 0.0 {
            return Vec3::ZERO;
        }
        Vec3 {
            x: self.x / l,
            y: self.y / l,
            z: self.z / l,
        }
    }

    pub fn scale(self, s: f32) -> Vec3 {
        Vec3 {
            x: self.x * s,
            y: self.y * s,
            z: self.z * s,
        }
    }

    /// Component-wise maximum absolute difference to another vector.
    pub fn max_abs_diff(self, other: Vec3) -> f32 {
        (self.x - other.x)
            .abs()
            .max((self.y - other.y).abs())
            .max((self.z - other.z).abs())
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, other: Vec3) -> Vec3 {
        Vec3 {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
        }
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, other: Vec3) -> Vec3 {
        Vec3 {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;
    fn mul(self, s: f32) -> Vec3 {
        self.scale(s)
    }
}

// =============================================================================
// 4x4 Matrix operations (for transforms)
// =============================================================================

/// 4x4 transformation matrix type
pub type Mat4 = [[f32; 4]; 4];

/// Identity matrix
pub fn mat4_identity() -> Mat4 {
    [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// Create translation matrix
pub fn mat4_translation(t: Vec3) -> Mat4 {
    [
        [1.0, 0.0, 0.0, t.x],
        [0.0, 1.0, 0.0, t.y],
        [0.0, 0.0, 1.0, t.z],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// Build a rotation matrix from euler angles (degrees).
/// Rotation order: Z * Y * X.
pub fn mat4_rotation(rot: Vec3) -> Mat4 {
    let (sx, cx) = rot.x.to_radians().sin_cos();
    let (sy, cy) = rot.y.to_radians().sin_cos();
    let (sz, cz) = rot.z.to_radians().sin_cos();

    [
        [cy * cz, sx * sy * cz - cx * sz, cx * sy * cz + sx * sz, 0.0],
        [cy * sz, sx * sy * sz + cx * cz, cx * sy * sz - sx * cz, 0.0],
        [-sy, sx * cy, cx * cy, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// Multiply two 4x4 matrices
pub fn mat4_mul(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut result = [[0.0; 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            for k in 0..4 {
                result[i][j] += a[i][k] * b[k][j];
            }
        }
    }
    result
}

/// Transform a point by a 4x4 matrix
pub fn mat4_transform_point(m: &Mat4, p: Vec3) -> Vec3 {
    Vec3::new(
        m[0][0] * p.x + m[0][1] * p.y + m[0][2] * p.z + m[0][3],
        m[1][0] * p.x + m[1][1] * p.y + m[1][2] * p.z + m[1][3],
        m[2][0] * p.x + m[2][1] * p.y + m[2][2] * p.z + m[2][3],
    )
}

/// Build a combined transform matrix from position and rotation
pub fn mat4_from_position_rotation(position: Vec3, rotation: Vec3) -> Mat4 {
    let rot_mat = mat4_rotation(rotation);
    let trans_mat = mat4_translation(position);
    mat4_mul(&trans_mat, &rot_mat)
}

/// Translation component of a transform matrix.
pub fn mat4_position(m: &Mat4) -> Vec3 {
    Vec3::new(m[0][3], m[1][3], m[2][3])
}

/// Invert a rigid transform (rotation + translation only).
/// R' = transpose(R), t' = -R' * t.
pub fn mat4_rigid_inverse(m: &Mat4) -> Mat4 {
    let mut inv = mat4_identity();
    for i in 0..3 {
        for j in 0..3 {
            inv[i][j] = m[j][i];
        }
    }
    let t = mat4_position(m);
    inv[0][3] = -(inv[0][0] * t.x + inv[0][1] * t.y + inv[0][2] * t.z);
    inv[1][3] = -(inv[1][0] * t.x + inv[1][1] * t.y + inv[1][2] * t.z);
    inv[2][3] = -(inv[2][0] * t.x + inv[2][1] * t.y + inv[2][2] * t.z);
    inv
}

/// Extract euler angles (degrees, Z * Y * X order) from a rotation matrix.
/// Inverse of `mat4_rotation`.
pub fn euler_from_mat4(m: &Mat4) -> Vec3 {
    // m[2][0] = -sin(y)
    let sy = -m[2][0];
    let sy = sy.clamp(-1.0, 1.0);
    let y = sy.asin();

    let (x, z) = if sy.abs() < 0.999_999 {
        (m[2][1].atan2(m[2][2]), m[1][0].atan2(m[0][0]))
    } else {
        // Gimbal lock: fold everything into z
        (0.0, (-m[0][1]).atan2(m[1][1]))
    };

    Vec3::new(x.to_degrees(), y.to_degrees(), z.to_degrees())
}

/// Build an orthonormal rotation matrix whose X axis points along `aim`,
/// using `up` as the secondary hint. Falls back to a world axis when the
/// hint is parallel to the aim direction.
pub fn mat4_aim_x(aim: Vec3, up: Vec3) -> Mat4 {
    let x = aim.normalize();
    if x == Vec3::ZERO {
        return mat4_identity();
    }
    let mut up = up.normalize();
    if x.cross(up).len() < 1e-4 {
        up = if x.y.abs() < 0.9 { Vec3::Y } else { Vec3::Z };
    }
    let z = x.cross(up).normalize();
    let y = z.cross(x).normalize();
    [
        [x.x, y.x, z.x, 0.0],
        [x.y, y.y, z.y, 0.0],
        [x.z, y.z, z.z, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_vec_close(a: Vec3, b: Vec3, tol: f32) {
        assert!(
            a.max_abs_diff(b) < tol,
            "vectors differ: {:?} vs {:?}",
            a,
            b
        );
    }

    #[test]
    fn test_vec3_cross() {
        let c = Vec3::X.cross(Vec3::Y);
        assert_vec_close(c, Vec3::Z, 1e-6);
    }

    #[test]
    fn test_euler_round_trip() {
        let angles = Vec3::new(30.0, -45.0, 60.0);
        let m = mat4_rotation(angles);
        let back = euler_from_mat4(&m);
        assert_vec_close(angles, back, 1e-3);
    }

    #[test]
    fn test_rigid_inverse() {
        let m = mat4_from_position_rotation(Vec3::new(1.0, 2.0, 3.0), Vec3::new(10.0, 20.0, 30.0));
        let inv = mat4_rigid_inverse(&m);
        let id = mat4_mul(&m, &inv);
        for i in 0..4 {
            for j in 0..4 {
                let expect = if i == j { 1.0 } else { 0.0 };
                assert!((id[i][j] - expect).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_aim_x_points_at_target() {
        let m = mat4_aim_x(Vec3::new(0.0, 1.0, 0.0), Vec3::Z);
        let x_axis = mat4_transform_point(&m, Vec3::X);
        assert_vec_close(x_axis, Vec3::Y, 1e-5);
    }

    #[test]
    fn test_aim_x_degenerate_up() {
        // Up parallel to aim must still produce an orthonormal frame
        let m = mat4_aim_x(Vec3::Y, Vec3::Y);
        let x_axis = mat4_transform_point(&m, Vec3::X);
        assert_vec_close(x_axis, Vec3::Y, 1e-5);
        let angles = euler_from_mat4(&m);
        let back = mat4_rotation(angles);
        for i in 0..3 {
            for j in 0..3 {
                assert!((m[i][j] - back[i][j]).abs() < 1e-4);
            }
        }
    }
}
