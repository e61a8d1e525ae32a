use nalgebra as na;

/// 4x4 homogeneous transform with a fixed `(0, 0, 0, 1)` bottom row
pub type TransformMatrix = na::Matrix4<f64>;

pub const IDENTITY_POSITION: [f64; 3] = [0.0, 0.0, 0.0];
pub const IDENTITY_ROTATION: [f64; 4] = [0.0, 0.0, 0.0, 1.0];
pub const UNIT_SCALE: [f64; 3] = [1.0, 1.0, 1.0];

/// Compose translation, rotation and per axis scale into one transform.
///
/// `rotation` is `[x, y, z, w]` and must already be normalized. It is not
/// renormalized here, an unnormalized quaternion gives a skewed (non rigid)
/// upper 3x3 block.
///
/// Scale multiplies the matching column of the rotation matrix, so the result
/// is `T * R * S`.
#[allow(clippy::many_single_char_names)]
pub fn compose(position: [f64; 3], rotation: [f64; 4], scale: [f64; 3]) -> TransformMatrix {
    let [x, y, z, w] = rotation;
    let [sx, sy, sz] = scale;
    let [px, py, pz] = position;

    let xx = x * x;
    let yy = y * y;
    let zz = z * z;
    let xy = x * y;
    let xz = x * z;
    let yz = y * z;
    let wx = w * x;
    let wy = w * y;
    let wz = w * z;

    // nalgebra takes the arguments in row major order
    TransformMatrix::new(
        (1.0 - 2.0 * (yy + zz)) * sx,
        (2.0 * (xy - wz)) * sy,
        (2.0 * (xz + wy)) * sz,
        px,
        (2.0 * (xy + wz)) * sx,
        (1.0 - 2.0 * (xx + zz)) * sy,
        (2.0 * (yz - wx)) * sz,
        py,
        (2.0 * (xz - wy)) * sx,
        (2.0 * (yz + wx)) * sy,
        (1.0 - 2.0 * (xx + yy)) * sz,
        pz,
        0.0,
        0.0,
        0.0,
        1.0,
    )
}

/// Row major nested arrays, the layout consumers serialize
pub fn to_rows(matrix: &TransformMatrix) -> [[f64; 4]; 4] {
    let mut rows = [[0.0; 4]; 4];
    for (row_index, row) in rows.iter_mut().enumerate() {
        for (column_index, value) in row.iter_mut().enumerate() {
            *value = matrix[(row_index, column_index)];
        }
    }
    rows
}

/// Translation part of a transform
pub fn translation(matrix: &TransformMatrix) -> na::Vector3<f64> {
    na::Vector3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)])
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-12;

    fn sample_rotations() -> Vec<[f64; 4]> {
        let mut rotations = vec![IDENTITY_ROTATION];
        for step in 0..12 {
            let angle = step as f64 * 0.53;
            let rotation = na::UnitQuaternion::from_euler_angles(angle, -angle * 0.7, angle * 1.9);
            let q = rotation.quaternion();
            rotations.push([q.i, q.j, q.k, q.w]);
        }
        rotations
    }

    #[test]
    fn test_identity_compose_is_exact() {
        let matrix = compose(IDENTITY_POSITION, IDENTITY_ROTATION, UNIT_SCALE);
        assert_eq!(matrix, TransformMatrix::identity());
    }

    #[test]
    fn test_rotation_block_is_orthonormal() {
        for rotation in sample_rotations() {
            let matrix = compose([3.0, -2.0, 150.0], rotation, UNIT_SCALE);
            let block = matrix.fixed_slice::<na::U3, na::U3>(0, 0).into_owned();
            for i in 0..3 {
                assert!((block.column(i).norm() - 1.0).abs() < EPSILON);
                for j in (i + 1)..3 {
                    assert!(block.column(i).dot(&block.column(j)).abs() < EPSILON);
                }
            }
            assert_eq!(matrix.row(3).clone_owned(), na::RowVector4::new(0.0, 0.0, 0.0, 1.0));
        }
    }

    #[test]
    fn test_matches_nalgebra_homogeneous() {
        for rotation in sample_rotations() {
            let [x, y, z, w] = rotation;
            let unit = na::UnitQuaternion::from_quaternion(na::Quaternion::new(w, x, y, z));
            let expected = na::Isometry3::from_parts(na::Translation3::new(1.0, 2.0, 3.0), unit)
                .to_homogeneous();
            let matrix = compose([1.0, 2.0, 3.0], rotation, UNIT_SCALE);
            assert!((matrix - expected).amax() < EPSILON);
        }
    }

    #[test]
    fn test_scale_multiplies_columns() {
        let matrix = compose(IDENTITY_POSITION, IDENTITY_ROTATION, [2.0, 3.0, 4.0]);
        assert_eq!(matrix[(0, 0)], 2.0);
        assert_eq!(matrix[(1, 1)], 3.0);
        assert_eq!(matrix[(2, 2)], 4.0);
        assert_eq!(matrix[(3, 3)], 1.0);
    }

    #[test]
    fn test_unnormalized_rotation_is_not_corrected() {
        let matrix = compose(IDENTITY_POSITION, [0.0, 0.0, 0.0, 2.0], UNIT_SCALE);
        // w only enters through w*x, w*y and w*z
        assert_eq!(matrix, TransformMatrix::identity());
        let skewed = compose(IDENTITY_POSITION, [2.0, 0.0, 0.0, 0.0], UNIT_SCALE);
        assert_eq!(skewed[(0, 0)], 1.0);
        assert_eq!(skewed[(1, 1)], -7.0);
        assert_eq!(skewed[(2, 2)], -7.0);
    }

    #[test]
    fn test_matrix_layout() {
        let matrix = compose([3.0, 7.0, 11.0], IDENTITY_ROTATION, UNIT_SCALE);
        let rows = to_rows(&matrix);
        assert_eq!(rows[0][3], 3.0);
        assert_eq!(rows[1][3], 7.0);
        assert_eq!(rows[2][3], 11.0);
        assert_eq!(rows[3], [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(translation(&matrix), na::Vector3::new(3.0, 7.0, 11.0));
    }
}
