//! Pose parameter blocks and small geometric helpers.
//!
//! Poses travel through the optimizer as 7-vectors `[qx, qy, qz, qw, tx, ty, tz]`
//! (unit quaternion followed by translation). Everything here that the
//! residual touches is generic over [`RealField`] so it can be evaluated with
//! dual numbers.

use nalgebra::{
    DVector, DVectorView, Isometry3, Matrix3, Point2, Quaternion, RealField, Translation3,
    UnitQuaternion, Vector3,
};

pub mod manifold;

pub use manifold::PoseManifold;

/// Ambient size of a pose parameter block.
pub const POSE_PARAMS: usize = 7;
/// Tangent size of a pose parameter block.
pub const POSE_TANGENT: usize = 6;

/// Flattens a rigid transform into `[qx, qy, qz, qw, tx, ty, tz]`.
pub fn isometry_to_params(pose: &Isometry3<f64>) -> DVector<f64> {
    let q = pose.rotation.quaternion();
    let t = pose.translation.vector;
    DVector::from_vec(vec![q.i, q.j, q.k, q.w, t.x, t.y, t.z])
}

/// Rebuilds a rigid transform from `[qx, qy, qz, qw, tx, ty, tz]`.
///
/// Returns `None` if the block has the wrong length or the quaternion is
/// degenerate. The quaternion is re-normalized.
pub fn params_to_isometry(params: DVectorView<'_, f64>) -> Option<Isometry3<f64>> {
    if params.len() != POSE_PARAMS || params.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let q = Quaternion::new(params[3], params[0], params[1], params[2]);
    if q.norm() < f64::EPSILON {
        return None;
    }
    Some(Isometry3::from_parts(
        Translation3::new(params[4], params[5], params[6]),
        UnitQuaternion::from_quaternion(q),
    ))
}

/// Rotation part of a pose block as a unit quaternion.
pub(crate) fn pose_rotation<T: RealField>(pose: DVectorView<'_, T>) -> UnitQuaternion<T> {
    UnitQuaternion::from_quaternion(Quaternion::new(
        pose[3].clone(),
        pose[0].clone(),
        pose[1].clone(),
        pose[2].clone(),
    ))
}

pub(crate) fn pose_translation<T: RealField>(pose: DVectorView<'_, T>) -> Vector3<T> {
    Vector3::new(pose[4].clone(), pose[5].clone(), pose[6].clone())
}

/// Applies a pose block to a point: `R * p + t`.
pub fn transform_point<T: RealField>(pose: DVectorView<'_, T>, point: &Vector3<T>) -> Vector3<T> {
    pose_rotation(pose.clone()).transform_vector(point) + pose_translation(pose)
}

/// Cross-product matrix `[v]x`, such that `skew(a) * b == a.cross(&b)`.
pub fn skew<T: RealField>(v: &Vector3<T>) -> Matrix3<T> {
    Matrix3::new(
        T::zero(),
        -v.z.clone(),
        v.y.clone(),
        v.z.clone(),
        T::zero(),
        -v.x.clone(),
        -v.y.clone(),
        v.x.clone(),
        T::zero(),
    )
}

/// Generate a grid of sample points that are evenly distributed across the image
///
/// # Arguments
///
/// * `width` - The width of the image in pixels
/// * `height` - The height of the image in pixels
/// * `n` - The approximate number of points to generate
///
/// # Returns
///
/// A vector of 2D points representing pixel coordinates
pub fn sample_points(width: f64, height: f64, n: usize) -> Vec<Point2<f64>> {
    let num_cells_x = (n as f64 * (width / height)).sqrt().round().max(1.0) as usize;
    let num_cells_y = (n as f64 * (height / width)).sqrt().round().max(1.0) as usize;

    let cell_width = width / num_cells_x as f64;
    let cell_height = height / num_cells_y as f64;

    (0..num_cells_y)
        .flat_map(|i| {
            (0..num_cells_x).map(move |j| {
                Point2::new(
                    (j as f64 + 0.5) * cell_width,
                    (i as f64 + 0.5) * cell_height,
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_pose() -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::new(0.4, -1.2, 2.5),
            UnitQuaternion::from_euler_angles(0.3, -0.1, 1.2),
        )
    }

    #[test]
    fn test_pose_params_layout() {
        let pose = sample_pose();
        let params = isometry_to_params(&pose);

        assert_eq!(params.len(), POSE_PARAMS);
        assert_eq!(params[3], pose.rotation.quaternion().w);
        assert_eq!(params[4], 0.4);
        assert_eq!(params[6], 2.5);

        let back = params_to_isometry(params.as_view()).unwrap();
        assert_relative_eq!(back, pose, epsilon = 1e-12);
    }

    #[test]
    fn test_params_to_isometry_rejects_degenerate() {
        let zeros = DVector::zeros(POSE_PARAMS);
        assert!(params_to_isometry(zeros.as_view()).is_none());

        let short = DVector::from_vec(vec![0.0, 0.0, 0.0, 1.0]);
        assert!(params_to_isometry(short.as_view()).is_none());
    }

    #[test]
    fn test_transform_point_matches_isometry() {
        let pose = sample_pose();
        let params = isometry_to_params(&pose);
        let point = Vector3::new(1.0, 2.0, 3.0);

        let expected = pose.transform_point(&point.into()).coords;
        assert_relative_eq!(transform_point(params.as_view(), &point), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_skew() {
        let a = Vector3::new(1.0, -2.0, 0.5);
        let b = Vector3::new(0.3, 0.7, -1.1);
        assert_relative_eq!(skew(&a) * b, a.cross(&b), epsilon = 1e-15);
    }

    #[test]
    fn test_sample_points() {
        let width = 800f64;
        let height = 600f64;
        let n = 100;

        let points = sample_points(width, height, n);

        let expected_count = (n as f64 * 0.8) as usize..=(n as f64 * 1.2) as usize;
        assert!(
            expected_count.contains(&points.len()),
            "Expected around {} points, got {}",
            n,
            points.len()
        );

        for point in &points {
            assert!(point.x >= 0.0 && point.x < width);
            assert!(point.y >= 0.0 && point.y < height);
        }
    }
}
