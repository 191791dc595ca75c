//! Implements the Pinhole camera model.
//!
//! This module provides the [`PinholeModel`] struct and its associated methods
//! for representing and working with a simple pinhole camera. It adheres to the
//! [`CameraModel`] and [`Projection`] traits defined in the parent `camera`
//! module ([`crate::camera`]). The pinhole model is the simplest camera model,
//! assuming no lens distortion.

use crate::camera::{
    read_camera_yaml, validation, write_camera_yaml, CameraModel, CameraModelError, Intrinsics,
    Projection, Resolution,
};
use nalgebra::{DVector, DVectorView, Matrix2x3, RealField, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Represents a Pinhole camera model.
///
/// This struct holds the intrinsic parameters (focal length, principal point)
/// and image resolution for a pinhole camera. It assumes no lens distortion.
///
/// # Examples
///
/// ```rust
/// use nalgebra::DVector;
/// use online_calib::camera::pinhole::PinholeModel;
/// use online_calib::camera::Resolution;
///
/// let params = DVector::from_vec(vec![500.0, 500.0, 320.0, 240.0]); // fx, fy, cx, cy
/// let mut pinhole_model = PinholeModel::new(&params).unwrap();
/// pinhole_model.resolution = Resolution { width: 640, height: 480 };
///
/// assert_eq!(pinhole_model.intrinsics.fx, 500.0);
/// assert_eq!(pinhole_model.resolution.width, 640);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinholeModel {
    /// The intrinsic parameters of the camera, [`Intrinsics`] (fx, fy, cx, cy).
    pub intrinsics: Intrinsics,
    /// The resolution of the camera image. 0x0 disables bounds checks.
    pub resolution: Resolution,
}

impl PinholeModel {
    /// Creates a new [`PinholeModel`] from `[fx, fy, cx, cy]`.
    ///
    /// The resolution is initialized to 0x0 (unknown) and can be set afterwards.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::ParamCountMismatch`] if `parameters` does not hold 4 values.
    /// * [`CameraModelError::FocalLengthMustBePositive`]
    /// * [`CameraModelError::PrincipalPointMustBeFinite`]
    pub fn new(parameters: &DVector<f64>) -> Result<Self, CameraModelError> {
        validation::validate_param_count(Self::NUM_PARAMS, parameters.len())?;
        let model = PinholeModel {
            intrinsics: Intrinsics {
                fx: parameters[0],
                fy: parameters[1],
                cx: parameters[2],
                cy: parameters[3],
            },
            resolution: Resolution::default(),
        };

        model.validate_params()?;

        Ok(model)
    }
}

impl Projection for PinholeModel {
    const NUM_PARAMS: usize = 4;

    /// `u = fx * X / Z + cx`, `v = fy * Y / Z + cy`
    fn project_with_params<T: RealField>(
        params: DVectorView<'_, T>,
        point: &Vector3<T>,
    ) -> Vector2<T> {
        let inv_z = T::one() / point.z.clone();
        Vector2::new(
            params[0].clone() * point.x.clone() * inv_z.clone() + params[2].clone(),
            params[1].clone() * point.y.clone() * inv_z + params[3].clone(),
        )
    }
}

impl CameraModel for PinholeModel {
    /// Projects a 3D point from camera coordinates to 2D image coordinates.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointAtCameraCenter`]: If the 3D point's Z-coordinate is too close to zero
    ///   or negative.
    /// * [`CameraModelError::ProjectionOutSideImage`]: If a resolution is set and the
    ///   projected point falls outside it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nalgebra::{DVector, Vector3};
    /// use online_calib::camera::pinhole::PinholeModel;
    /// use online_calib::camera::CameraModel;
    ///
    /// let model = PinholeModel::new(&DVector::from_vec(vec![500.0, 500.0, 320.0, 240.0])).unwrap();
    /// let point_2d = model.project(&Vector3::new(0.1, 0.2, 1.0)).unwrap();
    /// assert!((point_2d.x - 370.0).abs() < 1e-6);
    /// assert!((point_2d.y - 340.0).abs() < 1e-6);
    /// ```
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        // If z is very small, the point is at the camera center
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }

        let point_2d = Self::project_with_params(self.params().as_view(), point_3d);
        if !self.resolution.contains(&point_2d) {
            return Err(CameraModelError::ProjectionOutSideImage);
        }

        Ok(point_2d)
    }

    /// Unprojects a 2D image point to a normalized 3D ray in camera coordinates.
    ///
    /// `mx = (u - cx) / fx`, `my = (v - cy) / fy`, ray = normalize(mx, my, 1).
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        if !self.resolution.contains(point_2d) {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let mx = (point_2d.x - self.intrinsics.cx) / self.intrinsics.fx;
        let my = (point_2d.y - self.intrinsics.cy) / self.intrinsics.fy;

        let r2 = mx * mx + my * my;
        let norm_inv = 1.0 / (1.0 + r2).sqrt();

        Ok(Vector3::new(mx * norm_inv, my * norm_inv, norm_inv))
    }

    fn project_jacobian(
        &self,
        point_3d: &Vector3<f64>,
    ) -> Result<Matrix2x3<f64>, CameraModelError> {
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }

        let Intrinsics { fx, fy, .. } = self.intrinsics;
        let inv_z = 1.0 / point_3d.z;
        let inv_z2 = inv_z * inv_z;

        Ok(Matrix2x3::new(
            fx * inv_z,
            0.0,
            -fx * point_3d.x * inv_z2,
            0.0,
            fy * inv_z,
            -fy * point_3d.y * inv_z2,
        ))
    }

    fn params(&self) -> DVector<f64> {
        DVector::from_vec(vec![
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
        ])
    }

    fn set_params(&mut self, params: &DVector<f64>) -> Result<(), CameraModelError> {
        let mut updated = PinholeModel::new(params)?;
        updated.resolution = self.resolution.clone();
        *self = updated;
        Ok(())
    }

    fn model_name(&self) -> &'static str {
        "pinhole"
    }

    /// Loads camera parameters from a Kalibr-style YAML file
    /// (`cam0.intrinsics: [fx, fy, cx, cy]`, `cam0.resolution: [w, h]`).
    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let (params, resolution) = read_camera_yaml(path, Self::NUM_PARAMS)?;
        let mut model = PinholeModel::new(&DVector::from_vec(params))?;
        model.resolution = resolution;
        Ok(model)
    }

    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        write_camera_yaml(
            path,
            self.model_name(),
            self.params().as_slice(),
            &self.resolution,
        )
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution.clone()
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics.clone()
    }

    /// The pinhole model has no distortion parameters.
    fn get_distortion(&self) -> Vec<f64> {
        vec![]
    }
}
