//! Camera models and the projection contract shared by the calibration engine.
//!
//! Every lens model implements two traits:
//!
//! * [`CameraModel`] is the object-safe, `f64` contract: project a ray to a
//!   pixel, unproject a pixel to a ray, the 2x3 projection Jacobian and the
//!   multi-view `transfer_3d` helpers built on top of it.
//! * [`Projection`] exposes the same projection as a generic function of the
//!   flat intrinsic vector so that residuals can be evaluated with dual numbers.
//!
//! A [`Rig`] groups several cameras together with their camera-to-rig poses.

use nalgebra::{DVector, DVectorView, Isometry3, Matrix2x3, Matrix2x4, RealField, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use yaml_rust::YamlLoader;

pub mod double_sphere;
pub mod kannala_brandt;
pub mod pinhole;
pub mod rig;

pub use double_sphere::DoubleSphereModel;
pub use kannala_brandt::KannalaBrandtModel;
pub use pinhole::PinholeModel;
pub use rig::Rig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

/// Image size in pixels. A zero width or height means the size is unknown and
/// no image-bounds checks are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn is_set(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Returns `true` if the pixel lies inside the image, or if no resolution is set.
    pub fn contains(&self, point_2d: &Vector2<f64>) -> bool {
        !self.is_set()
            || (point_2d.x >= 0.0
                && point_2d.x < self.width as f64
                && point_2d.y >= 0.0
                && point_2d.y < self.height as f64)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("Projection is outside the image")]
    ProjectionOutSideImage,
    #[error("Input point is outside the image")]
    PointIsOutSideImage,
    #[error("z is close to zero, point is at camera center")]
    PointAtCameraCenter,
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Expected {expected} camera parameters, got {actual}")]
    ParamCountMismatch { expected: usize, actual: usize },
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Numerical error in computation: {0}")]
    NumericalError(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CameraModelError {
    fn from(err: std::io::Error) -> Self {
        CameraModelError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CameraModelError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CameraModelError::YamlError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CameraModelError {
    fn from(err: serde_yaml::Error) -> Self {
        CameraModelError::YamlError(err.to_string())
    }
}

/// Trait defining the core functionality for camera models
pub trait CameraModel {
    /// Project a 3D ray in camera coordinates to 2D pixel coordinates.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError>;

    /// Unproject 2D pixel coordinates to a unit-length 3D ray.
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError>;

    /// Jacobian of [`CameraModel::project`] with respect to the ray, `d(u, v) / d(x, y, z)`.
    fn project_jacobian(&self, point_3d: &Vector3<f64>)
        -> Result<Matrix2x3<f64>, CameraModelError>;

    /// Projects a ray expressed in frame `a` into this camera (frame `b`).
    ///
    /// The point is parameterised by its direction `ray` and inverse depth `rho`,
    /// so `R_ba * ray + rho * t_ba` is the (scaled) point in frame `b`. The scale
    /// does not change the projection, which lets points at infinity (`rho = 0`)
    /// be transferred without ever forming them explicitly.
    fn transfer_3d(
        &self,
        t_ba: &Isometry3<f64>,
        ray: &Vector3<f64>,
        rho: f64,
    ) -> Result<Vector2<f64>, CameraModelError> {
        let ray_b = t_ba.rotation * ray + t_ba.translation.vector * rho;
        self.project(&ray_b)
    }

    /// Jacobian of [`CameraModel::transfer_3d`] with respect to `(ray, rho)`.
    ///
    /// The first three columns are `dProject * R_ba`, the last one is `dProject * t_ba`.
    fn transfer_3d_jacobian(
        &self,
        t_ba: &Isometry3<f64>,
        ray: &Vector3<f64>,
        rho: f64,
    ) -> Result<Matrix2x4<f64>, CameraModelError> {
        let rotation = t_ba.rotation.to_rotation_matrix().into_inner();
        let translation = t_ba.translation.vector;
        let ray_b = rotation * ray + translation * rho;
        let d_project = self.project_jacobian(&ray_b)?;

        let mut jacobian = Matrix2x4::zeros();
        jacobian
            .fixed_view_mut::<2, 3>(0, 0)
            .copy_from(&(d_project * rotation));
        jacobian.set_column(3, &(d_project * translation));
        Ok(jacobian)
    }

    /// Flat intrinsic vector `[fx, fy, cx, cy, distortion...]`.
    fn params(&self) -> DVector<f64>;

    /// Replaces the intrinsics from a flat vector. The model is left untouched
    /// if the new values do not validate.
    fn set_params(&mut self, params: &DVector<f64>) -> Result<(), CameraModelError>;

    /// Short identifier written to YAML files and reports, e.g. `"pinhole"`.
    fn model_name(&self) -> &'static str;

    /// Load camera parameters from a YAML file
    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError>
    where
        Self: Sized;

    /// Save camera parameters to a YAML file
    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError>;

    /// Validate camera parameters
    fn validate_params(&self) -> Result<(), CameraModelError>;

    fn get_resolution(&self) -> Resolution;

    fn get_intrinsics(&self) -> Intrinsics;

    fn get_distortion(&self) -> Vec<f64>;
}

/// Projection written against a flat intrinsic vector and any [`RealField`].
///
/// This is the formula the reprojection residual differentiates through, so it
/// must not branch on validity the way [`CameraModel::project`] does.
pub trait Projection: CameraModel + Sized {
    /// Length of the intrinsic vector returned by [`CameraModel::params`].
    const NUM_PARAMS: usize;

    fn project_with_params<T: RealField>(params: DVectorView<'_, T>, point: &Vector3<T>)
        -> Vector2<T>;
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CameraModelError> {
        if !(intrinsics.fx > 0.0 && intrinsics.fy > 0.0) {
            return Err(CameraModelError::FocalLengthMustBePositive);
        }
        if !intrinsics.cx.is_finite() || !intrinsics.cy.is_finite() {
            return Err(CameraModelError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }

    pub fn validate_param_count(expected: usize, actual: usize) -> Result<(), CameraModelError> {
        if expected != actual {
            return Err(CameraModelError::ParamCountMismatch { expected, actual });
        }
        Ok(())
    }
}

/// Reads a Kalibr-style `cam0` document and returns the raw intrinsic vector
/// and the resolution.
pub(crate) fn read_camera_yaml(
    path: &str,
    expected_params: usize,
) -> Result<(Vec<f64>, Resolution), CameraModelError> {
    let contents = fs::read_to_string(path)?;
    let docs = YamlLoader::load_from_str(&contents)?;
    let doc = docs
        .first()
        .ok_or_else(|| CameraModelError::InvalidParams("Empty YAML document".to_string()))?;

    let intrinsics_yaml = doc["cam0"]["intrinsics"].as_vec().ok_or_else(|| {
        CameraModelError::InvalidParams("YAML missing 'intrinsics' or not an array".to_string())
    })?;
    let resolution_yaml = doc["cam0"]["resolution"].as_vec().ok_or_else(|| {
        CameraModelError::InvalidParams("YAML missing 'resolution' or not an array".to_string())
    })?;

    validation::validate_param_count(expected_params, intrinsics_yaml.len())?;
    if resolution_yaml.len() != 2 {
        return Err(CameraModelError::InvalidParams(
            "Resolution must have exactly two entries".to_string(),
        ));
    }

    let params = intrinsics_yaml
        .iter()
        .enumerate()
        .map(|(i, value)| {
            value.as_f64().ok_or_else(|| {
                CameraModelError::InvalidParams(format!("Invalid intrinsic {i}: not a float"))
            })
        })
        .collect::<Result<Vec<f64>, _>>()?;

    let resolution = Resolution {
        width: resolution_yaml[0].as_i64().ok_or_else(|| {
            CameraModelError::InvalidParams("Invalid width: not an integer".to_string())
        })? as u32,
        height: resolution_yaml[1].as_i64().ok_or_else(|| {
            CameraModelError::InvalidParams("Invalid height: not an integer".to_string())
        })? as u32,
    };

    Ok((params, resolution))
}

/// Writes a Kalibr-style `cam0` document.
pub(crate) fn write_camera_yaml(
    path: &str,
    model_name: &str,
    params: &[f64],
    resolution: &Resolution,
) -> Result<(), CameraModelError> {
    let yaml = serde_yaml::to_value(serde_yaml::Mapping::from_iter([(
        serde_yaml::Value::String("cam0".to_string()),
        serde_yaml::to_value(serde_yaml::Mapping::from_iter([
            (
                serde_yaml::Value::String("camera_model".to_string()),
                serde_yaml::Value::String(model_name.to_string()),
            ),
            (
                serde_yaml::Value::String("intrinsics".to_string()),
                serde_yaml::to_value(params)?,
            ),
            (
                serde_yaml::Value::String("resolution".to_string()),
                serde_yaml::to_value(vec![resolution.width, resolution.height])?,
            ),
        ]))?,
    )]))?;

    let yaml_string = serde_yaml::to_string(&yaml)?;
    let mut file = fs::File::create(path)?;
    file.write_all(yaml_string.as_bytes())?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    /// Central-difference Jacobian of `project` used to check the analytical ones.
    pub fn numerical_project_jacobian<C: CameraModel>(
        model: &C,
        point: &Vector3<f64>,
    ) -> Matrix2x3<f64> {
        let h = 1e-6;
        let mut jacobian = Matrix2x3::zeros();
        for k in 0..3 {
            let mut plus = *point;
            let mut minus = *point;
            plus[k] += h;
            minus[k] -= h;
            let diff = model.project(&plus).unwrap() - model.project(&minus).unwrap();
            jacobian.set_column(k, &(diff / (2.0 * h)));
        }
        jacobian
    }

    pub fn temp_yaml_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("online_calib_{}_{}.yaml", name, std::process::id()))
            .to_string_lossy()
            .into_owned()
    }
}
