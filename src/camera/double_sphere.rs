//! Double Sphere camera model.
//!
//! Usenko, Demmel, Cremers: "The Double Sphere Camera Model" (3DV 2018).
//! The point is projected onto two unit spheres whose centres are shifted by
//! `xi`, then onto a pinhole plane shifted by `alpha / (1 - alpha)`.
//! Intrinsic vector layout: `[fx, fy, cx, cy, xi, alpha]`.

use nalgebra::{DVector, DVectorView, Matrix2x3, RealField, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::camera::{
    read_camera_yaml, validation, write_camera_yaml, CameraModel, CameraModelError, Intrinsics,
    Projection, Resolution,
};

const PRECISION: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoubleSphereModel {
    pub intrinsics: Intrinsics,
    pub resolution: Resolution,
    pub xi: f64,
    pub alpha: f64,
}

impl DoubleSphereModel {
    /// Creates a model from `[fx, fy, cx, cy, xi, alpha]` with an unset resolution.
    pub fn new(parameters: &DVector<f64>) -> Result<Self, CameraModelError> {
        validation::validate_param_count(Self::NUM_PARAMS, parameters.len())?;
        let model = DoubleSphereModel {
            intrinsics: Intrinsics {
                fx: parameters[0],
                fy: parameters[1],
                cx: parameters[2],
                cy: parameters[3],
            },
            resolution: Resolution::default(),
            xi: parameters[4],
            alpha: parameters[5],
        };

        model.validate_params()?;
        Ok(model)
    }

    /// Returns `true` if the point lies inside the valid projection region.
    ///
    /// Both the field-of-view limit `z > -w2 * d1` and the denominator of the
    /// projection have to hold.
    fn check_projection_condition(&self, point_3d: &Vector3<f64>) -> bool {
        let (x, y, z) = (point_3d.x, point_3d.y, point_3d.z);
        let r_squared = x * x + y * y;
        let d1 = (r_squared + z * z).sqrt();

        let w1 = if self.alpha <= 0.5 {
            self.alpha / (1.0 - self.alpha)
        } else {
            (1.0 - self.alpha) / self.alpha
        };
        let w2 = (w1 + self.xi) / (2.0 * w1 * self.xi + self.xi * self.xi + 1.0).sqrt();
        if z <= -w2 * d1 {
            return false;
        }

        let gamma = self.xi * d1 + z;
        let d2 = (r_squared + gamma * gamma).sqrt();
        self.alpha * d2 + (1.0 - self.alpha) * gamma >= PRECISION
    }
}

impl Projection for DoubleSphereModel {
    const NUM_PARAMS: usize = 6;

    fn project_with_params<T: RealField>(
        params: DVectorView<'_, T>,
        point: &Vector3<T>,
    ) -> Vector2<T> {
        let fx = params[0].clone();
        let fy = params[1].clone();
        let cx = params[2].clone();
        let cy = params[3].clone();
        let xi = params[4].clone();
        let alpha = params[5].clone();

        let x = point.x.clone();
        let y = point.y.clone();
        let z = point.z.clone();

        let r_squared = x.clone() * x.clone() + y.clone() * y.clone();
        let d1 = (r_squared.clone() + z.clone() * z.clone()).sqrt();
        let gamma = xi * d1 + z;
        let d2 = (r_squared + gamma.clone() * gamma.clone()).sqrt();
        let denom = alpha.clone() * d2 + (T::one() - alpha) * gamma;

        Vector2::new(fx * x / denom.clone() + cx, fy * y / denom + cy)
    }
}

impl CameraModel for DoubleSphereModel {
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        if !self.check_projection_condition(point_3d) {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let point_2d = Self::project_with_params(self.params().as_view(), point_3d);
        if !self.resolution.contains(&point_2d) {
            return Err(CameraModelError::ProjectionOutSideImage);
        }

        Ok(point_2d)
    }

    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        if !self.resolution.contains(point_2d) {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let Intrinsics { fx, fy, cx, cy } = self.intrinsics;
        let alpha = self.alpha;
        let xi = self.xi;

        let gamma = 1.0 - alpha;
        let mx = (point_2d.x - cx) / fx;
        let my = (point_2d.y - cy) / fy;
        let r_squared = mx * mx + my * my;

        // Outside the valid image disc for alpha > 0.5
        if alpha > 0.5 && (2.0 * alpha - 1.0) * r_squared >= 1.0 {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let mz = (1.0 - alpha * alpha * r_squared)
            / (alpha * (1.0 - (2.0 * alpha - 1.0) * r_squared).sqrt() + gamma);
        let mz_squared = mz * mz;

        let discriminant = mz_squared + (1.0 - xi * xi) * r_squared;
        if discriminant < 0.0 {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let denom = mz_squared + r_squared;
        if denom < PRECISION {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let coeff = (mz * xi + discriminant.sqrt()) / denom;
        let point_3d = Vector3::new(coeff * mx, coeff * my, coeff * mz - xi);

        Ok(point_3d.normalize())
    }

    fn project_jacobian(
        &self,
        point_3d: &Vector3<f64>,
    ) -> Result<Matrix2x3<f64>, CameraModelError> {
        if !self.check_projection_condition(point_3d) {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let Intrinsics { fx, fy, .. } = self.intrinsics;
        let (x, y, z) = (point_3d.x, point_3d.y, point_3d.z);

        let r_squared = x * x + y * y;
        let d1 = (r_squared + z * z).sqrt();
        let gamma = self.xi * d1 + z;
        let d2 = (r_squared + gamma * gamma).sqrt();
        let denom = self.alpha * d2 + (1.0 - self.alpha) * gamma;

        let d_gamma = point_3d * (self.xi / d1) + Vector3::z();
        let d_d2 = (Vector3::new(x, y, 0.0) + d_gamma * gamma) / d2;
        let d_denom = d_d2 * self.alpha + d_gamma * (1.0 - self.alpha);

        let inv_denom = 1.0 / denom;
        let inv_denom2 = inv_denom * inv_denom;

        let du = (Vector3::x() * inv_denom - d_denom * (x * inv_denom2)) * fx;
        let dv = (Vector3::y() * inv_denom - d_denom * (y * inv_denom2)) * fy;

        Ok(Matrix2x3::new(du.x, du.y, du.z, dv.x, dv.y, dv.z))
    }

    fn params(&self) -> DVector<f64> {
        DVector::from_vec(vec![
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            self.xi,
            self.alpha,
        ])
    }

    fn set_params(&mut self, params: &DVector<f64>) -> Result<(), CameraModelError> {
        let mut updated = DoubleSphereModel::new(params)?;
        updated.resolution = self.resolution.clone();
        *self = updated;
        Ok(())
    }

    fn model_name(&self) -> &'static str {
        "double_sphere"
    }

    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let (params, resolution) = read_camera_yaml(path, Self::NUM_PARAMS)?;
        let mut model = DoubleSphereModel::new(&DVector::from_vec(params))?;
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
        validation::validate_intrinsics(&self.intrinsics)?;

        if !self.xi.is_finite() {
            return Err(CameraModelError::InvalidParams(
                "xi must be finite".to_string(),
            ));
        }

        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(CameraModelError::InvalidParams(
                "alpha must be in (0, 1]".to_string(),
            ));
        }

        Ok(())
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution.clone()
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics.clone()
    }

    fn get_distortion(&self) -> Vec<f64> {
        vec![self.xi, self.alpha]
    }
}
