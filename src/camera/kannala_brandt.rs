//! Kannala-Brandt fisheye camera model.
//!
//! The radial mapping is a polynomial in the incidence angle `theta`:
//! `theta_d = theta * (1 + k1 theta^2 + k2 theta^4 + k3 theta^6 + k4 theta^8)`.
//! Intrinsic vector layout: `[fx, fy, cx, cy, k1, k2, k3, k4]`.

use log::debug;
use nalgebra::{DVector, DVectorView, Matrix2x3, RealField, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::camera::{
    read_camera_yaml, validation, write_camera_yaml, CameraModel, CameraModelError, Intrinsics,
    Projection, Resolution,
};

/// Below this squared radius the model degenerates to a pinhole.
const RADIUS_SQUARED_EPS: f64 = 1e-16;
const MAX_NEWTON_ITERATIONS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KannalaBrandtModel {
    pub intrinsics: Intrinsics,
    pub resolution: Resolution,
    pub distortions: [f64; 4], // k1, k2, k3, k4
}

impl KannalaBrandtModel {
    /// Creates a model from `[fx, fy, cx, cy, k1, k2, k3, k4]` with an unset resolution.
    pub fn new(parameters: &DVector<f64>) -> Result<Self, CameraModelError> {
        validation::validate_param_count(Self::NUM_PARAMS, parameters.len())?;
        let model = KannalaBrandtModel {
            intrinsics: Intrinsics {
                fx: parameters[0],
                fy: parameters[1],
                cx: parameters[2],
                cy: parameters[3],
            },
            resolution: Resolution::default(),
            distortions: [parameters[4], parameters[5], parameters[6], parameters[7]],
        };

        model.validate_params()?;
        Ok(model)
    }

    fn theta_d(&self, theta: f64) -> f64 {
        let [k1, k2, k3, k4] = self.distortions;
        let theta2 = theta * theta;
        theta * (1.0 + theta2 * (k1 + theta2 * (k2 + theta2 * (k3 + theta2 * k4))))
    }

    /// `d theta_d / d theta`
    fn theta_d_derivative(&self, theta: f64) -> f64 {
        let [k1, k2, k3, k4] = self.distortions;
        let theta2 = theta * theta;
        1.0 + theta2 * (3.0 * k1 + theta2 * (5.0 * k2 + theta2 * (7.0 * k3 + theta2 * 9.0 * k4)))
    }
}

impl Projection for KannalaBrandtModel {
    const NUM_PARAMS: usize = 8;

    fn project_with_params<T: RealField>(
        params: DVectorView<'_, T>,
        point: &Vector3<T>,
    ) -> Vector2<T> {
        let fx = params[0].clone();
        let fy = params[1].clone();
        let cx = params[2].clone();
        let cy = params[3].clone();

        let x = point.x.clone();
        let y = point.y.clone();
        let z = point.z.clone();

        let r_squared = x.clone() * x.clone() + y.clone() * y.clone();
        if r_squared <= T::from_f64(RADIUS_SQUARED_EPS).unwrap() {
            // On the optical axis: theta_d / r -> 1 / z
            return Vector2::new(
                fx * x / z.clone() + cx,
                fy * y / z + cy,
            );
        }

        let r = r_squared.sqrt();
        let theta = r.clone().atan2(z);
        let theta2 = theta.clone() * theta.clone();
        let poly = T::one()
            + theta2.clone()
                * (params[4].clone()
                    + theta2.clone()
                        * (params[5].clone()
                            + theta2.clone() * (params[6].clone() + theta2 * params[7].clone())));
        let scale = theta * poly / r;

        Vector2::new(
            fx * x * scale.clone() + cx,
            fy * y * scale + cy,
        )
    }
}

impl CameraModel for KannalaBrandtModel {
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        if point_3d.norm_squared() < f64::EPSILON {
            return Err(CameraModelError::PointAtCameraCenter);
        }
        // On-axis points behind the camera have no direction in the image
        if point_3d.x * point_3d.x + point_3d.y * point_3d.y <= RADIUS_SQUARED_EPS
            && point_3d.z <= 0.0
        {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let point_2d = Self::project_with_params(self.params().as_view(), point_3d);
        if !self.resolution.contains(&point_2d) {
            return Err(CameraModelError::ProjectionOutSideImage);
        }

        Ok(point_2d)
    }

    /// Inverts the radial polynomial with Newton's method.
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        if !self.resolution.contains(point_2d) {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let Intrinsics { fx, fy, cx, cy } = self.intrinsics;
        let mx = (point_2d.x - cx) / fx;
        let my = (point_2d.y - cy) / fy;
        let theta_d = (mx * mx + my * my).sqrt();

        if theta_d < 1e-10 {
            return Ok(Vector3::z());
        }

        let mut theta = theta_d;
        let mut converged = false;
        for iteration in 0..MAX_NEWTON_ITERATIONS {
            let derivative = self.theta_d_derivative(theta);
            if derivative.abs() < f64::EPSILON {
                break;
            }
            let step = (self.theta_d(theta) - theta_d) / derivative;
            theta -= step;
            if step.abs() < 1e-12 {
                debug!("Kannala-Brandt unprojection converged after {} iterations", iteration + 1);
                converged = true;
                break;
            }
        }

        if !converged || !theta.is_finite() || theta < 0.0 {
            return Err(CameraModelError::NumericalError(format!(
                "Newton iteration did not converge for theta_d = {theta_d}"
            )));
        }

        let (sin_theta, cos_theta) = theta.sin_cos();
        let scale = sin_theta / theta_d;
        Ok(Vector3::new(mx * scale, my * scale, cos_theta))
    }

    fn project_jacobian(
        &self,
        point_3d: &Vector3<f64>,
    ) -> Result<Matrix2x3<f64>, CameraModelError> {
        let Intrinsics { fx, fy, .. } = self.intrinsics;
        let (x, y, z) = (point_3d.x, point_3d.y, point_3d.z);
        let r_squared = x * x + y * y;

        if r_squared <= RADIUS_SQUARED_EPS {
            if z < f64::EPSILON.sqrt() {
                return Err(CameraModelError::PointAtCameraCenter);
            }
            let inv_z = 1.0 / z;
            return Ok(Matrix2x3::new(
                fx * inv_z,
                0.0,
                -fx * x * inv_z * inv_z,
                0.0,
                fy * inv_z,
                -fy * y * inv_z * inv_z,
            ));
        }

        let r = r_squared.sqrt();
        let rho_squared = r_squared + z * z;
        let theta = r.atan2(z);
        let theta_d = self.theta_d(theta);
        let theta_d_prime = self.theta_d_derivative(theta);

        let d_theta = Vector3::new(
            z * x / (r * rho_squared),
            z * y / (r * rho_squared),
            -r / rho_squared,
        );
        let d_r = Vector3::new(x / r, y / r, 0.0);

        // scale = theta_d / r
        let scale = theta_d / r;
        let d_scale = d_theta * (theta_d_prime / r) - d_r * (theta_d / r_squared);

        let du = (Vector3::x() * scale + d_scale * x) * fx;
        let dv = (Vector3::y() * scale + d_scale * y) * fy;

        Ok(Matrix2x3::new(du.x, du.y, du.z, dv.x, dv.y, dv.z))
    }

    fn params(&self) -> DVector<f64> {
        let [k1, k2, k3, k4] = self.distortions;
        DVector::from_vec(vec![
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            k1,
            k2,
            k3,
            k4,
        ])
    }

    fn set_params(&mut self, params: &DVector<f64>) -> Result<(), CameraModelError> {
        let mut updated = KannalaBrandtModel::new(params)?;
        updated.resolution = self.resolution.clone();
        *self = updated;
        Ok(())
    }

    fn model_name(&self) -> &'static str {
        "kannala_brandt"
    }

    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let (params, resolution) = read_camera_yaml(path, Self::NUM_PARAMS)?;
        let mut model = KannalaBrandtModel::new(&DVector::from_vec(params))?;
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

        if self.distortions.iter().any(|k| !k.is_finite()) {
            return Err(CameraModelError::InvalidParams(
                "distortion coefficients must be finite".to_string(),
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
        self.distortions.to_vec()
    }
}
