//! Reprojection residual for a single landmark observation.
//!
//! The residual depends on three parameter blocks:
//!
//! 1. `T_kw`, the world-to-keyframe pose of the frame the observation belongs to,
//! 2. `T_ck`, the keyframe-to-camera pose of the observing camera,
//! 3. the intrinsic vector of the camera model `M`.
//!
//! The landmark is pushed through both poses, projected with
//! [`Projection::project_with_params`] and compared against the observed pixel.

use std::fmt;
use std::marker::PhantomData;

use nalgebra::{DVector, DVectorView, Isometry3, RealField, Vector2, Vector3};
use tiny_solver::factors::Factor;

use crate::camera::Projection;
use crate::geometry::{isometry_to_params, transform_point};

/// Number of scalar rows produced by one [`ReprojectionCost`].
pub const REPROJECTION_RESIDUAL_SIZE: usize = 2;

/// `project(T_ck * T_kw * landmark) - pixel`
pub struct ReprojectionCost<M> {
    landmark: Vector3<f64>,
    pixel: Vector2<f64>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Projection> ReprojectionCost<M> {
    pub fn new(landmark: Vector3<f64>, pixel: Vector2<f64>) -> Self {
        Self {
            landmark,
            pixel,
            _model: PhantomData,
        }
    }

    pub fn landmark(&self) -> &Vector3<f64> {
        &self.landmark
    }

    pub fn pixel(&self) -> &Vector2<f64> {
        &self.pixel
    }

    /// The residual as a function of the three raw parameter blocks.
    pub fn residual<T: RealField>(
        &self,
        t_kw: DVectorView<'_, T>,
        t_ck: DVectorView<'_, T>,
        intrinsics: DVectorView<'_, T>,
    ) -> Vector2<T> {
        let landmark = Vector3::new(
            T::from_f64(self.landmark.x).unwrap(),
            T::from_f64(self.landmark.y).unwrap(),
            T::from_f64(self.landmark.z).unwrap(),
        );
        let point_k = transform_point(t_kw, &landmark);
        let point_c = transform_point(t_ck, &point_k);
        let predicted = M::project_with_params(intrinsics, &point_c);

        Vector2::new(
            predicted.x.clone() - T::from_f64(self.pixel.x).unwrap(),
            predicted.y.clone() - T::from_f64(self.pixel.y).unwrap(),
        )
    }

    /// Plain `f64` evaluation from rigid transforms and an intrinsic vector.
    pub fn evaluate(
        &self,
        t_kw: &Isometry3<f64>,
        t_ck: &Isometry3<f64>,
        intrinsics: &DVector<f64>,
    ) -> Vector2<f64> {
        self.residual(
            isometry_to_params(t_kw).as_view(),
            isometry_to_params(t_ck).as_view(),
            intrinsics.as_view(),
        )
    }
}

impl<M> Clone for ReprojectionCost<M> {
    fn clone(&self) -> Self {
        Self {
            landmark: self.landmark,
            pixel: self.pixel,
            _model: PhantomData,
        }
    }
}

impl<M> fmt::Debug for ReprojectionCost<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReprojectionCost")
            .field("landmark", &self.landmark)
            .field("pixel", &self.pixel)
            .finish()
    }
}

impl<M: Projection, T: RealField> Factor<T> for ReprojectionCost<M> {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(params.len(), 3, "expected [T_kw, T_ck, intrinsics] parameter blocks");
        let r = self.residual(params[0].as_view(), params[1].as_view(), params[2].as_view());
        DVector::from_row_slice(r.as_slice())
    }
}
