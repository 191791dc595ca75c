//! SE(3) local parameterization for 7-parameter pose blocks.
//!
//! The optimizer works in a 6-dimensional tangent space `[rho, phi]`
//! (translation part first, rotation part second) and retracts back onto the
//! pose with a right perturbation, `x (+) delta = x * Exp(delta)`.

use std::num::NonZero;

use nalgebra::{
    DVector, DVectorView, Matrix3, Quaternion, RealField, SMatrix, UnitQuaternion, Vector3,
};
use tiny_solver::manifold::{AutoDiffManifold, Manifold};

use crate::geometry::{pose_rotation, pose_translation, skew, POSE_PARAMS, POSE_TANGENT};

const SMALL_ANGLE: f64 = 1e-6;

const TANGENT_SIZE: NonZero<usize> = match NonZero::new(POSE_TANGENT) {
    Some(size) => size,
    None => panic!("pose tangent size must be non-zero"),
};

#[derive(Debug, Clone, Copy, Default)]
pub struct PoseManifold;

impl PoseManifold {
    /// `d plus(x, delta) / d delta` evaluated at `delta = 0`, a 7x6 matrix.
    pub fn plus_jacobian(x: DVectorView<'_, f64>) -> SMatrix<f64, POSE_PARAMS, POSE_TANGENT> {
        let (qx, qy, qz, qw) = (x[0], x[1], x[2], x[3]);
        let rotation = pose_rotation(x).to_rotation_matrix().into_inner();

        let mut jacobian = SMatrix::<f64, POSE_PARAMS, POSE_TANGENT>::zeros();
        #[rustfmt::skip]
        let d_quaternion = SMatrix::<f64, 4, 3>::new(
             qw, -qz,  qy,
             qz,  qw, -qx,
            -qy,  qx,  qw,
            -qx, -qy, -qz,
        ) * 0.5;
        jacobian.fixed_view_mut::<4, 3>(0, 3).copy_from(&d_quaternion);
        jacobian.fixed_view_mut::<3, 3>(4, 0).copy_from(&rotation);
        jacobian
    }
}

/// SO(3) exponential together with the left Jacobian `V` used by the SE(3) exponential.
fn so3_exp_with_v<T: RealField>(phi: &Vector3<T>) -> (UnitQuaternion<T>, Matrix3<T>) {
    let theta2 = phi.norm_squared();
    let k = skew(phi);
    let k2 = &k * &k;

    let (q, a, b) = if theta2 < T::from_f64(SMALL_ANGLE * SMALL_ANGLE).unwrap() {
        let q = Quaternion::from_parts(
            T::one() - theta2.clone() / T::from_f64(8.0).unwrap(),
            phi * (T::from_f64(0.5).unwrap() - theta2.clone() / T::from_f64(48.0).unwrap()),
        );
        let a = T::from_f64(0.5).unwrap() - theta2.clone() / T::from_f64(24.0).unwrap();
        let b = T::from_f64(1.0 / 6.0).unwrap() - theta2 / T::from_f64(120.0).unwrap();
        (q, a, b)
    } else {
        let theta = theta2.clone().sqrt();
        let half = theta.clone() / T::from_f64(2.0).unwrap();
        let (sin_half, cos_half) = half.sin_cos();
        let (sin_t, cos_t) = theta.clone().sin_cos();
        let q = Quaternion::from_parts(cos_half, phi * (sin_half / theta.clone()));
        let a = (T::one() - cos_t) / theta2.clone();
        let b = (theta.clone() - sin_t) / (theta2 * theta);
        (q, a, b)
    };

    let v = Matrix3::identity() + k * a + k2 * b;
    (UnitQuaternion::new_unchecked(q), v)
}

/// SO(3) logarithm together with `V^-1`.
fn so3_log_with_v_inv<T: RealField>(rotation: &UnitQuaternion<T>) -> (Vector3<T>, Matrix3<T>) {
    let mut q = rotation.quaternion().clone();
    if q.w < T::zero() {
        q = -q;
    }
    let vec = q.imag();
    let n2 = vec.norm_squared();

    let (phi, c) = if n2 < T::from_f64(SMALL_ANGLE * SMALL_ANGLE).unwrap() {
        let phi = vec * (T::from_f64(2.0).unwrap() / q.w.clone());
        (phi, T::from_f64(1.0 / 12.0).unwrap())
    } else {
        let n = n2.sqrt();
        let theta = T::from_f64(2.0).unwrap() * n.clone().atan2(q.w.clone());
        let phi = vec * (theta.clone() / n);
        let (sin_t, cos_t) = theta.clone().sin_cos();
        let theta2 = theta.clone() * theta.clone();
        let c = (T::one()
            - theta * sin_t / (T::from_f64(2.0).unwrap() * (T::one() - cos_t)))
            / theta2;
        (phi, c)
    };

    let k = skew(&phi);
    let k2 = &k * &k;
    let v_inv = Matrix3::identity() - k * T::from_f64(0.5).unwrap() + k2 * c;
    (phi, v_inv)
}

fn pose_to_dvector<T: RealField>(rotation: &UnitQuaternion<T>, translation: &Vector3<T>) -> DVector<T> {
    let q = rotation.quaternion();
    DVector::from_vec(vec![
        q.i.clone(),
        q.j.clone(),
        q.k.clone(),
        q.w.clone(),
        translation.x.clone(),
        translation.y.clone(),
        translation.z.clone(),
    ])
}

impl<T: RealField> AutoDiffManifold<T> for PoseManifold {
    fn plus(&self, x: DVectorView<T>, delta: DVectorView<T>) -> DVector<T> {
        debug_assert_eq!(x.len(), POSE_PARAMS);
        debug_assert_eq!(delta.len(), POSE_TANGENT);

        let rho = Vector3::new(delta[0].clone(), delta[1].clone(), delta[2].clone());
        let phi = Vector3::new(delta[3].clone(), delta[4].clone(), delta[5].clone());
        let (q_delta, v) = so3_exp_with_v(&phi);

        let r_x = pose_rotation(x.clone());
        let t_x = pose_translation(x);

        let rotation = UnitQuaternion::new_normalize((r_x.clone() * q_delta).into_inner());
        let translation = r_x.transform_vector(&(v * rho)) + t_x;
        pose_to_dvector(&rotation, &translation)
    }

    fn minus(&self, y: DVectorView<T>, x: DVectorView<T>) -> DVector<T> {
        debug_assert_eq!(x.len(), POSE_PARAMS);
        debug_assert_eq!(y.len(), POSE_PARAMS);

        let r_x = pose_rotation(x.clone());
        let r_y = pose_rotation(y.clone());
        let r_rel = r_x.inverse() * r_y;
        let t_rel = r_x.inverse_transform_vector(&(pose_translation(y) - pose_translation(x)));

        let (phi, v_inv) = so3_log_with_v_inv(&r_rel);
        let rho = v_inv * t_rel;

        DVector::from_vec(vec![
            rho.x.clone(),
            rho.y.clone(),
            rho.z.clone(),
            phi.x.clone(),
            phi.y.clone(),
            phi.z.clone(),
        ])
    }
}

impl Manifold for PoseManifold {
    fn tangent_size(&self) -> NonZero<usize> {
        TANGENT_SIZE
    }
}
