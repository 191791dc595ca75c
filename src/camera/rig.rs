//! A set of cameras rigidly mounted together.

use std::fmt;
use std::sync::Arc;

use nalgebra::Isometry3;

use crate::camera::CameraModel;

/// Shared, thread-safe handle to any camera model.
pub type SharedCamera = Arc<dyn CameraModel + Send + Sync>;

/// Ordered list of cameras and their camera-to-rig poses `T_rc`.
#[derive(Clone, Default)]
pub struct Rig {
    cameras: Vec<SharedCamera>,
    t_rc: Vec<Isometry3<f64>>,
}

impl Rig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a camera and returns its index in the rig.
    pub fn add_camera(&mut self, camera: SharedCamera, t_rc: Isometry3<f64>) -> usize {
        self.cameras.push(camera);
        self.t_rc.push(t_rc);
        self.cameras.len() - 1
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn camera(&self, index: usize) -> Option<&SharedCamera> {
        self.cameras.get(index)
    }

    /// Camera-to-rig pose of camera `index`.
    pub fn pose(&self, index: usize) -> Option<&Isometry3<f64>> {
        self.t_rc.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SharedCamera, &Isometry3<f64>)> {
        self.cameras.iter().zip(self.t_rc.iter())
    }
}

impl fmt::Debug for Rig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.iter()
                    .map(|(camera, t_rc)| (camera.model_name(), camera.params(), t_rc)),
            )
            .finish()
    }
}
