use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::{DMat4, DVec3};
use parking_lot::{Mutex, MutexGuard};

use crate::node::{TransformNode, VolumeNode};

/// Flat voxel buffer with grid metadata, `i` fastest then `j` then `k`.
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeData {
    dims: [usize; 3],
    components: usize,
    scalars: Vec<f64>,
}

impl VolumeData {
    pub fn new(dims: [usize; 3], components: usize) -> Self {
        let len = dims[0] * dims[1] * dims[2] * components;
        Self {
            dims,
            components,
            scalars: vec![0.0; len],
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn components(&self) -> usize {
        self.components
    }

    pub fn voxel_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    fn offset(&self, i: usize, j: usize, k: usize, component: usize) -> Option<usize> {
        if i >= self.dims[0] || j >= self.dims[1] || k >= self.dims[2] {
            return None;
        }
        if component >= self.components {
            return None;
        }
        Some(((k * self.dims[1] + j) * self.dims[0] + i) * self.components + component)
    }

    pub fn get(&self, i: usize, j: usize, k: usize, component: usize) -> Option<f64> {
        let offset = self.offset(i, j, k, component)?;
        Some(self.scalars[offset])
    }

    /// Returns false when the indices are out of range.
    pub fn set(&mut self, i: usize, j: usize, k: usize, component: usize, value: f64) -> bool {
        match self.offset(i, j, k, component) {
            Some(offset) => {
                self.scalars[offset] = value;
                true
            }
            None => false,
        }
    }

    /// Writes all three components of a vector voxel.
    pub fn set_vector(&mut self, i: usize, j: usize, k: usize, value: DVec3) -> bool {
        if self.components < 3 {
            return false;
        }
        self.set(i, j, k, 0, value.x) && self.set(i, j, k, 1, value.y) && self.set(i, j, k, 2, value.z)
    }

    pub fn scalars(&self) -> &[f64] {
        &self.scalars
    }
}

/// In-memory volume node: a voxel grid positioned in world space through its
/// IJK to RAS matrix and an optional parent transform.
pub struct Volume {
    name: String,
    ijk_to_ras: DMat4,
    parent: Mutex<Option<Arc<dyn TransformNode>>>,
    data: Mutex<VolumeData>,
    modified: AtomicU64,
}

impl Volume {
    pub fn new(
        name: impl Into<String>,
        dims: [usize; 3],
        components: usize,
        ijk_to_ras: DMat4,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            ijk_to_ras,
            parent: Mutex::new(None),
            data: Mutex::new(VolumeData::new(dims, components)),
            modified: AtomicU64::new(0),
        })
    }

    /// 3-component f64 grid at `origin` with isotropic `spacing`, the shape
    /// produced by the export driver.
    pub fn vector_field(
        name: impl Into<String>,
        dims: [usize; 3],
        origin: DVec3,
        spacing: f64,
    ) -> Arc<Self> {
        let ijk_to_ras = DMat4::from_translation(origin) * DMat4::from_scale(DVec3::splat(spacing));
        Self::new(name, dims, 3, ijk_to_ras)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_parent(&self, parent: Option<Arc<dyn TransformNode>>) {
        *self.parent.lock() = parent;
    }

    pub fn data(&self) -> MutexGuard<'_, VolumeData> {
        self.data.lock()
    }

    pub fn origin(&self) -> DVec3 {
        self.ijk_to_ras.w_axis.truncate()
    }

    pub fn spacing(&self) -> DVec3 {
        DVec3::new(
            self.ijk_to_ras.x_axis.truncate().length(),
            self.ijk_to_ras.y_axis.truncate().length(),
            self.ijk_to_ras.z_axis.truncate().length(),
        )
    }

    pub fn modified_count(&self) -> u64 {
        self.modified.load(Ordering::Relaxed)
    }
}

impl VolumeNode for Volume {
    fn ijk_to_ras(&self) -> DMat4 {
        self.ijk_to_ras
    }

    fn parent(&self) -> Option<Arc<dyn TransformNode>> {
        self.parent.lock().clone()
    }

    fn set_scalar(&self, i: i32, j: i32, k: i32, component: usize, value: f64) {
        if i < 0 || j < 0 || k < 0 {
            return;
        }
        self.data
            .lock()
            .set(i as usize, j as usize, k as usize, component, value);
    }

    fn mark_modified(&self) {
        self.modified.fetch_add(1, Ordering::Relaxed);
    }
}
