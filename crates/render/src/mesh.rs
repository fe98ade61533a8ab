use crate::material::MaterialHandle;
use dusk_util::handle::SharedHandle;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard};

/// Process-unique mesh identifier. Stable across the thread boundary: the
/// application refers to meshes by id in submit commands and the render
/// thread keys its GPU mirrors by the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(u64);

static NEXT_MESH_ID: AtomicU64 = AtomicU64::new(1);

impl MeshId {
    fn next() -> Self {
        MeshId(NEXT_MESH_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn size(self) -> usize {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    Points,
    Lines,
    Triangles,
    TriangleStrip,
}

/// One contiguous run of indices drawn with a single topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimitiveGroup {
    pub topology: PrimitiveTopology,
    pub start_index: usize,
    pub index_count: usize,
}

impl PrimitiveGroup {
    /// Approximate primitive count, used by the render monitor.
    pub fn primitives(&self) -> usize {
        match self.topology {
            PrimitiveTopology::Points => self.index_count,
            PrimitiveTopology::Lines => self.index_count / 2,
            PrimitiveTopology::Triangles => self.index_count / 3,
            PrimitiveTopology::TriangleStrip => self.index_count.saturating_sub(2),
        }
    }
}

/// Application-side mesh description.
///
/// The vertex buffer sits behind a lock because the application rewrites it
/// between frames while the render thread still holds a handle from the
/// previous commit. The render thread only reads the bytes that were copied
/// into an `UpdateBuffer` submit command, never through this lock, so the
/// lock is uncontended in steady state.
pub struct Mesh {
    id: MeshId,
    name: String,
    vertices: RwLock<Vec<u8>>,
    indices: Vec<u8>,
    index_type: IndexType,
    prim_groups: Vec<PrimitiveGroup>,
    material: Option<MaterialHandle>,
}

pub type MeshHandle = SharedHandle<Mesh>;

impl Mesh {
    pub fn new(
        name: &str,
        vertices: Vec<u8>,
        indices: Vec<u8>,
        index_type: IndexType,
        prim_groups: Vec<PrimitiveGroup>,
        material: Option<MaterialHandle>,
    ) -> MeshHandle {
        SharedHandle::new(Mesh {
            id: MeshId::next(),
            name: name.to_string(),
            vertices: RwLock::new(vertices),
            indices,
            index_type,
            prim_groups,
            material,
        })
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertices(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.vertices.read().unwrap()
    }

    /// Replaces the vertex bytes. The change reaches the GPU after the next
    /// `update_mesh` + `request_next_frame` round trip.
    pub fn write_vertices(&self, bytes: Vec<u8>) {
        *self.vertices.write().unwrap() = bytes;
    }

    pub fn indices(&self) -> &[u8] {
        &self.indices
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub fn prim_groups(&self) -> &[PrimitiveGroup] {
        &self.prim_groups
    }

    pub fn material(&self) -> Option<&MaterialHandle> {
        self.material.as_ref()
    }
}

impl fmt::Debug for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mesh")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
