//! The character object graph and the GPU resources hanging off it.
//!
//! Loaders hand over a CPU-side graph. GPU allocations are made later, on the
//! render thread, through a [`GpuContext`], and recorded in [`ResourceSlot`]s so
//! that disposal knows exactly what was acquired.

use crate::animation::AnimationClip;
use bytemuck::{Pod, Zeroable};
use cgmath::{Matrix4, Rad, Vector3};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

/// Holds a GPU allocation while one exists.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ResourceSlot(Option<ResourceId>);

impl ResourceSlot {
    pub fn empty() -> Self {
        Self(None)
    }

    pub fn is_allocated(&self) -> bool {
        self.0.is_some()
    }

    pub fn id(&self) -> Option<ResourceId> {
        self.0
    }

    pub(crate) fn fill(&mut self, id: ResourceId) {
        self.0 = Some(id);
    }

    fn release(&mut self, gpu: &mut dyn GpuContext) {
        if let Some(id) = self.0.take() {
            gpu.release(id);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GpuError {
    OutOfMemory,
    ContextLost,
    Rejected(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::ContextLost => write!(f, "graphics context lost"),
            Self::Rejected(reason) => write!(f, "allocation rejected: {reason}"),
        }
    }
}

impl std::error::Error for GpuError {}

#[repr(C)]
#[derive(Default, Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct MaterialParams {
    pub color: [f32; 4],
    pub emissive_intensity: f32,
    pub opacity: f32,
    pub _padding: [f32; 2],
}

pub enum Allocation<'a> {
    Geometry {
        label: &'a str,
        positions: &'a [[f32; 3]],
        indices: &'a [u32],
    },
    Texture {
        label: &'a str,
        width: u32,
        height: u32,
        rgba: &'a [u8],
    },
    Program {
        label: &'a str,
        params: MaterialParams,
    },
}

pub trait GpuContext {
    fn allocate(&mut self, request: Allocation<'_>) -> Result<ResourceId, GpuError>;
    fn release(&mut self, id: ResourceId);
}

/// Anything that owns GPU-side state. Disposal is idempotent.
pub trait Disposable {
    fn dispose(&mut self, gpu: &mut dyn GpuContext);
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vector3<f32>,
    /// Euler angles in radians.
    pub rotation: Vector3<f32>,
    pub scale: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vector3::new(0.0, 0.0, 0.0),
            rotation: Vector3::new(0.0, 0.0, 0.0),
            scale: 1.0,
        }
    }
}

impl Transform {
    pub fn at(x: f32, y: f32, z: f32) -> Self {
        Self {
            translation: Vector3::new(x, y, z),
            ..Default::default()
        }
    }

    /// Local-to-parent matrix: translate, then rotate Z·Y·X, then scale.
    pub fn matrix(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.translation)
            * Matrix4::from_angle_z(Rad(self.rotation.z))
            * Matrix4::from_angle_y(Rad(self.rotation.y))
            * Matrix4::from_angle_x(Rad(self.rotation.x))
            * Matrix4::from_scale(self.scale)
    }
}

#[derive(Debug)]
pub struct Geometry {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    pub gpu: ResourceSlot,
}

impl Geometry {
    pub fn new(positions: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        Self {
            positions,
            indices,
            gpu: ResourceSlot::empty(),
        }
    }
}

impl Disposable for Geometry {
    fn dispose(&mut self, gpu: &mut dyn GpuContext) {
        self.gpu.release(gpu);
    }
}

#[derive(Debug)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    pub gpu: ResourceSlot,
}

/// Bytes of tightly packed RGBA8 for a `width` x `height` image.
pub fn rgba_len(width: u32, height: u32) -> u64 {
    u64::from(width) * u64::from(height) * 4
}

impl Texture {
    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        let rgba = color
            .iter()
            .copied()
            .cycle()
            .take(rgba_len(width, height) as usize)
            .collect();
        Self {
            width,
            height,
            rgba,
            gpu: ResourceSlot::empty(),
        }
    }
}

impl Disposable for Texture {
    fn dispose(&mut self, gpu: &mut dyn GpuContext) {
        self.gpu.release(gpu);
    }
}

#[derive(Debug)]
pub struct Material {
    pub name: String,
    pub color: [f32; 4],
    pub opacity: f32,
    pub emissive_intensity: f32,
    pub maps: Vec<Texture>,
    pub program: ResourceSlot,
}

impl Material {
    pub fn new(name: &str, color: [f32; 4]) -> Self {
        Self {
            name: name.to_string(),
            color,
            opacity: 1.0,
            emissive_intensity: 0.0,
            maps: Vec::new(),
            program: ResourceSlot::empty(),
        }
    }

    pub fn params(&self) -> MaterialParams {
        MaterialParams {
            color: self.color,
            emissive_intensity: self.emissive_intensity,
            opacity: self.opacity,
            _padding: [0.0; 2],
        }
    }
}

impl Disposable for Material {
    fn dispose(&mut self, gpu: &mut dyn GpuContext) {
        for map in &mut self.maps {
            map.dispose(gpu);
        }
        self.program.release(gpu);
    }
}

#[derive(Debug)]
pub struct Mesh {
    pub geometry: Geometry,
    pub materials: Vec<Material>,
}

impl Disposable for Mesh {
    fn dispose(&mut self, gpu: &mut dyn GpuContext) {
        self.geometry.dispose(gpu);
        for material in &mut self.materials {
            material.dispose(gpu);
        }
    }
}

#[derive(Debug)]
pub enum NodeKind {
    Group,
    Bone,
    Mesh(Mesh),
}

/// Child indices from a root down to a node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodePath(pub Vec<usize>);

#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub transform: Transform,
    pub kind: NodeKind,
    pub children: Vec<Node>,
}

impl Node {
    pub fn group(name: &str, transform: Transform, children: Vec<Node>) -> Self {
        Self {
            name: name.to_string(),
            transform,
            kind: NodeKind::Group,
            children,
        }
    }

    pub fn bone(name: &str, transform: Transform, children: Vec<Node>) -> Self {
        Self {
            name: name.to_string(),
            transform,
            kind: NodeKind::Bone,
            children,
        }
    }

    pub fn mesh(name: &str, transform: Transform, mesh: Mesh) -> Self {
        Self {
            name: name.to_string(),
            transform,
            kind: NodeKind::Mesh(mesh),
            children: Vec::new(),
        }
    }

    pub fn as_mesh(&self) -> Option<&Mesh> {
        match &self.kind {
            NodeKind::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    pub fn as_mesh_mut(&mut self) -> Option<&mut Mesh> {
        match &mut self.kind {
            NodeKind::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    /// Depth-first, pre-order search; the first match wins.
    pub fn find_path(&self, name: &str) -> Option<NodePath> {
        if self.name == name {
            return Some(NodePath::default());
        }
        for (index, child) in self.children.iter().enumerate() {
            if let Some(NodePath(mut rest)) = child.find_path(name) {
                rest.insert(0, index);
                return Some(NodePath(rest));
            }
        }
        None
    }

    pub fn at_path(&self, path: &NodePath) -> Option<&Node> {
        path.0
            .iter()
            .try_fold(self, |node, &index| node.children.get(index))
    }

    pub fn at_path_mut(&mut self, path: &NodePath) -> Option<&mut Node> {
        let mut node = self;
        for &index in &path.0 {
            node = node.children.get_mut(index)?;
        }
        Some(node)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Node> {
        let path = self.find_path(name)?;
        self.at_path_mut(&path)
    }

    pub fn walk(&self, visit: &mut dyn FnMut(&Node)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Allocates every GPU resource the graph still lacks. On error, whatever
    /// was already allocated stays recorded so the caller can dispose it.
    pub fn upload(&mut self, gpu: &mut dyn GpuContext) -> Result<(), GpuError> {
        let name = self.name.clone();
        if let NodeKind::Mesh(mesh) = &mut self.kind {
            if !mesh.geometry.gpu.is_allocated() {
                let id = gpu.allocate(Allocation::Geometry {
                    label: &name,
                    positions: &mesh.geometry.positions,
                    indices: &mesh.geometry.indices,
                })?;
                mesh.geometry.gpu.fill(id);
            }
            for material in &mut mesh.materials {
                for map in &mut material.maps {
                    if !map.gpu.is_allocated() {
                        let id = gpu.allocate(Allocation::Texture {
                            label: &material.name,
                            width: map.width,
                            height: map.height,
                            rgba: &map.rgba,
                        })?;
                        map.gpu.fill(id);
                    }
                }
                if !material.program.is_allocated() {
                    let id = gpu.allocate(Allocation::Program {
                        label: &material.name,
                        params: material.params(),
                    })?;
                    material.program.fill(id);
                }
            }
        }
        for child in &mut self.children {
            child.upload(gpu)?;
        }
        Ok(())
    }

    pub fn allocated_resources(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |node| {
            if let Some(mesh) = node.as_mesh() {
                count += usize::from(mesh.geometry.gpu.is_allocated());
                for material in &mesh.materials {
                    count += usize::from(material.program.is_allocated());
                    count += material
                        .maps
                        .iter()
                        .filter(|map| map.gpu.is_allocated())
                        .count();
                }
            }
        });
        count
    }
}

impl Disposable for Node {
    fn dispose(&mut self, gpu: &mut dyn GpuContext) {
        if let NodeKind::Mesh(mesh) = &mut self.kind {
            mesh.dispose(gpu);
        }
        for child in &mut self.children {
            child.dispose(gpu);
        }
    }
}

/// What a loader resolves with: the object graph and its clips.
#[derive(Debug)]
pub struct CharacterAsset {
    pub root: Node,
    pub clips: Vec<AnimationClip>,
}
