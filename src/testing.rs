//! Deterministic stand-ins for the collaborators a controller talks to.

use crate::animation::{AnimationClip, Keyframe, Track, TrackProperty};
use crate::asset::{
    Allocation, CharacterAsset, Geometry, GpuContext, GpuError, Material, Mesh, Node, ResourceId,
    Texture, Transform,
};
use crate::input::{InputHost, Listener};
use crate::loader::{CharacterLoader, LoadReporter};
use crate::progress::LoadingSink;
use crate::scene::{Camera, Scene};
use crate::surface::{RenderBackend, SurfaceError, SurfaceProvider, SurfaceRequest};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

/// Counts live allocations. `fail_after(n)` makes allocation `n + 1` onwards fail.
#[derive(Debug, Default)]
pub struct FakeGpu {
    next_id: u64,
    live: BTreeSet<ResourceId>,
    released: usize,
    fail_after: Option<usize>,
    allocated: usize,
}

impl FakeGpu {
    pub fn live(&self) -> usize {
        self.live.len()
    }

    pub fn released(&self) -> usize {
        self.released
    }

    pub fn fail_after(&mut self, successful: usize) {
        self.fail_after = Some(successful);
    }
}

impl GpuContext for FakeGpu {
    fn allocate(&mut self, _request: Allocation<'_>) -> Result<ResourceId, GpuError> {
        if self.fail_after.is_some_and(|limit| self.allocated >= limit) {
            return Err(GpuError::OutOfMemory);
        }
        self.allocated += 1;
        self.next_id += 1;
        let id = ResourceId(self.next_id);
        self.live.insert(id);
        Ok(id)
    }

    fn release(&mut self, id: ResourceId) {
        assert!(self.live.remove(&id), "double release of {id:?}");
        self.released += 1;
    }
}

/// What a [`FakeBackend`] saw, shared with the test after the controller
/// takes ownership of the backend.
#[derive(Debug, Default)]
pub struct BackendLog {
    pub gpu: FakeGpu,
    pub journal: Vec<String>,
    pub renders: usize,
    pub attached: bool,
    pub disposals: usize,
    pub context_losses: usize,
    pub size: (u32, u32),
}

#[derive(Clone, Debug)]
pub struct FakeBackend {
    pub log: Rc<RefCell<BackendLog>>,
}

impl FakeBackend {
    pub fn new(log: Rc<RefCell<BackendLog>>) -> Self {
        log.borrow_mut().attached = true;
        Self { log }
    }
}

impl GpuContext for FakeBackend {
    fn allocate(&mut self, request: Allocation<'_>) -> Result<ResourceId, GpuError> {
        self.log.borrow_mut().gpu.allocate(request)
    }

    fn release(&mut self, id: ResourceId) {
        let mut log = self.log.borrow_mut();
        log.gpu.release(id);
        log.journal.push(format!("release {}", id.0));
    }
}

impl RenderBackend for FakeBackend {
    fn resize(&mut self, width: u32, height: u32) {
        self.log.borrow_mut().size = (width, height);
    }

    fn render(&mut self, _scene: &Scene, _camera: &Camera) {
        let mut log = self.log.borrow_mut();
        log.renders += 1;
        log.journal.push("render".to_string());
    }

    fn output_attached(&self) -> bool {
        self.log.borrow().attached
    }

    fn detach_output(&mut self) {
        let mut log = self.log.borrow_mut();
        log.attached = false;
        log.journal.push("detach".to_string());
    }

    fn dispose(&mut self) {
        let mut log = self.log.borrow_mut();
        log.disposals += 1;
        log.journal.push("dispose backend".to_string());
    }

    fn force_context_loss(&mut self) -> bool {
        let mut log = self.log.borrow_mut();
        log.context_losses += 1;
        log.journal.push("lose context".to_string());
        true
    }
}

/// Hands out [`FakeBackend`]s sharing one log; `fail` makes creation error.
#[derive(Clone, Debug, Default)]
pub struct FakeSurfaces {
    pub log: Rc<RefCell<BackendLog>>,
    pub created: Rc<RefCell<usize>>,
    pub fail: Rc<RefCell<bool>>,
}

impl SurfaceProvider<FakeBackend> for FakeSurfaces {
    fn create(&mut self, request: &SurfaceRequest) -> Result<FakeBackend, SurfaceError> {
        if *self.fail.borrow() {
            return Err(SurfaceError::NoAdapter);
        }
        *self.created.borrow_mut() += 1;
        let backend = FakeBackend::new(self.log.clone());
        backend.log.borrow_mut().size = request.physical_size();
        Ok(backend)
    }
}

#[derive(Clone, Debug, Default)]
pub struct RecordingInput {
    attached: Rc<RefCell<Vec<Listener>>>,
    detaches: Rc<RefCell<usize>>,
}

impl RecordingInput {
    pub fn attached(&self) -> Vec<Listener> {
        self.attached.borrow().clone()
    }

    pub fn detach_calls(&self) -> usize {
        *self.detaches.borrow()
    }
}

impl InputHost for RecordingInput {
    fn attach(&mut self, listener: Listener) {
        self.attached.borrow_mut().push(listener);
    }

    fn detach(&mut self, listener: Listener) {
        self.attached.borrow_mut().retain(|l| *l != listener);
        *self.detaches.borrow_mut() += 1;
    }
}

#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    history: Rc<RefCell<Vec<u8>>>,
}

impl RecordingSink {
    pub fn history(&self) -> Vec<u8> {
        self.history.borrow().clone()
    }

    pub fn last(&self) -> Option<u8> {
        self.history.borrow().last().copied()
    }
}

impl LoadingSink for RecordingSink {
    fn set_loading(&mut self, percent: u8) {
        self.history.borrow_mut().push(percent);
    }
}

/// Never loads anything by itself; tests drive the captured reporters.
#[derive(Clone, Debug, Default)]
pub struct ManualLoader {
    reporters: Rc<RefCell<Vec<LoadReporter>>>,
}

impl ManualLoader {
    pub fn started(&self) -> usize {
        self.reporters.borrow().len()
    }

    pub fn reporter(&self, index: usize) -> LoadReporter {
        self.reporters.borrow()[index].clone()
    }
}

impl CharacterLoader for ManualLoader {
    fn start(&mut self, reporter: LoadReporter) {
        self.reporters.borrow_mut().push(reporter);
    }
}

fn cube_mesh(materials: Vec<Material>) -> Mesh {
    Mesh {
        geometry: Geometry::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![0, 1, 2],
        ),
        materials,
    }
}

fn textured(name: &str, color: [f32; 4]) -> Material {
    let mut material = Material::new(name, color);
    material.maps.push(Texture::solid(2, 2, [200, 180, 160, 255]));
    material
}

fn clip(name: &str, target: &str, property: TrackProperty, values: [f32; 2]) -> AnimationClip {
    AnimationClip {
        name: name.to_string(),
        duration: 1.0,
        tracks: vec![Track {
            target: target.to_string(),
            property,
            keyframes: vec![
                Keyframe {
                    time: 0.0,
                    value: values[0],
                },
                Keyframe {
                    time: 1.0,
                    value: values[1],
                },
            ],
        }],
    }
}

/// A small rig with the named parts a real character exports: a spine chain
/// ending in the head bone, a multi-material body and the emissive screen.
pub fn sample_character() -> CharacterAsset {
    let mut screen = Material::new("screen", [0.2, 0.6, 1.0, 1.0]);
    screen.emissive_intensity = 0.2;
    let spine = Node::bone(
        "spine",
        Transform::at(0.0, 8.0, 0.0),
        vec![Node::bone(
            "spine004",
            Transform::at(0.0, 2.0, 0.0),
            vec![Node::bone(
                "spine006",
                Transform::at(0.0, 1.5, 0.0),
                vec![Node::bone("eyelid", Transform::default(), Vec::new())],
            )],
        )],
    );
    let root = Node::group(
        "character",
        Transform::default(),
        vec![
            Node::mesh(
                "body",
                Transform::default(),
                cube_mesh(vec![
                    textured("shirt", [0.9, 0.9, 0.9, 1.0]),
                    textured("skin", [0.8, 0.6, 0.5, 1.0]),
                ]),
            ),
            spine,
            Node::bone(
                "hand",
                Transform::at(0.5, 9.0, 1.0),
                Vec::new(),
            ),
            Node::mesh(
                "screenlight",
                Transform::at(0.0, 10.5, 2.0),
                cube_mesh(vec![screen]),
            ),
        ],
    );
    CharacterAsset {
        root,
        clips: vec![
            clip("introAnimation", "screenlight", TrackProperty::Opacity, [0.0, 1.0]),
            clip("typing", "hand", TrackProperty::RotationZ, [0.0, 0.3]),
            clip("blink", "eyelid", TrackProperty::RotationX, [0.0, 0.5]),
            clip("browup", "eyelid", TrackProperty::RotationY, [0.0, 0.1]),
        ],
    }
}
