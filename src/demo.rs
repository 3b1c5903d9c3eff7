//! A stand-in character built from boxes, "downloaded" in chunks on a worker
//! thread natively and on the browser's task queue on the web.

use crate::animation::{AnimationClip, Keyframe, Track, TrackProperty};
use crate::asset::{CharacterAsset, Geometry, Material, Mesh, Node, Texture, Transform};
use crate::config::{env_flag_enabled, env_millis};
use crate::loader::{CharacterLoader, LoadError, LoadReporter};
#[cfg(not(target_arch = "wasm32"))]
use std::thread;
use std::time::Duration;

const CHUNKS: u64 = 12;

const CUBE_VERTICES: [[f32; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
];

#[rustfmt::skip]
const CUBE_INDICES: [u32; 36] = [
    0, 1, 3, 3, 1, 2,
    1, 5, 2, 2, 5, 6,
    5, 4, 6, 6, 4, 7,
    4, 0, 7, 7, 0, 3,
    3, 2, 7, 7, 2, 6,
    4, 5, 0, 0, 5, 1,
];

fn cuboid(half: [f32; 3]) -> Geometry {
    let positions = CUBE_VERTICES
        .iter()
        .map(|v| [v[0] * half[0], v[1] * half[1], v[2] * half[2]])
        .collect();
    Geometry::new(positions, CUBE_INDICES.to_vec())
}

fn block(name: &str, at: Transform, half: [f32; 3], materials: Vec<Material>) -> Node {
    Node::mesh(
        name,
        at,
        Mesh {
            geometry: cuboid(half),
            materials,
        },
    )
}

fn keyframes(values: &[(f32, f32)]) -> Vec<Keyframe> {
    values
        .iter()
        .map(|&(time, value)| Keyframe { time, value })
        .collect()
}

fn single_track_clip(
    name: &str,
    duration: f32,
    target: &str,
    property: TrackProperty,
    values: &[(f32, f32)],
) -> AnimationClip {
    AnimationClip {
        name: name.to_string(),
        duration,
        tracks: vec![Track {
            target: target.to_string(),
            property,
            keyframes: keyframes(values),
        }],
    }
}

/// Someone at a desk: torso, a spine chain ending in the head, a typing hand
/// and a monitor whose screen is the emissive light source.
pub fn build_character() -> CharacterAsset {
    let mut shirt = Material::new("shirt", [0.85, 0.85, 0.9, 1.0]);
    shirt.maps.push(Texture::solid(8, 8, [215, 215, 230, 255]));
    let trousers = Material::new("trousers", [0.2, 0.22, 0.3, 1.0]);
    let mut skin = Material::new("skin", [0.87, 0.68, 0.55, 1.0]);
    skin.maps.push(Texture::solid(8, 8, [222, 173, 140, 255]));
    let mut screen = Material::new("screen", [0.35, 0.75, 1.0, 1.0]);
    screen.opacity = 0.0;
    screen.emissive_intensity = 0.0;

    let head = block(
        "head",
        Transform::at(0.0, 0.9, 0.0),
        [0.45, 0.55, 0.45],
        vec![Material::new("skin", [0.87, 0.68, 0.55, 1.0])],
    );
    let spine = Node::bone(
        "spine",
        Transform::at(0.0, 8.2, 0.0),
        vec![Node::bone(
            "spine004",
            Transform::at(0.0, 1.6, 0.0),
            vec![Node::bone("spine006", Transform::at(0.0, 1.2, 0.0), vec![head])],
        )],
    );

    let root = Node::group(
        "character",
        Transform::default(),
        vec![
            block(
                "body",
                Transform::at(0.0, 9.0, 0.0),
                [1.0, 1.4, 0.6],
                vec![shirt, trousers],
            ),
            spine,
            Node::bone(
                "hand",
                Transform::at(0.7, 8.4, 1.2),
                vec![block(
                    "fingers",
                    Transform::default(),
                    [0.2, 0.1, 0.3],
                    vec![skin],
                )],
            ),
            block(
                "desk",
                Transform::at(0.0, 7.6, 2.2),
                [2.4, 0.1, 1.0],
                vec![Material::new("wood", [0.45, 0.3, 0.2, 1.0])],
            ),
            block(
                "screenlight",
                Transform::at(0.0, 9.6, 2.8),
                [0.9, 0.55, 0.05],
                vec![screen],
            ),
        ],
    );

    let clips = vec![
        AnimationClip {
            name: "introAnimation".to_string(),
            duration: 1.5,
            tracks: vec![
                Track {
                    target: "screenlight".to_string(),
                    property: TrackProperty::Opacity,
                    keyframes: keyframes(&[(0.0, 0.0), (1.0, 1.0)]),
                },
                Track {
                    target: "screenlight".to_string(),
                    property: TrackProperty::EmissiveIntensity,
                    keyframes: keyframes(&[(0.0, 0.0), (1.5, 0.35)]),
                },
            ],
        },
        single_track_clip(
            "typing",
            0.4,
            "hand",
            TrackProperty::RotationZ,
            &[(0.0, 0.0), (0.2, 0.15), (0.4, 0.0)],
        ),
        single_track_clip(
            "blink",
            3.0,
            "head",
            TrackProperty::RotationZ,
            &[(0.0, 0.0), (2.8, 0.0), (2.9, 0.03), (3.0, 0.0)],
        ),
        single_track_clip(
            "browup",
            0.6,
            "head",
            TrackProperty::RotationX,
            &[(0.0, 0.0), (0.3, -0.08), (0.6, 0.0)],
        ),
    ];
    CharacterAsset { root, clips }
}

fn payload_bytes(asset: &CharacterAsset) -> u64 {
    let mut bytes = 0u64;
    asset.root.walk(&mut |node| {
        if let Some(mesh) = node.as_mesh() {
            bytes += (mesh.geometry.positions.len() * 12 + mesh.geometry.indices.len() * 4) as u64;
            for material in &mesh.materials {
                bytes += material.maps.iter().map(|map| map.rgba.len() as u64).sum::<u64>();
            }
        }
    });
    bytes
}

/// Reports chunk `chunk` of the transfer. False once the attempt is over.
fn deliver_chunk(reporter: &LoadReporter, chunk: u64, total: u64, fail: bool) -> bool {
    if fail && chunk == CHUNKS / 2 {
        reporter.finish(Err(LoadError::Fetch(
            "connection closed mid-transfer".to_string(),
        )));
        return false;
    }
    if !reporter.progress(total * chunk / CHUNKS, total) {
        log::debug!("load attempt {} no longer listened to", reporter.attempt());
        return false;
    }
    true
}

/// Resolves after `delay` on the page's timer queue.
#[cfg(target_arch = "wasm32")]
async fn pause(delay: Duration) {
    use wasm_bindgen_futures::js_sys::{Function, Promise};

    let promise = Promise::new(&mut |resolve: Function, _reject: Function| {
        let scheduled = web_sys::window().map(|window| {
            window.set_timeout_with_callback_and_timeout_and_arguments_0(
                &resolve,
                i32::try_from(delay.as_millis()).unwrap_or(i32::MAX),
            )
        });
        if !matches!(scheduled, Some(Ok(_))) {
            if let Err(error) = resolve.call0(&wasm_bindgen::JsValue::NULL) {
                log::warn!("could not resume loader: {error:?}");
            }
        }
    });
    if let Err(error) = wasm_bindgen_futures::JsFuture::from(promise).await {
        log::warn!("loader timer rejected: {error:?}");
    }
}

/// Builds [`build_character`] off the caller's stack, reporting progress in
/// chunks spaced `chunk_delay` apart.
#[derive(Debug)]
pub struct ProceduralCharacterLoader {
    pub chunk_delay: Duration,
    /// Fail this many attempts before succeeding, to exercise retry.
    pub failures_remaining: u32,
    #[cfg(not(target_arch = "wasm32"))]
    workers: Vec<thread::JoinHandle<()>>,
}

impl ProceduralCharacterLoader {
    pub fn new(chunk_delay: Duration) -> Self {
        Self {
            chunk_delay,
            failures_remaining: 0,
            #[cfg(not(target_arch = "wasm32"))]
            workers: Vec::new(),
        }
    }

    /// `CHARACTER_SCENE_DEMO_CHUNK_MS` sets the chunk delay;
    /// `CHARACTER_SCENE_DEMO_FAIL_FIRST` makes the first attempt fail.
    pub fn from_env() -> Self {
        let mut loader = Self::new(
            env_millis("CHARACTER_SCENE_DEMO_CHUNK_MS").unwrap_or(Duration::from_millis(150)),
        );
        if env_flag_enabled("CHARACTER_SCENE_DEMO_FAIL_FIRST") {
            loader.failures_remaining = 1;
        }
        loader
    }

    /// Waits for every worker started so far.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn join(&mut self) {
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("character loader worker panicked");
            }
        }
    }
}

impl CharacterLoader for ProceduralCharacterLoader {
    fn start(&mut self, reporter: LoadReporter) {
        let delay = self.chunk_delay;
        let fail = self.failures_remaining > 0;
        self.failures_remaining = self.failures_remaining.saturating_sub(1);

        cfg_if::cfg_if! {
            if #[cfg(target_arch = "wasm32")] {
                wasm_bindgen_futures::spawn_local(async move {
                    let asset = build_character();
                    let total = payload_bytes(&asset);
                    for chunk in 1..=CHUNKS {
                        pause(delay).await;
                        if !deliver_chunk(&reporter, chunk, total, fail) {
                            return;
                        }
                    }
                    reporter.finish(Ok(asset));
                });
            } else {
                self.workers.retain(|worker| !worker.is_finished());
                self.workers.push(thread::spawn(move || {
                    let asset = build_character();
                    let total = payload_bytes(&asset);
                    for chunk in 1..=CHUNKS {
                        thread::sleep(delay);
                        if !deliver_chunk(&reporter, chunk, total, fail) {
                            return;
                        }
                    }
                    reporter.finish(Ok(asset));
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SceneConfig;
    use crate::loader::{LoadOrchestrator, LoadOutcome};
    use crate::timers::TimerQueue;
    use web_time::Instant;

    #[test]
    fn demo_character_has_every_named_part() {
        let asset = build_character();
        let config = SceneConfig::with_defaults();
        assert!(asset.root.find_path(&config.head_bone).is_some());
        assert!(asset.root.find_path(&config.screen_light).is_some());
        for clip in config.idle_clips.iter().chain([&config.intro_clip]) {
            assert!(asset.clips.iter().any(|c| &c.name == clip), "missing {clip}");
        }
        assert!(payload_bytes(&asset) > 0);
    }

    fn run_attempt(loader: &mut ProceduralCharacterLoader) -> Vec<LoadOutcome> {
        let mut orchestrator = LoadOrchestrator::new();
        let mut timers = TimerQueue::new();
        orchestrator.begin(loader, &mut timers, &SceneConfig::with_defaults(), Instant::now());
        loader.join();
        orchestrator
            .drain()
            .into_iter()
            .filter_map(|event| orchestrator.accept(event, &mut timers))
            .collect()
    }

    #[test]
    fn worker_reports_progress_then_resolves() {
        let mut loader = ProceduralCharacterLoader::new(Duration::ZERO);
        let outcomes = run_attempt(&mut loader);
        let progress = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, LoadOutcome::Progress(_)))
            .count();
        assert!(progress > 1);
        assert!(matches!(outcomes.last(), Some(LoadOutcome::Loaded(_))));
    }

    #[test]
    fn scripted_failure_only_hits_the_first_attempt() {
        let mut loader = ProceduralCharacterLoader::new(Duration::ZERO);
        loader.failures_remaining = 1;
        assert!(matches!(
            run_attempt(&mut loader).last(),
            Some(LoadOutcome::Failed(_))
        ));
        assert!(matches!(
            run_attempt(&mut loader).last(),
            Some(LoadOutcome::Loaded(_))
        ));
    }
}
