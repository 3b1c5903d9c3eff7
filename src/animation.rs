use crate::asset::Node;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keyframe {
    pub time: f32,
    pub value: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackProperty {
    RotationX,
    RotationY,
    RotationZ,
    Opacity,
    EmissiveIntensity,
}

#[derive(Clone, Debug)]
pub struct Track {
    pub target: String,
    pub property: TrackProperty,
    pub keyframes: Vec<Keyframe>,
}

impl Track {
    /// Linear between keyframes, held at both ends.
    pub fn sample(&self, time: f32) -> Option<f32> {
        let first = self.keyframes.first()?;
        if time <= first.time {
            return Some(first.value);
        }
        for pair in self.keyframes.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if time <= b.time {
                let span = b.time - a.time;
                if span <= f32::EPSILON {
                    return Some(b.value);
                }
                let t = (time - a.time) / span;
                return Some(a.value + (b.value - a.value) * t);
            }
        }
        self.keyframes.last().map(|last| last.value)
    }

    fn apply(&self, time: f32, root: &mut Node) {
        let Some(value) = self.sample(time) else {
            return;
        };
        let Some(node) = root.find_mut(&self.target) else {
            return;
        };
        match self.property {
            TrackProperty::RotationX => node.transform.rotation.x = value,
            TrackProperty::RotationY => node.transform.rotation.y = value,
            TrackProperty::RotationZ => node.transform.rotation.z = value,
            TrackProperty::Opacity | TrackProperty::EmissiveIntensity => {
                if let Some(mesh) = node.as_mesh_mut() {
                    for material in &mut mesh.materials {
                        if self.property == TrackProperty::Opacity {
                            material.opacity = value;
                        } else {
                            material.emissive_intensity = value;
                        }
                    }
                }
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct AnimationClip {
    pub name: String,
    pub duration: f32,
    pub tracks: Vec<Track>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopMode {
    Once,
    Repeat,
}

#[derive(Debug)]
struct Action {
    clip: usize,
    time: f32,
    mode: LoopMode,
    finished: bool,
}

/// Plays clips against a bound root node.
#[derive(Debug)]
pub struct AnimationMixer {
    clips: Vec<AnimationClip>,
    actions: Vec<Action>,
    root: Option<String>,
}

impl AnimationMixer {
    pub fn new(clips: Vec<AnimationClip>, root: &str) -> Self {
        Self {
            clips,
            actions: Vec::new(),
            root: Some(root.to_string()),
        }
    }

    pub fn has_clip(&self, name: &str) -> bool {
        self.clips.iter().any(|clip| clip.name == name)
    }

    /// Starts (or restarts) a clip. Returns false if the clip is unknown or
    /// the mixer no longer has a root.
    pub fn play(&mut self, name: &str, mode: LoopMode) -> bool {
        if self.root.is_none() {
            return false;
        }
        let Some(clip) = self.clips.iter().position(|clip| clip.name == name) else {
            return false;
        };
        if let Some(action) = self.actions.iter_mut().find(|action| action.clip == clip) {
            action.time = 0.0;
            action.mode = mode;
            action.finished = false;
        } else {
            self.actions.push(Action {
                clip,
                time: 0.0,
                mode,
                finished: false,
            });
        }
        true
    }

    pub fn stop(&mut self, name: &str) {
        let clips = &self.clips;
        self.actions
            .retain(|action| clips.get(action.clip).map(|clip| clip.name.as_str()) != Some(name));
    }

    pub fn is_playing(&self, name: &str) -> bool {
        self.actions.iter().any(|action| {
            !action.finished
                && self
                    .clips
                    .get(action.clip)
                    .map(|clip| clip.name == name)
                    .unwrap_or(false)
        })
    }

    pub fn bound_root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    /// Advances every running action by `delta` seconds and writes the sampled
    /// values into `root`.
    pub fn update(&mut self, delta: f32, root: &mut Node) {
        if self.root.as_deref() != Some(root.name.as_str()) {
            return;
        }
        for action in &mut self.actions {
            if action.finished {
                continue;
            }
            let Some(clip) = self.clips.get(action.clip) else {
                continue;
            };
            action.time += delta.max(0.0);
            if action.time >= clip.duration {
                match action.mode {
                    LoopMode::Repeat if clip.duration > 0.0 => action.time %= clip.duration,
                    _ => {
                        action.time = clip.duration;
                        action.finished = true;
                    }
                }
            }
            for track in &clip.tracks {
                track.apply(action.time, root);
            }
        }
    }

    /// Drops every action and the cached binding to the root.
    pub fn uncache_root(&mut self) {
        self.actions.clear();
        self.root = None;
    }
}
