#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListenerTarget {
    /// The whole document; pointer tracking follows the cursor anywhere.
    Document,
    /// The landing section that receives touch gestures.
    Landing,
    /// The region over the character that triggers the hover animation.
    HoverRegion,
    Window,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InputKind {
    PointerMove,
    TouchStart,
    TouchMove,
    TouchEnd,
    HoverEnter,
    HoverLeave,
    Resize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Listener {
    pub target: ListenerTarget,
    pub kind: InputKind,
}

impl Listener {
    pub const fn new(target: ListenerTarget, kind: InputKind) -> Self {
        Self { target, kind }
    }
}

pub const POINTER_MOVE: Listener = Listener::new(ListenerTarget::Document, InputKind::PointerMove);
pub const TOUCH_START: Listener = Listener::new(ListenerTarget::Landing, InputKind::TouchStart);
pub const TOUCH_MOVE: Listener = Listener::new(ListenerTarget::Landing, InputKind::TouchMove);
pub const TOUCH_END: Listener = Listener::new(ListenerTarget::Landing, InputKind::TouchEnd);
pub const HOVER_ENTER: Listener = Listener::new(ListenerTarget::HoverRegion, InputKind::HoverEnter);
pub const HOVER_LEAVE: Listener = Listener::new(ListenerTarget::HoverRegion, InputKind::HoverLeave);
pub const RESIZE: Listener = Listener::new(ListenerTarget::Window, InputKind::Resize);

/// Where listeners physically live (DOM targets, a window's event stream).
pub trait InputHost {
    fn attach(&mut self, listener: Listener);
    fn detach(&mut self, listener: Listener);
}

/// What the controller has attached, so teardown can take exactly that off again.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    installed: Vec<Listener>,
}

impl ListenerRegistry {
    pub fn install(&mut self, host: &mut dyn InputHost, listener: Listener) -> bool {
        if self.is_installed(listener) {
            return false;
        }
        host.attach(listener);
        self.installed.push(listener);
        true
    }

    pub fn remove(&mut self, host: &mut dyn InputHost, listener: Listener) -> bool {
        let Some(index) = self.installed.iter().position(|l| *l == listener) else {
            return false;
        };
        self.installed.remove(index);
        host.detach(listener);
        true
    }

    pub fn remove_all(&mut self, host: &mut dyn InputHost) -> usize {
        let removed = self.installed.len();
        for listener in self.installed.drain(..) {
            host.detach(listener);
        }
        removed
    }

    pub fn is_installed(&self, listener: Listener) -> bool {
        self.installed.contains(&listener)
    }

    pub fn len(&self) -> usize {
        self.installed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }
}
