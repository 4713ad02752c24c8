// crates/engine_core/src/input/bindings.rs
use std::collections::HashMap;

use winit::keyboard::KeyCode;

/// Window-level actions handled by the platform runner itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EngineAction {
    Quit,
    ToggleFullscreen,
    ToggleVSync,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyChord {
    pub key: KeyCode,
    pub alt: bool,
}

impl KeyChord {
    pub const fn key(key: KeyCode) -> Self {
        Self { key, alt: false }
    }

    pub const fn alt(key: KeyCode) -> Self {
        Self { key, alt: true }
    }
}

/// Maps key chords to engine actions. Each chord resolves to at most one
/// action, so there is no fall-through between bindings.
#[derive(Clone, Debug)]
pub struct KeyBindings {
    bindings: HashMap<KeyChord, EngineAction>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        let mut b = Self::empty();
        b.bind(KeyChord::key(KeyCode::Escape), EngineAction::Quit);
        b.bind(KeyChord::alt(KeyCode::Enter), EngineAction::ToggleFullscreen);
        b.bind(KeyChord::alt(KeyCode::NumpadEnter), EngineAction::ToggleFullscreen);
        b.bind(KeyChord::key(KeyCode::F11), EngineAction::ToggleFullscreen);
        b.bind(KeyChord::key(KeyCode::KeyV), EngineAction::ToggleVSync);
        b
    }
}

impl KeyBindings {
    pub fn empty() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    pub fn bind(&mut self, chord: KeyChord, action: EngineAction) {
        self.bindings.insert(chord, action);
    }

    pub fn unbind(&mut self, chord: KeyChord) -> Option<EngineAction> {
        self.bindings.remove(&chord)
    }

    /// An exact chord match wins; otherwise a plain binding still fires
    /// with Alt held (Alt+Escape quits), except for Alt-only chords.
    pub fn resolve(&self, key: KeyCode, alt: bool) -> Option<EngineAction> {
        let exact = self.bindings.get(&KeyChord { key, alt }).copied();
        if exact.is_some() || !alt {
            return exact;
        }
        self.bindings.get(&KeyChord::key(key)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bindings() {
        let b = KeyBindings::default();
        assert_eq!(b.resolve(KeyCode::Escape, false), Some(EngineAction::Quit));
        assert_eq!(b.resolve(KeyCode::Enter, true), Some(EngineAction::ToggleFullscreen));
        assert_eq!(b.resolve(KeyCode::F11, false), Some(EngineAction::ToggleFullscreen));
        assert_eq!(b.resolve(KeyCode::KeyV, false), Some(EngineAction::ToggleVSync));
    }

    #[test]
    fn plain_enter_does_nothing() {
        let b = KeyBindings::default();
        assert_eq!(b.resolve(KeyCode::Enter, false), None);
    }

    #[test]
    fn f11_does_not_also_toggle_vsync() {
        let b = KeyBindings::default();
        assert_eq!(b.resolve(KeyCode::F11, true), Some(EngineAction::ToggleFullscreen));
        assert_ne!(b.resolve(KeyCode::F11, false), Some(EngineAction::ToggleVSync));
    }

    #[test]
    fn rebinding_replaces_the_action() {
        let mut b = KeyBindings::default();
        b.bind(KeyChord::key(KeyCode::KeyQ), EngineAction::Quit);
        assert_eq!(b.unbind(KeyChord::key(KeyCode::Escape)), Some(EngineAction::Quit));
        assert_eq!(b.resolve(KeyCode::Escape, false), None);
        assert_eq!(b.resolve(KeyCode::KeyQ, false), Some(EngineAction::Quit));
    }
}
