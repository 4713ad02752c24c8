// crates/engine_core/src/input/poller.rs

use glam::Vec2;
use winit::event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, ModifiersState, PhysicalKey};

use crate::input::{EngineAction, KeyBindings};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DragButton {
    Left,
    Right,
}

/// Cursor motion accumulated while a mouse button was held.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MouseDrag {
    pub button: DragButton,
    pub delta: Vec2,
}

/// Touchpads report pixels; this many make up one wheel notch.
const PIXELS_PER_LINE: f32 = 40.0;

/// Low-level input collector: held keys, modifiers, mouse drags and the
/// wheel. Key presses are turned into [`EngineAction`]s through the bindings.
pub struct InputPoller {
    bindings: KeyBindings,
    active_keys: Vec<KeyCode>,
    pressed: Vec<KeyCode>,
    modifiers: ModifiersState,
    cursor: Option<Vec2>,
    held: Option<DragButton>,
    drag: Vec2,
    wheel: f32,
    actions: Vec<EngineAction>,
}

impl Default for InputPoller {
    fn default() -> Self {
        Self::new(KeyBindings::default())
    }
}

impl InputPoller {
    pub fn new(bindings: KeyBindings) -> Self {
        Self {
            bindings,
            active_keys: Vec::new(),
            pressed: Vec::new(),
            modifiers: ModifiersState::empty(),
            cursor: None,
            held: None,
            drag: Vec2::ZERO,
            wheel: 0.0,
            actions: Vec::new(),
        }
    }

    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::KeyboardInput { event, .. } => self.handle_keyboard_input(event),
            WindowEvent::ModifiersChanged(m) => self.modifiers = m.state(),
            WindowEvent::MouseInput { state, button, .. } => {
                let button = match button {
                    MouseButton::Left => DragButton::Left,
                    MouseButton::Right => DragButton::Right,
                    _ => return,
                };
                self.mouse_button(button, *state == ElementState::Pressed);
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor_moved(Vec2::new(position.x as f32, position.y as f32));
            }
            WindowEvent::MouseWheel { delta, .. } => self.mouse_wheel(*delta),
            WindowEvent::Focused(false) => {
                self.active_keys.clear();
                self.wheel = 0.0;
                self.held = None;
                self.drag = Vec2::ZERO;
            }
            _ => {}
        }
    }

    fn handle_keyboard_input(&mut self, key_event: &KeyEvent) {
        if let PhysicalKey::Code(keycode) = key_event.physical_key {
            match key_event.state {
                ElementState::Pressed => {
                    if !key_event.repeat {
                        self.key_pressed(keycode);
                    }
                }
                ElementState::Released => {
                    self.active_keys.retain(|&k| k != keycode);
                }
            }
        }
    }

    pub fn key_pressed(&mut self, key: KeyCode) {
        if !self.active_keys.contains(&key) {
            self.active_keys.push(key);
        }
        self.pressed.push(key);
        if let Some(action) = self.bindings.resolve(key, self.modifiers.alt_key()) {
            self.actions.push(action);
        }
    }

    fn mouse_button(&mut self, button: DragButton, pressed: bool) {
        if pressed {
            if self.held != Some(button) {
                self.drag = Vec2::ZERO;
            }
            self.held = Some(button);
        } else if self.held == Some(button) {
            self.held = None;
        }
    }

    /// Also the way to feed wheel input without a window.
    pub fn mouse_wheel(&mut self, delta: MouseScrollDelta) {
        self.wheel += match delta {
            MouseScrollDelta::LineDelta(_, y) => y,
            MouseScrollDelta::PixelDelta(p) => p.y as f32 / PIXELS_PER_LINE,
        };
    }

    fn cursor_moved(&mut self, position: Vec2) {
        if let (Some(last), Some(_)) = (self.cursor, self.held) {
            self.drag += position - last;
        }
        self.cursor = Some(position);
    }

    pub fn is_key_active(&self, key: KeyCode) -> bool {
        self.active_keys.contains(&key)
    }

    /// Actions triggered since the last call, in press order.
    pub fn drain_actions(&mut self) -> Vec<EngineAction> {
        std::mem::take(&mut self.actions)
    }

    /// Keys pressed since the last call, in press order. Repeats are not
    /// included, so each entry is one discrete press.
    pub fn drain_pressed(&mut self) -> Vec<KeyCode> {
        std::mem::take(&mut self.pressed)
    }

    /// Wheel notches since the last call; positive is away from the user.
    pub fn take_wheel(&mut self) -> f32 {
        std::mem::replace(&mut self.wheel, 0.0)
    }

    /// Drag motion since the last call, if a button is held and the
    /// cursor moved.
    pub fn take_drag(&mut self) -> Option<MouseDrag> {
        let button = self.held?;
        let delta = std::mem::replace(&mut self.drag, Vec2::ZERO);
        (delta != Vec2::ZERO).then_some(MouseDrag { button, delta })
    }

    pub fn bindings_mut(&mut self) -> &mut KeyBindings {
        &mut self.bindings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alt_enter_and_f11_both_toggle_fullscreen() {
        let mut p = InputPoller::default();
        p.modifiers = ModifiersState::ALT;
        p.key_pressed(KeyCode::Enter);
        p.modifiers = ModifiersState::empty();
        p.key_pressed(KeyCode::F11);
        p.key_pressed(KeyCode::KeyV);
        assert_eq!(
            p.drain_actions(),
            vec![
                EngineAction::ToggleFullscreen,
                EngineAction::ToggleFullscreen,
                EngineAction::ToggleVSync
            ]
        );
        assert!(p.drain_actions().is_empty());
    }

    #[test]
    fn drag_accumulates_only_while_held() {
        let mut p = InputPoller::default();
        p.cursor_moved(Vec2::new(10.0, 10.0));
        p.cursor_moved(Vec2::new(20.0, 10.0));
        assert_eq!(p.take_drag(), None);

        p.mouse_button(DragButton::Left, true);
        p.cursor_moved(Vec2::new(25.0, 13.0));
        p.cursor_moved(Vec2::new(26.0, 14.0));
        assert_eq!(
            p.take_drag(),
            Some(MouseDrag {
                button: DragButton::Left,
                delta: Vec2::new(6.0, 4.0)
            })
        );
        assert_eq!(p.take_drag(), None);

        p.mouse_button(DragButton::Left, false);
        p.cursor_moved(Vec2::new(40.0, 40.0));
        assert_eq!(p.take_drag(), None);
    }

    #[test]
    fn wheel_lines_and_pixels_accumulate_until_taken() {
        let mut p = InputPoller::default();
        p.mouse_wheel(MouseScrollDelta::LineDelta(0.0, 1.0));
        p.mouse_wheel(MouseScrollDelta::LineDelta(0.0, 2.0));
        p.mouse_wheel(MouseScrollDelta::PixelDelta(winit::dpi::PhysicalPosition::new(0.0, -20.0)));
        assert!((p.take_wheel() - 2.5).abs() < 1e-6);
        assert_eq!(p.take_wheel(), 0.0);
    }

    #[test]
    fn pressed_keys_are_reported_once() {
        let mut p = InputPoller::default();
        p.key_pressed(KeyCode::KeyW);
        p.key_pressed(KeyCode::KeyA);
        assert!(p.is_key_active(KeyCode::KeyW));
        assert_eq!(p.drain_pressed(), vec![KeyCode::KeyW, KeyCode::KeyA]);
        assert!(p.drain_pressed().is_empty());
        assert!(p.drain_actions().is_empty());
    }
}
