// crates/engine_core/src/input/mod.rs
pub mod bindings;
pub mod poller;

pub use bindings::{EngineAction, KeyBindings, KeyChord};
pub use poller::{DragButton, InputPoller, MouseDrag};
pub use winit::event::MouseScrollDelta;
pub use winit::keyboard::KeyCode;
