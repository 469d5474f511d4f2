//! Keyboard and mouse state for the demo driver.
//!
//! Tracks instantaneous events (key just pressed) separately from continuous
//! state (button held), and maps keys onto [`Command`]s.

use std::collections::HashSet;

use glam::Vec2;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Actions the demo binds to keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    TogglePause,
    ToggleRenderMode,
    ToggleGravity,
    ToggleElectrostatics,
    ToggleFollow,
    AddParticle,
    RemoveOldest,
    Quit,
}

impl Command {
    pub fn from_key(key: KeyCode) -> Option<Self> {
        Some(match key {
            KeyCode::Space => Command::TogglePause,
            KeyCode::KeyP => Command::ToggleRenderMode,
            KeyCode::KeyG => Command::ToggleGravity,
            KeyCode::KeyE => Command::ToggleElectrostatics,
            KeyCode::KeyC => Command::ToggleFollow,
            KeyCode::KeyN => Command::AddParticle,
            KeyCode::Backspace => Command::RemoveOldest,
            KeyCode::Escape => Command::Quit,
            _ => return None,
        })
    }
}

/// Input state, cleared per frame by [`Input::begin_frame`].
#[derive(Debug, Default)]
pub struct Input {
    keys_held: HashSet<KeyCode>,
    keys_pressed: Vec<KeyCode>,

    mouse_held: HashSet<MouseButton>,
    mouse_position: Option<Vec2>,
    drag_delta: Vec2,

    scroll_delta: f32,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_pressed(&self, key: KeyCode) -> bool {
        self.keys_pressed.contains(&key)
    }

    pub fn key_held(&self, key: KeyCode) -> bool {
        self.keys_held.contains(&key)
    }

    pub fn mouse_held(&self, button: MouseButton) -> bool {
        self.mouse_held.contains(&button)
    }

    /// Commands for keys pressed this frame, in press order.
    pub fn commands(&self) -> impl Iterator<Item = Command> + '_ {
        self.keys_pressed.iter().filter_map(|&key| Command::from_key(key))
    }

    /// Cursor movement in pixels while the left button is held.
    pub fn drag_delta(&self) -> Vec2 {
        self.drag_delta
    }

    /// Scroll this frame in lines; positive scrolls up.
    pub fn scroll_delta(&self) -> f32 {
        self.scroll_delta
    }

    pub(crate) fn begin_frame(&mut self) {
        self.keys_pressed.clear();
        self.drag_delta = Vec2::ZERO;
        self.scroll_delta = 0.0;
    }

    pub(crate) fn press_key(&mut self, key: KeyCode) {
        // Repeats from a held key are not new presses.
        if self.keys_held.insert(key) {
            self.keys_pressed.push(key);
        }
    }

    pub(crate) fn release_key(&mut self, key: KeyCode) {
        self.keys_held.remove(&key);
    }

    pub(crate) fn move_cursor(&mut self, position: Vec2) {
        if let (Some(last), true) = (self.mouse_position, self.mouse_held(MouseButton::Left)) {
            self.drag_delta += position - last;
        }
        self.mouse_position = Some(position);
    }

    pub(crate) fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    match event.state {
                        ElementState::Pressed => self.press_key(key),
                        ElementState::Released => self.release_key(key),
                    }
                }
            }
            WindowEvent::MouseInput { state, button, .. } => match state {
                ElementState::Pressed => {
                    self.mouse_held.insert(*button);
                }
                ElementState::Released => {
                    self.mouse_held.remove(button);
                }
            },
            WindowEvent::CursorMoved { position, .. } => {
                self.move_cursor(Vec2::new(position.x as f32, position.y as f32));
            }
            WindowEvent::CursorLeft { .. } => {
                self.mouse_position = None;
            }
            WindowEvent::MouseWheel { delta, .. } => {
                self.scroll_delta += match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 100.0,
                };
            }
            _ => {}
        }
    }
}
