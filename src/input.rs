use std::collections::HashSet;

use glam::Vec2;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Keyboard and mouse state, with per-frame edges.
///
/// The host feeds window events in through [`handle_event`](Self::handle_event)
/// and calls [`begin_frame`](Self::begin_frame) after each frame. The
/// `press_*`/`release_*` methods are the same transitions without a window,
/// for driving input programmatically.
#[derive(Debug, Default)]
pub struct Input {
    keys_down: HashSet<KeyCode>,
    keys_pressed: HashSet<KeyCode>,
    keys_released: HashSet<KeyCode>,
    buttons_down: HashSet<MouseButton>,
    buttons_pressed: Vec<MouseButton>,
    buttons_released: Vec<MouseButton>,
    cursor: Option<Vec2>,
    cursor_delta: Vec2,
    scroll_delta: Vec2,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset per-frame state. Call after the frame has been processed.
    pub fn begin_frame(&mut self) {
        self.keys_pressed.clear();
        self.keys_released.clear();
        self.buttons_pressed.clear();
        self.buttons_released.clear();
        self.cursor_delta = Vec2::ZERO;
        self.scroll_delta = Vec2::ZERO;
    }

    pub fn handle_event(&mut self, event: &WindowEvent) {
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
                ElementState::Pressed => self.press_button(*button),
                ElementState::Released => self.release_button(*button),
            },
            WindowEvent::CursorMoved { position, .. } => {
                self.move_cursor(Vec2::new(position.x as f32, position.y as f32));
            }
            WindowEvent::CursorLeft { .. } => self.cursor = None,
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(x, y) => Vec2::new(*x, *y),
                    MouseScrollDelta::PixelDelta(pos) => {
                        Vec2::new(pos.x as f32, pos.y as f32) / 120.0
                    }
                };
                self.scroll(lines);
            }
            _ => {}
        }
    }

    pub fn press_key(&mut self, key: KeyCode) {
        if self.keys_down.insert(key) {
            self.keys_pressed.insert(key);
        }
    }

    pub fn release_key(&mut self, key: KeyCode) {
        self.keys_down.remove(&key);
        self.keys_released.insert(key);
    }

    pub fn press_button(&mut self, button: MouseButton) {
        if self.buttons_down.insert(button) {
            self.buttons_pressed.push(button);
        }
    }

    pub fn release_button(&mut self, button: MouseButton) {
        if self.buttons_down.remove(&button) {
            self.buttons_released.push(button);
        }
    }

    pub fn move_cursor(&mut self, position: Vec2) {
        if let Some(previous) = self.cursor {
            self.cursor_delta += position - previous;
        }
        self.cursor = Some(position);
    }

    /// Add a scroll amount, in lines.
    pub fn scroll(&mut self, lines: Vec2) {
        self.scroll_delta += lines;
    }

    pub fn key_down(&self, key: KeyCode) -> bool {
        self.keys_down.contains(&key)
    }

    /// True if the key went down this frame.
    pub fn key_pressed(&self, key: KeyCode) -> bool {
        self.keys_pressed.contains(&key)
    }

    pub fn key_released(&self, key: KeyCode) -> bool {
        self.keys_released.contains(&key)
    }

    pub fn mouse_down(&self, button: MouseButton) -> bool {
        self.buttons_down.contains(&button)
    }

    pub fn mouse_pressed(&self, button: MouseButton) -> bool {
        self.buttons_pressed.contains(&button)
    }

    pub fn mouse_released(&self, button: MouseButton) -> bool {
        self.buttons_released.contains(&button)
    }

    /// Buttons that went down this frame, in order.
    pub fn buttons_pressed(&self) -> &[MouseButton] {
        &self.buttons_pressed
    }

    /// Buttons that came up this frame, in order.
    pub fn buttons_released(&self) -> &[MouseButton] {
        &self.buttons_released
    }

    /// Cursor position in physical pixels, or `None` outside the window.
    pub fn cursor(&self) -> Option<Vec2> {
        self.cursor
    }

    /// Cursor movement this frame.
    pub fn cursor_delta(&self) -> Vec2 {
        self.cursor_delta
    }

    /// Scroll this frame, in lines.
    pub fn scroll_delta(&self) -> Vec2 {
        self.scroll_delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_last_one_frame() {
        let mut input = Input::new();
        input.press_key(KeyCode::ArrowUp);
        input.press_button(MouseButton::Left);
        assert!(input.key_pressed(KeyCode::ArrowUp));
        assert!(input.mouse_pressed(MouseButton::Left));

        input.begin_frame();
        assert!(!input.key_pressed(KeyCode::ArrowUp));
        assert!(input.key_down(KeyCode::ArrowUp));
        assert!(input.mouse_down(MouseButton::Left));
        assert!(input.buttons_pressed().is_empty());

        // Key repeat does not re-trigger a press
        input.press_key(KeyCode::ArrowUp);
        assert!(!input.key_pressed(KeyCode::ArrowUp));

        input.release_button(MouseButton::Left);
        assert_eq!(input.buttons_released(), &[MouseButton::Left]);
        assert!(!input.mouse_down(MouseButton::Left));
    }

    #[test]
    fn first_cursor_position_has_no_delta() {
        let mut input = Input::new();
        input.move_cursor(Vec2::new(100.0, 50.0));
        assert_eq!(input.cursor_delta(), Vec2::ZERO);
        input.move_cursor(Vec2::new(110.0, 45.0));
        assert_eq!(input.cursor_delta(), Vec2::new(10.0, -5.0));
        assert_eq!(input.cursor(), Some(Vec2::new(110.0, 45.0)));
    }
}
