//! Client input snapshots.
//!
//! A client tracks one [`PressState`] per named action and per mouse button.
//! Only edges (`JustPressed`, `JustReleased`) travel to the server; the
//! server advances them to the steady states on its own tick.

use glam::Vec2;
use rustc_hash::FxHashMap;
use tessera_value::Value;

/// Action states, keyed by action name.
pub const ACTIONS: &str = "A";
/// Mouse button states, keyed by button code.
pub const MOUSE: &str = "M";
/// Cursor position.
pub const MOUSE_POSITION: &str = "MP";

/// Press state of one action or button. The discriminants are the wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PressState {
    #[default]
    NotPressed = 0,
    JustPressed = 1,
    Pressed = 2,
    JustReleased = 3,
    /// Held through a reset; stays here until released.
    Reset = 4,
}

impl PressState {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => PressState::NotPressed,
            1 => PressState::JustPressed,
            2 => PressState::Pressed,
            3 => PressState::JustReleased,
            4 => PressState::Reset,
            _ => return None,
        })
    }

    /// Next state given whether the key is held now.
    fn step(self, held: bool) -> Self {
        match (self, held) {
            (PressState::NotPressed, true) => PressState::JustPressed,
            (PressState::JustPressed, true) => PressState::Pressed,
            (PressState::Reset, false) => PressState::NotPressed,
            (PressState::JustPressed | PressState::Pressed, false) => PressState::JustReleased,
            (PressState::JustReleased, false) => PressState::NotPressed,
            (state, _) => state,
        }
    }

    fn is_edge(self) -> bool {
        matches!(self, PressState::JustPressed | PressState::JustReleased)
    }
}

/// Mouse buttons carried in input snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left = 1,
    Right = 2,
    Middle = 3,
}

impl MouseButton {
    pub const ALL: [MouseButton; 3] = [MouseButton::Left, MouseButton::Right, MouseButton::Middle];

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        MouseButton::ALL.into_iter().find(|b| b.code() == code)
    }
}

/// What the local device reports for one frame.
#[derive(Debug, Clone, Default)]
pub struct InputSample {
    pub held_actions: Vec<String>,
    pub held_buttons: Vec<MouseButton>,
    pub cursor: Vec2,
}

/// Press states for a fixed set of actions plus the mouse.
#[derive(Debug, Clone, Default)]
pub struct InputState {
    actions: FxHashMap<String, PressState>,
    mouse: FxHashMap<MouseButton, PressState>,
    cursor: Vec2,
}

impl InputState {
    /// Tracks `actions` and every [`MouseButton`], all released.
    pub fn new<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actions: actions
                .into_iter()
                .map(|a| (a.into(), PressState::NotPressed))
                .collect(),
            mouse: MouseButton::ALL
                .into_iter()
                .map(|b| (b, PressState::NotPressed))
                .collect(),
            cursor: Vec2::ZERO,
        }
    }

    /// Steps every tracked state from a device sample. Returns `true` if any
    /// press state changed; cursor motion alone does not count.
    pub fn update(&mut self, sample: &InputSample) -> bool {
        let mut changed = false;
        for (action, state) in self.actions.iter_mut() {
            let held = sample.held_actions.iter().any(|a| a == action);
            let next = state.step(held);
            changed |= next != *state;
            *state = next;
        }
        for (button, state) in self.mouse.iter_mut() {
            let next = state.step(sample.held_buttons.contains(button));
            changed |= next != *state;
            *state = next;
        }
        self.cursor = sample.cursor;
        changed
    }

    /// Wire form: `{"A": {action: code}, "M": {button: code}, "MP": cursor}`.
    pub fn to_payload(&self) -> Value {
        let mut out = Value::object();
        out[ACTIONS].set(Value::object());
        let mut actions: Vec<(&String, &PressState)> = self.actions.iter().collect();
        actions.sort_by(|a, b| a.0.cmp(b.0));
        for (action, state) in actions {
            out[ACTIONS][action.as_str()].set(state.code());
        }
        out[MOUSE].set(Value::object());
        for button in MouseButton::ALL {
            let state = self.mouse_state(button);
            out[MOUSE][button.code().to_string().as_str()].set(state.code());
        }
        out[MOUSE_POSITION].set(self.cursor);
        out
    }

    /// Applies a client snapshot on the server. Only edge states are taken;
    /// the cursor is always taken.
    pub fn apply_remote(&mut self, payload: &Value) {
        for (action, code) in payload[ACTIONS].entries() {
            if let Some(state) = code.as_i64().and_then(PressState::from_code)
                && state.is_edge()
            {
                self.actions.insert(action.to_owned(), state);
            }
        }
        for (button, code) in payload[MOUSE].entries() {
            let Some(button) = button.parse().ok().and_then(MouseButton::from_code) else {
                continue;
            };
            if let Some(state) = code.as_i64().and_then(PressState::from_code)
                && state.is_edge()
            {
                self.mouse.insert(button, state);
            }
        }
        if let Some(cursor) = payload[MOUSE_POSITION].as_vec2() {
            self.cursor = cursor;
        }
    }

    /// Server-side per-tick step: edges settle into steady states.
    pub fn advance(&mut self) {
        let settle = |state: &mut PressState| {
            *state = match *state {
                PressState::JustPressed => PressState::Pressed,
                PressState::JustReleased => PressState::NotPressed,
                other => other,
            };
        };
        self.actions.values_mut().for_each(settle);
        self.mouse.values_mut().for_each(settle);
    }

    /// Marks every held action as [`PressState::Reset`] so it reads as
    /// released until the key goes up.
    pub fn reset_actions(&mut self) {
        for state in self.actions.values_mut() {
            *state = reset(*state);
        }
    }

    pub fn reset_mouse(&mut self) {
        for state in self.mouse.values_mut() {
            *state = reset(*state);
        }
    }

    pub fn reset_all(&mut self) {
        self.reset_actions();
        self.reset_mouse();
    }

    pub fn action_state(&self, action: &str) -> PressState {
        self.actions.get(action).copied().unwrap_or_default()
    }

    pub fn mouse_state(&self, button: MouseButton) -> PressState {
        self.mouse.get(&button).copied().unwrap_or_default()
    }

    /// `true` while held past the first tick.
    pub fn action_pressed(&self, action: &str) -> bool {
        self.action_state(action) == PressState::Pressed
    }

    pub fn action_just_pressed(&self, action: &str) -> bool {
        self.action_state(action) == PressState::JustPressed
    }

    pub fn action_just_released(&self, action: &str) -> bool {
        self.action_state(action) == PressState::JustReleased
    }

    pub fn mouse_pressed(&self, button: MouseButton) -> bool {
        self.mouse_state(button) == PressState::Pressed
    }

    pub fn mouse_just_pressed(&self, button: MouseButton) -> bool {
        self.mouse_state(button) == PressState::JustPressed
    }

    pub fn mouse_just_released(&self, button: MouseButton) -> bool {
        self.mouse_state(button) == PressState::JustReleased
    }

    pub fn cursor(&self) -> Vec2 {
        self.cursor
    }
}

fn reset(state: PressState) -> PressState {
    match state {
        PressState::JustPressed | PressState::Pressed => PressState::Reset,
        _ => PressState::NotPressed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holding(actions: &[&str]) -> InputSample {
        InputSample {
            held_actions: actions.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_local_transitions() {
        let mut input = InputState::new(["jump"]);
        assert!(input.update(&holding(&["jump"])));
        assert!(input.action_just_pressed("jump"));
        assert!(input.update(&holding(&["jump"])));
        assert!(input.action_pressed("jump"));
        assert!(!input.update(&holding(&["jump"])));
        assert!(input.update(&holding(&[])));
        assert!(input.action_just_released("jump"));
        assert!(input.update(&holding(&[])));
        assert_eq!(input.action_state("jump"), PressState::NotPressed);
        assert!(!input.update(&holding(&[])));
    }

    #[test]
    fn test_reset_holds_until_release() {
        let mut input = InputState::new(["fire"]);
        input.update(&holding(&["fire"]));
        input.reset_actions();
        assert_eq!(input.action_state("fire"), PressState::Reset);
        assert!(!input.update(&holding(&["fire"])));
        assert!(!input.action_pressed("fire"));
        assert!(input.update(&holding(&[])));
        assert_eq!(input.action_state("fire"), PressState::NotPressed);
    }

    #[test]
    fn test_cursor_alone_is_not_a_change() {
        let mut input = InputState::new(Vec::<String>::new());
        let sample = InputSample {
            cursor: Vec2::new(4.0, 5.0),
            ..Default::default()
        };
        assert!(!input.update(&sample));
        assert_eq!(input.cursor(), Vec2::new(4.0, 5.0));
    }

    #[test]
    fn test_payload_shape() {
        let mut input = InputState::new(["jump"]);
        input.update(&InputSample {
            held_actions: vec!["jump".into()],
            held_buttons: vec![MouseButton::Right],
            cursor: Vec2::new(1.0, 2.0),
        });
        let payload = input.to_payload();
        assert_eq!(payload[ACTIONS]["jump"].as_i64(), Some(1));
        assert_eq!(payload[MOUSE]["2"].as_i64(), Some(1));
        assert_eq!(payload[MOUSE]["1"].as_i64(), Some(0));
        assert_eq!(payload[MOUSE_POSITION].as_vec2(), Some(Vec2::new(1.0, 2.0)));
    }

    #[test]
    fn test_remote_takes_edges_then_advances() {
        let mut client = InputState::new(["jump", "crouch"]);
        let mut server = InputState::new(["jump", "crouch"]);

        client.update(&holding(&["jump", "crouch"]));
        client.update(&holding(&["jump"]));
        // jump: Pressed, crouch: JustReleased
        server.apply_remote(&client.to_payload());
        assert_eq!(server.action_state("jump"), PressState::NotPressed);
        assert!(server.action_just_released("crouch"));

        let mut fresh = InputState::new(["jump"]);
        fresh.update(&holding(&["jump"]));
        server.apply_remote(&fresh.to_payload());
        assert!(server.action_just_pressed("jump"));

        server.advance();
        assert!(server.action_pressed("jump"));
        assert_eq!(server.action_state("crouch"), PressState::NotPressed);
    }

    #[test]
    fn test_remote_ignores_unknown_codes() {
        let mut server = InputState::new(["jump"]);
        let payload =
            Value::parse(r#"{"A":{"jump":9},"M":{"7":1,"x":1,"3":1},"MP":{"X":1.0,"Y":1.0}}"#)
                .unwrap();
        server.apply_remote(&payload);
        assert_eq!(server.action_state("jump"), PressState::NotPressed);
        assert!(server.mouse_just_pressed(MouseButton::Middle));
        assert_eq!(server.cursor(), Vec2::ONE);
    }
}
