#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputAction {
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    Run,
    Quit,
}

const ACTION_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ActionStates {
    down: [bool; ACTION_COUNT],
}

impl ActionStates {
    pub(crate) fn set(&mut self, action: InputAction, is_down: bool) {
        self.down[action.index()] = is_down;
    }

    pub(crate) fn is_down(&self, action: InputAction) -> bool {
        self.down[action.index()]
    }
}

impl InputAction {
    const fn index(self) -> usize {
        match self {
            InputAction::MoveUp => 0,
            InputAction::MoveDown => 1,
            InputAction::MoveLeft => 2,
            InputAction::MoveRight => 3,
            InputAction::Run => 4,
            InputAction::Quit => 5,
        }
    }
}

/// Input sampled for one simulation tick. Held actions persist across
/// ticks; the `*_pressed` flags (pause included), focus steps, pointer picks and form keys are
/// edges and only appear on the first tick of the frame that produced them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputSnapshot {
    actions: ActionStates,
    confirm_pressed: bool,
    attack_pressed: bool,
    defend_pressed: bool,
    pause_pressed: bool,
    focus_steps: i32,
    pointer_option: Option<usize>,
    body_form_key: Option<u8>,
}

impl InputSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn quit_requested(&self) -> bool {
        self.actions.is_down(InputAction::Quit)
    }

    pub fn is_down(&self, action: InputAction) -> bool {
        self.actions.is_down(action)
    }

    pub fn with_action_down(mut self, action: InputAction, is_down: bool) -> Self {
        self.actions.set(action, is_down);
        self
    }

    pub fn with_confirm_pressed(mut self, pressed: bool) -> Self {
        self.confirm_pressed = pressed;
        self
    }

    pub fn with_attack_pressed(mut self, pressed: bool) -> Self {
        self.attack_pressed = pressed;
        self
    }

    pub fn with_defend_pressed(mut self, pressed: bool) -> Self {
        self.defend_pressed = pressed;
        self
    }

    pub fn with_pause_pressed(mut self, pressed: bool) -> Self {
        self.pause_pressed = pressed;
        self
    }

    pub fn with_focus_steps(mut self, steps: i32) -> Self {
        self.focus_steps = steps;
        self
    }

    pub fn with_pointer_option(mut self, option_index: Option<usize>) -> Self {
        self.pointer_option = option_index;
        self
    }

    pub fn with_body_form_key(mut self, key: Option<u8>) -> Self {
        self.body_form_key = key;
        self
    }

    pub fn confirm_pressed(&self) -> bool {
        self.confirm_pressed
    }

    pub fn attack_pressed(&self) -> bool {
        self.attack_pressed
    }

    pub fn defend_pressed(&self) -> bool {
        self.defend_pressed
    }

    pub fn pause_pressed(&self) -> bool {
        self.pause_pressed
    }

    pub fn focus_steps(&self) -> i32 {
        self.focus_steps
    }

    pub fn pointer_option(&self) -> Option<usize> {
        self.pointer_option
    }

    pub fn body_form_key(&self) -> Option<u8> {
        self.body_form_key
    }

    /// Same held actions, all edges cleared.
    pub fn held_only(&self) -> Self {
        Self {
            actions: self.actions,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_only_keeps_actions_and_drops_edges() {
        let snapshot = InputSnapshot::empty()
            .with_action_down(InputAction::MoveLeft, true)
            .with_confirm_pressed(true)
            .with_pause_pressed(true)
            .with_focus_steps(-1)
            .with_body_form_key(Some(2));

        let held = snapshot.held_only();
        assert!(held.is_down(InputAction::MoveLeft));
        assert!(!held.confirm_pressed());
        assert!(!held.pause_pressed());
        assert_eq!(held.focus_steps(), 0);
        assert_eq!(held.body_form_key(), None);
    }

    #[test]
    fn quit_is_a_held_action() {
        let snapshot = InputSnapshot::empty().with_action_down(InputAction::Quit, true);
        assert!(snapshot.quit_requested());
    }
}
