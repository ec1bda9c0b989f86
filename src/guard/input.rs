use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputKind {
    Click,
    DoubleClick,
    MouseDown,
    MouseUp,
    AuxClick,
    ContextMenu,
    Submit,
    DragStart,
    SelectStart,
    MouseMove,
    MouseOver,
    MouseEnter,
    MouseLeave,
    KeyDown,
    KeyUp,
    KeyPress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputClass {
    /// Can be suppressed and, for clicks, advances the unlock sequence.
    Pointer,
    /// Never blocked.
    Hover,
    Key,
}

impl InputKind {
    pub fn class(self) -> InputClass {
        match self {
            InputKind::MouseMove
            | InputKind::MouseOver
            | InputKind::MouseEnter
            | InputKind::MouseLeave => InputClass::Hover,
            InputKind::KeyDown | InputKind::KeyUp | InputKind::KeyPress => InputClass::Key,
            _ => InputClass::Pointer,
        }
    }
}

/// What the event landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Target {
    /// The guard's own menu and buttons.
    Control,
    /// Links, buttons, inputs and anything else with an action attached.
    Interactive,
    #[default]
    Content,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    /// Key name as reported by the host ("Enter", " ", "F5", "r", ...).
    pub name: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub alt: bool,
}

const NAVIGATION_KEYS: [&str; 5] = ["Tab", "Escape", "F5", "F11", "F12"];
const BROWSER_SHORTCUTS: [&str; 5] = ["r", "l", "t", "w", "n"];

impl Key {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn with_alt(mut self) -> Self {
        self.alt = true;
        self
    }

    /// Enter or Space, which activate the focused element.
    pub fn activates(&self) -> bool {
        matches!(self.name.as_str(), "Enter" | " " | "Spacebar")
    }

    /// Keys and shortcuts that would let a visitor leave the page.
    pub fn navigates(&self) -> bool {
        if NAVIGATION_KEYS.contains(&self.name.as_str()) {
            return true;
        }
        if (self.ctrl || self.meta)
            && BROWSER_SHORTCUTS
                .iter()
                .any(|shortcut| self.name.eq_ignore_ascii_case(shortcut))
        {
            return true;
        }
        self.alt && matches!(self.name.as_str(), "Tab" | "F4")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputEvent {
    pub kind: InputKind,
    #[serde(default)]
    pub target: Target,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
}

impl InputEvent {
    pub fn pointer(kind: InputKind, target: Target) -> Self {
        Self {
            kind,
            target,
            key: None,
        }
    }

    pub fn click() -> Self {
        Self::pointer(InputKind::Click, Target::Content)
    }

    pub fn key_down(key: Key, target: Target) -> Self {
        Self {
            kind: InputKind::KeyDown,
            target,
            key: Some(key),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Allow,
    Suppress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_events() {
        assert_eq!(InputKind::Click.class(), InputClass::Pointer);
        assert_eq!(InputKind::SelectStart.class(), InputClass::Pointer);
        assert_eq!(InputKind::MouseEnter.class(), InputClass::Hover);
        assert_eq!(InputKind::KeyPress.class(), InputClass::Key);
    }

    #[test]
    fn navigation_keys_and_shortcuts() {
        assert!(Key::named("F5").navigates());
        assert!(Key::named("R").with_ctrl().navigates());
        assert!(Key::named("F4").with_alt().navigates());
        assert!(!Key::named("r").navigates());
        assert!(!Key::named("F4").navigates());
        assert!(!Key::named("a").with_ctrl().navigates());
    }

    #[test]
    fn parses_host_events() {
        let event: InputEvent = serde_json::from_str(
            r#"{"kind":"keyDown","target":"interactive","key":{"name":"Enter"}}"#,
        )
        .unwrap();
        assert_eq!(event, InputEvent::key_down(Key::named("Enter"), Target::Interactive));
        assert!(event.key.as_ref().is_some_and(Key::activates));

        let event: InputEvent = serde_json::from_str(r#"{"kind":"dragStart"}"#).unwrap();
        assert_eq!(event.target, Target::Content);
    }
}
