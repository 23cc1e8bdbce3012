use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// A normalized key chord such as `ctrl+k` or `shift+r`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    pub fn char(c: char) -> Self {
        Self::from_event(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE))
    }

    pub fn ctrl(c: char) -> Self {
        Self::from_event(KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL))
    }

    pub fn shift(c: char) -> Self {
        Self::from_event(KeyEvent::new(
            KeyCode::Char(c.to_ascii_uppercase()),
            KeyModifiers::SHIFT,
        ))
    }

    pub fn code(code: KeyCode) -> Self {
        Self::from_event(KeyEvent::new(code, KeyModifiers::NONE))
    }

    pub fn from_event(key: KeyEvent) -> Self {
        Self(key_event_signature(key).unwrap_or_default())
    }
}

impl From<KeyEvent> for Key {
    fn from(key: KeyEvent) -> Self {
        Self::from_event(key)
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}>", self.0.replace('+', "-"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionOpts {
    pub visible: bool,
    pub dangerous: bool,
}

impl ActionOpts {
    pub fn visible() -> Self {
        Self {
            visible: true,
            dangerous: false,
        }
    }

    pub fn hidden() -> Self {
        Self::default()
    }

    pub fn dangerous() -> Self {
        Self {
            visible: true,
            dangerous: true,
        }
    }
}

/// Returns the event back when it was not consumed.
pub type ActionHandler<C> = Arc<dyn Fn(&mut C, KeyEvent) -> Option<KeyEvent> + Send + Sync>;

pub struct KeyAction<C> {
    pub description: String,
    pub action: ActionHandler<C>,
    pub opts: ActionOpts,
}

impl<C> Clone for KeyAction<C> {
    fn clone(&self) -> Self {
        Self {
            description: self.description.clone(),
            action: Arc::clone(&self.action),
            opts: self.opts,
        }
    }
}

impl<C> KeyAction<C> {
    pub fn new<F>(description: impl Into<String>, opts: ActionOpts, handler: F) -> Self
    where
        F: Fn(&mut C, KeyEvent) -> Option<KeyEvent> + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            action: Arc::new(handler),
            opts,
        }
    }

    pub fn invoke(&self, ctx: &mut C, key: KeyEvent) -> Option<KeyEvent> {
        (self.action)(ctx, key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHint {
    pub key: Key,
    pub description: String,
    pub dangerous: bool,
}

pub struct KeyActions<C> {
    actions: HashMap<Key, KeyAction<C>>,
}

impl<C> Default for KeyActions<C> {
    fn default() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }
}

impl<C> KeyActions<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: Key, action: KeyAction<C>) {
        self.actions.insert(key, action);
    }

    /// Later bindings replace earlier ones for the same key.
    pub fn bulk(&mut self, bindings: impl IntoIterator<Item = (Key, KeyAction<C>)>) {
        for (key, action) in bindings {
            self.add(key, action);
        }
    }

    pub fn merge(&mut self, other: KeyActions<C>) {
        self.bulk(other.actions);
    }

    pub fn get(&self, key: &Key) -> Option<&KeyAction<C>> {
        self.actions.get(key)
    }

    /// Looks up the binding for a raw terminal event, cloned so the caller
    /// may hand its context mutably to the handler.
    pub fn dispatch(&self, key: KeyEvent) -> Option<KeyAction<C>> {
        self.get(&Key::from(key)).cloned()
    }

    #[cfg(test)]
    pub fn contains(&self, key: &Key) -> bool {
        self.actions.contains_key(key)
    }

    pub fn retain_safe(&mut self) {
        self.actions.retain(|_, action| !action.opts.dangerous);
    }

    pub fn hints(&self) -> Vec<KeyHint> {
        let mut hints = self
            .actions
            .iter()
            .filter(|(_, action)| action.opts.visible)
            .map(|(key, action)| KeyHint {
                key: key.clone(),
                description: action.description.clone(),
                dangerous: action.opts.dangerous,
            })
            .collect::<Vec<_>>();
        hints.sort_by(|left, right| {
            left.dangerous
                .cmp(&right.dangerous)
                .then_with(|| left.key.cmp(&right.key))
        });
        hints
    }
}

pub fn key_event_signature(key: KeyEvent) -> Option<String> {
    let mut shift = key.modifiers.contains(KeyModifiers::SHIFT);
    let key_name = match key.code {
        KeyCode::Char(' ') => "space".to_string(),
        KeyCode::Char('+') => "plus".to_string(),
        KeyCode::Char(c) if c.is_ascii_alphabetic() => {
            shift |= c.is_ascii_uppercase();
            c.to_ascii_lowercase().to_string()
        }
        KeyCode::Char(c) => {
            // Terminals disagree on whether punctuation carries shift.
            shift = false;
            c.to_string()
        }
        KeyCode::Enter => "enter".to_string(),
        KeyCode::Tab => "tab".to_string(),
        KeyCode::BackTab => "backtab".to_string(),
        KeyCode::Backspace => "backspace".to_string(),
        KeyCode::Delete => "delete".to_string(),
        KeyCode::Esc => "esc".to_string(),
        KeyCode::Left => "left".to_string(),
        KeyCode::Right => "right".to_string(),
        KeyCode::Up => "up".to_string(),
        KeyCode::Down => "down".to_string(),
        KeyCode::Home => "home".to_string(),
        KeyCode::End => "end".to_string(),
        KeyCode::PageUp => "pageup".to_string(),
        KeyCode::PageDown => "pagedown".to_string(),
        KeyCode::F(n) => format!("f{n}"),
        _ => return None,
    };

    let mut parts = Vec::new();
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        parts.push("ctrl".to_string());
    }
    if key.modifiers.contains(KeyModifiers::ALT) {
        parts.push("alt".to_string());
    }
    if shift {
        parts.push("shift".to_string());
    }
    parts.push(key_name);
    Some(parts.join("+"))
}
