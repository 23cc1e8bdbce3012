//! Modal dialogs. Each one is consumed by the key that resolves it, so an
//! outcome fires at most once.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::transfer::{DEFAULT_TX_RETRIES, Direction, TransferRequest};

pub enum Step<D, T> {
    Pending(D),
    Done(T),
}

pub struct Confirmation<T> {
    pub title: String,
    pub message: String,
    ack: Option<String>,
    input: String,
    on_accept: T,
    on_cancel: T,
}

impl<T> Confirmation<T> {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        on_accept: T,
        on_cancel: T,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            ack: None,
            input: String::new(),
            on_accept,
            on_cancel,
        }
    }

    /// Requires the phrase to be typed verbatim before accepting.
    pub fn with_ack(mut self, phrase: impl Into<String>) -> Self {
        self.ack = Some(phrase.into());
        self
    }

    pub fn ack(&self) -> Option<&str> {
        self.ack.as_deref()
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn can_accept(&self) -> bool {
        self.ack
            .as_deref()
            .is_none_or(|phrase| phrase == self.input)
    }

    pub fn accept(self) -> Result<T, Self> {
        if self.can_accept() {
            Ok(self.on_accept)
        } else {
            Err(self)
        }
    }

    pub fn cancel(self) -> T {
        self.on_cancel
    }

    pub fn handle_key(mut self, key: KeyEvent) -> Step<Self, T> {
        match key.code {
            KeyCode::Esc => Step::Done(self.cancel()),
            KeyCode::Enter => match self.accept() {
                Ok(outcome) => Step::Done(outcome),
                Err(pending) => Step::Pending(pending),
            },
            KeyCode::Backspace if self.ack.is_some() => {
                self.input.pop();
                Step::Pending(self)
            }
            KeyCode::Char(c) if self.ack.is_some() => {
                if !key.modifiers.contains(KeyModifiers::CONTROL) {
                    self.input.push(c);
                }
                Step::Pending(self)
            }
            KeyCode::Char('y') | KeyCode::Char('Y') => Step::Done(self.on_accept),
            KeyCode::Char('n') | KeyCode::Char('N') => Step::Done(self.cancel()),
            _ => Step::Pending(self),
        }
    }
}

pub struct Picker<T> {
    pub title: String,
    pub items: Vec<String>,
    pub selected: usize,
    on_select: Box<dyn FnOnce(String) -> T + Send>,
}

impl<T> Picker<T> {
    pub fn new<F>(title: impl Into<String>, items: Vec<String>, on_select: F) -> Self
    where
        F: FnOnce(String) -> T + Send + 'static,
    {
        Self {
            title: title.into(),
            items,
            selected: 0,
            on_select: Box::new(on_select),
        }
    }

    /// Resolves to `None` when dismissed.
    pub fn handle_key(mut self, key: KeyEvent) -> Step<Self, Option<T>> {
        match key.code {
            KeyCode::Esc => Step::Done(None),
            KeyCode::Down | KeyCode::Char('j') => {
                if !self.items.is_empty() {
                    self.selected = (self.selected + 1).min(self.items.len() - 1);
                }
                Step::Pending(self)
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
                Step::Pending(self)
            }
            KeyCode::Char(c) if c.is_ascii_digit() => {
                let index = c.to_digit(10).unwrap_or(0) as usize;
                if index < self.items.len() {
                    self.selected = index;
                    self.choose()
                } else {
                    Step::Pending(self)
                }
            }
            KeyCode::Enter => self.choose(),
            _ => Step::Pending(self),
        }
    }

    fn choose(mut self) -> Step<Self, Option<T>> {
        if self.selected >= self.items.len() {
            return Step::Done(None);
        }
        let item = self.items.swap_remove(self.selected);
        Step::Done(Some((self.on_select)(item)))
    }
}

/// Single-line text input, such as a `local:remote` port mapping.
pub struct Prompt<T> {
    pub title: String,
    pub input: String,
    on_submit: Box<dyn FnOnce(String) -> T + Send>,
}

impl<T> Prompt<T> {
    pub fn new<F>(title: impl Into<String>, initial: impl Into<String>, on_submit: F) -> Self
    where
        F: FnOnce(String) -> T + Send + 'static,
    {
        Self {
            title: title.into(),
            input: initial.into(),
            on_submit: Box::new(on_submit),
        }
    }

    pub fn handle_key(mut self, key: KeyEvent) -> Step<Self, Option<T>> {
        match key.code {
            KeyCode::Esc => Step::Done(None),
            KeyCode::Enter => {
                let input = self.input.trim().to_string();
                Step::Done(Some((self.on_submit)(input)))
            }
            KeyCode::Backspace => {
                self.input.pop();
                Step::Pending(self)
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.input.push(c);
                Step::Pending(self)
            }
            _ => Step::Pending(self),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TransferField {
    From,
    To,
    Container,
    Download,
    NoPreserve,
    Retries,
}

impl TransferField {
    const ORDER: [Self; 6] = [
        Self::From,
        Self::To,
        Self::Container,
        Self::Download,
        Self::NoPreserve,
        Self::Retries,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::From => "From",
            Self::To => "To",
            Self::Container => "Container",
            Self::Download => "Download",
            Self::NoPreserve => "NoPreserve",
            Self::Retries => "Retries",
        }
    }

    fn next(self, backwards: bool) -> Self {
        let index = Self::ORDER
            .iter()
            .position(|field| *field == self)
            .unwrap_or(0);
        let len = Self::ORDER.len();
        let next = if backwards {
            (index + len - 1) % len
        } else {
            (index + 1) % len
        };
        Self::ORDER[next]
    }
}

/// Form collecting a [`TransferRequest`] for one pod.
#[derive(Debug, Clone)]
pub struct TransferForm {
    pub path: String,
    pub from: String,
    pub to: String,
    pub container: String,
    pub containers: Vec<String>,
    pub download: bool,
    pub no_preserve: bool,
    pub retries: String,
    pub focus: TransferField,
}

impl TransferForm {
    pub fn new(path: &str, containers: Vec<String>, retries: u32) -> Self {
        Self {
            path: path.to_string(),
            from: format!("{path}:"),
            to: String::new(),
            container: containers.first().cloned().unwrap_or_default(),
            containers,
            download: true,
            no_preserve: false,
            retries: retries.to_string(),
            focus: TransferField::From,
        }
    }

    pub fn fields(&self) -> Vec<(TransferField, String)> {
        TransferField::ORDER
            .iter()
            .map(|field| {
                let value = match field {
                    TransferField::From => self.from.clone(),
                    TransferField::To => self.to.clone(),
                    TransferField::Container => self.container.clone(),
                    TransferField::Download => checkbox(self.download),
                    TransferField::NoPreserve => checkbox(self.no_preserve),
                    TransferField::Retries => self.retries.clone(),
                };
                (*field, value)
            })
            .collect()
    }

    pub fn request(&self) -> TransferRequest {
        TransferRequest {
            from: self.from.trim().to_string(),
            to: self.to.trim().to_string(),
            direction: if self.download {
                Direction::Download
            } else {
                Direction::Upload
            },
            container: self.container.trim().to_string(),
            no_preserve: self.no_preserve,
            retries: self.retries.trim().parse().unwrap_or(DEFAULT_TX_RETRIES),
        }
    }

    /// Enter submits; Esc dismisses.
    pub fn handle_key(mut self, key: KeyEvent) -> Step<Self, Option<TransferRequest>> {
        match key.code {
            KeyCode::Esc => return Step::Done(None),
            KeyCode::Enter => return Step::Done(Some(self.request())),
            KeyCode::Tab | KeyCode::Down => self.focus = self.focus.next(false),
            KeyCode::BackTab | KeyCode::Up => self.focus = self.focus.next(true),
            KeyCode::Char(' ') if self.focus == TransferField::Download => self.toggle_direction(),
            KeyCode::Char(' ') if self.focus == TransferField::NoPreserve => {
                self.no_preserve = !self.no_preserve;
            }
            KeyCode::Left | KeyCode::Right if self.focus == TransferField::Container => {
                self.cycle_container(key.code == KeyCode::Left);
            }
            KeyCode::Backspace => {
                if let Some(value) = self.text_field() {
                    value.pop();
                }
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                if self.focus == TransferField::Retries && !c.is_ascii_digit() {
                    return Step::Pending(self);
                }
                if let Some(value) = self.text_field() {
                    value.push(c);
                }
            }
            _ => {}
        }
        Step::Pending(self)
    }

    fn text_field(&mut self) -> Option<&mut String> {
        match self.focus {
            TransferField::From => Some(&mut self.from),
            TransferField::To => Some(&mut self.to),
            TransferField::Container => Some(&mut self.container),
            TransferField::Retries => Some(&mut self.retries),
            TransferField::Download | TransferField::NoPreserve => None,
        }
    }

    /// Flips direction and swaps the endpoints so the pod side moves along.
    fn toggle_direction(&mut self) {
        self.download = !self.download;
        std::mem::swap(&mut self.from, &mut self.to);
    }

    fn cycle_container(&mut self, backwards: bool) {
        if self.containers.is_empty() {
            return;
        }
        let len = self.containers.len();
        let index = self
            .containers
            .iter()
            .position(|name| *name == self.container)
            .unwrap_or(0);
        let next = if backwards {
            (index + len - 1) % len
        } else {
            (index + 1) % len
        };
        self.container = self.containers[next].clone();
    }
}

fn checkbox(value: bool) -> String {
    if value { "[x]" } else { "[ ]" }.to_string()
}
