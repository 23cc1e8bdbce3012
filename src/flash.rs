use std::time::{Duration, Instant};
use tracing::{info, warn};

const FLASH_TTL: Duration = Duration::from_secs(6);

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FlashLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
struct FlashMessage {
    level: FlashLevel,
    text: String,
    posted_at: Instant,
}

/// The one-line status area under the table.
#[derive(Debug, Clone, Default)]
pub struct Flash {
    current: Option<FlashMessage>,
}

impl Flash {
    pub fn info(&mut self, text: impl Into<String>) {
        self.post(FlashLevel::Info, text.into());
    }

    pub fn warn(&mut self, text: impl Into<String>) {
        self.post(FlashLevel::Warn, text.into());
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.post(FlashLevel::Error, text.into());
    }

    pub fn err(&mut self, error: &anyhow::Error) {
        self.post(FlashLevel::Error, compact_error(error));
    }

    pub fn message(&self) -> Option<(FlashLevel, &str)> {
        self.current
            .as_ref()
            .map(|message| (message.level, message.text.as_str()))
    }

    pub fn expire(&mut self, now: Instant) {
        if self
            .current
            .as_ref()
            .is_some_and(|message| now.duration_since(message.posted_at) >= FLASH_TTL)
        {
            self.current = None;
        }
    }

    fn post(&mut self, level: FlashLevel, text: String) {
        match level {
            FlashLevel::Error | FlashLevel::Warn => warn!("{text}"),
            FlashLevel::Info => info!("{text}"),
        }
        self.current = Some(FlashMessage {
            level,
            text,
            posted_at: Instant::now(),
        });
    }
}

pub fn compact_error(error: &anyhow::Error) -> String {
    let mut out = Vec::new();
    for (index, cause) in error.chain().enumerate() {
        if index == 0 {
            out.push(cause.to_string());
        } else if index <= 2 {
            out.push(format!("caused by: {cause}"));
        } else {
            break;
        }
    }

    out.join(" | ")
}
