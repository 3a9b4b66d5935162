//! # Highlight Colours
//!
//! The colour service lets any client pick the colour used to paint log
//! messages. The choice is process-wide: every handler formats through the
//! same [`ColorState`], and the last successful change wins.

use std::sync::{Mutex, PoisonError};

use colored::{Color, Colorize};

/// # Highlight
///
/// The fixed set of colour names a client may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Highlight {
    Red,
    Blue,
    Yellow,
    Green,
    #[default]
    White,
    Cyan,
}

impl Highlight {
    /// Every recognized colour, in the order they are advertised.
    pub const ALL: [Highlight; 6] = [
        Highlight::Red,
        Highlight::Blue,
        Highlight::Yellow,
        Highlight::Green,
        Highlight::White,
        Highlight::Cyan,
    ];

    /// Looks up a colour by its exact lower-case name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.name() == name)
    }

    /// Whether `name` is one of the recognized colours.
    pub fn is_recognized(name: &str) -> bool {
        Self::from_name(name).is_some()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Highlight::Red => "red",
            Highlight::Blue => "blue",
            Highlight::Yellow => "yellow",
            Highlight::Green => "green",
            Highlight::White => "white",
            Highlight::Cyan => "cyan",
        }
    }

    fn color(&self) -> Color {
        match self {
            Highlight::Red => Color::Red,
            Highlight::Blue => Color::Blue,
            Highlight::Yellow => Color::Yellow,
            Highlight::Green => Color::Green,
            Highlight::White => Color::White,
            Highlight::Cyan => Color::Cyan,
        }
    }

    /// Wraps `text` in this colour's terminal escape codes.
    pub fn paint(&self, text: &str) -> String {
        text.color(self.color()).to_string()
    }
}

/// # Color State
///
/// The current highlight colour, shared by every connection handler and the
/// logger that formats their records.
#[derive(Debug, Default)]
pub struct ColorState {
    current: Mutex<Highlight>,
}

impl ColorState {
    pub fn new(initial: Highlight) -> Self {
        Self {
            current: Mutex::new(initial),
        }
    }

    pub fn get(&self) -> Highlight {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, highlight: Highlight) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = highlight;
    }
}
