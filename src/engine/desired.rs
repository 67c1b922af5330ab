//! # Desired State
//!
//! Decides whether a managed object should exist for the current pass.
//!
//! Every object is gated by zero or more feature switches taken from the parent
//! specification. Switches combine with AND semantics: an object is present only
//! when every switch guarding it resolves to on. Each switch carries its own
//! default, so a switch left unset in the parent still participates in the
//! composition.

use std::fmt;

/// Whether an object should exist after the pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DesiredState {
    Present,
    Absent,
}

impl DesiredState {
    #[must_use]
    pub fn from_bool(present: bool) -> Self {
        if present {
            Self::Present
        } else {
            Self::Absent
        }
    }

    /// AND composition; `Absent` dominates.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::Present, Self::Present) => Self::Present,
            _ => Self::Absent,
        }
    }

    #[must_use]
    pub fn is_present(self) -> bool {
        self == Self::Present
    }
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => write!(f, "present"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

/// A feature switch as read from a parent specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flag {
    value: Option<bool>,
    default: bool,
}

impl Flag {
    /// Switch with an explicit default used when the parent leaves it unset
    #[must_use]
    pub fn new(value: Option<bool>, default: bool) -> Self {
        Self { value, default }
    }

    /// Switch that defaults to on
    #[must_use]
    pub fn default_on(value: Option<bool>) -> Self {
        Self::new(value, true)
    }

    /// Switch that defaults to off
    #[must_use]
    pub fn default_off(value: Option<bool>) -> Self {
        Self::new(value, false)
    }

    #[must_use]
    pub fn is_on(self) -> bool {
        self.value.unwrap_or(self.default)
    }

    #[must_use]
    pub fn state(self) -> DesiredState {
        DesiredState::from_bool(self.is_on())
    }
}

/// Resolve the desired state of an object from the switches guarding it.
///
/// An object with no switches is always present.
pub fn resolve<I>(flags: I) -> DesiredState
where
    I: IntoIterator<Item = Flag>,
{
    flags
        .into_iter()
        .fold(DesiredState::Present, |acc, flag| acc.and(flag.state()))
}
