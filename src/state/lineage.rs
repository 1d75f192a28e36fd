use std::fmt;

/// Pagination state of one lineage
///
/// # State Transitions
///
/// ```text
/// Fetching -> Extracted -> NextFound -> Fetching (next page)
///                       \-> Exhausted
/// Fetching -> Exhausted (the page failed terminally)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceState {
    /// A page of the lineage is being fetched
    Fetching,

    /// The current page was fetched and its record extracted
    Extracted,

    /// A next page was found and enqueued
    NextFound,

    /// The lineage has no further pages
    Exhausted,
}

impl SequenceState {
    /// Returns true if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SequenceState::Exhausted)
    }

    /// Returns true if moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: SequenceState) -> bool {
        use SequenceState::*;
        matches!(
            (self, next),
            (Fetching, Extracted)
                | (Fetching, Exhausted)
                | (Extracted, NextFound)
                | (Extracted, Exhausted)
                | (NextFound, Fetching)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceState::Fetching => "fetching",
            SequenceState::Extracted => "extracted",
            SequenceState::NextFound => "next_found",
            SequenceState::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for SequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
