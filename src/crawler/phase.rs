//! Phases of the crawler state machine
//!
//! A crawler walks through these phases while it resets, replays a path and
//! explores. The phase is tracked for logging and for tests; transitions are
//! driven by [`Crawler`](crate::crawler::Crawler).
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlPhase {
    /// Created, nothing loaded yet
    Init,

    /// Loading the landing URL
    Reset,

    /// The landing page is loaded and the index state is current
    AtInitial,

    /// Choosing the next candidate of the current state
    Exploring,

    /// Firing an event in the browser
    Firing,

    /// Deciding which state the resulting DOM belongs to
    Classifying,

    /// Arrived at a new or already known state
    AtNewOrExisting,

    /// Leaving the current state to look for work elsewhere
    Backtracking,

    /// The crawler has exited
    Done,

    /// The browser failed; the crawler is trying to get it back
    ErrorRecovery,
}

impl CrawlPhase {
    /// Returns true once the crawler will not move any more
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns true while the crawler is interacting with a loaded page
    pub fn is_on_page(&self) -> bool {
        matches!(
            self,
            Self::AtInitial
                | Self::Exploring
                | Self::Firing
                | Self::Classifying
                | Self::AtNewOrExisting
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Reset => "reset",
            Self::AtInitial => "at-initial",
            Self::Exploring => "exploring",
            Self::Firing => "firing",
            Self::Classifying => "classifying",
            Self::AtNewOrExisting => "at-new-or-existing",
            Self::Backtracking => "backtracking",
            Self::Done => "done",
            Self::ErrorRecovery => "error-recovery",
        }
    }
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
