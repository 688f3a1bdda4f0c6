//! Event logging for the deflattening pipeline.
//!
//! Every rewrite the engine performs, and every decision it takes about a
//! function (blacklisting, dispatcher recognition, recovered conditionals),
//! is recorded as an [`Event`] in an [`EventLog`]. Hosts can inspect the log
//! for debugging or ignore it entirely.
//!
//! # Architecture
//!
//! - [`Event`] - A single recorded event
//! - [`EventLog`] - Append-only, thread-safe collection with queries and summaries
//! - [`EventBuilder`] - Fluent API for creating events
//! - [`DerivedStats`] - Counters computed from a log
//!
//! # Example
//!
//! ```rust
//! use deflatten::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::GotoCollapsed)
//!     .at(0x401000, 3)
//!     .message("block 3 goto @5 -> @9");
//! log.info("analysis started");
//!
//! assert_eq!(log.count_kind(EventKind::GotoCollapsed), 1);
//! assert_eq!(log.summary(), "1 goto collapsed");
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

/// Categories of events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A flattened block was reconnected to its real successor.
    ControlFlowRestructured,
    /// A goto through a chain of forwarding blocks was shortened.
    GotoCollapsed,
    /// A control-flow edge was moved to a different block.
    EdgeRedirected,
    /// An instruction was turned into a `nop`.
    InstructionRemoved,
    /// An unreachable block was removed.
    BlockRemoved,
    /// A two-way conditional hidden behind the dispatcher was recovered.
    ConditionalRecovered,

    /// A dispatcher block and its state variables were identified.
    DispatcherIdentified,
    /// A function was marked as not flattened.
    FunctionBlacklisted,
    /// A function was confirmed as flattened.
    FunctionWhitelisted,

    /// Informational message.
    Info,
    /// Warning (something unexpected but recoverable).
    Warning,
    /// Error (something failed).
    Error,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::ControlFlowRestructured => "control flow restructured",
            Self::GotoCollapsed => "goto collapsed",
            Self::EdgeRedirected => "edge redirected",
            Self::InstructionRemoved => "instruction removed",
            Self::BlockRemoved => "block removed",
            Self::ConditionalRecovered => "conditional recovered",
            Self::DispatcherIdentified => "dispatcher identified",
            Self::FunctionBlacklisted => "function blacklisted",
            Self::FunctionWhitelisted => "function whitelisted",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Returns true if this event represents a code transformation.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::ControlFlowRestructured
                | Self::GotoCollapsed
                | Self::EdgeRedirected
                | Self::InstructionRemoved
                | Self::BlockRemoved
                | Self::ConditionalRecovered
        )
    }

    /// Returns true if this is a diagnostic event (info/warning/error).
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Info | Self::Warning | Self::Error)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// Entry address of the function the event concerns, if any.
    pub function: Option<u64>,
    /// Block serial within the function.
    pub location: Option<usize>,
    /// Human-readable description.
    pub message: String,
    /// Name of the pass that emitted the event.
    pub pass: Option<String>,
}

impl Event {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            function: None,
            location: None,
            message: message.into(),
            pass: None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(function) = self.function {
            write!(f, " {function:#x}")?;
        }
        if let Some(location) = self.location {
            write!(f, " @{location}")?;
        }
        write!(f, " {}", self.message)
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is added to the log when the
/// builder is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    function: Option<u64>,
    location: Option<usize>,
    message: Option<String>,
    pass: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            function: None,
            location: None,
            message: None,
            pass: None,
        }
    }

    /// Sets the function and block where the event occurred.
    #[must_use]
    pub fn at(mut self, function: u64, block: usize) -> Self {
        self.function = Some(function);
        self.location = Some(block);
        self
    }

    /// Sets only the function, for function-level events.
    #[must_use]
    pub fn function(mut self, function: u64) -> Self {
        self.function = Some(function);
        self
    }

    /// Sets the block serial.
    #[must_use]
    pub fn location(mut self, block: usize) -> Self {
        self.location = Some(block);
        self
    }

    /// Sets a custom message describing the event.
    #[must_use]
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Associates this event with a specific pass.
    #[must_use]
    pub fn pass(mut self, pass_name: impl Into<String>) -> Self {
        self.pass = Some(pass_name.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        self.log.events.push(Event {
            kind: self.kind,
            function: self.function.take(),
            location: self.location.take(),
            message,
            pass: self.pass.take(),
        });
    }
}

/// Collection of events from deflattening.
///
/// Statistics are derived from the events rather than tracked separately.
/// Events can be appended concurrently through shared references, so one
/// log can serve a whole parallel batch.
#[derive(Debug, Default)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        self.iter().cloned().collect()
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts building a new event of the given kind.
    ///
    /// The event is added when the builder is dropped.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Info, message));
    }

    /// Records a warning message.
    pub fn warn(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Warning, message));
    }

    /// Records an error message.
    pub fn error(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Error, message));
    }

    /// Appends copies of every event in `other`.
    pub fn merge(&self, other: &EventLog) {
        for event in other {
            self.events.push(event.clone());
        }
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.iter().any(|e| e.kind == kind)
    }

    /// Returns true if any of the given event kinds exist.
    #[must_use]
    pub fn has_any(&self, kinds: &[EventKind]) -> bool {
        self.iter().any(|e| kinds.contains(&e.kind))
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.filter_kind(kind).count()
    }

    /// Returns an iterator over all events in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Returns an iterator over events of a specific kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// Returns an iterator over events for the function at `entry_ea`.
    pub fn filter_function(&self, entry_ea: u64) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.function == Some(entry_ea))
    }

    /// Returns an iterator over transformation events only.
    pub fn transformations(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(|e| e.kind.is_transformation())
    }

    /// Returns an iterator over diagnostic events only.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(|e| e.kind.is_diagnostic())
    }

    /// Returns an iterator over warning events.
    pub fn warnings(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Warning)
    }

    /// Returns an iterator over error events.
    pub fn errors(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Error)
    }

    /// Counts events grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for event in self {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the number of transformation events.
    #[must_use]
    pub fn transformation_count(&self) -> usize {
        self.transformations().count()
    }

    /// Returns the number of distinct functions that were transformed.
    #[must_use]
    pub fn functions_affected(&self) -> usize {
        self.transformations()
            .filter_map(|e| e.function)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Generates a human-readable summary of the transformations.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut parts: Vec<String> = self
            .count_by_kind()
            .iter()
            .filter(|(k, _)| k.is_transformation())
            .map(|(kind, count)| format!("{count} {kind}"))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a Event;
    type IntoIter = Box<dyn Iterator<Item = &'a Event> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

impl FromIterator<Event> for EventLog {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        let log = Self::new();
        for event in iter {
            log.events.push(event);
        }
        log
    }
}

/// Statistics derived from an [`EventLog`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedStats {
    /// Number of functions with at least one transformation.
    pub functions_transformed: usize,
    /// Number of flattened blocks reconnected.
    pub blocks_reconnected: usize,
    /// Number of conditionals recovered.
    pub conditionals_recovered: usize,
    /// Number of gotos collapsed.
    pub gotos_collapsed: usize,
    /// Number of instructions turned into `nop`s.
    pub instructions_removed: usize,
    /// Number of unreachable blocks removed.
    pub blocks_removed: usize,
    /// Number of dispatchers identified.
    pub dispatchers: usize,
    /// Number of functions blacklisted.
    pub blacklisted: usize,
    /// Number of warnings.
    pub warnings: usize,
    /// Number of errors.
    pub errors: usize,
}

impl DerivedStats {
    /// Computes statistics from an event log.
    #[must_use]
    pub fn from_log(log: &EventLog) -> Self {
        let counts = log.count_by_kind();
        let get = |kind: EventKind| counts.get(&kind).copied().unwrap_or(0);

        Self {
            functions_transformed: log.functions_affected(),
            blocks_reconnected: get(EventKind::ControlFlowRestructured),
            conditionals_recovered: get(EventKind::ConditionalRecovered),
            gotos_collapsed: get(EventKind::GotoCollapsed),
            instructions_removed: get(EventKind::InstructionRemoved),
            blocks_removed: get(EventKind::BlockRemoved),
            dispatchers: get(EventKind::DispatcherIdentified),
            blacklisted: get(EventKind::FunctionBlacklisted),
            warnings: get(EventKind::Warning),
            errors: get(EventKind::Error),
        }
    }

    /// Generates a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.functions_transformed > 0 {
            parts.push(format!("{} functions", self.functions_transformed));
        }
        if self.blocks_reconnected > 0 {
            parts.push(format!("{} blocks reconnected", self.blocks_reconnected));
        }
        if self.conditionals_recovered > 0 {
            parts.push(format!("{} conditionals", self.conditionals_recovered));
        }
        if self.gotos_collapsed > 0 {
            parts.push(format!("{} gotos collapsed", self.gotos_collapsed));
        }
        if self.blocks_removed > 0 {
            parts.push(format!("{} blocks removed", self.blocks_removed));
        }
        if self.blacklisted > 0 {
            parts.push(format!("{} blacklisted", self.blacklisted));
        }
        if self.errors > 0 {
            parts.push(format!("{} errors", self.errors));
        }

        if parts.is_empty() {
            "no changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

impl fmt::Display for DerivedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}
