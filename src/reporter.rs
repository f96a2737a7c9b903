//! Tool errors: the two kinds of access-discipline violation the checker
//! can report, deduplicated the way Valgrind's own error manager
//! deduplicates tool errors before they ever reach a human.

use std::collections::HashSet;

use crate::deps::{derive_more, log, serde};

/// A thread identifier, carried through from the instrumented store site to
/// the reported error. Newtype'd so it can't be confused with an address.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ThreadId(u32);

/// A guest address carried on a reported error. Newtype'd for the same
/// reason `ThreadId` is: an address and a thread id are both bare integers
/// underneath, and the type system should not let them get crossed.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
    derive_more::LowerHex,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ToolAddress(usize);

/// One-shot warnings: a `lazy_static!` + `Once` trick so a noisy condition
/// (an unrecognized request code, say) logs once per process instead of
/// once per occurrence.
#[macro_export]
macro_rules! warn_once {
    ($name:ident; $($arg:tt)+) => {{
        use $crate::deps::lazy_static::lazy_static;
        use $crate::deps::log::warn;

        lazy_static! {
            static ref $name: ::std::sync::Once = ::std::sync::Once::new();
        }

        (&*($name)).call_once(|| {
            warn!("[WARN_ONCE] {}", format_args!($($arg)*))
        })
    }};
}

/// The two ways a store can violate the discipline this tool enforces.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ToolErrorKind {
    UnwritableErr,
    UnreferableErr,
}

impl ToolErrorKind {
    /// The name this error kind is known by in suppression files and in
    /// plain-text/XML output — matches `og_get_error_name`.
    pub const fn name(self) -> &'static str {
        match self {
            ToolErrorKind::UnwritableErr => "UnwritableMemoryError",
            ToolErrorKind::UnreferableErr => "UnreferableError",
        }
    }

    pub fn from_suppression_name(name: &str) -> Option<Self> {
        match name {
            "UnwritableMemoryError" => Some(ToolErrorKind::UnwritableErr),
            "UnreferableError" => Some(ToolErrorKind::UnreferableErr),
            _ => None,
        }
    }
}

/// A single recorded violation. `backtrace_id` stands in for the call-stack
/// `ExeContext` the original tool attaches to every error; this crate has
/// no real unwinder to capture one from, so `Reporter` hands out a plain
/// monotonic id instead, stable for the lifetime of one `Reporter`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub address: ToolAddress,
    pub tid: ThreadId,
    pub backtrace_id: u32,
}

impl std::fmt::Debug for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ToolError")
            .field("kind", &self.kind)
            .field("address", &crate::fmt::Hex(&usize::from(self.address)))
            .field("tid", &self.tid)
            .field("backtrace_id", &self.backtrace_id)
            .finish()
    }
}

impl ToolError {
    fn context_key(&self) -> (ToolErrorKind, usize) {
        (self.kind, self.address.into())
    }
}

/// Where the checker sends violations it finds. `record` is expected to
/// deduplicate: repeated violations at the same address are the common
/// case (a tight loop hammering the same bad store) and are not
/// interesting to report more than once.
pub trait ErrorReporter {
    fn record(&mut self, tid: ThreadId, kind: ToolErrorKind, address: usize);

    fn errors(&self) -> &[ToolError];

    fn matches_suppression(&self, name: &str, kind: ToolErrorKind) -> bool {
        ToolErrorKind::from_suppression_name(name) == Some(kind)
    }

    fn pretty_print(&self, error: &ToolError, xml: bool) -> String {
        if xml {
            format!(
                "<error><kind>{}</kind><address>{:#x}</address><tid>{}</tid></error>",
                error.kind.name(),
                error.address,
                error.tid
            )
        } else {
            format!(
                "{} at address {:#x} (thread {})",
                error.kind.name(),
                error.address,
                error.tid
            )
        }
    }
}

/// The default reporter: keeps every distinct `(kind, address)` violation
/// once, in the order first seen, the same equivalence `og_compare_error_contexts`
/// uses to decide two contexts describe the same error.
#[derive(Debug, Default)]
pub struct Reporter {
    errors: Vec<ToolError>,
    seen: HashSet<(ToolErrorKind, usize)>,
    next_backtrace_id: u32,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ErrorReporter for Reporter {
    fn record(&mut self, tid: ThreadId, kind: ToolErrorKind, address: usize) {
        if self.seen.insert((kind, address)) {
            let backtrace_id = self.next_backtrace_id;
            self.next_backtrace_id += 1;
            log::debug!(
                "recording {} at {:#x} (thread {})",
                kind.name(),
                address,
                tid
            );
            self.errors.push(ToolError {
                kind,
                address: address.into(),
                tid,
                backtrace_id,
            });
        } else {
            log::debug!("suppressing duplicate {} at {:#x}", kind.name(), address);
        }
    }

    fn errors(&self) -> &[ToolError] {
        &self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_violations_at_the_same_address_are_deduplicated() {
        let mut reporter = Reporter::new();
        reporter.record(ThreadId::from(1), ToolErrorKind::UnwritableErr, 0x1000);
        reporter.record(ThreadId::from(1), ToolErrorKind::UnwritableErr, 0x1000);
        reporter.record(ThreadId::from(2), ToolErrorKind::UnwritableErr, 0x1000);
        assert_eq!(reporter.errors().len(), 1);
    }

    #[test]
    fn distinct_kinds_at_the_same_address_are_both_kept() {
        let mut reporter = Reporter::new();
        reporter.record(ThreadId::from(1), ToolErrorKind::UnwritableErr, 0x1000);
        reporter.record(ThreadId::from(1), ToolErrorKind::UnreferableErr, 0x1000);
        assert_eq!(reporter.errors().len(), 2);
    }

    #[test]
    fn suppression_names_round_trip() {
        assert_eq!(
            ToolErrorKind::from_suppression_name("UnwritableMemoryError"),
            Some(ToolErrorKind::UnwritableErr)
        );
        assert_eq!(ToolErrorKind::from_suppression_name("bogus"), None);
    }
}
