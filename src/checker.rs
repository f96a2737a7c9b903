//! The store checker: four size-specialized entry points, one per store
//! width the instrumentation adapter ever emits a check for. Each checks
//! the `Unwritable` discipline directly; the 32-bit and 64-bit entry
//! points additionally check the `RefCheck` discipline, since only a
//! register wide enough to plausibly hold a pointer is worth checking as
//! one.

use crate::{
    reporter::{ErrorReporter, ThreadId, ToolErrorKind},
    tag::Tag,
    tagstore::TagStore,
};

/// Whether the host this tool is instrumenting for has 32-bit or 64-bit
/// general-purpose registers. On a 32-bit host a 64-bit store arrives as
/// two 32-bit checks against the same address, one per data half (low,
/// then high); only the `Unwritable` half of the check runs on either,
/// since a 32-bit register is assumed too narrow to hold a pointer worth
/// refchecking.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WordWidth {
    W32,
    W64,
}

pub fn store_check8(
    store: &mut TagStore,
    reporter: &mut dyn ErrorReporter,
    tid: ThreadId,
    addr: usize,
    _data: u8,
) {
    check_unwritable(store, reporter, tid, addr);
}

pub fn store_check16(
    store: &mut TagStore,
    reporter: &mut dyn ErrorReporter,
    tid: ThreadId,
    addr: usize,
    _data: u16,
) {
    check_unwritable(store, reporter, tid, addr);
}

pub fn store_check32(
    store: &mut TagStore,
    reporter: &mut dyn ErrorReporter,
    tid: ThreadId,
    addr: usize,
    data: u32,
) {
    if !check_unwritable(store, reporter, tid, addr) {
        check_refcheck(store, reporter, tid, addr, data as usize);
    }
}

pub fn store_check64(
    store: &mut TagStore,
    reporter: &mut dyn ErrorReporter,
    tid: ThreadId,
    addr: usize,
    data: u64,
    word_width: WordWidth,
) {
    match word_width {
        WordWidth::W32 => {
            check_unwritable(store, reporter, tid, addr);
            check_unwritable(store, reporter, tid, addr);
        }
        WordWidth::W64 => {
            if !check_unwritable(store, reporter, tid, addr) {
                check_refcheck(store, reporter, tid, addr, data as usize);
            }
        }
    }
}

/// Returns whether the byte at `addr` was tagged `Unwritable` (and thus
/// already reported), so 32/64-bit callers can skip the mutually exclusive
/// refcheck.
fn check_unwritable(
    store: &mut TagStore,
    reporter: &mut dyn ErrorReporter,
    tid: ThreadId,
    addr: usize,
) -> bool {
    if store.get_tag(addr) == Tag::Unwritable {
        reporter.record(tid, ToolErrorKind::UnwritableErr, addr);
        true
    } else {
        false
    }
}

fn check_refcheck(
    store: &mut TagStore,
    reporter: &mut dyn ErrorReporter,
    tid: ThreadId,
    addr: usize,
    data: usize,
) {
    if store.get_tag(addr) == Tag::RefCheck && store.get_tag(data) == Tag::Unreferable {
        reporter.record(tid, ToolErrorKind::UnreferableErr, data);
    }
}
