//! The instrumentation adapter: decides, for one basic block's worth of
//! intermediate-representation statements, which statements need a store
//! check inserted ahead of them and how many checks a single store needs.
//!
//! Everything other than a plain or guarded store passes through
//! untouched. A 128-bit store becomes two 64-bit checks (at byte offsets 0
//! and 8 within the stored value); a 256-bit store becomes four (at 0, 8,
//! 16, 24) — the store itself is never split, only the checks that guard
//! it, since the checker only knows how to look at 8/16/32/64-bit
//! quantities.

/// The width of a store's data (or, for `Addr`, of a guest pointer —
/// irrelevant to which check gets emitted, but carried along so the
/// adapter's model of a statement stays close to a real IR statement's
/// shape).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Width {
    W8,
    W16,
    W32,
    W64,
    W128,
    W256,
}

/// A stand-in for the handful of IR expression shapes the adapter needs to
/// reason about: just enough to carry a width along.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IrExpr {
    pub width: Width,
}

impl IrExpr {
    pub const fn new(width: Width) -> Self {
        IrExpr { width }
    }
}

/// A stand-in for the IR statement kinds `og_instrument` switches on. The
/// unit-like variants are statements the adapter passes through unchanged;
/// `Store`/`StoreG` are the ones it instruments; `Cas` is passed through
/// today even though it stores, matching an acknowledged gap in the
/// original tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IrStmt {
    NoOp,
    AbiHint,
    Put,
    PutI,
    Mbe,
    IMark,
    WrTmp,
    LoadG,
    Dirty,
    Llsc,
    Exit,
    Store { addr: IrExpr, data: IrExpr },
    StoreG { addr: IrExpr, data: IrExpr, guard: IrExpr },
    Cas,
}

/// A single check call the adapter decided to emit ahead of a store: which
/// width to check, at what byte offset into the stored value, and under
/// what guard (if the originating statement was itself conditional).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckCall {
    pub width: Width,
    pub byte_offset: u32,
    pub guard: Option<IrExpr>,
}

/// One statement's worth of instrumented output: the check calls that must
/// run before it (empty for anything but a store), followed by the
/// original statement itself, unmodified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstrumentedStmt {
    pub checks: Vec<CheckCall>,
    pub original: IrStmt,
}

/// Instrument a whole basic block, preserving statement order.
pub fn instrument_block(block: &[IrStmt]) -> Vec<InstrumentedStmt> {
    block.iter().cloned().map(instrument_stmt).collect()
}

/// The seam a real binary translator would implement against: handing
/// this tool one basic block's statements and getting back the
/// instrumented form. `BlockInstrumenter` is the only implementor this
/// crate provides, since it isn't coupled to a real translator.
pub trait HostCallbacks {
    fn translate(&mut self, block: &[IrStmt]) -> Vec<InstrumentedStmt>;
}

#[derive(Copy, Clone, Debug, Default)]
pub struct BlockInstrumenter;

impl HostCallbacks for BlockInstrumenter {
    fn translate(&mut self, block: &[IrStmt]) -> Vec<InstrumentedStmt> {
        instrument_block(block)
    }
}

fn instrument_stmt(stmt: IrStmt) -> InstrumentedStmt {
    let checks = match &stmt {
        IrStmt::Store { data, .. } => checks_for(data.width, None),
        IrStmt::StoreG { data, guard, .. } => checks_for(data.width, Some(*guard)),
        _ => Vec::new(),
    };
    InstrumentedStmt {
        checks,
        original: stmt,
    }
}

fn checks_for(width: Width, guard: Option<IrExpr>) -> Vec<CheckCall> {
    match width {
        Width::W128 => vec![
            CheckCall { width: Width::W64, byte_offset: 0, guard },
            CheckCall { width: Width::W64, byte_offset: 8, guard },
        ],
        Width::W256 => (0..4)
            .map(|lane| CheckCall {
                width: Width::W64,
                byte_offset: lane * 8,
                guard,
            })
            .collect(),
        narrow => vec![CheckCall {
            width: narrow,
            byte_offset: 0,
            guard,
        }],
    }
}
