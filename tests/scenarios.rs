//! End-to-end scenarios exercising the painter, checker, and
//! client-request dispatcher together the way a real instrumented
//! program would drive them, one store at a time.

use objgrind::{
    checker::{store_check8, store_check64, WordWidth},
    paint::paint,
    reporter::{ErrorReporter, Reporter, ThreadId},
    request::{dispatch, ClientRequest},
    tag::{PaintTag, Tag},
    tagstore::TagStore,
};

const PAGE_BYTES: usize = 65_536;

#[test]
fn s1_unwritable_guard() {
    let mut store = TagStore::new();
    let mut reporter = Reporter::new();
    let m = 5 * PAGE_BYTES;
    let tid = ThreadId::from(0);

    paint(&mut store, m, 2 * PAGE_BYTES, PaintTag::Unwritable);
    store_check8(&mut store, &mut reporter, tid, m, b'x');
    assert_eq!(
        dispatch(&mut store, ClientRequest::CheckUnwritable { addr: m }),
        1
    );

    // Outside the painted range: no violation.
    store_check8(&mut store, &mut reporter, tid, m + 3 * PAGE_BYTES, b'x');

    paint(&mut store, m, 2 * PAGE_BYTES, PaintTag::NoCheck);
    store_check8(&mut store, &mut reporter, tid, m, b'x');
    assert_eq!(
        dispatch(&mut store, ClientRequest::CheckUnwritable { addr: m }),
        0
    );

    assert_eq!(reporter.errors().len(), 1);
    assert_eq!(usize::from(reporter.errors()[0].address), m);
}

#[test]
fn s2_unreferable_value() {
    let mut store = TagStore::new();
    let mut reporter = Reporter::new();
    let m = 20 * PAGE_BYTES;
    let u = m + PAGE_BYTES;
    let tid = ThreadId::from(0);

    store.set_tag(m, Tag::RefCheck);
    paint(&mut store, u, 8, PaintTag::Unreferable);

    store_check64(&mut store, &mut reporter, tid, m, 2, WordWidth::W64);
    store_check64(&mut store, &mut reporter, tid, m, u as u64, WordWidth::W64);

    store.set_tag(m, Tag::NoCheck);
    store_check64(&mut store, &mut reporter, tid, m, u as u64, WordWidth::W64);

    store.set_tag(m, Tag::RefCheck);
    paint(&mut store, u, 8, PaintTag::NoCheck);
    store_check64(&mut store, &mut reporter, tid, m, u as u64, WordWidth::W64);

    assert_eq!(reporter.errors().len(), 1);
    assert_eq!(usize::from(reporter.errors()[0].address), u);
}

#[test]
fn s3_cross_page_paint() {
    let mut store = TagStore::new();
    let base = 7 * PAGE_BYTES + 100;
    let length = 3 * PAGE_BYTES;

    paint(&mut store, base, length, PaintTag::Unwritable);

    for offset in (0..length).step_by(997) {
        assert_eq!(store.get_tag(base + offset), Tag::Unwritable);
    }
    assert_eq!(store.get_tag(base - 1), Tag::NoCheck);
    assert_eq!(store.get_tag(base + length), Tag::NoCheck);
}

#[test]
fn s4_whole_page_reuse_above_the_primary_region() {
    let mut store = TagStore::new();
    let base = (1usize << 36) & !(PAGE_BYTES - 1);

    paint(&mut store, base, 1 << 20, PaintTag::NoCheck);

    for page in 0..(1 << 20) / PAGE_BYTES {
        assert!(store.is_shared_distinguished(base + page * PAGE_BYTES, PaintTag::NoCheck));
    }
}

#[test]
fn s5_vector_store_split() {
    use objgrind::instrument::{instrument_block, CheckCall, IrExpr, IrStmt, Width};

    let a = 40 * PAGE_BYTES;

    let mut store = TagStore::new();
    let mut reporter = Reporter::new();
    store.set_tag(a, Tag::Unwritable);

    let block = vec![IrStmt::Store {
        addr: IrExpr::new(Width::W64),
        data: IrExpr::new(Width::W128),
    }];
    let checks = instrument_block(&block).remove(0).checks;
    assert_eq!(
        checks,
        vec![
            CheckCall { width: Width::W64, byte_offset: 0, guard: None },
            CheckCall { width: Width::W64, byte_offset: 8, guard: None },
        ]
    );

    let tid = ThreadId::from(0);
    store_check64(&mut store, &mut reporter, tid, a, 0, WordWidth::W64);
    store_check64(&mut store, &mut reporter, tid, a + 8, 0, WordWidth::W64);
    assert_eq!(reporter.errors().len(), 1);

    let mut store = TagStore::new();
    let mut reporter = Reporter::new();
    store.set_tag(a + 16, Tag::Unwritable);

    let block = vec![IrStmt::Store {
        addr: IrExpr::new(Width::W64),
        data: IrExpr::new(Width::W256),
    }];
    let offsets: Vec<u32> = instrument_block(&block)
        .remove(0)
        .checks
        .iter()
        .map(|c| c.byte_offset)
        .collect();
    assert_eq!(offsets, vec![0, 8, 16, 24]);

    for offset in [0, 8, 16, 24] {
        store_check64(&mut store, &mut reporter, tid, a + offset, 0, WordWidth::W64);
    }
    assert_eq!(reporter.errors().len(), 1);
    assert_eq!(usize::from(reporter.errors()[0].address), a + 16);
}

#[test]
fn s6_error_deduplication() {
    let mut store = TagStore::new();
    let mut reporter = Reporter::new();
    let addr = 50 * PAGE_BYTES;
    let tid = ThreadId::from(0);

    paint(&mut store, addr, 8, PaintTag::Unwritable);
    store_check8(&mut store, &mut reporter, tid, addr, b'a');
    store_check8(&mut store, &mut reporter, tid, addr, b'b');

    assert_eq!(reporter.errors().len(), 1);
}
