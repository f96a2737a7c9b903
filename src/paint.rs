//! The range painter: bulk-sets the tag of every byte in `[base, base +
//! length)` to a single [`PaintTag`], the operation behind every
//! `MAKE_*` client request.
//!
//! A range is split into at most three pieces — a possibly-partial leading
//! page, zero or more full pages, and a possibly-partial trailing page —
//! so that the common case of painting whole pages never touches a shadow
//! byte individually: it just swaps in a shared distinguished page.

use crate::{
    deps::log::warn,
    tag::PaintTag,
    tagstore::{PageRef, TagStore, PAGE_BYTES},
};

/// Above this many bytes, a verbose, non-XML-mode paint logs a warning —
/// such a large single request is unusual enough to be worth flagging.
const LARGE_RANGE_WARNING_BYTES: usize = 256 * 1024 * 1024;

const fn start_of_page(addr: usize) -> usize {
    addr & !(PAGE_BYTES - 1)
}

/// Set the tag of every byte in `[base, base + length)` to `tag`.
pub fn paint(store: &mut TagStore, base: usize, length: usize, tag: PaintTag) {
    if length == 0 {
        return;
    }

    if length > LARGE_RANGE_WARNING_BYTES && store.verbose() && !store.xml() {
        warn!(
            "painting a very large range: {} bytes at {:#x} as {}",
            length,
            base,
            tag.mnemonic()
        );
    }

    let mut addr = base;
    let mut remaining = length;
    let target = store.distinguished_page_for(tag);

    let room_in_leading_page = start_of_page(addr) + PAGE_BYTES - addr;
    let leading_len = remaining.min(room_in_leading_page);
    if leading_len > 0 {
        paint_page_fragment(store, &target, tag, &mut addr, &mut remaining, leading_len);
    }

    while remaining >= PAGE_BYTES {
        debug_assert_eq!(addr & (PAGE_BYTES - 1), 0);
        store.replace_whole_page(addr, target.clone());
        addr += PAGE_BYTES;
        remaining -= PAGE_BYTES;
    }

    if remaining > 0 {
        debug_assert_eq!(addr & (PAGE_BYTES - 1), 0);
        let fragment_len = remaining;
        paint_page_fragment(store, &target, tag, &mut addr, &mut remaining, fragment_len);
    }
}

/// Paint `fragment_len` bytes starting at `*addr`, all within a single
/// page. If that page is already the target distinguished page, the whole
/// fragment is skipped without allocating anything.
fn paint_page_fragment(
    store: &mut TagStore,
    target: &PageRef,
    tag: PaintTag,
    addr: &mut usize,
    remaining: &mut usize,
    fragment_len: usize,
) {
    let current = store.current_page_ptr(*addr);
    if store.is_distinguished_page(&current) && page_eq(&current, target) {
        *addr += fragment_len;
        *remaining -= fragment_len;
        return;
    }

    let page = if store.is_distinguished_page(&current) {
        store.page_ptr_for_write(*addr)
    } else {
        current
    };

    let mut len = fragment_len;
    paint_within_page(&page, tag, addr, &mut len);
    *remaining -= fragment_len;
}

fn page_eq(a: &PageRef, b: &PageRef) -> bool {
    a.ptr_eq(b)
}

/// Tag `*len` bytes starting at `*addr` on an already-private page: byte
/// steps up to the next 8-byte boundary, 16-bit repeat writes for each
/// full 8-byte span, then byte steps for whatever is left over.
fn paint_within_page(page: &PageRef, tag: PaintTag, addr: &mut usize, len: &mut usize) {
    let full_tag = tag.as_tag();

    while *len >= 1 && (*addr & 0b111) != 0 {
        page.write_tag(*addr, full_tag);
        *addr += 1;
        *len -= 1;
    }

    let repeat = tag.repeat16();
    while *len >= 8 {
        page.write_repeat16(*addr, repeat);
        *addr += 8;
        *len -= 8;
    }

    while *len >= 1 {
        page.write_tag(*addr, full_tag);
        *addr += 1;
        *len -= 1;
    }
}
