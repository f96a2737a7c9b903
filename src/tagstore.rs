//! The tag store: a two-level sparse map from guest address to a 2-bit
//! access-discipline [`Tag`], organized the way Valgrind's own shadow memory
//! is organized — a directly-indexed primary map covering the address
//! range a target process actually uses, backed by an ordered auxiliary map
//! (plus a small self-organizing front cache) for the addresses that fall
//! outside it.
//!
//! Pages are copy-on-write. Three distinguished pages (`NoCheck`,
//! `Unwritable`, `Unreferable`) are allocated once and shared, by pointer,
//! across every primary slot and auxiliary node that has never had a byte
//! individually written. A page is privatized — given its own backing
//! storage — the first time a write needs to change a single byte within
//! it rather than replace it wholesale.

use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use crate::tag::{PaintTag, Tag};

/// Bytes of guest address space covered by one page / one shadow map.
pub(crate) const PAGE_BYTES: usize = 65_536;

/// Shadow bytes backing one page: one shadow byte holds the tags for four
/// consecutive guest bytes (2 bits each).
const SM_CHUNKS: usize = PAGE_BYTES / 4;

#[cfg(target_pointer_width = "64")]
const N_PRIMARY_BITS: u32 = 20;
#[cfg(not(target_pointer_width = "64"))]
const N_PRIMARY_BITS: u32 = 16;

const N_PRIMARY_MAP: usize = 1 << N_PRIMARY_BITS;

/// Highest address directly covered by the primary map. On a 32-bit host
/// this is `usize::MAX`: the primary map alone spans the entire address
/// space and the auxiliary map stays empty forever.
const MAX_PRIMARY_ADDRESS: usize =
    ((PAGE_BYTES as u128) * (N_PRIMARY_MAP as u128) - 1) as usize;

const N_AUXMAP_L1: usize = 24;
const AUXMAP_L1_INSERT_IX: usize = 12;

const fn sm_off(addr: usize) -> usize {
    (addr & (PAGE_BYTES - 1)) >> 2
}

const fn sm_off16(addr: usize) -> usize {
    (addr & (PAGE_BYTES - 1)) >> 3
}

fn insert_tag(addr: usize, tag: Tag, byte: &mut u8) {
    let shift = ((addr & 0b11) << 1) as u8;
    *byte = (*byte & !(0b11 << shift)) | (tag.bits() << shift);
}

fn extract_tag(addr: usize, byte: u8) -> Tag {
    let shift = (addr & 0b11) << 1;
    Tag::from_bits((byte >> shift) & 0b11)
}

struct Page([u8; SM_CHUNKS]);

impl Page {
    fn filled(byte: u8) -> Self {
        Page([byte; SM_CHUNKS])
    }
}

/// A reference-counted handle to a page's shadow bytes. Two `PageRef`s
/// compare equal by pointer identity when they refer to the same shared
/// page, which is how the store tells a distinguished page apart from a
/// privatized one without carrying a separate flag.
#[derive(Clone)]
pub(crate) struct PageRef(Rc<RefCell<Page>>);

impl PageRef {
    fn filled(byte: u8) -> Self {
        PageRef(Rc::new(RefCell::new(Page::filled(byte))))
    }

    pub(crate) fn ptr_eq(&self, other: &PageRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Allocate a new, privately-owned page with the same contents as this
    /// one. Used to copy-on-write off of a shared distinguished page.
    fn fresh_copy(&self) -> Self {
        let contents = self.0.borrow().0;
        PageRef(Rc::new(RefCell::new(Page(contents))))
    }

    pub(crate) fn read_tag(&self, addr: usize) -> Tag {
        let byte = self.0.borrow().0[sm_off(addr)];
        extract_tag(addr, byte)
    }

    pub(crate) fn write_tag(&self, addr: usize, tag: Tag) {
        let mut page = self.0.borrow_mut();
        insert_tag(addr, tag, &mut page.0[sm_off(addr)]);
    }

    /// Write a pre-packed 16-bit repeat value spanning the eight addresses
    /// at an 8-byte-aligned offset. Callers must already hold a private
    /// page and an 8-byte-aligned address.
    pub(crate) fn write_repeat16(&self, addr: usize, value: u16) {
        let mut page = self.0.borrow_mut();
        let idx = sm_off16(addr) * 2;
        let bytes = value.to_ne_bytes();
        page.0[idx] = bytes[0];
        page.0[idx + 1] = bytes[1];
    }
}

struct Distinguished {
    no_check: PageRef,
    unwritable: PageRef,
    unreferable: PageRef,
}

impl Distinguished {
    fn new() -> Self {
        Distinguished {
            no_check: PageRef::filled(PaintTag::NoCheck.repeat8()),
            unwritable: PageRef::filled(PaintTag::Unwritable.repeat8()),
            unreferable: PageRef::filled(PaintTag::Unreferable.repeat8()),
        }
    }

    fn page_for(&self, tag: PaintTag) -> PageRef {
        match tag {
            PaintTag::NoCheck => self.no_check.clone(),
            PaintTag::Unwritable => self.unwritable.clone(),
            PaintTag::Unreferable => self.unreferable.clone(),
        }
    }

    fn is_distinguished(&self, page: &PageRef) -> bool {
        page.ptr_eq(&self.no_check)
            || page.ptr_eq(&self.unwritable)
            || page.ptr_eq(&self.unreferable)
    }
}

struct AuxEntry {
    base: usize,
    page: PageRef,
}

#[derive(Clone)]
struct FrontCacheSlot {
    base: usize,
    entry: Option<Rc<RefCell<AuxEntry>>>,
}

impl FrontCacheSlot {
    fn empty() -> Self {
        FrontCacheSlot {
            base: 0,
            entry: None,
        }
    }
}

/// The tag store itself: the primary map, the auxiliary map and its front
/// cache, and the three distinguished pages every unpainted address starts
/// out pointing at.
pub struct TagStore {
    distinguished: Distinguished,
    primary: Vec<PageRef>,
    aux: BTreeMap<usize, Rc<RefCell<AuxEntry>>>,
    front_cache: [FrontCacheSlot; N_AUXMAP_L1],
    verbose: bool,
    xml: bool,
}

impl Default for TagStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TagStore {
    /// Build a fresh store with every address tagged `NoCheck`, the way
    /// `OG_(post_clo_init)` seeds `primary_map` before any client request
    /// has run.
    pub fn new() -> Self {
        let distinguished = Distinguished::new();
        let primary = vec![distinguished.no_check.clone(); N_PRIMARY_MAP];
        TagStore {
            distinguished,
            primary,
            aux: BTreeMap::new(),
            front_cache: std::array::from_fn(|_| FrontCacheSlot::empty()),
            verbose: false,
            xml: false,
        }
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn set_xml(&mut self, xml: bool) {
        self.xml = xml;
    }

    pub(crate) fn verbose(&self) -> bool {
        self.verbose
    }

    pub(crate) fn xml(&self) -> bool {
        self.xml
    }

    /// Read the tag at `addr`, allocating an auxiliary node (but never a
    /// private page) along the way if this is the first time this high
    /// address has been touched.
    pub fn get_tag(&mut self, addr: usize) -> Tag {
        let page = self.current_page_ptr(addr);
        page.read_tag(addr)
    }

    /// Set the tag of a single byte, privatizing its page first if needed.
    pub fn set_tag(&mut self, addr: usize, tag: Tag) {
        let page = self.page_ptr_for_write(addr);
        page.write_tag(addr, tag);
    }

    /// Look up the page covering `addr` without allocating anything: a
    /// miss in both the primary map's range and the auxiliary map returns
    /// `None`.
    pub(crate) fn maybe_page(&mut self, addr: usize) -> Option<PageRef> {
        if addr <= MAX_PRIMARY_ADDRESS {
            Some(self.primary[addr >> 16].clone())
        } else {
            self.maybe_find_in_aux(addr)
                .map(|entry| entry.borrow().page.clone())
        }
    }

    /// Look up the page covering `addr`, allocating a fresh auxiliary node
    /// pointing at the distinguished `NoCheck` page if none exists yet.
    /// Never privatizes a page by itself.
    pub(crate) fn current_page_ptr(&mut self, addr: usize) -> PageRef {
        if addr <= MAX_PRIMARY_ADDRESS {
            self.primary[addr >> 16].clone()
        } else {
            let entry = self.find_or_alloc_in_aux(addr);
            let page = entry.borrow().page.clone();
            page
        }
    }

    /// Look up the page covering `addr`, copy-on-writing it off of its
    /// distinguished page first if it is still shared.
    pub(crate) fn page_ptr_for_write(&mut self, addr: usize) -> PageRef {
        if addr <= MAX_PRIMARY_ADDRESS {
            let idx = addr >> 16;
            if self.distinguished.is_distinguished(&self.primary[idx]) {
                self.primary[idx] = self.primary[idx].fresh_copy();
            }
            self.primary[idx].clone()
        } else {
            let entry = self.find_or_alloc_in_aux(addr);
            let needs_cow = self.distinguished.is_distinguished(&entry.borrow().page);
            if needs_cow {
                let fresh = entry.borrow().page.fresh_copy();
                entry.borrow_mut().page = fresh;
            }
            let page = entry.borrow().page.clone();
            page
        }
    }

    pub(crate) fn is_distinguished_page(&self, page: &PageRef) -> bool {
        self.distinguished.is_distinguished(page)
    }

    /// Whether the page covering `addr` is, right now, the shared
    /// distinguished page for `tag` rather than a privately-allocated
    /// copy — the pointer-identity test a whole-page paint relies on to
    /// skip work, exposed so callers (and tests) can confirm no private
    /// page was allocated where one wasn't needed.
    pub fn is_shared_distinguished(&mut self, addr: usize, tag: PaintTag) -> bool {
        let page = self.current_page_ptr(addr);
        page.ptr_eq(&self.distinguished.page_for(tag))
    }

    pub(crate) fn distinguished_page_for(&self, tag: PaintTag) -> PageRef {
        self.distinguished.page_for(tag)
    }

    /// Replace the whole page covering `addr` (which must be page-aligned)
    /// with `page`, freeing whatever was previously installed there. This
    /// is how a full-page paint avoids ever touching shadow bytes one at a
    /// time.
    pub(crate) fn replace_whole_page(&mut self, addr: usize, page: PageRef) {
        debug_assert_eq!(addr & (PAGE_BYTES - 1), 0);
        if addr <= MAX_PRIMARY_ADDRESS {
            self.primary[addr >> 16] = page;
        } else {
            let entry = self.find_or_alloc_in_aux(addr);
            entry.borrow_mut().page = page;
        }
    }

    fn find_or_alloc_in_aux(&mut self, addr: usize) -> Rc<RefCell<AuxEntry>> {
        if let Some(found) = self.maybe_find_in_aux(addr) {
            return found;
        }
        let base = addr & !(PAGE_BYTES - 1);
        let entry = Rc::new(RefCell::new(AuxEntry {
            base,
            page: self.distinguished.no_check.clone(),
        }));
        self.aux.insert(base, entry.clone());
        self.insert_front_cache(AUXMAP_L1_INSERT_IX, base, entry.clone());
        entry
    }

    /// The auxiliary-map lookup path: check the two hottest front-cache
    /// slots directly, fall back to a linear scan of the rest (swapping a
    /// hit one slot toward the head), and finally consult the ordered map
    /// itself, seeding the front cache at a fixed rank on a hit.
    fn maybe_find_in_aux(&mut self, addr: usize) -> Option<Rc<RefCell<AuxEntry>>> {
        debug_assert!(addr > MAX_PRIMARY_ADDRESS);
        let base = addr & !(PAGE_BYTES - 1);

        if self.front_cache[0].base == base {
            if let Some(entry) = &self.front_cache[0].entry {
                return Some(entry.clone());
            }
        }

        if self.front_cache[1].base == base {
            self.front_cache.swap(0, 1);
            return self.front_cache[0].entry.clone();
        }

        for i in 0..N_AUXMAP_L1 {
            if self.front_cache[i].base == base {
                if i > 0 {
                    self.front_cache.swap(i, i - 1);
                    return self.front_cache[i - 1].entry.clone();
                }
                return self.front_cache[i].entry.clone();
            }
        }

        let entry = self.aux.get(&base).cloned()?;
        self.insert_front_cache(AUXMAP_L1_INSERT_IX, base, entry.clone());
        Some(entry)
    }

    /// Insert a freshly-found-or-allocated node at a fixed rank, shifting
    /// everything from that rank onward down by one and dropping whatever
    /// was in the last slot.
    fn insert_front_cache(&mut self, rank: usize, base: usize, entry: Rc<RefCell<AuxEntry>>) {
        let mut i = N_AUXMAP_L1 - 1;
        while i > rank {
            self.front_cache[i] = self.front_cache[i - 1].clone();
            i -= 1;
        }
        self.front_cache[rank] = FrontCacheSlot {
            base,
            entry: Some(entry),
        };
    }

    #[cfg(test)]
    pub(crate) fn front_cache_bases(&self) -> Vec<usize> {
        self.front_cache
            .iter()
            .filter(|slot| slot.entry.is_some())
            .map(|slot| slot.base)
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn aux_len(&self) -> usize {
        self.aux.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpainted_byte_reads_nocheck() {
        let mut store = TagStore::new();
        assert_eq!(store.get_tag(0x1000), Tag::NoCheck);
        assert_eq!(store.get_tag(MAX_PRIMARY_ADDRESS + 0x5_0000), Tag::NoCheck);
    }

    #[test]
    fn set_tag_is_read_back() {
        let mut store = TagStore::new();
        store.set_tag(0x4242, Tag::Unwritable);
        assert_eq!(store.get_tag(0x4242), Tag::Unwritable);
        // Neighboring bytes in the same shadow byte are untouched.
        assert_eq!(store.get_tag(0x4243), Tag::NoCheck);
    }

    #[test]
    fn write_privatizes_without_disturbing_siblings() {
        let mut store = TagStore::new();
        let base = MAX_PRIMARY_ADDRESS + 1;
        store.set_tag(base + 8, Tag::RefCheck);
        assert_eq!(store.get_tag(base + 8), Tag::RefCheck);
        assert_eq!(store.get_tag(base), Tag::NoCheck);
        assert_eq!(store.get_tag(base + 16), Tag::NoCheck);
    }

    #[test]
    fn maybe_page_never_allocates() {
        let mut store = TagStore::new();
        let base = MAX_PRIMARY_ADDRESS + 1;
        assert!(store.maybe_page(base).is_none());
        assert_eq!(store.aux_len(), 0);
        store.get_tag(base);
        assert_eq!(store.aux_len(), 1);
        assert!(store.maybe_page(base).is_some());
    }

    #[test]
    fn front_cache_promotes_recent_hits() {
        let mut store = TagStore::new();
        let base = MAX_PRIMARY_ADDRESS + 1;
        for i in 0..30 {
            store.get_tag(base + i * PAGE_BYTES);
        }
        let target = base + 29 * PAGE_BYTES;
        let before = store
            .front_cache_bases()
            .iter()
            .position(|&b| b == target)
            .expect("recently inserted base should still be cached");
        // Each repeated hit walks the slot one step toward the head.
        for _ in 0..before {
            store.get_tag(target);
        }
        assert_eq!(store.front_cache_bases()[0], target);
    }
}
