use std::alloc::Layout;
use std::collections::HashMap;

use crate::block::BlockPtr;

/// A live tracked block as recorded at allocation time.
///
/// The requested size and layout stored here are authoritative: they come from the tracker,
/// not from the (possibly corrupted) block header, and are what the memory is released with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TableEntry {
    pub(crate) block: BlockPtr,
    pub(crate) layout: Layout,
    pub(crate) requested_size: usize,
}

impl TableEntry {
    pub(crate) fn address(&self) -> usize {
        self.block.payload().addr().get()
    }
}

/// Registry of all live tracked blocks, keyed by the payload address handed to the caller.
///
/// An address is present if and only if it was returned by a tracked allocation and has not
/// been released since.
#[derive(Debug, Default)]
pub(crate) struct TrackingTable {
    entries: HashMap<usize, TableEntry>,
}

impl TrackingTable {
    pub(crate) fn insert(&mut self, entry: TableEntry) {
        let previous = self.entries.insert(entry.address(), entry);

        assert!(
            previous.is_none(),
            "underlying allocator returned memory of a block that is still live"
        );
    }

    pub(crate) fn get(&self, address: usize) -> Option<&TableEntry> {
        self.entries.get(&address)
    }

    pub(crate) fn remove(&mut self, address: usize) -> Option<TableEntry> {
        self.entries.remove(&address)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All live blocks, in ascending address order.
    pub(crate) fn sorted_entries(&self) -> Vec<&TableEntry> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.address());
        entries
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::alloc::{GlobalAlloc, System};
    use std::ptr::NonNull;

    use super::*;
    use crate::CallSite;
    use crate::block::raw_layout;

    fn make_entry(requested_size: usize) -> TableEntry {
        let layout = raw_layout(requested_size).unwrap();
        // SAFETY: The layout is not zero-sized.
        let raw = NonNull::new(unsafe { System.alloc(layout) }).unwrap();
        let call_site = CallSite::new("table.rs", "make_entry", 1);
        // SAFETY: raw was allocated with raw_layout(requested_size).
        let block = unsafe { BlockPtr::init(raw, layout, requested_size, &call_site, None) };

        TableEntry {
            block,
            layout,
            requested_size,
        }
    }

    fn release(entry: TableEntry) {
        // SAFETY: The entry was allocated by make_entry() with this layout.
        unsafe {
            System.dealloc(entry.block.raw().as_ptr(), entry.layout);
        }
    }

    #[test]
    fn insert_get_remove() {
        let mut table = TrackingTable::default();
        assert!(table.is_empty());

        let entry = make_entry(16);
        table.insert(entry);

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(entry.address()), Some(&entry));
        assert_eq!(table.get(entry.block.raw().addr().get()), None);

        assert_eq!(table.remove(entry.address()), Some(entry));
        assert!(table.is_empty());
        assert_eq!(table.remove(entry.address()), None);

        release(entry);
    }

    #[test]
    fn sorted_entries_are_in_address_order() {
        let mut table = TrackingTable::default();
        let entries = [make_entry(8), make_entry(32), make_entry(0)];

        for entry in entries {
            table.insert(entry);
        }

        let addresses: Vec<_> = table
            .sorted_entries()
            .iter()
            .map(|entry| entry.address())
            .collect();

        assert_eq!(addresses.len(), 3);
        assert!(addresses.is_sorted());

        for entry in entries {
            release(entry);
        }
    }

    #[test]
    #[should_panic]
    fn duplicate_address_panics() {
        let mut table = TrackingTable::default();
        let entry = make_entry(4);

        table.insert(entry);
        table.insert(entry);
    }
}
