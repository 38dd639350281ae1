use crate::watcher::{Record, Watcher};

/// Arena of watcher records.
///
/// Handles are index + generation pairs; removing a record bumps the slot's
/// generation so a handle kept past `destroy` can never alias a later
/// watcher that reuses the slot.
pub(crate) struct Slab {
    entries: Vec<Entry>,
    // Indices of vacant slots, reused LIFO.
    free: Vec<u32>,
    len: usize,
}

struct Entry {
    gen: u32,
    val: Option<Record>,
}

impl Slab {
    pub fn new() -> Slab {
        Slab {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn insert(&mut self, record: Record) -> Watcher {
        self.len += 1;
        match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                debug_assert!(entry.val.is_none());
                entry.val = Some(record);
                Watcher {
                    index,
                    gen: entry.gen,
                }
            }
            None => {
                let index = self.entries.len() as u32;
                self.entries.push(Entry {
                    gen: 0,
                    val: Some(record),
                });
                Watcher { index, gen: 0 }
            }
        }
    }

    pub fn remove(&mut self, w: Watcher) -> Option<Record> {
        let entry = self.entries.get_mut(w.index as usize)?;
        if entry.gen != w.gen || entry.val.is_none() {
            return None;
        }
        entry.gen = entry.gen.wrapping_add(1);
        self.free.push(w.index);
        self.len -= 1;
        entry.val.take()
    }

    pub fn get(&self, w: Watcher) -> Option<&Record> {
        match self.entries.get(w.index as usize) {
            Some(entry) if entry.gen == w.gen => entry.val.as_ref(),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, w: Watcher) -> Option<&mut Record> {
        match self.entries.get_mut(w.index as usize) {
            Some(entry) if entry.gen == w.gen => entry.val.as_mut(),
            _ => None,
        }
    }

    /// Access by bare index, for walking intrusive chains. The slot must be
    /// occupied: chains only ever link live records.
    pub fn by_index(&self, index: u32) -> &Record {
        self.entries[index as usize]
            .val
            .as_ref()
            .expect("watcher chain links a vacant slot")
    }

    pub fn by_index_mut(&mut self, index: u32) -> &mut Record {
        self.entries[index as usize]
            .val
            .as_mut()
            .expect("watcher chain links a vacant slot")
    }

    /// Rebuild the full handle for a chained record.
    pub fn handle(&self, index: u32) -> Watcher {
        Watcher {
            index,
            gen: self.entries[index as usize].gen,
        }
    }
}
