use crate::slab::Slab;
use crate::time::Timestamp;
use crate::watcher::Watcher;

/// Binary min-heap over watcher deadlines.
///
/// Each element's record stores its own 1-based heap position in `active`,
/// which is what makes O(log n) removal of an arbitrary watcher possible.
pub(crate) struct TimeHeap {
    items: Vec<Watcher>,
}

fn deadline(slab: &Slab, w: Watcher) -> Timestamp {
    slab.get(w)
        .expect("heap element outlived its record")
        .kind
        .deadline()
}

impl TimeHeap {
    pub fn new() -> TimeHeap {
        TimeHeap { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[Watcher] {
        &self.items
    }

    pub fn root(&self) -> Option<Watcher> {
        self.items.first().copied()
    }

    pub fn root_deadline(&self, slab: &Slab) -> Option<Timestamp> {
        self.root().map(|w| deadline(slab, w))
    }

    pub fn push(&mut self, slab: &mut Slab, w: Watcher) {
        self.items.push(w);
        let k = self.items.len() - 1;
        self.set_position(slab, k);
        self.up(slab, k);
    }

    /// Remove the element at 1-based position `pos` (the record's `active`
    /// value). The caller resets the removed record's `active`.
    pub fn remove(&mut self, slab: &mut Slab, pos: usize) {
        let k = pos - 1;
        let last = self.items.pop().expect("remove from empty heap");
        if k < self.items.len() {
            self.items[k] = last;
            self.set_position(slab, k);
            self.adjust(slab, pos);
        }
    }

    /// Restore heap order after the element at 1-based position `pos`
    /// changed its deadline in place.
    pub fn adjust(&mut self, slab: &mut Slab, pos: usize) {
        let k = pos - 1;
        self.up(slab, k);
        self.down(slab, k);
    }

    /// Re-establish the heap property over arbitrary contents, e.g. after a
    /// wall-clock jump rewrote every deadline.
    pub fn heapify(&mut self, slab: &mut Slab) {
        for k in (0..self.items.len() / 2).rev() {
            self.down(slab, k);
        }
    }

    fn up(&mut self, slab: &mut Slab, mut k: usize) {
        while k > 0 {
            let parent = (k - 1) / 2;
            if deadline(slab, self.items[parent]) <= deadline(slab, self.items[k]) {
                break;
            }
            self.items.swap(parent, k);
            self.set_position(slab, k);
            k = parent;
        }
        self.set_position(slab, k);
    }

    fn down(&mut self, slab: &mut Slab, mut k: usize) {
        let n = self.items.len();
        loop {
            let mut child = 2 * k + 1;
            if child >= n {
                break;
            }
            if child + 1 < n
                && deadline(slab, self.items[child + 1]) < deadline(slab, self.items[child])
            {
                child += 1;
            }
            if deadline(slab, self.items[k]) <= deadline(slab, self.items[child]) {
                break;
            }
            self.items.swap(k, child);
            self.set_position(slab, k);
            k = child;
        }
        self.set_position(slab, k);
    }

    fn set_position(&self, slab: &mut Slab, k: usize) {
        let w = self.items[k];
        slab.get_mut(w)
            .expect("heap element outlived its record")
            .active = k + 1;
    }
}
