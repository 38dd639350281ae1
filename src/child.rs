use crate::event::EventSet;
use crate::event_loop::EventLoop;
use crate::watcher::{chain_push, chain_remove, Kind, Watcher};

/// Size of the pid hash table; must be a power of two.
pub(crate) const PID_HASHSIZE: usize = 16;

pub(crate) fn pid_bucket(pid: libc::pid_t) -> usize {
    pid as usize & (PID_HASHSIZE - 1)
}

/// Callback of the internal SIGCHLD watcher: reap one child, notify the
/// matching watchers, and re-feed ourselves so the next drain keeps reaping
/// until `waitpid` runs dry.
pub(crate) fn sigchld_cb(el: &mut EventLoop, w: Watcher, _revents: EventSet) {
    let mut status: libc::c_int = 0;
    let pid = unsafe {
        libc::waitpid(
            -1,
            &mut status,
            libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED,
        )
    };

    if pid > 0 {
        el.feed_event(w, EventSet::SIGNAL);

        let priority = el.priority(w);
        el.child_reap(priority, pid, pid, status);
        // Any-child watchers live in bucket 0. One of them may match both
        // chains; the pending merge collapses the duplicate feed.
        el.child_reap(priority, 0, pid, status);
    }
}

impl EventLoop {
    pub(crate) fn start_child(&mut self, w: Watcher) {
        assert!(
            self.is_default,
            "child watchers are only supported on the default loop"
        );
        let pid = match self.watchers.get(w).unwrap().kind {
            Kind::Child { pid, .. } => pid,
            _ => unreachable!(),
        };
        self.activate(w, 1);
        chain_push(
            &mut self.watchers,
            &mut self.child_buckets[pid_bucket(pid)],
            w.index,
        );
    }

    pub(crate) fn stop_child(&mut self, w: Watcher) {
        let pid = match self.watchers.get(w).unwrap().kind {
            Kind::Child { pid, .. } => pid,
            _ => unreachable!(),
        };
        chain_remove(
            &mut self.watchers,
            &mut self.child_buckets[pid_bucket(pid)],
            w.index,
        );
        self.deactivate(w);
    }

    /// Walk one hash chain and notify every watcher that claims `pid`.
    fn child_reap(
        &mut self,
        priority: i32,
        chain: libc::pid_t,
        pid: libc::pid_t,
        status: libc::c_int,
    ) {
        let mut hits = Vec::new();
        let mut cursor = self.child_buckets[pid_bucket(chain)];
        while let Some(idx) = cursor {
            let rec = self.watchers.by_index(idx);
            match rec.kind {
                Kind::Child { pid: want, next, .. } => {
                    if want == pid || want == 0 {
                        hits.push(idx);
                    }
                    cursor = next;
                }
                _ => unreachable!(),
            }
        }

        for idx in hits {
            let w = self.watchers.handle(idx);
            let rec = self.watchers.by_index_mut(idx);
            // Child watchers carry no priority of their own; they ride on
            // the reaper's for this dispatch. If the watcher is already
            // queued the merge must keep using the queue it sits in.
            if rec.pending == 0 {
                rec.priority = priority;
            }
            match &mut rec.kind {
                Kind::Child { rpid, rstatus, .. } => {
                    *rpid = pid;
                    *rstatus = status;
                }
                _ => unreachable!(),
            }
            self.feed_event(w, EventSet::CHILD);
        }
    }

    /// The pid and status observed at the watcher's last `CHILD` event.
    pub fn child_status(&self, w: Watcher) -> (libc::pid_t, libc::c_int) {
        match self.record(w).kind {
            Kind::Child { rpid, rstatus, .. } => (rpid, rstatus),
            _ => panic!("child_status on a non-child watcher"),
        }
    }
}
