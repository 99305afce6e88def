//! The process control block: the unit `fork`/`exec`/`wait`/`vanish`
//! operate on. Owns the page directory, the thread table, the
//! new_pages tracking table, and the parent/child relationship used to
//! implement `wait`.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::mm::page_table::PageDirectory;
use crate::mm::vas::ReadOnlyRegion;
use crate::process::thread::Thread;
use crate::sync::condvar::CondId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(pub u32);

/// A `new_pages` allocation, tracked so `remove_pages` can validate its
/// argument is exactly a prior allocation's base.
#[derive(Debug, Clone, Copy)]
pub struct PageRange {
    pub base: u32,
    pub len: u32,
}

pub struct Process {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub dir: Mutex<PageDirectory>,
    pub threads: Mutex<BTreeMap<u32, Arc<Thread>>>,
    pub new_pages: Mutex<BTreeMap<u32, PageRange>>,
    pub children: Mutex<BTreeMap<Pid, Arc<Process>>>,
    /// The currently loaded image's read-only regions, checked by
    /// `mm::vas::check_region` on every user-pointer validation.
    /// `Mutex`-wrapped (rather than plain fields) because `exec` replaces
    /// them in place without allocating a new `Process`.
    txt: Mutex<ReadOnlyRegion>,
    rodata: Mutex<ReadOnlyRegion>,
    pub exit_status: Mutex<Option<i32>>,
    pub wait_cond: CondId,
    /// Guards `children` the way the original guards its children
    /// hashtable: `wait` blocks on `wait_cond` while holding this.
    pub children_mutex: crate::sync::mutex::MutexId,
    pub exited_thread_count: AtomicU32,
}

impl Process {
    pub fn new(
        pid: Pid,
        parent: Option<Pid>,
        dir: PageDirectory,
        txt: ReadOnlyRegion,
        rodata: ReadOnlyRegion,
    ) -> Self {
        Self {
            pid,
            parent,
            dir: Mutex::new(dir),
            threads: Mutex::new(BTreeMap::new()),
            new_pages: Mutex::new(BTreeMap::new()),
            children: Mutex::new(BTreeMap::new()),
            txt: Mutex::new(txt),
            rodata: Mutex::new(rodata),
            exit_status: Mutex::new(None),
            wait_cond: crate::sync::condvar::create(),
            children_mutex: crate::sync::mutex::create(),
            exited_thread_count: AtomicU32::new(0),
        }
    }

    /// The current image's text/rodata regions, for `mm::vas::check_region`.
    pub fn regions(&self) -> [ReadOnlyRegion; 2] {
        [*self.txt.lock(), *self.rodata.lock()]
    }

    /// Replace the current image's read-only regions after `exec` loads
    /// a new one.
    pub fn set_regions(&self, txt: ReadOnlyRegion, rodata: ReadOnlyRegion) {
        *self.txt.lock() = txt;
        *self.rodata.lock() = rodata;
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    pub fn all_threads_exited(&self) -> bool {
        self.exited_thread_count.load(Ordering::SeqCst) as usize == self.thread_count()
    }

    pub fn insert_thread(&self, thread: Arc<Thread>) {
        self.threads.lock().insert(thread.tid, thread);
    }

    pub fn find_thread(&self, tid: u32) -> Option<Arc<Thread>> {
        self.threads.lock().get(&tid).cloned()
    }

    pub fn track_pages_allocated(&self, base: u32, len: u32) -> KernelResult<()> {
        let mut pages = self.new_pages.lock();
        if pages.contains_key(&base) {
            return Err(KernelError::AlreadyExists { resource: "new_pages region", id: base });
        }
        pages.insert(base, PageRange { base, len });
        Ok(())
    }

    pub fn untrack_pages_allocated(&self, base: u32) -> KernelResult<PageRange> {
        self.new_pages
            .lock()
            .remove(&base)
            .ok_or(KernelError::InvalidArgument { name: "base", value: "not a new_pages base" })
    }

    pub fn was_pages_allocated(&self, base: u32) -> bool {
        self.new_pages.lock().contains_key(&base)
    }

    /// Reparent every child onto the init/reaper process, called when
    /// this process's last thread vanishes.
    pub fn orphan_children_to(&self, reaper: &Arc<Process>) {
        let mut children = self.children.lock();
        let mut reaper_children = reaper.children.lock();
        for (pid, child) in core::mem::take(&mut *children) {
            reaper_children.insert(pid, child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::page_table::PageDirectory;

    fn dummy_process(pid: u32) -> Process {
        // SAFETY: test-only; the kernel template directory is never
        // actually switched to in these unit tests.
        let dir = unsafe { PageDirectory::new_kernel_template().expect("alloc") };
        Process::new(
            Pid(pid),
            None,
            dir,
            ReadOnlyRegion { base: 0, len: 0 },
            ReadOnlyRegion { base: 0, len: 0 },
        )
    }

    #[test]
    fn track_then_untrack_round_trips() {
        let p = dummy_process(1);
        p.track_pages_allocated(0x2000, 0x1000).unwrap();
        assert!(p.was_pages_allocated(0x2000));
        let range = p.untrack_pages_allocated(0x2000).unwrap();
        assert_eq!(range.len, 0x1000);
        assert!(!p.was_pages_allocated(0x2000));
    }

    #[test]
    fn double_track_same_base_fails() {
        let p = dummy_process(2);
        p.track_pages_allocated(0x3000, 0x1000).unwrap();
        assert!(p.track_pages_allocated(0x3000, 0x1000).is_err());
    }

    #[test]
    fn all_threads_exited_true_with_no_threads() {
        let p = dummy_process(3);
        assert!(p.all_threads_exited());
    }
}
