use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use super::fast_import::FastImport;

const MAX_PROCESSES: usize = 100;

/// Bounds the number of simultaneously live fast-import children across
/// the whole run. Touched on every transaction commit; when the ceiling
/// is reached, the least recently used repository has its child closed.
///
/// The cache does not own repositories; it tracks them weakly, only to
/// pick eviction victims.
pub struct ProcessCache {
    limit: usize,
    entries: VecDeque<Weak<RefCell<FastImport>>>,
}

impl ProcessCache {
    pub fn new() -> Self {
        Self::with_limit(MAX_PROCESSES)
    }

    /// A cache with a non-default ceiling. Useful to exercise eviction
    /// without a hundred live children.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Moves `repo` to the most recently used position, closing children
    /// from the least recently used end while the cache is over its
    /// ceiling. Victims are closed after the cache borrow is released;
    /// a closed repository restarts its child on next use.
    pub(super) fn touch(cache: &Rc<RefCell<Self>>, repo: &Rc<RefCell<FastImport>>) {
        let victims = {
            let mut this = cache.borrow_mut();

            this.entries.retain(|entry| {
                entry.strong_count() != 0 && !std::ptr::eq(entry.as_ptr(), Rc::as_ptr(repo))
            });

            let mut victims = Vec::new();
            while this.entries.len() >= this.limit {
                if let Some(entry) = this.entries.pop_front() {
                    if let Some(victim) = entry.upgrade() {
                        victims.push(victim);
                    }
                }
            }

            this.entries.push_back(Rc::downgrade(repo));
            victims
        };

        for victim in victims {
            victim.borrow_mut().close_fast_import();
        }
    }
}

impl Default for ProcessCache {
    fn default() -> Self {
        Self::new()
    }
}
