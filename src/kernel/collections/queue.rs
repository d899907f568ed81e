//!
//! Doubly-linked queue (component C)
//!
//! Plain FIFO and priority-ordered insertion over an intrusive node chain.
//! A node may belong to at most one queue at a time, enforced by its
//! `enlisted` flag (spec §3, §4.C). The owning subsystem allocates and
//! frees [`QueueNode`]s; the queue only ever holds raw links into them.

use crate::kernel::error::{KernelError, KernelResult};
use crate::kernel::sync::spin_lock::SpinLockFlag;

use core::ptr::NonNull;

pub struct QueueNode<T> {
    prev: Option<NonNull<QueueNode<T>>>,
    next: Option<NonNull<QueueNode<T>>>,
    priority: u64,
    enlisted: bool,
    pub data: T,
}

impl<T> QueueNode<T> {
    pub const fn new(data: T) -> Self {
        Self {
            prev: None,
            next: None,
            priority: 0,
            enlisted: false,
            data,
        }
    }

    pub fn is_enlisted(&self) -> bool {
        self.enlisted
    }
}

/// `head` is the most-recently-pushed end for plain FIFO and the
/// lowest-priority end for priority insertion; `pop` always detaches
/// `tail`, which is therefore the oldest plain push, or the
/// highest-priority entry.
pub struct Queue<T> {
    head: Option<NonNull<QueueNode<T>>>,
    tail: Option<NonNull<QueueNode<T>>>,
    size: usize,
    lock: SpinLockFlag,
}

unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Queue<T> {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            size: 0,
            lock: SpinLockFlag::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Places `node` at the head: `pop` will return it last among equal
    /// priority pushes still in the queue, i.e. plain FIFO ordering.
    pub fn push(&mut self, mut node: NonNull<QueueNode<T>>) -> KernelResult<()> {
        let _guard = self.lock.lock();
        if unsafe { node.as_ref() }.enlisted {
            return Err(KernelError::UnauthorizedAction);
        }
        self.push_front_locked(node, 0);
        unsafe { node.as_mut() }.enlisted = true;
        Ok(())
    }

    /// Inserts `node` so that, scanning from `head` to `tail`, priorities
    /// observed are non-decreasing — `tail` ends up holding the highest
    /// priority, so `pop` (which always detaches `tail`) yields the
    /// highest-priority entry first (spec §8 scenario 2). Walks from
    /// `head` while `cursor.priority < priority`, then inserts before the
    /// first cursor whose priority is `>= priority`; this keeps ties
    /// stable, since an existing entry of equal priority is left closer
    /// to `tail` than the one being inserted now, and so pops first.
    pub fn push_priority(&mut self, mut node: NonNull<QueueNode<T>>, priority: u64) -> KernelResult<()> {
        let _guard = self.lock.lock();
        if unsafe { node.as_ref() }.enlisted {
            return Err(KernelError::UnauthorizedAction);
        }

        let mut cursor = self.head;
        while let Some(c) = cursor {
            if unsafe { c.as_ref() }.priority < priority {
                cursor = unsafe { c.as_ref() }.next;
            } else {
                break;
            }
        }

        match cursor {
            None => self.push_back_locked(node, priority),
            Some(mut before) => {
                let prev = unsafe { before.as_ref() }.prev;
                unsafe {
                    node.as_mut().prev = prev;
                    node.as_mut().next = Some(before);
                    node.as_mut().priority = priority;
                    before.as_mut().prev = Some(node);
                }
                match prev {
                    Some(mut p) => unsafe { p.as_mut().next = Some(node) },
                    None => self.head = Some(node),
                }
                self.size += 1;
            }
        }
        unsafe { node.as_mut() }.enlisted = true;
        Ok(())
    }

    fn push_front_locked(&mut self, mut node: NonNull<QueueNode<T>>, priority: u64) {
        unsafe {
            node.as_mut().prev = None;
            node.as_mut().next = self.head;
            node.as_mut().priority = priority;
        }
        match self.head {
            Some(mut old_head) => unsafe { old_head.as_mut().prev = Some(node) },
            None => self.tail = Some(node),
        }
        self.head = Some(node);
        self.size += 1;
    }

    fn push_back_locked(&mut self, mut node: NonNull<QueueNode<T>>, priority: u64) {
        unsafe {
            node.as_mut().next = None;
            node.as_mut().prev = self.tail;
            node.as_mut().priority = priority;
        }
        match self.tail {
            Some(mut old_tail) => unsafe { old_tail.as_mut().next = Some(node) },
            None => self.head = Some(node),
        }
        self.tail = Some(node);
        self.size += 1;
    }

    /// Detaches and returns the tail (oldest plain push, or highest
    /// priority), or `None` if empty.
    pub fn pop(&mut self) -> Option<NonNull<QueueNode<T>>> {
        let _guard = self.lock.lock();
        let mut tail = self.tail?;
        let prev = unsafe { tail.as_ref() }.prev;
        match prev {
            Some(mut p) => unsafe { p.as_mut().next = None },
            None => self.head = None,
        }
        self.tail = prev;
        self.size -= 1;
        unsafe {
            tail.as_mut().prev = None;
            tail.as_mut().next = None;
            tail.as_mut().enlisted = false;
        }
        Some(tail)
    }

    /// Linear scan from `head`, pointer-identity comparison (spec §9
    /// "Open questions" fixes `find` to pointer identity).
    pub fn find<F: Fn(&T) -> bool>(&self, predicate: F) -> Option<NonNull<QueueNode<T>>> {
        let _guard = self.lock.lock();
        let mut cursor = self.head;
        while let Some(c) = cursor {
            if predicate(&unsafe { c.as_ref() }.data) {
                return Some(c);
            }
            cursor = unsafe { c.as_ref() }.next;
        }
        None
    }

    /// O(1) unlink of an arbitrary, currently-enlisted node.
    pub fn remove(&mut self, mut node: NonNull<QueueNode<T>>) -> KernelResult<()> {
        let _guard = self.lock.lock();
        if !unsafe { node.as_ref() }.enlisted {
            return Err(KernelError::UnauthorizedAction);
        }
        let prev = unsafe { node.as_ref() }.prev;
        let next = unsafe { node.as_ref() }.next;
        match prev {
            Some(mut p) => unsafe { p.as_mut().next = next },
            None => self.head = next,
        }
        match next {
            Some(mut n) => unsafe { n.as_mut().prev = prev },
            None => self.tail = prev,
        }
        self.size -= 1;
        unsafe {
            node.as_mut().prev = None;
            node.as_mut().next = None;
            node.as_mut().enlisted = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;

    fn leak(data: u64) -> NonNull<QueueNode<u64>> {
        NonNull::from(Box::leak(Box::new(QueueNode::new(data))))
    }

    #[test]
    fn fifo_push_pop_preserves_order() {
        let mut q: Queue<u64> = Queue::new();
        let a = leak(1);
        let b = leak(2);
        q.push(a).unwrap();
        q.push(b).unwrap();
        assert_eq!(unsafe { q.pop().unwrap().as_ref() }.data, 1);
        assert_eq!(unsafe { q.pop().unwrap().as_ref() }.data, 2);
        assert!(q.pop().is_none());
    }

    #[test]
    fn priority_ordering_is_non_increasing() {
        // Spec §8 scenario 2: insert [0,3,5,7,4,1,8,9,6,2] four times with
        // FIFO tie-breaking; pops yield 9,9,9,9,8,8,8,8,...,0,0,0,0.
        let mut q: Queue<u64> = Queue::new();
        for _ in 0..4 {
            for p in [0u64, 3, 5, 7, 4, 1, 8, 9, 6, 2] {
                let node = leak(p);
                q.push_priority(node, p).unwrap();
            }
        }
        let mut popped = alloc::vec::Vec::new();
        while let Some(n) = q.pop() {
            popped.push(unsafe { n.as_ref() }.data);
        }
        let expected: alloc::vec::Vec<u64> = (0..=9u64).rev().flat_map(|p| [p; 4]).collect();
        assert_eq!(popped, expected);
    }

    #[test]
    fn double_push_is_rejected() {
        let mut q: Queue<u64> = Queue::new();
        let a = leak(1);
        q.push(a).unwrap();
        assert_eq!(q.push(a), Err(KernelError::UnauthorizedAction));
    }

    #[test]
    fn remove_detaches_arbitrary_node() {
        let mut q: Queue<u64> = Queue::new();
        let a = leak(1);
        let b = leak(2);
        let c = leak(3);
        q.push(a).unwrap();
        q.push(b).unwrap();
        q.push(c).unwrap();
        q.remove(b).unwrap();
        assert_eq!(q.len(), 2);
        assert_eq!(unsafe { q.pop().unwrap().as_ref() }.data, 1);
        assert_eq!(unsafe { q.pop().unwrap().as_ref() }.data, 3);
    }
}
