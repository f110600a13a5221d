//! Abstract resources: kinds, handles and their lifecycle
//!
//! The evaluator only mints handles and emits [`ResourceEvent`]s. Tracking
//! which handles are live across calls belongs to the host, which can use a
//! [`ResourceTable`] and replay the events on it.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::EvalError;

/// Opaque instance of a resource kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub id: u64,
    pub kind: String,
}

impl ResourceHandle {
    /// Integer projection of the handle, e.g. the value of a file descriptor
    pub fn as_int(&self) -> i64 {
        self.id as i64
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Source of fresh handle identities, safe to share between worker threads
#[derive(Debug)]
pub struct HandleMinter {
    next: AtomicU64,
}

impl HandleMinter {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Minter whose first handle has id `first`
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Mint a handle distinct from every handle minted before
    pub fn mint(&self, kind: &str) -> ResourceHandle {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        ResourceHandle {
            id,
            kind: kind.to_string(),
        }
    }

    /// Number of handles minted so far by a minter starting at 1
    pub fn minted(&self) -> u64 {
        self.next.load(Ordering::Relaxed).saturating_sub(1)
    }
}

impl Default for HandleMinter {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of a handle as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandleStatus {
    Live,
    Retired,
    /// The host tracks every handle and this one was never live
    NeverLive,
    /// The host does not track handles
    Untracked,
}

/// Lifecycle event produced by one outcome branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceEvent {
    /// `new Kind` minted this handle
    Created(ResourceHandle),
    /// `free` retired this handle
    Released(ResourceHandle),
}

impl ResourceEvent {
    pub fn handle(&self) -> &ResourceHandle {
        match self {
            ResourceEvent::Created(h) | ResourceEvent::Released(h) => h,
        }
    }
}

impl fmt::Display for ResourceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceEvent::Created(h) => write!(f, "created {h}"),
            ResourceEvent::Released(h) => write!(f, "released {h}"),
        }
    }
}

/// Contract violation detected by a [`ResourceTable`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("{handle} released twice")]
    DoubleFree { handle: ResourceHandle },

    #[error("{handle} released but never live")]
    UseAfterFree { handle: ResourceHandle },
}

impl From<ResourceError> for EvalError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::DoubleFree { handle } => EvalError::DoubleFree { handle },
            ResourceError::UseAfterFree { handle } => EvalError::UseAfterFree { handle },
        }
    }
}

/// Host-side record of live and retired handles
#[derive(Debug, Clone)]
pub struct ResourceTable {
    minter: Arc<HandleMinter>,
    live: HashSet<ResourceHandle>,
    retired: HashSet<ResourceHandle>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::with_minter(Arc::new(HandleMinter::new()))
    }

    /// Table minting from a shared minter, typically the evaluator's
    pub fn with_minter(minter: Arc<HandleMinter>) -> Self {
        Self {
            minter,
            live: HashSet::new(),
            retired: HashSet::new(),
        }
    }

    /// Mint a fresh handle of `kind` and mark it live
    pub fn allocate(&mut self, kind: &str) -> ResourceHandle {
        let handle = self.minter.mint(kind);
        self.live.insert(handle.clone());
        handle
    }

    /// Retire a live handle
    pub fn release(&mut self, handle: &ResourceHandle) -> Result<(), ResourceError> {
        if self.live.remove(handle) {
            self.retired.insert(handle.clone());
            Ok(())
        } else if self.retired.contains(handle) {
            Err(ResourceError::DoubleFree {
                handle: handle.clone(),
            })
        } else {
            Err(ResourceError::UseAfterFree {
                handle: handle.clone(),
            })
        }
    }

    /// `handle in kind`; false for retired handles
    pub fn is_member(&self, handle: &ResourceHandle, kind: &str) -> bool {
        handle.kind == kind && self.live.contains(handle)
    }

    pub fn status(&self, handle: &ResourceHandle) -> HandleStatus {
        if self.live.contains(handle) {
            HandleStatus::Live
        } else if self.retired.contains(handle) {
            HandleStatus::Retired
        } else {
            HandleStatus::NeverLive
        }
    }

    /// Replay an evaluator event
    pub fn apply(&mut self, event: &ResourceEvent) -> Result<(), ResourceError> {
        match event {
            ResourceEvent::Created(handle) => {
                self.retired.remove(handle);
                self.live.insert(handle.clone());
                Ok(())
            }
            ResourceEvent::Released(handle) => self.release(handle),
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

impl Default for ResourceTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_allocate_is_member() {
        let mut table = ResourceTable::new();
        let fd = table.allocate("FileDescriptor");
        assert!(table.is_member(&fd, "FileDescriptor"));
        assert!(!table.is_member(&fd, "Memory"));
        assert_eq!(table.status(&fd), HandleStatus::Live);
    }

    #[test]
    fn test_release_then_membership_false() {
        let mut table = ResourceTable::new();
        let fd = table.allocate("FileDescriptor");
        table.release(&fd).unwrap();
        assert!(!table.is_member(&fd, "FileDescriptor"));
        assert_eq!(table.status(&fd), HandleStatus::Retired);
    }

    #[test]
    fn test_double_release() {
        let mut table = ResourceTable::new();
        let fd = table.allocate("FileDescriptor");
        table.release(&fd).unwrap();
        let err = table.release(&fd).unwrap_err();
        assert_eq!(err, ResourceError::DoubleFree { handle: fd.clone() });
        assert_eq!(
            EvalError::from(err).kind(),
            "DoubleFreeContractViolation"
        );
    }

    #[test]
    fn test_release_unknown_handle() {
        let mut table = ResourceTable::new();
        let stranger = HandleMinter::starting_at(100).mint("Memory");
        assert!(matches!(
            table.release(&stranger),
            Err(ResourceError::UseAfterFree { .. })
        ));
        assert_eq!(table.status(&stranger), HandleStatus::NeverLive);
    }

    #[test]
    fn test_apply_events() {
        let minter = Arc::new(HandleMinter::new());
        let mut table = ResourceTable::with_minter(Arc::clone(&minter));
        let h = minter.mint("Memory");
        table.apply(&ResourceEvent::Created(h.clone())).unwrap();
        assert!(table.is_member(&h, "Memory"));
        table.apply(&ResourceEvent::Released(h.clone())).unwrap();
        assert!(!table.is_member(&h, "Memory"));
        assert!(table.apply(&ResourceEvent::Released(h)).is_err());
    }

    #[test]
    fn test_handles_are_distinct() {
        let mut table = ResourceTable::new();
        let a = table.allocate("FileDescriptor");
        let b = table.allocate("FileDescriptor");
        assert_ne!(a, b);
        assert_eq!(table.live_count(), 2);
        assert_eq!(a.to_string(), "FileDescriptor#1");
    }

    #[test]
    fn test_concurrent_minting_unique() {
        let minter = Arc::new(HandleMinter::new());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let minter = Arc::clone(&minter);
                thread::spawn(move || (0..500).map(|_| minter.mint("Memory").id).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for worker in workers {
            for id in worker.join().unwrap() {
                assert!(seen.insert(id), "id {id} minted twice");
            }
        }
        assert_eq!(seen.len(), 4000);
        assert_eq!(minter.minted(), 4000);
    }
}
