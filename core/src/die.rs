//! Allocation-failure handling
//!
//! Running out of memory while allocating bookkeeping is fatal. A hook may be
//! registered to log the failure through whatever sink the host has set up;
//! without one a single line goes to stderr. Either way the process aborts.

use once_cell::sync::OnceCell;
use std::io::Write;

type DieHook = Box<dyn Fn() + Send + Sync>;

static ALLOC_DIE: OnceCell<DieHook> = OnceCell::new();

/// Register the hook run before aborting on allocation failure.
///
/// Only the first registration takes effect; returns false if a hook was
/// already set.
pub fn set_alloc_die<F>(hook: F) -> bool
where
    F: Fn() + Send + Sync + 'static,
{
    ALLOC_DIE.set(Box::new(hook)).is_ok()
}

pub fn has_alloc_die() -> bool {
    ALLOC_DIE.get().is_some()
}

/// Report allocation failure and abort.
pub fn alloc_die() -> ! {
    match ALLOC_DIE.get() {
        Some(hook) => hook(),
        None => {
            let _ = writeln!(std::io::stderr(), "glscope: memory allocation failed");
        }
    }
    std::process::abort()
}

/// Allocate a zero-filled block of `size` bytes, aborting through
/// [`alloc_die`] if the allocation cannot be satisfied.
pub(crate) fn zeroed_block(size: usize) -> Vec<u8> {
    let mut block = Vec::new();
    if block.try_reserve_exact(size).is_err() {
        alloc_die();
    }
    block.resize(size, 0);
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_block() {
        let block = zeroed_block(16);
        assert_eq!(block.len(), 16);
        assert!(block.iter().all(|b| *b == 0));
        assert!(zeroed_block(0).is_empty());
    }

    #[test]
    fn test_hook_registers_once() {
        set_alloc_die(|| {});
        assert!(has_alloc_die());
        // A second registration never replaces the first
        assert!(!set_alloc_die(|| {}));
    }
}
