//! Ambient call identity
//!
//! Each thread carries an optional principal name. It is captured into the
//! call record when a generated member is entered, so interceptors (logging,
//! counters) can report who made the call.

use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static CURRENT_PRINCIPAL: RefCell<Option<Arc<str>>> = const { RefCell::new(None) };
}

/// Set (or clear) the principal of the current thread
pub fn set_current_principal(name: Option<&str>) {
    CURRENT_PRINCIPAL.with(|p| *p.borrow_mut() = name.map(Arc::from));
}

/// Principal of the current thread
pub fn current_principal() -> Option<Arc<str>> {
    CURRENT_PRINCIPAL.with(|p| p.borrow().clone())
}

/// Run `f` with `name` as the principal, restoring the previous one after
pub fn with_principal<R>(name: &str, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT_PRINCIPAL.with(|p| p.borrow_mut().replace(Arc::from(name)));
    let out = f();
    CURRENT_PRINCIPAL.with(|p| *p.borrow_mut() = previous);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_principal_restores() {
        set_current_principal(Some("outer"));
        let inner = with_principal("inner", || current_principal());
        assert_eq!(inner.as_deref(), Some("inner"));
        assert_eq!(current_principal().as_deref(), Some("outer"));
        set_current_principal(None);
        assert!(current_principal().is_none());
    }
}
