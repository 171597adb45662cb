//! Running a supplier so that a panic is caught with the stack of the place
//! it was raised.
//!
//! Once the unwind reaches `catch_unwind` the panicking frames are gone, so
//! the stack is taken from a panic hook instead. The hook is installed once,
//! chains to the hook that was in place before it, and only records anything
//! on a thread that is currently running a supplier.

use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;
use std::thread;

use crate::call::Outcome;
use crate::error::{Exit, PanicError};

thread_local! {
    static SUPPLIER_DEPTH: Cell<usize> = const { Cell::new(0) };
    static PANIC_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

// Frames belonging to the hook, the capture, and the panic machinery.
const CAPTURE_FRAMES: &[&str] = &[
    "backtrace",
    "unwind::install_hook",
    "unwind::catch_supplier",
    "PanicError::new",
    "panicking",
    "rust_begin_unwind",
    "std::panic::",
    "core::ops::function::Fn",
];

fn install_hook() {
    static HOOK: Once = Once::new();
    // The hook cannot be replaced while this thread unwinds.
    if thread::panicking() {
        return;
    }
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if SUPPLIER_DEPTH.try_with(Cell::get).unwrap_or(0) > 0 {
                let stack = Backtrace::force_capture().to_string();
                let _ = PANIC_STACK.try_with(|slot| *slot.borrow_mut() = Some(stack));
            }
            previous(info);
        }));
    });
}

/// Runs `f` and classifies how it ended.
pub(crate) fn catch_supplier<V, E, F>(f: F) -> Outcome<V, E>
where
    F: FnOnce() -> Result<V, E>,
{
    install_hook();
    PANIC_STACK.with(|slot| slot.borrow_mut().take());
    SUPPLIER_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    SUPPLIER_DEPTH.with(|depth| depth.set(depth.get() - 1));
    let stack = PANIC_STACK.with(|slot| slot.borrow_mut().take());

    match result {
        Ok(result) => Outcome::Returned(result),
        Err(payload) if payload.is::<Exit>() => Outcome::Exited,
        Err(payload) => {
            // No hook stack when the panic skipped the hook or the hook was
            // replaced after ours; fall back to the stack at interception.
            let stack = stack.unwrap_or_else(|| Backtrace::force_capture().to_string());
            Outcome::Panicked(PanicError::new(payload, strip_capture_frames(&stack)))
        }
    }
}

fn strip_capture_frames(stack: &str) -> &str {
    let mut offset = 0;
    for line in stack.split_inclusive('\n') {
        if is_frame_header(line) && !CAPTURE_FRAMES.iter().any(|frame| line.contains(frame)) {
            return &stack[offset..];
        }
        offset += line.len();
    }
    stack
}

fn is_frame_header(line: &str) -> bool {
    match line.trim_start().split_once(':') {
        Some((index, _)) => !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::panic;

    use super::{catch_supplier, is_frame_header, strip_capture_frames, SUPPLIER_DEPTH};
    use crate::call::Outcome;
    use crate::error::exit;

    #[test]
    fn test_is_frame_header() {
        assert!(is_frame_header("   0: std::backtrace::Backtrace::force_capture\n"));
        assert!(is_frame_header("  12: singleflight::group::Group::work\n"));
        assert!(!is_frame_header("             at ./src/group.rs:10:5\n"));
        assert!(!is_frame_header("disabled backtrace\n"));
        assert!(!is_frame_header(": nothing\n"));
    }

    #[test]
    fn test_strip_capture_frames() {
        let stack = "   0: std::backtrace::Backtrace::force_capture\n\
                     \x20            at /rustc/lib.rs:1:1\n\
                     \x20  1: singleflight::unwind::install_hook::{{closure}}::{{closure}}\n\
                     \x20  2: <alloc::boxed::Box<F,A> as core::ops::function::Fn<Args>>::call\n\
                     \x20  3: std::panicking::rust_panic_with_hook\n\
                     \x20  4: core::panicking::panic_fmt\n\
                     \x20  5: app::load_config\n\
                     \x20            at ./src/config.rs:30:21\n\
                     \x20  6: core::ops::function::FnOnce::call_once\n";
        let stripped = strip_capture_frames(stack);
        assert!(stripped.trim_start().starts_with("5: app::load_config"));
        assert!(stripped.contains("6: core::ops::function::FnOnce::call_once"));
        assert!(!stripped.contains("install_hook"));

        assert_eq!(strip_capture_frames("disabled backtrace"), "disabled backtrace");
    }

    #[test]
    fn test_catch_supplier_outcomes() {
        assert!(matches!(
            catch_supplier::<i32, (), _>(|| Ok(1)),
            Outcome::Returned(Ok(1))
        ));
        assert!(matches!(
            catch_supplier::<i32, (), _>(|| exit()),
            Outcome::Exited
        ));
        match catch_supplier::<i32, (), _>(|| panic!("caught")) {
            Outcome::Panicked(err) => assert_eq!(err.message(), "caught"),
            _ => panic!("expected a panic outcome"),
        }
        assert_eq!(SUPPLIER_DEPTH.with(|depth| depth.get()), 0);
    }

    #[test]
    fn test_panic_outside_supplier_not_recorded() {
        let _ = catch_supplier::<(), (), _>(|| Ok(()));
        let _ = panic::catch_unwind(|| panic!("unrelated"));
        assert!(super::PANIC_STACK.with(|slot| slot.borrow().is_none()));
    }
}
