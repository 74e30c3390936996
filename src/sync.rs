//! Locks guarding shared tables, swapped for `loom`'s models under `check-loom`.

cfg_if::cfg_if! {
    if #[cfg(feature = "check-loom")] {
        pub use loom::sync::Mutex;
    } else {
        pub use std::sync::Mutex;
    }
}
