use std::fmt;
use std::sync::OnceLock;

/// A lazily built cache slot. Cloning yields an empty slot, so a copied node
/// that is edited before publishing rebuilds its own index.
pub struct Memo<T>(OnceLock<T>);

impl<T> Memo<T> {
    pub fn new() -> Self {
        Self(OnceLock::new())
    }

    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        self.0.get_or_init(init)
    }

    pub fn get(&self) -> Option<&T> {
        self.0.get()
    }
}

impl<T> Default for Memo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0.get().is_some() { "Memo(built)" } else { "Memo(empty)" })
    }
}
