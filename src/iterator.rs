//! Public iterator: a prefix-filtered view over an index iterator, resolving
//! each position to its value through the engine's read path.

use crate::engine::Engine;
use crate::error::Result;
use crate::index::IndexIterator;
use crate::options::IteratorOptions;

/// An ordered, optionally prefix-filtered cursor over an engine's live keys.
pub struct Iterator<'a> {
    engine: &'a Engine,
    inner: Box<dyn IndexIterator>,
    options: IteratorOptions,
}

impl Engine {
    /// Creates an iterator positioned at the first (or last, if reverse) key
    /// matching `options.prefix`.
    pub fn new_iterator(&self, options: IteratorOptions) -> Iterator<'_> {
        let inner = self.index.iterator(options.reverse);
        let mut iterator = Iterator {
            engine: self,
            inner,
            options,
        };
        iterator.skip_until_prefix_matches();
        iterator
    }
}

impl Iterator<'_> {
    fn prefix_matches(&self, key: &[u8]) -> bool {
        self.options.prefix.is_empty() || key.starts_with(self.options.prefix.as_slice())
    }

    fn skip_until_prefix_matches(&mut self) {
        while self.inner.valid() && !self.prefix_matches(self.inner.key()) {
            self.inner.next();
        }
    }

    /// Resets to the first (or last) matching key.
    pub fn rewind(&mut self) {
        self.inner.rewind();
        self.skip_until_prefix_matches();
    }

    /// Positions at the first key `>= key` (forward) or last key `<= key`
    /// (reverse) that also matches the prefix filter.
    pub fn seek(&mut self, key: &[u8]) {
        self.inner.seek(key);
        self.skip_until_prefix_matches();
    }

    /// Advances to the next matching key.
    pub fn next(&mut self) {
        self.inner.next();
        self.skip_until_prefix_matches();
    }

    /// Whether the cursor is positioned on a live, prefix-matching entry.
    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    /// The current entry's key.
    pub fn key(&self) -> &[u8] {
        self.inner.key()
    }

    /// Reads the current entry's value from its data file.
    pub fn value(&self) -> Result<Vec<u8>> {
        self.engine.get_value_by_position(&self.inner.value())
    }

    /// Releases any resources held by the underlying index iterator.
    pub fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}
