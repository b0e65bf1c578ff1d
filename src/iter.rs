//! Enumeration views over request headers and parameters (§4.4).
//!
//! The reference API exposes three iterator-producing calls
//! (`get_header_iterator`, `get_multi_header`, `get_parameter_iterator`)
//! that all hand back the same kind of object: a sequence of
//! `(name, value)` pairs, optionally filtered down to one name. `PairIter`
//! models all three; an unfiltered iterator enumerates everything, a
//! filtered one only the pairs matching `name`.
//!
//! An iterator borrows the request metadata it was created from; it is
//! invalidated by the next `accept()`. `close()` is an explicit, no-op
//! release kept for parity with the reference API's `iterator_free`,
//! mirroring its manual allocation discipline even though Rust's borrow
//! checker already prevents use-after-invalidation at compile time.
enum Filter {
    None,
    Exact(Vec<u8>),
    CaseInsensitive(Vec<u8>),
}

pub struct PairIter<'a> {
    inner: ::std::slice::Iter<'a, (Vec<u8>, Vec<u8>)>,
    filter: Filter,
}

impl<'a> PairIter<'a> {
    pub(crate) fn all(pairs: &'a [(Vec<u8>, Vec<u8>)]) -> PairIter<'a> {
        PairIter { inner: pairs.iter(), filter: Filter::None }
    }

    /// Exact-byte name filter, used for parameters.
    pub(crate) fn matching(pairs: &'a [(Vec<u8>, Vec<u8>)], name: &[u8]) -> PairIter<'a> {
        PairIter { inner: pairs.iter(), filter: Filter::Exact(name.to_vec()) }
    }

    /// Case-insensitive name filter, used for header multi-get.
    pub(crate) fn matching_ci(pairs: &'a [(Vec<u8>, Vec<u8>)], name: &[u8]) -> PairIter<'a> {
        PairIter { inner: pairs.iter(), filter: Filter::CaseInsensitive(name.to_vec()) }
    }

    /// Explicit release, matching `was_simple_iterator_free`.
    pub fn close(self) {}
}

impl<'a> Iterator for PairIter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(&(ref n, ref v)) = self.inner.next() {
            let matches = match self.filter {
                Filter::None => true,
                Filter::Exact(ref name) => name.as_slice() == n.as_slice(),
                Filter::CaseInsensitive(ref name) => ::headers::eq_ignore_case(n, name),
            };
            if matches {
                return Some((n.as_slice(), v.as_slice()));
            }
        }
        None
    }
}
