/* ************************************************************************ **
** This file is part of rsp2, and is licensed under EITHER the MIT license  **
** or the Apache 2.0 license, at your option.                               **
**                                                                          **
**     http://www.apache.org/licenses/LICENSE-2.0                           **
**     http://opensource.org/licenses/MIT                                   **
**                                                                          **
** Be aware that not all of rsp2 is provided under this permissive license, **
** and that the project as a whole is licensed under the GPL 3.0.           **
** ************************************************************************ */

//! Per-atom buffers that are resized on every call.
//!
//! The number of atoms owned by a process drifts by a handful from one step to the
//! next as atoms cross domain boundaries.  Buffers therefore grow by doubling and
//! never shrink, so that the resize check made on every step is almost always free.

use crate::{Tag, V3};

const MIN_CAPACITY: usize = 16;

/// A buffer with a logical length and a capacity that only ever grows.
///
/// Growing preserves the existing contents.  Elements between the logical length and
/// the capacity keep whatever they held before; nothing is ever cleared.
#[derive(Debug, Clone)]
pub struct GrowBuf<T> {
    data: Vec<T>,
    len: usize,
    growths: usize,
}

impl<T: Clone + Default> Default for GrowBuf<T> {
    fn default() -> Self { GrowBuf::new() }
}

impl<T: Clone + Default> GrowBuf<T> {
    pub fn new() -> Self
    { GrowBuf { data: vec![], len: 0, growths: 0 } }

    /// Set the logical length, growing the capacity if necessary.
    ///
    /// Returns `true` if the buffer had to grow.
    pub fn set_len(&mut self, len: usize) -> bool {
        let grew = len > self.capacity();
        if grew {
            let new_capacity = {
                ::std::iter::successors(Some(usize::max(self.capacity(), MIN_CAPACITY)), |&c| Some(2 * c))
                    .find(|&c| c >= len)
                    .unwrap_or(len)
            };
            self.data.resize(new_capacity, T::default());
            self.growths += 1;
        }
        self.len = len;
        grew
    }

    /// Replace the contents with the items of an iterator.
    pub fn assign(&mut self, items: impl ExactSizeIterator<Item=T>) {
        self.set_len(items.len());
        for (dest, item) in self.data.iter_mut().zip(items) {
            *dest = item;
        }
    }

    pub fn len(&self) -> usize { self.len }
    pub fn is_empty(&self) -> bool { self.len == 0 }
    pub fn capacity(&self) -> usize { self.data.len() }

    /// Number of times the buffer has been reallocated.
    pub fn growths(&self) -> usize { self.growths }

    pub fn as_slice(&self) -> &[T] { &self.data[..self.len] }
    pub fn as_mut_slice(&mut self) -> &mut [T] { &mut self.data[..self.len] }
}

impl<T> ::std::ops::Deref for GrowBuf<T> {
    type Target = [T];
    fn deref(&self) -> &[T] { &self.data[..self.len] }
}

impl<T> ::std::ops::DerefMut for GrowBuf<T> {
    fn deref_mut(&mut self) -> &mut [T] { &mut self.data[..self.len] }
}

/// Every per-atom buffer owned by the NEB fix.
///
/// `xprev`, `xnext`, and `tangent` are indexed by local atom index and persist
/// between iterations.  `tagsend` and `xsend` hold the outgoing list for one
/// exchange and are refilled every call.
#[derive(Debug, Clone, Default)]
pub struct NebBuffers {
    /// Largest local atom count seen so far.
    pub maxlocal: usize,
    pub xprev: GrowBuf<V3>,
    pub xnext: GrowBuf<V3>,
    pub tangent: GrowBuf<V3>,
    pub tagsend: GrowBuf<Tag>,
    pub xsend: GrowBuf<f64>,
}

impl NebBuffers {
    /// Make every per-atom buffer cover `nlocal` atoms.
    pub fn ensure(&mut self, nlocal: usize) {
        if nlocal > self.maxlocal {
            trace!("NEB buffers: maxlocal {} -> {}", self.maxlocal, nlocal);
            self.maxlocal = nlocal;
        }
        self.xprev.set_len(nlocal);
        self.xnext.set_len(nlocal);
        self.tangent.set_len(nlocal);
    }
}
