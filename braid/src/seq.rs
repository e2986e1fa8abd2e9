//! Read-only sequence view with signed indexing.
//!
//! [`SeqView`] exposes an ordered collection (the member streams of a group)
//! with the indexing rules scripting front-ends expect: negative indices
//! count from the end, slices take an optional start and stop plus a
//! non-zero step, and lookups by value report a distinct error when the
//! value is absent.

use std::iter::Rev;
use std::ops::Index;
use std::slice;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SeqError {
    #[error("sequence index {index} out of range for length {len}")]
    IndexOutOfRange { index: isize, len: usize },

    #[error("value not found in sequence")]
    NotFound,

    #[error("slice step cannot be zero")]
    ZeroStep,
}

/// Borrowed, read-only view over an ordered collection.
#[derive(Debug)]
pub struct SeqView<'a, T> {
    items: &'a [T],
}

impl<T> Clone for SeqView<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SeqView<'_, T> {}

impl<'a, T> SeqView<'a, T> {
    #[must_use]
    pub const fn new(items: &'a [T]) -> Self {
        Self { items }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Element at `index`; negative indices count from the end.
    ///
    /// # Errors
    ///
    /// [`SeqError::IndexOutOfRange`] if `index` is outside `-len..len`.
    pub fn get(&self, index: isize) -> Result<&'a T, SeqError> {
        let len = self.items.len();
        let resolved = if index < 0 {
            len.checked_sub(index.unsigned_abs())
        } else {
            Some(index.unsigned_abs())
        };
        resolved
            .and_then(|i| self.items.get(i))
            .ok_or(SeqError::IndexOutOfRange { index, len })
    }

    /// Elements from `start` up to, not including, `stop`, taking every
    /// `step`-th one. Bounds are clamped to the sequence; missing bounds
    /// default to the whole sequence in the direction of `step`.
    ///
    /// # Errors
    ///
    /// [`SeqError::ZeroStep`] if `step` is zero.
    pub fn slice(&self, start: Option<isize>, stop: Option<isize>, step: isize) -> Result<Vec<&'a T>, SeqError> {
        if step == 0 {
            return Err(SeqError::ZeroStep);
        }
        let (mut i, stop) = self.bounds(start, stop, step);
        let mut out = Vec::new();
        while (step > 0 && i < stop) || (step < 0 && i > stop) {
            out.push(&self.items[i.unsigned_abs()]);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
        Ok(out)
    }

    /// Resolves optional slice bounds to concrete positions. With a negative
    /// step, `-1` stands for "before the first element".
    fn bounds(&self, start: Option<isize>, stop: Option<isize>, step: isize) -> (isize, isize) {
        let len = isize::try_from(self.items.len()).unwrap_or(isize::MAX);
        let clamp = |index: isize| {
            if index < 0 {
                let shifted = index + len;
                if shifted >= 0 {
                    shifted
                } else if step < 0 {
                    -1
                } else {
                    0
                }
            } else if index >= len {
                if step < 0 { len - 1 } else { len }
            } else {
                index
            }
        };
        let (default_start, default_stop) = if step < 0 { (len - 1, -1) } else { (0, len) };
        (
            start.map_or(default_start, clamp),
            stop.map_or(default_stop, clamp),
        )
    }

    #[inline]
    pub fn iter(&self) -> slice::Iter<'a, T> {
        self.items.iter()
    }

    /// Iterates from the last element to the first.
    #[inline]
    pub fn rev(&self) -> Rev<slice::Iter<'a, T>> {
        self.items.iter().rev()
    }
}

impl<'a, T: PartialEq> SeqView<'a, T> {
    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        self.items.contains(value)
    }

    /// Number of elements equal to `value`.
    #[must_use]
    pub fn count(&self, value: &T) -> usize {
        self.items.iter().filter(|item| *item == value).count()
    }

    /// Position of the first element equal to `value` within
    /// `start..stop`, bounds clamped as for [`slice`](Self::slice).
    ///
    /// # Errors
    ///
    /// [`SeqError::NotFound`] if no element in range matches.
    pub fn index(&self, value: &T, start: Option<isize>, stop: Option<isize>) -> Result<usize, SeqError> {
        let (start, stop) = self.bounds(start, stop, 1);
        let (start, stop) = (start.unsigned_abs(), stop.unsigned_abs());
        if start >= stop {
            return Err(SeqError::NotFound);
        }
        self.items[start..stop]
            .iter()
            .position(|item| item == value)
            .map(|pos| start + pos)
            .ok_or(SeqError::NotFound)
    }
}

impl<T> Index<usize> for SeqView<'_, T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.items[index]
    }
}

impl<'a, T> IntoIterator for SeqView<'a, T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<'a, T> IntoIterator for &SeqView<'a, T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
