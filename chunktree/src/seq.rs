//! Fixed-capacity sequences used as node payload containers.
//!
//! Both containers are backed by a `Vec` whose length never exceeds the
//! capacity chosen at construction. Misuse (inserting into a full sequence,
//! popping from an empty one, indexing past the end) is reported as a
//! `SeqError` instead of growing or panicking. Under correct tree logic these
//! errors never fire, so they indicate a sizing mistake or a bug.

/// An unsorted sequence with a fixed capacity.
///
/// Used for the child-pointer arrays of index nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedVec<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> BoundedVec<T> {
    /// Create an empty sequence that can hold `capacity` elements.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Build a sequence from existing elements.
    pub fn try_from_vec(items: Vec<T>, capacity: usize) -> Result<Self, SeqError> {
        if items.len() > capacity {
            return Err(SeqError::Overflow);
        }
        Ok(Self { items, capacity })
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len() is not const-stable
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::is_empty() is not const-stable
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Get the element at `index`.
    pub fn get(&self, index: usize) -> Result<&T, SeqError> {
        self.items.get(index).ok_or(SeqError::OutOfBounds {
            index,
            len: self.items.len(),
        })
    }

    /// Replace the element at `index`, returning the previous one.
    pub fn set(&mut self, index: usize, value: T) -> Result<T, SeqError> {
        let len = self.items.len();
        let slot = self
            .items
            .get_mut(index)
            .ok_or(SeqError::OutOfBounds { index, len })?;
        Ok(std::mem::replace(slot, value))
    }

    /// Insert `value` at `offset`, shifting later elements right.
    ///
    /// `offset` may equal the current length (append).
    pub fn insert(&mut self, offset: usize, value: T) -> Result<(), SeqError> {
        if offset > self.items.len() {
            return Err(SeqError::OutOfBounds {
                index: offset,
                len: self.items.len(),
            });
        }
        if self.is_full() {
            return Err(SeqError::Overflow);
        }
        self.items.insert(offset, value);
        Ok(())
    }

    /// Remove and return the element at `offset`.
    pub fn remove_at(&mut self, offset: usize) -> Result<T, SeqError> {
        if offset >= self.items.len() {
            return Err(SeqError::OutOfBounds {
                index: offset,
                len: self.items.len(),
            });
        }
        Ok(self.items.remove(offset))
    }

    pub fn push(&mut self, value: T) -> Result<(), SeqError> {
        self.insert(self.items.len(), value)
    }

    pub fn unshift(&mut self, value: T) -> Result<(), SeqError> {
        self.insert(0, value)
    }

    /// Remove and return the last element.
    pub fn pop(&mut self) -> Result<T, SeqError> {
        self.items.pop().ok_or(SeqError::Underflow)
    }

    /// Remove and return the first element.
    pub fn shift(&mut self) -> Result<T, SeqError> {
        if self.items.is_empty() {
            return Err(SeqError::Underflow);
        }
        Ok(self.items.remove(0))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Move the elements from `at` onwards into a new sequence of the same capacity.
    pub fn split_off(&mut self, at: usize) -> Result<Self, SeqError> {
        if at > self.items.len() {
            return Err(SeqError::OutOfBounds {
                index: at,
                len: self.items.len(),
            });
        }
        Ok(Self {
            items: self.items.split_off(at),
            capacity: self.capacity,
        })
    }

    /// Move every element of `other` to the end of `self`.
    pub fn append(&mut self, other: &mut Self) -> Result<(), SeqError> {
        if self.items.len() + other.items.len() > self.capacity {
            return Err(SeqError::Overflow);
        }
        self.items.append(&mut other.items);
        Ok(())
    }

    /// Move every element of `other` to the front of `self`.
    pub fn prepend(&mut self, other: &mut Self) -> Result<(), SeqError> {
        if self.items.len() + other.items.len() > self.capacity {
            return Err(SeqError::Overflow);
        }
        other.items.append(&mut self.items);
        std::mem::swap(&mut self.items, &mut other.items);
        Ok(())
    }
}

impl<T: PartialEq> BoundedVec<T> {
    /// Position of the first element equal to `value`.
    pub fn index_of(&self, value: &T) -> Result<usize, SeqError> {
        self.items
            .iter()
            .position(|item| item == value)
            .ok_or(SeqError::NotFound)
    }

    #[must_use]
    pub fn includes(&self, value: &T) -> bool {
        self.items.contains(value)
    }

    /// Remove the first element equal to `value`.
    pub fn remove(&mut self, value: &T) -> Result<T, SeqError> {
        let index = self.index_of(value)?;
        self.remove_at(index)
    }
}

/// A sequence kept in ascending order, with a fixed capacity.
///
/// Used for the split keys of index nodes and the entries of record nodes.
/// Equal elements are allowed; a new element is placed before any equal ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedSortedVec<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T: Ord> BoundedSortedVec<T> {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Build a sequence from elements that must already be sorted.
    pub fn try_from_sorted(items: Vec<T>, capacity: usize) -> Result<Self, SeqError> {
        if items.len() > capacity {
            return Err(SeqError::Overflow);
        }
        if let Some(index) = items.windows(2).position(|w| w[0] > w[1]) {
            return Err(SeqError::Unordered { index: index + 1 });
        }
        Ok(Self { items, capacity })
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len() is not const-stable
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::is_empty() is not const-stable
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn get(&self, index: usize) -> Result<&T, SeqError> {
        self.items.get(index).ok_or(SeqError::OutOfBounds {
            index,
            len: self.items.len(),
        })
    }

    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    /// Index of the first element not less than `value`.
    #[must_use]
    pub fn lower_bound(&self, value: &T) -> usize {
        self.items.partition_point(|item| item < value)
    }

    /// Index of the first element greater than `value`.
    #[must_use]
    pub fn upper_bound(&self, value: &T) -> usize {
        self.items.partition_point(|item| item <= value)
    }

    /// Index of the first element for which `pred` is false.
    ///
    /// `pred` must be true for a prefix of the sequence and false afterwards.
    pub fn partition_point<P>(&self, pred: P) -> usize
    where
        P: FnMut(&T) -> bool,
    {
        self.items.partition_point(pred)
    }

    pub fn index_of(&self, value: &T) -> Result<usize, SeqError> {
        let index = self.lower_bound(value);
        match self.items.get(index) {
            Some(item) if item == value => Ok(index),
            _ => Err(SeqError::NotFound),
        }
    }

    #[must_use]
    pub fn includes(&self, value: &T) -> bool {
        self.index_of(value).is_ok()
    }

    /// Insert `value` at its sorted position and return that position.
    pub fn insert(&mut self, value: T) -> Result<usize, SeqError> {
        if self.is_full() {
            return Err(SeqError::Overflow);
        }
        let index = self.lower_bound(&value);
        self.items.insert(index, value);
        Ok(index)
    }

    /// Remove one element equal to `value`.
    pub fn remove(&mut self, value: &T) -> Result<T, SeqError> {
        let index = self.index_of(value)?;
        Ok(self.items.remove(index))
    }

    pub fn remove_at(&mut self, offset: usize) -> Result<T, SeqError> {
        if offset >= self.items.len() {
            return Err(SeqError::OutOfBounds {
                index: offset,
                len: self.items.len(),
            });
        }
        Ok(self.items.remove(offset))
    }

    /// Replace the element at `index` with one that keeps the order intact.
    pub fn replace_at(&mut self, index: usize, value: T) -> Result<T, SeqError> {
        let len = self.items.len();
        if index >= len {
            return Err(SeqError::OutOfBounds { index, len });
        }
        let after_prev = index == 0 || self.items[index - 1] <= value;
        let before_next = index + 1 == len || value <= self.items[index + 1];
        if !(after_prev && before_next) {
            return Err(SeqError::Unordered { index });
        }
        Ok(std::mem::replace(&mut self.items[index], value))
    }

    pub fn pop(&mut self) -> Result<T, SeqError> {
        self.items.pop().ok_or(SeqError::Underflow)
    }

    pub fn shift(&mut self) -> Result<T, SeqError> {
        if self.items.is_empty() {
            return Err(SeqError::Underflow);
        }
        Ok(self.items.remove(0))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Move the elements from `at` onwards into a new sequence of the same capacity.
    pub fn split_off(&mut self, at: usize) -> Result<Self, SeqError> {
        if at > self.items.len() {
            return Err(SeqError::OutOfBounds {
                index: at,
                len: self.items.len(),
            });
        }
        Ok(Self {
            items: self.items.split_off(at),
            capacity: self.capacity,
        })
    }

    /// Move every element of `other`, all of which sort after `self`, to the end.
    pub fn append(&mut self, other: &mut Self) -> Result<(), SeqError> {
        if self.items.len() + other.items.len() > self.capacity {
            return Err(SeqError::Overflow);
        }
        if let (Some(last), Some(first)) = (self.items.last(), other.items.first()) {
            if last > first {
                return Err(SeqError::Unordered {
                    index: self.items.len(),
                });
            }
        }
        self.items.append(&mut other.items);
        Ok(())
    }

    /// Move every element of `other`, all of which sort before `self`, to the front.
    pub fn prepend(&mut self, other: &mut Self) -> Result<(), SeqError> {
        if self.items.len() + other.items.len() > self.capacity {
            return Err(SeqError::Overflow);
        }
        if let (Some(last), Some(first)) = (other.items.last(), self.items.first()) {
            if last > first {
                return Err(SeqError::Unordered {
                    index: other.items.len(),
                });
            }
        }
        other.items.append(&mut self.items);
        std::mem::swap(&mut self.items, &mut other.items);
        Ok(())
    }
}

/// Errors raised by misuse of a bounded sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeqError {
    /// Insertion into a full sequence.
    Overflow,
    /// Removal from an empty sequence.
    Underflow,
    /// Index past the current length.
    OutOfBounds { index: usize, len: usize },
    /// Lookup by exact element found no match.
    NotFound,
    /// An operation would break the ascending order.
    Unordered { index: usize },
}

impl std::fmt::Display for SeqError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overflow => write!(f, "sequence overflow"),
            Self::Underflow => write!(f, "sequence underflow"),
            Self::OutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds (length {len})")
            }
            Self::NotFound => write!(f, "element not found"),
            Self::Unordered { index } => write!(f, "element at {index} breaks sort order"),
        }
    }
}

impl std::error::Error for SeqError {}
