use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{Result, ValueError};
use crate::value::{Value, ValueType};

static NEXT_LIST_ID: AtomicU64 = AtomicU64::new(1);

fn next_list_id() -> u64 {
    NEXT_LIST_ID.fetch_add(1, Ordering::Relaxed)
}

/// A live position inside one [`List`].
///
/// The list keeps every cursor it handed out pointed at the same logical
/// element across `insert`, `remove` and `move_item`. Dropping the cursor
/// unregisters it.
#[derive(Debug)]
pub struct ListCursor {
    list: u64,
    pos: Arc<AtomicUsize>,
}

impl ListCursor {
    pub fn position(&self) -> usize {
        self.pos.load(Ordering::Acquire)
    }

    fn set(&self, pos: usize) {
        self.pos.store(pos, Ordering::Release);
    }
}

/// Ordered sequence of values with an optional element-type restriction.
pub struct List {
    id: u64,
    items: Vec<Value>,
    allocated: usize,
    restrict: Option<ValueType>,
    cursors: Vec<Weak<AtomicUsize>>,
}

impl List {
    pub fn new() -> Self {
        Self {
            id: next_list_id(),
            items: Vec::new(),
            allocated: 0,
            restrict: None,
            cursors: Vec::new(),
        }
    }

    /// An empty list restricted to `kind`.
    pub fn restricted(kind: ValueType) -> Result<Self> {
        let mut list = Self::new();
        list.restrict_to(kind)?;
        Ok(list)
    }

    // `kind` must not be None.
    pub(crate) fn restricted_unchecked(kind: ValueType) -> Self {
        let mut list = Self::new();
        list.restrict = Some(kind);
        list
    }

    /// Build an unrestricted list from values.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        let items: Vec<Value> = values.into_iter().collect();
        let allocated = items.len().next_power_of_two().max(items.len());
        let mut list = Self::new();
        list.items = items;
        list.allocated = if list.items.is_empty() { 0 } else { allocated };
        list
    }

    /// Build an Int64-restricted list.
    pub fn from_ints(values: impl IntoIterator<Item = i64>) -> Self {
        let mut list = Self::from_values(values.into_iter().map(Value::int));
        list.restrict = Some(ValueType::Int64);
        list
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Logical backing capacity. Doubles when full, halves when usage falls
    /// to half.
    pub fn capacity(&self) -> usize {
        self.allocated
    }

    pub fn restricted_type(&self) -> Option<ValueType> {
        self.restrict
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.items
    }

    /// Restrict every element of the list to `kind`.
    ///
    /// Fails if an element has a different kind or the list is already
    /// restricted to something else. `None` cannot be used as a restriction
    /// because the wire format reserves it for "unrestricted".
    pub fn restrict_to(&mut self, kind: ValueType) -> Result<()> {
        if kind == ValueType::None {
            return Err(ValueError::InvalidRestriction(
                "none is not a valid element type".into(),
            ));
        }
        match self.restrict {
            Some(current) if current == kind => return Ok(()),
            Some(current) => {
                return Err(ValueError::InvalidRestriction(format!(
                    "already restricted to {current}"
                )))
            }
            None => {}
        }
        if let Some(other) = self.items.iter().find(|v| v.kind() != kind) {
            return Err(ValueError::InvalidRestriction(format!(
                "element of type {} does not match {kind}",
                other.kind()
            )));
        }
        self.restrict = Some(kind);
        Ok(())
    }

    fn check_restriction(&self, value: &Value) -> Result<()> {
        match self.restrict {
            Some(kind) if kind != value.kind() => Err(ValueError::TypeMismatch {
                expected: kind,
                found: value.kind(),
            }),
            _ => Ok(()),
        }
    }

    // Negative indexes count from the end. `allow_end` admits `len` itself
    // (insert position).
    fn normalize(&self, index: i64, allow_end: bool) -> Result<usize> {
        let len = self.items.len() as i64;
        let pos = if index < 0 { index + len } else { index };
        let limit = if allow_end { len } else { len - 1 };
        if pos < 0 || pos > limit {
            return Err(ValueError::IndexOutOfRange {
                index,
                len: self.items.len(),
            });
        }
        Ok(pos as usize)
    }

    pub fn get(&self, index: i64) -> Result<&Value> {
        let pos = self.normalize(index, false)?;
        Ok(&self.items[pos])
    }

    /// Replace the element at `index`, returning the old one.
    pub fn set(&mut self, index: i64, value: Value) -> Result<Value> {
        self.check_restriction(&value)?;
        let pos = self.normalize(index, false)?;
        Ok(std::mem::replace(&mut self.items[pos], value))
    }

    /// Insert before `index`. Cursors at or after the insertion point move
    /// forward by one.
    pub fn insert(&mut self, index: i64, value: Value) -> Result<()> {
        self.check_restriction(&value)?;
        let pos = self.normalize(index, true)?;
        self.grow_if_full();
        self.items.insert(pos, value);
        self.adjust_cursors(|p| if p >= pos { p + 1 } else { p });
        Ok(())
    }

    /// Append to the end. Cursors are left where they are.
    pub fn append(&mut self, value: Value) -> Result<()> {
        self.check_restriction(&value)?;
        self.grow_if_full();
        self.items.push(value);
        Ok(())
    }

    /// Remove the element at `index`. Cursors after it move back by one; a
    /// cursor on the removed slot now observes the following element.
    pub fn remove(&mut self, index: i64) -> Result<Value> {
        let pos = self.normalize(index, false)?;
        let removed = self.items.remove(pos);
        self.adjust_cursors(|p| if p > pos { p - 1 } else { p });
        self.shrink_if_sparse();
        Ok(removed)
    }

    /// Move one element from `from` to `to`, shifting the elements between.
    pub fn move_item(&mut self, from: i64, to: i64) -> Result<()> {
        let a = self.normalize(from, false)?;
        let b = self.normalize(to, false)?;
        if a == b {
            return Ok(());
        }
        if a < b {
            self.items[a..=b].rotate_left(1);
            self.adjust_cursors(|p| {
                if p == a {
                    b
                } else if p > a && p <= b {
                    p - 1
                } else {
                    p
                }
            });
        } else {
            self.items[b..=a].rotate_right(1);
            self.adjust_cursors(|p| {
                if p == a {
                    b
                } else if p >= b && p < a {
                    p + 1
                } else {
                    p
                }
            });
        }
        Ok(())
    }

    /// Drop every element and rewind all cursors to the start.
    pub fn clear(&mut self) {
        self.items.clear();
        self.items.shrink_to(0);
        self.allocated = 0;
        self.adjust_cursors(|_| 0);
    }

    fn grow_if_full(&mut self) {
        if self.items.len() == self.allocated {
            let target = if self.allocated == 0 {
                1
            } else {
                self.allocated * 2
            };
            self.items.reserve_exact(target - self.items.len());
            self.allocated = target;
        }
    }

    fn shrink_if_sparse(&mut self) {
        if self.allocated > 1 && self.items.len() <= self.allocated / 2 {
            self.allocated /= 2;
            self.items.shrink_to(self.allocated);
        }
    }

    fn adjust_cursors(&mut self, adjust: impl Fn(usize) -> usize) {
        self.cursors.retain(|weak| match weak.upgrade() {
            Some(pos) => {
                let current = pos.load(Ordering::Acquire);
                pos.store(adjust(current), Ordering::Release);
                true
            }
            None => false,
        });
    }

    /// Register a cursor at the first element.
    pub fn cursor(&mut self) -> ListCursor {
        self.cursor_at(0)
    }

    /// Register a cursor at `pos` (clamped to the end position).
    pub fn cursor_at(&mut self, pos: usize) -> ListCursor {
        let pos = Arc::new(AtomicUsize::new(pos.min(self.items.len())));
        self.cursors.retain(|weak| weak.strong_count() > 0);
        self.cursors.push(Arc::downgrade(&pos));
        ListCursor { list: self.id, pos }
    }

    fn own(&self, cursor: &ListCursor) -> Result<()> {
        if cursor.list != self.id {
            return Err(ValueError::StaleCursor);
        }
        Ok(())
    }

    /// The element under the cursor, or `None` once it has run off the end.
    pub fn cursor_entry(&self, cursor: &ListCursor) -> Result<Option<&Value>> {
        self.own(cursor)?;
        Ok(self.items.get(cursor.position()))
    }

    pub fn cursor_valid(&self, cursor: &ListCursor) -> bool {
        cursor.list == self.id && cursor.position() < self.items.len()
    }

    pub fn cursor_next(&self, cursor: &ListCursor) -> Result<()> {
        self.own(cursor)?;
        let pos = cursor.position();
        if pos < self.items.len() {
            cursor.set(pos + 1);
        }
        Ok(())
    }

    /// Reposition a cursor. Negative positions count from the end.
    pub fn cursor_seek(&self, cursor: &ListCursor, pos: i64) -> Result<()> {
        self.own(cursor)?;
        let pos = self.normalize(pos, true)?;
        cursor.set(pos);
        Ok(())
    }

    /// Insert before the cursor; the cursor then observes the new element.
    pub fn cursor_insert(&mut self, cursor: &ListCursor, value: Value) -> Result<()> {
        self.own(cursor)?;
        let pos = cursor.position();
        self.insert(pos as i64, value)?;
        cursor.set(pos);
        Ok(())
    }

    /// Remove the element under the cursor; the cursor then observes the
    /// following element.
    pub fn cursor_remove(&mut self, cursor: &ListCursor) -> Result<Value> {
        self.own(cursor)?;
        let pos = cursor.position();
        if pos >= self.items.len() {
            return Err(ValueError::IndexOutOfRange {
                index: pos as i64,
                len: self.items.len(),
            });
        }
        self.remove(pos as i64)
    }

    #[cfg(test)]
    pub(crate) fn live_cursors(&self) -> usize {
        self.cursors.iter().filter(|w| w.strong_count() > 0).count()
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

// A clone is a new list: same elements, no cursors.
impl Clone for List {
    fn clone(&self) -> Self {
        Self {
            id: next_list_id(),
            items: self.items.clone(),
            allocated: self.allocated,
            restrict: self.restrict,
            cursors: Vec::new(),
        }
    }
}

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        self.restrict == other.restrict && self.items == other.items
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List")
            .field("restrict", &self.restrict)
            .field("items", &self.items)
            .finish()
    }
}

impl<'a> IntoIterator for &'a List {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl FromIterator<Value> for List {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Self::from_values(iter)
    }
}
