use std::cell::RefCell;
use std::rc::Rc;

use crate::val::Val;

/// Shared single-slot box backing a closure-captured variable.
///
/// Cloning a `Cell` clones the handle: every frame and function holding a
/// clone reads and writes the same slot.
#[derive(Debug, Clone, Default)]
pub struct Cell(Rc<RefCell<Option<Val>>>);

impl Cell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: Val) -> Self {
        Self(Rc::new(RefCell::new(Some(value))))
    }

    pub fn get(&self) -> Option<Val> {
        self.0.borrow().clone()
    }

    pub fn set(&self, value: Val) {
        *self.0.borrow_mut() = Some(value);
    }

    /// Empties the slot, returning whether it held a value.
    pub fn clear(&self) -> bool {
        self.0.borrow_mut().take().is_some()
    }

    pub fn ptr_eq(&self, other: &Cell) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
