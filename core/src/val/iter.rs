//! Iteration protocol: get-iterator and advance-or-exhausted.

use std::{cell::RefCell, rc::Rc};

use anyhow::Result;

use super::{ExcKind, RangeValue, Val, host_error};

#[derive(Debug)]
pub enum IterState {
    /// Live view over a list; appends during iteration are observed.
    List { source: Rc<RefCell<Vec<Val>>>, pos: usize },
    /// Snapshot of a tuple, set, dict's keys or a string's characters.
    Items { items: Vec<Val>, pos: usize },
    Range { range: RangeValue, pos: usize },
}

impl IterState {
    fn advance(&mut self) -> Option<Val> {
        match self {
            IterState::List { source, pos } => {
                let item = source.borrow().get(*pos).cloned()?;
                *pos += 1;
                Some(item)
            }
            IterState::Items { items, pos } => {
                let item = items.get(*pos).cloned()?;
                *pos += 1;
                Some(item)
            }
            IterState::Range { range, pos } => {
                let item = range.get(*pos)?;
                *pos += 1;
                Some(Val::Int(item))
            }
        }
    }
}

fn wrap(state: IterState) -> Val {
    Val::Iter(Rc::new(RefCell::new(state)))
}

fn not_iterable(v: &Val) -> anyhow::Error {
    host_error(
        ExcKind::TypeError,
        format!("'{}' object is not iterable", v.type_name()),
    )
}

/// `iter(value)`.
pub fn get_iter(v: &Val) -> Result<Val> {
    let state = match v {
        Val::Iter(_) => return Ok(v.clone()),
        Val::List(source) => IterState::List {
            source: source.clone(),
            pos: 0,
        },
        Val::Range(range) => IterState::Range { range: *range, pos: 0 },
        Val::Tuple(items) => IterState::Items {
            items: items.to_vec(),
            pos: 0,
        },
        Val::Set(items) => IterState::Items {
            items: items.borrow().clone(),
            pos: 0,
        },
        Val::Dict(dict) => IterState::Items {
            items: dict.borrow().keys(),
            pos: 0,
        },
        Val::Str(s) => IterState::Items {
            items: s.chars().map(|c| Val::str(c.encode_utf8(&mut [0; 4]))).collect(),
            pos: 0,
        },
        other => return Err(not_iterable(other)),
    };
    Ok(wrap(state))
}

/// Advances an iterator; `None` once exhausted.
pub fn next(it: &Val) -> Result<Option<Val>> {
    match it {
        Val::Iter(state) => Ok(state.borrow_mut().advance()),
        other => Err(host_error(
            ExcKind::TypeError,
            format!("'{}' object is not an iterator", other.type_name()),
        )),
    }
}

/// Drains any iterable into a vector.
pub fn collect(v: &Val) -> Result<Vec<Val>> {
    match v {
        Val::Tuple(items) => Ok(items.to_vec()),
        Val::List(items) | Val::Set(items) => Ok(items.borrow().clone()),
        Val::Dict(dict) => Ok(dict.borrow().keys()),
        _ => {
            let it = get_iter(v)?;
            let mut out = Vec::new();
            while let Some(item) = next(&it)? {
                out.push(item);
            }
            Ok(out)
        }
    }
}
