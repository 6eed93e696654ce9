use std::rc::Rc;

use anyhow::Result;

use super::cell::Cell;
use super::code::CodeObject;
use super::frame::Namespace;
use crate::val::{Dict, ExcKind, Val, host_error};

/// A guest function: code plus everything captured when it was made.
///
/// Never mutated after construction; calling it builds a fresh frame.
#[derive(Debug)]
pub struct FunctionValue {
    pub code: Rc<CodeObject>,
    pub name: String,
    pub globals: Namespace,
    pub defaults: Vec<Val>,
    pub kwdefaults: Vec<(String, Val)>,
    pub annotations: Option<Val>,
    /// Cells for `code.freevars`, in the same order.
    pub closure: Vec<(String, Cell)>,
}

fn arity_error(message: String) -> anyhow::Error {
    host_error(ExcKind::TypeError, message)
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

fn name_list(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
    match quoted.as_slice() {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

impl FunctionValue {
    /// Binds a call's arguments to local slots.
    ///
    /// Positional arguments fill declared parameters left to right, the
    /// surplus goes to `*args`, keywords bind by name or land in `**kwargs`,
    /// and defaults fill whatever is still unbound. Explicit arguments always
    /// win over defaults.
    pub fn bind(&self, args: Vec<Val>, kwargs: Vec<(String, Val)>) -> Result<Vec<Option<Val>>> {
        let code = &self.code;
        let argcount = code.argcount as usize;
        let kwonly = code.kwonlyargcount as usize;
        let mut slots: Vec<Option<Val>> = vec![None; code.varnames.len()];
        let mut next_slot = argcount + kwonly;

        let given = args.len();
        let mut args = args.into_iter();
        for slot in slots.iter_mut().take(argcount) {
            match args.next() {
                Some(value) => *slot = Some(value),
                None => break,
            }
        }

        let surplus: Vec<Val> = args.collect();
        if code.has_varargs() {
            slots[next_slot] = Some(Val::tuple(surplus));
            next_slot += 1;
        } else if !surplus.is_empty() {
            let takes = if self.defaults.is_empty() {
                plural(argcount, "positional argument")
            } else {
                format!(
                    "from {} to {}",
                    argcount - self.defaults.len().min(argcount),
                    plural(argcount, "positional argument")
                )
            };
            let were = if given == 1 { "was" } else { "were" };
            return Err(arity_error(format!("{}() takes {takes} but {given} {were} given", self.name)));
        }

        let mut extra = code.has_varkw().then(Dict::new);
        for (key, value) in kwargs {
            let named = code.varnames[..argcount + kwonly].iter().position(|n| *n == key);
            match (named, extra.as_mut()) {
                (Some(slot), _) => {
                    if slots[slot].is_some() {
                        return Err(arity_error(format!(
                            "{}() got multiple values for argument '{key}'",
                            self.name
                        )));
                    }
                    slots[slot] = Some(value);
                }
                (None, Some(dict)) => {
                    if dict.insert(Val::str(&key), value)?.is_some() {
                        return Err(arity_error(format!(
                            "{}() got multiple values for keyword argument '{key}'",
                            self.name
                        )));
                    }
                }
                (None, None) => {
                    return Err(arity_error(format!(
                        "{}() got an unexpected keyword argument '{key}'",
                        self.name
                    )));
                }
            }
        }
        if let Some(dict) = extra {
            slots[next_slot] = Some(Val::dict(dict));
        }

        for slot in argcount..argcount + kwonly {
            if slots[slot].is_none() {
                let name = &code.varnames[slot];
                slots[slot] = self.kwdefaults.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());
            }
        }

        // Defaults bind to the trailing positional parameters.
        let used_defaults = &self.defaults[self.defaults.len().saturating_sub(argcount)..];
        let first_default = argcount - used_defaults.len();
        for (slot, default) in (first_default..argcount).zip(used_defaults) {
            if slots[slot].is_none() {
                slots[slot] = Some(default.clone());
            }
        }

        let missing: Vec<&str> = (0..argcount)
            .filter(|slot| slots[*slot].is_none())
            .map(|slot| code.varnames[slot].as_str())
            .collect();
        if !missing.is_empty() {
            return Err(arity_error(format!(
                "{}() missing {}: {}",
                self.name,
                plural(missing.len(), "required positional argument"),
                name_list(&missing)
            )));
        }
        let missing: Vec<&str> = (argcount..argcount + kwonly)
            .filter(|slot| slots[*slot].is_none())
            .map(|slot| code.varnames[slot].as_str())
            .collect();
        if !missing.is_empty() {
            return Err(arity_error(format!(
                "{}() missing {}: {}",
                self.name,
                plural(missing.len(), "required keyword-only argument"),
                name_list(&missing)
            )));
        }
        Ok(slots)
    }
}
