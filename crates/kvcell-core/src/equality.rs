#![forbid(unsafe_code)]

//! Equality predicates deciding whether a change is real.
//!
//! A predicate compares the cached value with a candidate; `None` stands for
//! "no value". When it returns `true` the write or refresh is suppressed and
//! nobody is notified.

use std::rc::Rc;

/// Shared equality predicate over optional values.
pub type Equality<T> = Rc<dyn Fn(Option<&T>, Option<&T>) -> bool>;

/// Structural equality via `PartialEq`. Default for cells.
#[must_use]
pub fn partial_eq<T: PartialEq + 'static>() -> Equality<T> {
    Rc::new(|a: Option<&T>, b: Option<&T>| a == b)
}

/// Compare the projections `key(a)` and `key(b)`; two `None`s are equal,
/// `None` never equals a value.
#[must_use]
pub fn by_key<T: 'static, K: PartialEq>(key: impl Fn(&T) -> K + 'static) -> Equality<T> {
    Rc::new(move |a: Option<&T>, b: Option<&T>| match (a, b) {
        (Some(a), Some(b)) => key(a) == key(b),
        (None, None) => true,
        _ => false,
    })
}

/// Treat every comparison as a change, so every write notifies.
#[must_use]
pub fn never<T: 'static>() -> Equality<T> {
    Rc::new(|_: Option<&T>, _: Option<&T>| false)
}
