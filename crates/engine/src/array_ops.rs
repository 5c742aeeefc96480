//! Pure array transformations
//!
//! Each path-addressed array mutation reads the array, applies one of these
//! transformations and writes the whole array back through the ordinary set
//! pipeline.
//!
//! Index handling follows slice/splice conventions: a negative index counts
//! from the end, and every index is clamped into `0..=len`.

use serde_json::Value;

/// An array mutation
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayOp {
    /// Append values at the end
    Push(Vec<Value>),
    /// Remove the last element
    Pop,
    /// Remove the first element
    Shift,
    /// Prepend values, preserving their order
    Unshift(Vec<Value>),
    /// Splice values in starting at `index`
    Insert { index: i64, values: Vec<Value> },
    /// Delete `count` elements starting at `index`
    Remove { index: i64, count: usize },
    /// Move `count` elements starting at `from` so they start at `to`.
    ///
    /// A negative `to` is offset by the array's length before the elements
    /// are taken out.
    Move { from: i64, to: i64, count: usize },
}

/// Resolve a possibly negative index against `len`, clamped to `0..=len`
fn resolve(index: i64, len: usize) -> usize {
    let len_i = len as i64;
    let i = if index < 0 { len_i + index } else { index };
    i.clamp(0, len_i) as usize
}

impl ArrayOp {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            ArrayOp::Push(_) => "push",
            ArrayOp::Pop => "pop",
            ArrayOp::Shift => "shift",
            ArrayOp::Unshift(_) => "unshift",
            ArrayOp::Insert { .. } => "insert",
            ArrayOp::Remove { .. } => "remove",
            ArrayOp::Move { .. } => "move",
        }
    }

    /// Apply the transformation
    pub fn apply(&self, mut items: Vec<Value>) -> Vec<Value> {
        match self {
            ArrayOp::Push(values) => items.extend(values.iter().cloned()),
            ArrayOp::Pop => {
                items.pop();
            }
            ArrayOp::Shift => {
                if !items.is_empty() {
                    items.remove(0);
                }
            }
            ArrayOp::Unshift(values) => {
                items.splice(0..0, values.iter().cloned());
            }
            ArrayOp::Insert { index, values } => {
                let at = resolve(*index, items.len());
                items.splice(at..at, values.iter().cloned());
            }
            ArrayOp::Remove { index, count } => {
                let start = resolve(*index, items.len());
                let end = start.saturating_add(*count).min(items.len());
                items.drain(start..end);
            }
            ArrayOp::Move { from, to, count } => {
                let len = items.len() as i64;
                let to = if *to < 0 { *to + len } else { *to };
                let start = resolve(*from, items.len());
                let end = start.saturating_add(*count).min(items.len());
                let moved: Vec<Value> = items.drain(start..end).collect();
                let at = resolve(to.max(0), items.len());
                items.splice(at..at, moved);
            }
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn abc() -> Vec<Value> {
        vec![json!("a"), json!("b"), json!("c")]
    }

    #[test]
    fn remove_from_front() {
        let out = ArrayOp::Remove { index: 0, count: 2 }.apply(abc());
        assert_eq!(out, vec![json!("c")]);
    }

    #[test]
    fn move_to_negative_index() {
        let out = ArrayOp::Move {
            from: 0,
            to: -1,
            count: 1,
        }
        .apply(abc());
        assert_eq!(out, vec![json!("b"), json!("c"), json!("a")]);
    }

    #[test]
    fn move_forward_and_back() {
        let out = ArrayOp::Move {
            from: 2,
            to: 0,
            count: 1,
        }
        .apply(abc());
        assert_eq!(out, vec![json!("c"), json!("a"), json!("b")]);

        let out = ArrayOp::Move {
            from: 0,
            to: 1,
            count: 2,
        }
        .apply(abc());
        assert_eq!(out, vec![json!("c"), json!("a"), json!("b")]);
    }

    #[test]
    fn insert_in_middle() {
        let out = ArrayOp::Insert {
            index: 1,
            values: vec![json!("x")],
        }
        .apply(vec![json!("a"), json!("b")]);
        assert_eq!(out, vec![json!("a"), json!("x"), json!("b")]);
    }

    #[test]
    fn insert_out_of_range_clamps() {
        let out = ArrayOp::Insert {
            index: 10,
            values: vec![json!("x")],
        }
        .apply(vec![json!("a")]);
        assert_eq!(out, vec![json!("a"), json!("x")]);

        let out = ArrayOp::Insert {
            index: -1,
            values: vec![json!("x")],
        }
        .apply(vec![json!("a"), json!("b")]);
        assert_eq!(out, vec![json!("a"), json!("x"), json!("b")]);

        let out = ArrayOp::Insert {
            index: -10,
            values: vec![json!("x")],
        }
        .apply(vec![json!("a")]);
        assert_eq!(out, vec![json!("x"), json!("a")]);
    }

    #[test]
    fn push_pop_shift_unshift() {
        let out = ArrayOp::Push(vec![json!("d"), json!("e")]).apply(abc());
        assert_eq!(out.len(), 5);
        assert_eq!(out[4], json!("e"));

        assert_eq!(ArrayOp::Pop.apply(abc()), vec![json!("a"), json!("b")]);
        assert_eq!(ArrayOp::Shift.apply(abc()), vec![json!("b"), json!("c")]);
        assert_eq!(ArrayOp::Pop.apply(vec![]), Vec::<Value>::new());
        assert_eq!(ArrayOp::Shift.apply(vec![]), Vec::<Value>::new());

        let out = ArrayOp::Unshift(vec![json!("y"), json!("z")]).apply(abc());
        assert_eq!(
            out,
            vec![json!("y"), json!("z"), json!("a"), json!("b"), json!("c")]
        );
    }

    #[test]
    fn remove_past_end_is_clamped() {
        let out = ArrayOp::Remove {
            index: 2,
            count: 10,
        }
        .apply(abc());
        assert_eq!(out, vec![json!("a"), json!("b")]);
        let out = ArrayOp::Remove { index: 5, count: 1 }.apply(abc());
        assert_eq!(out, abc());
    }
}
