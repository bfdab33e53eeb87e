//! # Composition algebra for tasks and sub-resources.
//!
//! [`Expr`] is a small algebra over an arbitrary leaf type `L` with three
//! combinators and an identity:
//!
//! - [`Expr::Empty`] — the do-nothing identity
//! - [`Expr::Concurrent`] — children run all at once (`a | b`)
//! - [`Expr::Sequential`] — children run strictly in order (`a >> b`)
//! - [`Expr::Piped`] — like sequential, but each child receives the previous
//!   child's result as input ([`Expr::pipe`])
//!
//! The same algebra shapes two things in labvisor: executable work
//! ([`Task`](crate::Task) = `Expr<Action>`) and sub-resource layouts
//! (`Expr<SubSpec>`), so a driver composes "create these two children in
//! parallel, then that one" exactly like it composes shell steps.
//!
//! ## Rules
//! - `Empty` is the identity of every combinator: `e | Empty == e`,
//!   `Empty >> e == e`, `e.pipe(Empty) == e`.
//! - Combining two nodes of the **same** combinator flattens them into one
//!   child list: `(a | b) | c == a | b | c` (a single `Concurrent` of three).
//! - Different combinators nest: `(a | b) >> c` keeps the `Concurrent` node
//!   as the first sequential child.
//!
//! ## Example
//! ```rust
//! use labvisor::Expr;
//!
//! let a = Expr::leaf(1);
//! let b = Expr::leaf(2);
//! let c = Expr::leaf(3);
//!
//! // Flattened to a single Concurrent of three leaves:
//! let all = a | (b | c);
//! assert_eq!(all.len(), 3);
//! assert!(matches!(all, Expr::Concurrent(ref kids) if kids.len() == 3));
//!
//! // Identity:
//! let same = Expr::leaf(7) >> Expr::Empty;
//! assert_eq!(same, Expr::leaf(7));
//! ```

use std::ops::{BitOr, Shr};

/// Composition tree over leaves of type `L`.
///
/// See the [module docs](self) for the algebra rules. Construct leaves with
/// [`Expr::leaf`], combine with `|`, `>>` and [`Expr::pipe`].
#[derive(Clone, Debug, PartialEq)]
pub enum Expr<L> {
    /// Do-nothing identity.
    Empty,
    /// A single unit of work (or a single sub-resource spec).
    Leaf(L),
    /// Children run all at once.
    Concurrent(Vec<Expr<L>>),
    /// Children run strictly in order.
    Sequential(Vec<Expr<L>>),
    /// Children run in order; each receives the previous result as input.
    Piped(Vec<Expr<L>>),
}

impl<L> Expr<L> {
    /// The identity expression.
    pub fn empty() -> Self {
        Expr::Empty
    }

    /// Wraps a single leaf.
    pub fn leaf(leaf: L) -> Self {
        Expr::Leaf(leaf)
    }

    /// Combines two expressions to run concurrently (also `a | b`).
    pub fn concurrent(a: Self, b: Self) -> Self {
        Self::combine(a, b, Combinator::Concurrent)
    }

    /// Combines two expressions to run in order (also `a >> b`).
    pub fn sequential(a: Self, b: Self) -> Self {
        Self::combine(a, b, Combinator::Sequential)
    }

    /// Chains `next` after `self`, feeding it this expression's result.
    pub fn pipe(self, next: Self) -> Self {
        Self::combine(self, next, Combinator::Piped)
    }

    /// True only for the identity.
    pub fn is_empty(&self) -> bool {
        matches!(self, Expr::Empty)
    }

    /// Number of leaves in the tree.
    pub fn len(&self) -> usize {
        match self {
            Expr::Empty => 0,
            Expr::Leaf(_) => 1,
            Expr::Concurrent(kids) | Expr::Sequential(kids) | Expr::Piped(kids) => {
                kids.iter().map(Expr::len).sum()
            }
        }
    }

    fn combine(a: Self, b: Self, comb: Combinator) -> Self {
        // Empty is the identity of every combinator.
        if a.is_empty() {
            return b;
        }
        if b.is_empty() {
            return a;
        }

        let mut kids = match comb.take_children(a) {
            Ok(inner) => inner,
            Err(node) => vec![node],
        };
        match comb.take_children(b) {
            Ok(inner) => kids.extend(inner),
            Err(node) => kids.push(node),
        }
        comb.build(kids)
    }
}

/// Internal tag used by [`Expr::combine`] to share the flattening logic.
#[derive(Clone, Copy)]
enum Combinator {
    Concurrent,
    Sequential,
    Piped,
}

impl Combinator {
    /// Unwraps a node of this same combinator into its children, or returns
    /// the node untouched when it is anything else.
    fn take_children<L>(self, node: Expr<L>) -> Result<Vec<Expr<L>>, Expr<L>> {
        match (self, node) {
            (Combinator::Concurrent, Expr::Concurrent(kids)) => Ok(kids),
            (Combinator::Sequential, Expr::Sequential(kids)) => Ok(kids),
            (Combinator::Piped, Expr::Piped(kids)) => Ok(kids),
            (_, other) => Err(other),
        }
    }

    fn build<L>(self, kids: Vec<Expr<L>>) -> Expr<L> {
        match self {
            Combinator::Concurrent => Expr::Concurrent(kids),
            Combinator::Sequential => Expr::Sequential(kids),
            Combinator::Piped => Expr::Piped(kids),
        }
    }
}

impl<L> BitOr for Expr<L> {
    type Output = Expr<L>;

    /// `a | b` — run both concurrently.
    fn bitor(self, rhs: Self) -> Self::Output {
        Expr::concurrent(self, rhs)
    }
}

impl<L> Shr for Expr<L> {
    type Output = Expr<L>;

    /// `a >> b` — run `a`, then `b`.
    fn shr(self, rhs: Self) -> Self::Output {
        Expr::sequential(self, rhs)
    }
}

impl<L> Default for Expr<L> {
    fn default() -> Self {
        Expr::Empty
    }
}
