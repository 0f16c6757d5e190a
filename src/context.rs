//! The mutable constraint state threaded through verification.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use crate::error::Error;

/// Accumulated structural constraints observed so far in a proof search.
///
/// Both constraint kinds narrow monotonically: once a range or membership set has been
/// recorded under a `uuid`, a later caveat may only shrink it further.  An attempt to widen
/// fails with [Error::ContextConflict]; the verifier treats that failure as a signal to
/// backtrack, not as a fatal error.
///
/// Backed by ordered maps rather than hash maps so `Context` itself derives `Hash`, `Eq`, and
/// `Ord` and [crate::verifier::Verifier::verify] can return a genuine `HashSet<Context>`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Context {
    ranges: BTreeMap<String, (i64, i64)>,
    memberships: BTreeMap<String, BTreeSet<String>>,
}

impl Context {
    /// An empty context with no constraints recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intersect the range recorded under `uuid` with `[lo, hi]`, or record it if absent.
    ///
    /// Fails if `lo > hi`, or if an existing range under `uuid` does not overlap `[lo, hi]`.
    pub fn add_range(&mut self, uuid: &str, lo: i64, hi: i64) -> Result<(), Error> {
        if lo > hi {
            return Err(Error::invalid_argument(format!(
                "range lower bound {lo} exceeds upper bound {hi}"
            )));
        }
        match self.ranges.get(uuid) {
            None => {
                self.ranges.insert(uuid.to_string(), (lo, hi));
                Ok(())
            }
            Some(&(existing_lo, existing_hi)) => {
                let new_lo = existing_lo.max(lo);
                let new_hi = existing_hi.min(hi);
                if new_lo > new_hi {
                    return Err(Error::context_conflict(
                        uuid,
                        format!(
                            "[{lo}, {hi}] does not intersect existing [{existing_lo}, {existing_hi}]"
                        ),
                    ));
                }
                self.ranges.insert(uuid.to_string(), (new_lo, new_hi));
                Ok(())
            }
        }
    }

    /// Intersect the membership set recorded under `uuid` with `members`, or record it if
    /// absent.
    ///
    /// Fails if the intersection would be a strict subset of `members`, i.e. `members`
    /// contained an element the existing set had already excluded.
    pub fn add_membership<'a, I>(&mut self, uuid: &str, members: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let incoming: BTreeSet<String> = members.into_iter().map(str::to_string).collect();
        match self.memberships.get(uuid) {
            None => {
                self.memberships.insert(uuid.to_string(), incoming);
                Ok(())
            }
            Some(existing) => {
                let intersection: BTreeSet<String> =
                    existing.intersection(&incoming).cloned().collect();
                if intersection.len() < incoming.len() {
                    return Err(Error::context_conflict(
                        uuid,
                        "membership set would widen beyond existing constraint",
                    ));
                }
                self.memberships.insert(uuid.to_string(), intersection);
                Ok(())
            }
        }
    }

    /// Remove and return the range recorded under `uuid`, if any.
    pub fn remove_range(&mut self, uuid: &str) -> Option<(i64, i64)> {
        self.ranges.remove(uuid)
    }

    /// Remove and return the membership set recorded under `uuid`, if any.
    pub fn remove_membership(&mut self, uuid: &str) -> Option<BTreeSet<String>> {
        self.memberships.remove(uuid)
    }

    /// A defensive copy of the range recorded under `uuid`, if any.
    pub fn copy_of_range(&self, uuid: &str) -> Option<(i64, i64)> {
        self.ranges.get(uuid).copied()
    }

    /// A defensive copy of the membership set recorded under `uuid`, if any.
    pub fn copy_of_membership(&self, uuid: &str) -> Option<BTreeSet<String>> {
        self.memberships.get(uuid).cloned()
    }
}

impl Display for Context {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "Context{{ranges: {{")?;
        for (i, (uuid, (lo, hi))) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(fmt, ", ")?;
            }
            write!(fmt, "{uuid}: [{lo}, {hi}]")?;
        }
        write!(fmt, "}}, memberships: {{")?;
        for (i, (uuid, members)) in self.memberships.iter().enumerate() {
            if i > 0 {
                write!(fmt, ", ")?;
            }
            let joined: Vec<&str> = members.iter().map(String::as_str).collect();
            write!(fmt, "{uuid}: [{}]", joined.join(", "))?;
        }
        write!(fmt, "}}}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_has_no_constraints() {
        let ctx = Context::new();
        assert_eq!(None, ctx.copy_of_range("TIME"));
        assert_eq!(None, ctx.copy_of_membership("ACCESS"));
    }

    #[test]
    fn range_narrows_on_intersection() {
        let mut ctx = Context::new();
        ctx.add_range("TIME", 0, 100).unwrap();
        ctx.add_range("TIME", 50, 150).unwrap();
        assert_eq!(Some((50, 100)), ctx.copy_of_range("TIME"));
    }

    #[test]
    fn disjoint_ranges_conflict() {
        let mut ctx = Context::new();
        ctx.add_range("TIME", 0, 10).unwrap();
        let err = ctx.add_range("TIME", 20, 30).unwrap_err();
        assert!(matches!(err, Error::ContextConflict { .. }));
    }

    #[test]
    fn inverted_range_is_invalid_argument() {
        let mut ctx = Context::new();
        let err = ctx.add_range("TIME", 10, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn membership_narrows_on_intersection() {
        let mut ctx = Context::new();
        ctx.add_membership("ACCESS", ["r1", "r2", "r3"]).unwrap();
        ctx.add_membership("ACCESS", ["r2", "r3"]).unwrap();
        let members = ctx.copy_of_membership("ACCESS").unwrap();
        assert_eq!(2, members.len());
        assert!(members.contains("r2"));
        assert!(members.contains("r3"));
    }

    #[test]
    fn membership_widening_conflicts() {
        let mut ctx = Context::new();
        ctx.add_membership("ACCESS", ["r1"]).unwrap();
        let err = ctx.add_membership("ACCESS", ["r1", "r2"]).unwrap_err();
        assert!(matches!(err, Error::ContextConflict { .. }));
    }

    #[test]
    fn remove_returns_previous_value() {
        let mut ctx = Context::new();
        ctx.add_range("TIME", 0, 10).unwrap();
        assert_eq!(Some((0, 10)), ctx.remove_range("TIME"));
        assert_eq!(None, ctx.remove_range("TIME"));
    }

    #[test]
    fn display_renders_both_maps() {
        let mut ctx = Context::new();
        ctx.add_range("TIME", 0, 10).unwrap();
        ctx.add_membership("ACCESS", ["r1"]).unwrap();
        let rendered = format!("{ctx}");
        assert!(rendered.contains("TIME: [0, 10]"));
        assert!(rendered.contains("ACCESS: [r1]"));
    }
}
