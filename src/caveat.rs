//! The caveat model: a closed, tagged variant replacing a dynamic class hierarchy.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::context::Context;
use crate::crypto::Secret;
use crate::error::Error;

const MEMBER_DELIMITER: &str = ", ";

/// An application-supplied predicate evaluated against a [Context] during verification.
///
/// Modeled as a function-object capability (an `Arc`'d closure) rather than a trait object
/// behind a subclass, per this crate's caveat taxonomy.  Cloning a [Caveat] shares the same
/// closure.
pub type Predicate = Arc<dyn Fn(&mut Context) -> Result<(), Error> + Send + Sync>;

/// An attenuation attached to a [crate::credential::Credential].
#[derive(Clone)]
pub enum Caveat {
    /// A first-party caveat whose predicate is opaque to this crate.
    FirstParty { identifier: String, predicate: Predicate },
    /// A first-party caveat narrowing a named range to `[lo, hi]`.
    RangeConstraint { identifier: String, uuid: String, lo: i64, hi: i64 },
    /// A first-party caveat narrowing a named membership set.
    MembershipConstraint { identifier: String, uuid: String, members: Vec<String> },
    /// A third-party caveat discharged by a separate credential.
    ThirdParty {
        identifier: String,
        /// Before [crate::credential::Credential::append_third_party], the plaintext root
        /// key.  After, the ciphertext verification key.
        key: Vec<u8>,
        locations: Vec<String>,
    },
}

impl Caveat {
    /// Build an opaque first-party caveat from an application-supplied predicate.
    pub fn first_party(identifier: impl Into<String>, predicate: Predicate) -> Self {
        Caveat::FirstParty {
            identifier: identifier.into(),
            predicate,
        }
    }

    /// Build a range-narrowing first-party caveat.  Fails if `lo > hi`.
    pub fn range(uuid: impl Into<String>, lo: i64, hi: i64) -> Result<Self, Error> {
        if lo > hi {
            return Err(Error::invalid_argument(format!(
                "range lower bound {lo} exceeds upper bound {hi}"
            )));
        }
        let uuid = uuid.into();
        let identifier = format!("{uuid} \u{2208} [{lo}, {hi}]");
        Ok(Caveat::RangeConstraint { identifier, uuid, lo, hi })
    }

    /// Build a membership-narrowing first-party caveat.  Fails if any member contains the
    /// delimiter used to join members in the canonical identifier.
    pub fn membership<I, S>(uuid: impl Into<String>, members: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members: Vec<String> = members.into_iter().map(Into::into).collect();
        for member in &members {
            if member.contains(MEMBER_DELIMITER) {
                return Err(Error::invalid_argument(format!(
                    "member {member:?} contains the reserved delimiter {MEMBER_DELIMITER:?}"
                )));
            }
        }
        let uuid = uuid.into();
        let identifier = format!("{uuid} \u{2208} [{}]", members.join(MEMBER_DELIMITER));
        Ok(Caveat::MembershipConstraint { identifier, uuid, members })
    }

    /// Build a third-party caveat.  `root_key` is the plaintext root key the discharge
    /// credential must be minted under; it is encrypted in place when this caveat is appended.
    pub fn third_party(
        identifier: impl Into<String>,
        root_key: &Secret,
        locations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Caveat::ThirdParty {
            identifier: identifier.into(),
            key: root_key.as_bytes().to_vec(),
            locations: locations.into_iter().map(Into::into).collect(),
        }
    }

    /// The identifier, whose bytes participate in the chained MAC.
    pub fn identifier(&self) -> &str {
        match self {
            Caveat::FirstParty { identifier, .. } => identifier,
            Caveat::RangeConstraint { identifier, .. } => identifier,
            Caveat::MembershipConstraint { identifier, .. } => identifier,
            Caveat::ThirdParty { identifier, .. } => identifier,
        }
    }

    pub(crate) fn identifier_bytes(&self) -> &[u8] {
        self.identifier().as_bytes()
    }

    pub fn is_first_party(&self) -> bool {
        !self.is_third_party()
    }

    pub fn is_third_party(&self) -> bool {
        matches!(self, Caveat::ThirdParty { .. })
    }

    /// Evaluate this caveat's predicate against `context`, mutating it in place.  Only
    /// meaningful for first-party variants; callers must not invoke this on a third-party
    /// caveat (the verifier never does).
    pub(crate) fn evaluate(&self, context: &mut Context) -> Result<(), Error> {
        match self {
            Caveat::FirstParty { predicate, .. } => predicate(context),
            Caveat::RangeConstraint { uuid, lo, hi, .. } => context.add_range(uuid, *lo, *hi),
            Caveat::MembershipConstraint { uuid, members, .. } => {
                context.add_membership(uuid, members.iter().map(String::as_str))
            }
            Caveat::ThirdParty { .. } => Err(Error::unknown_caveat_kind()),
        }
    }
}

impl Debug for Caveat {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Caveat::FirstParty { identifier, .. } => {
                write!(fmt, "first-party: {identifier}")
            }
            Caveat::RangeConstraint { identifier, .. } => {
                write!(fmt, "range: {identifier}")
            }
            Caveat::MembershipConstraint { identifier, .. } => {
                write!(fmt, "membership: {identifier}")
            }
            Caveat::ThirdParty { identifier, locations, .. } => {
                write!(fmt, "third-party: identifier={identifier} locations={locations:?}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_identifier_is_canonical() {
        let caveat = Caveat::range("TIME", 0, 100).unwrap();
        assert_eq!("TIME \u{2208} [0, 100]", caveat.identifier());
    }

    #[test]
    fn inverted_range_rejected() {
        let err = Caveat::range("TIME", 10, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn membership_identifier_preserves_order() {
        let caveat = Caveat::membership("ACCESS", ["r1", "r2"]).unwrap();
        assert_eq!("ACCESS \u{2208} [r1, r2]", caveat.identifier());
    }

    #[test]
    fn membership_rejects_delimiter_in_member() {
        let err = Caveat::membership("ACCESS", ["r1, r2"]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn first_party_predicate_is_invoked() {
        let caveat = Caveat::first_party(
            "always-fails",
            Arc::new(|_ctx: &mut Context| Err(Error::invalid_argument("nope"))),
        );
        let mut ctx = Context::new();
        assert!(caveat.evaluate(&mut ctx).is_err());
    }

    #[test]
    fn kind_predicates_agree() {
        let first = Caveat::range("TIME", 0, 1).unwrap();
        assert!(first.is_first_party());
        assert!(!first.is_third_party());
        let third = Caveat::third_party("tp", &Secret::new("root"), ["loc"]);
        assert!(third.is_third_party());
        assert!(!third.is_first_party());
    }
}
