use std::fmt::{Display, Formatter};

use biometrics::Counter;
use tatl::{HeyListen, Stationary};

static UNKNOWN_CAVEAT_KIND: Counter = Counter::new("macaronage.error.unknown_caveat_kind");
static UNKNOWN_CAVEAT_KIND_MONITOR: Stationary =
    Stationary::new("macaronage.error.unknown_caveat_kind", &UNKNOWN_CAVEAT_KIND);

/// Register this module's monitors with a process-wide [HeyListen].
pub fn register_monitors(hey_listen: &mut HeyListen) {
    hey_listen.register_stationary(&UNKNOWN_CAVEAT_KIND_MONITOR);
}

/// Error cases surfaced by the credential algebra.
///
/// Verification failure (a bad signature, a missing discharge, a predicate that doesn't hold) is
/// never represented here; it collapses to an empty result set.  These variants are for
/// conditions that prevent the algebra from running at all.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// A precondition on a constructor or append operation was violated.
    InvalidArgument { reason: String },
    /// A [crate::context::Context] narrowing operation would have widened an existing
    /// constraint, or intersected two constraints into an empty range.
    ContextConflict { uuid: String, reason: String },
    /// The cryptographic provider failed: a MAC, encryption, decryption, or bind operation
    /// could not be completed.
    CryptoFailure { reason: String },
    /// The verifier encountered a caveat that is neither first- nor third-party.  [Caveat] is a
    /// closed enum, so this is unreachable today; it exists for the day a caller links a newer
    /// copy of a caveat against an older copy of this crate.
    UnknownCaveatKind,
}

impl Error {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn context_conflict(uuid: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ContextConflict {
            uuid: uuid.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn crypto_failure(reason: impl Into<String>) -> Self {
        Error::CryptoFailure {
            reason: reason.into(),
        }
    }

    pub(crate) fn unknown_caveat_kind() -> Self {
        UNKNOWN_CAVEAT_KIND.click();
        Error::UnknownCaveatKind
    }
}

impl Display for Error {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidArgument { reason } => write!(fmt, "invalid argument: {reason}"),
            Error::ContextConflict { uuid, reason } => {
                write!(fmt, "context conflict on {uuid}: {reason}")
            }
            Error::CryptoFailure { reason } => write!(fmt, "crypto failure: {reason}"),
            Error::UnknownCaveatKind => write!(fmt, "unknown caveat kind"),
        }
    }
}

impl std::error::Error for Error {}
