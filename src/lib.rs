//! macaronage provides an implementation of macaroons: decentralized, contextual bearer
//! credentials that support attenuation via caveats and delegation via discharge credentials.
//!
//! The central piece is the credential algebra and its backtracking [verifier] engine. See
//! [credential::Credential] for construction, [caveat::Caveat] for the caveat model,
//! [context::Context] for the constraint state threaded through verification, and
//! [crypto::CryptoProvider] for the cryptographic surface the algebra is built on.

pub mod caveat;
pub mod context;
pub mod credential;
pub mod crypto;
pub mod error;
pub mod verifier;

pub use caveat::{Caveat, Predicate};
pub use context::Context;
pub use credential::Credential;
pub use crypto::{CryptoProvider, HmacCtrProvider, Secret};
pub use error::Error;
pub use verifier::Verifier;

/// Register every module's [tatl::Stationary] monitors with a process-wide
/// [tatl::HeyListen]. A consuming binary calls this once at startup.
pub fn register_monitors(hey_listen: &mut tatl::HeyListen) {
    error::register_monitors(hey_listen);
}
