//! The credential itself: identifier, chained signature, caveat list, and bound discharges.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};

use biometrics::Counter;

use crate::caveat::Caveat;
use crate::crypto::{CryptoProvider, Secret};
use crate::error::Error;

static CREDENTIAL_MINTED: Counter = Counter::new("macaronage.credential.minted");
static CREDENTIAL_FIRST_PARTY_APPENDED: Counter =
    Counter::new("macaronage.credential.first_party_appended");
static CREDENTIAL_THIRD_PARTY_APPENDED: Counter =
    Counter::new("macaronage.credential.third_party_appended");
static CREDENTIAL_DISCHARGE_BOUND: Counter = Counter::new("macaronage.credential.discharge_bound");

/// A bearer credential: an identifier, an ordered caveat list, a chained signature, and the
/// discharge credentials bound to it so far.
///
/// `location_hints` are advisory only (where a caller might fetch discharges from) and are
/// excluded from equality and from the signature chain, matching the cryptographic
/// construction, which never reads them.
#[derive(Clone)]
pub struct Credential {
    identifier: Vec<u8>,
    location_hints: BTreeSet<String>,
    signature: Secret,
    caveats: Vec<Caveat>,
    bound: BTreeMap<Vec<u8>, Vec<Credential>>,
}

impl Credential {
    /// Mint a new credential rooted in `secret` for the given `identifier`.
    pub fn mint(
        crypto: &dyn CryptoProvider,
        secret: &Secret,
        identifier: impl Into<Vec<u8>>,
        location_hints: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, Error> {
        let identifier = identifier.into();
        let signature = crypto.mac(secret, &identifier)?;
        CREDENTIAL_MINTED.click();
        Ok(Credential {
            identifier,
            location_hints: location_hints.into_iter().map(Into::into).collect(),
            signature,
            caveats: Vec::new(),
            bound: BTreeMap::new(),
        })
    }

    pub fn identifier(&self) -> &[u8] {
        &self.identifier
    }

    pub fn location_hints(&self) -> impl Iterator<Item = &str> {
        self.location_hints.iter().map(String::as_str)
    }

    pub fn signature(&self) -> &Secret {
        &self.signature
    }

    pub fn caveats(&self) -> &[Caveat] {
        &self.caveats
    }

    pub fn bound_discharges(&self, identifier: &[u8]) -> &[Credential] {
        self.bound
            .get(identifier)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Append a first-party caveat, advancing the signature chain. Fails if `caveat` is a
    /// third-party caveat.
    pub fn append_first_party(
        &mut self,
        crypto: &dyn CryptoProvider,
        caveat: Caveat,
    ) -> Result<&Caveat, Error> {
        if caveat.is_third_party() {
            return Err(Error::invalid_argument(
                "append_first_party called with a third-party caveat",
            ));
        }
        self.signature = crypto.mac(&self.signature, caveat.identifier_bytes())?;
        self.caveats.push(caveat);
        CREDENTIAL_FIRST_PARTY_APPENDED.click();
        Ok(self.caveats.last().expect("just pushed"))
    }

    /// Append a third-party caveat: its root key is encrypted under the credential's
    /// then-current signature, and the signature is advanced over the verification key and
    /// identifier. Fails if `caveat` is not a third-party caveat, or its key has already been
    /// converted to a verification key by a prior append.
    pub fn append_third_party(
        &mut self,
        crypto: &dyn CryptoProvider,
        caveat: Caveat,
    ) -> Result<&Caveat, Error> {
        let (identifier, root_key, locations) = match caveat {
            Caveat::ThirdParty { identifier, key, locations } => (identifier, key, locations),
            _ => {
                return Err(Error::invalid_argument(
                    "append_third_party called with a first-party caveat",
                ))
            }
        };
        let verification_key = crypto.encrypt(&self.signature, &root_key)?;
        let mut mac_input = verification_key.clone();
        mac_input.extend_from_slice(identifier.as_bytes());
        self.signature = crypto.mac(&self.signature, &mac_input)?;
        let caveat = Caveat::ThirdParty {
            identifier,
            key: verification_key,
            locations,
        };
        self.caveats.push(caveat);
        CREDENTIAL_THIRD_PARTY_APPENDED.click();
        Ok(self.caveats.last().expect("just pushed"))
    }

    /// Bind a discharge credential to this (primary) credential.
    ///
    /// Fails if `discharge` already has discharges of its own bound to it: discharges cannot
    /// be recursive.
    pub fn bind_discharge(
        &mut self,
        crypto: &dyn CryptoProvider,
        discharge: &Credential,
    ) -> Result<(), Error> {
        if !discharge.bound.is_empty() {
            return Err(Error::invalid_argument(
                "a discharge with its own bound discharges cannot itself be bound",
            ));
        }
        let mut bound = discharge.clone();
        bound.signature = crypto.bind(&discharge.signature)?;
        CREDENTIAL_DISCHARGE_BOUND.click();
        self.bound
            .entry(bound.identifier.clone())
            .or_default()
            .push(bound);
        Ok(())
    }

    /// Third-party caveats whose locations intersect `locations` and which have no discharge
    /// bound yet.  The sole surviving descendant of a request-assembly helper; callers
    /// fetching discharges over the network use this to know what to fetch.
    pub fn third_party_caveats_for<'a>(
        &'a self,
        locations: &'a BTreeSet<String>,
    ) -> Vec<&'a Caveat> {
        self.caveats
            .iter()
            .filter(|caveat| match caveat {
                Caveat::ThirdParty { identifier, locations: caveat_locations, .. } => {
                    !self.bound.contains_key(identifier.as_bytes())
                        && caveat_locations.iter().any(|loc| locations.contains(loc))
                }
                _ => false,
            })
            .collect()
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
            && self.signature == other.signature
            && self.caveats.len() == other.caveats.len()
            && self
                .caveats
                .iter()
                .zip(other.caveats.iter())
                .all(|(a, b)| a.identifier() == b.identifier())
            && self.bound.len() == other.bound.len()
            && self.bound.iter().all(|(id, discharges)| {
                other
                    .bound
                    .get(id)
                    .map(|other_discharges| discharges == other_discharges)
                    .unwrap_or(false)
            })
    }
}

impl Eq for Credential {}

/// Hashes the same fields [PartialEq] compares: identifier, signature, each caveat's
/// identifier (not its predicate — `Caveat::FirstParty` carries an `Arc<dyn Fn>`, so there is
/// no blanket derive), and the bound discharges keyed by identifier.
impl Hash for Credential {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
        self.signature.hash(state);
        self.caveats.len().hash(state);
        for caveat in &self.caveats {
            caveat.identifier().hash(state);
        }
        self.bound.len().hash(state);
        for (id, discharges) in &self.bound {
            id.hash(state);
            discharges.hash(state);
        }
    }
}

impl Debug for Credential {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            fmt,
            "Credential{{identifier={:?}, caveats={:?}, bound_identifiers={:?}}}",
            String::from_utf8_lossy(&self.identifier),
            self.caveats,
            self.bound.keys().map(|k| String::from_utf8_lossy(k)).collect::<Vec<_>>(),
        )
    }
}
