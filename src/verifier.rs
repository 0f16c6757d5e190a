//! The backtracking proof search that decides whether a [Credential] holds.

use std::collections::{HashMap, HashSet};

use biometrics::Counter;

use crate::caveat::Caveat;
use crate::context::Context;
use crate::credential::Credential;
use crate::crypto::{CryptoProvider, Secret};
use crate::error::Error;

static VERIFIER_FIRST_PARTY_SUCCESS: Counter =
    Counter::new("macaronage.verifier.1st_party_success");
static VERIFIER_FIRST_PARTY_FAILURE: Counter =
    Counter::new("macaronage.verifier.1st_party_failure");
static VERIFIER_THIRD_PARTY_SUCCESS: Counter =
    Counter::new("macaronage.verifier.3rd_party_success");
static VERIFIER_THIRD_PARTY_FAILURE: Counter =
    Counter::new("macaronage.verifier.3rd_party_failure");

/// A frame in the verifier's explicit work stack: a credential reference, the chained
/// signature computed so far on this path, and the index of the next caveat to process.
struct Frame<'a> {
    credential: &'a Credential,
    is_primary: bool,
    signature: Secret,
    next: usize,
}

/// Drives a backtracking proof search over a credential's caveats and its discharge
/// alternatives.
pub struct Verifier<'a> {
    crypto: &'a dyn CryptoProvider,
}

impl<'a> Verifier<'a> {
    pub fn new(crypto: &'a dyn CryptoProvider) -> Self {
        Verifier { crypto }
    }

    /// Verify `credential` against `secret` starting from `initial_context`.
    ///
    /// Returns the (possibly empty) set of contexts under which the credential holds. An
    /// empty set means the credential does not verify; every recoverable failure (bad
    /// signature, missing discharge, failed predicate, or a crypto provider error) collapses
    /// into it. The only `Err` this returns is [Error::UnknownCaveatKind], a fatal invariant
    /// violation that cannot occur given the closed [Caveat] enum.
    pub fn verify(
        &self,
        credential: &Credential,
        secret: &Secret,
        initial_context: &Context,
    ) -> Result<HashSet<Context>, Error> {
        let root_signature = match self.crypto.mac(secret, credential.identifier()) {
            Ok(signature) => signature,
            Err(_) => return Ok(HashSet::new()),
        };
        let frame = Frame {
            credential,
            is_primary: true,
            signature: root_signature,
            next: 0,
        };
        let mut verified_third_party: HashSet<Vec<u8>> = HashSet::new();
        let mut invalid_discharges: HashMap<Vec<u8>, HashSet<usize>> = HashMap::new();
        let contexts = HashSet::from([initial_context.clone()]);
        self.run(
            credential,
            vec![frame],
            contexts,
            &mut verified_third_party,
            &mut invalid_discharges,
        )
    }

    /// Drive the stack to completion (or first failure), exploring discharge alternatives by
    /// recursing at each third-party caveat. `contexts` holds every surviving context for this
    /// branch so far; first-party predicates may shrink it further, and exhausting it ends the
    /// branch. When a third-party caveat is reached, this function hands the *entire*
    /// remaining stack to a recursive call per discharge alternative and returns their union
    /// directly — the recursive calls, not this loop, finish driving the outer frames.
    ///
    /// Every fallible crypto-provider call inside this function is a branch failure, not a
    /// propagated `Err`: a provider whose `decrypt`/`mac`/`bind` can fail (an AEAD, say) must
    /// not abort the whole search just because one candidate branch hit bad ciphertext.
    fn run(
        &self,
        root: &Credential,
        mut stack: Vec<Frame<'_>>,
        mut contexts: HashSet<Context>,
        verified_third_party: &mut HashSet<Vec<u8>>,
        invalid_discharges: &mut HashMap<Vec<u8>, HashSet<usize>>,
    ) -> Result<HashSet<Context>, Error> {
        loop {
            if contexts.is_empty() {
                return Ok(contexts);
            }
            let Some(top) = stack.last_mut() else {
                return Ok(contexts);
            };
            if top.next >= top.credential.caveats().len() {
                let closes = if top.is_primary {
                    top.signature == *top.credential.signature()
                } else {
                    match self.crypto.bind(&top.signature) {
                        Ok(bound) => bound == *top.credential.signature(),
                        Err(_) => false,
                    }
                };
                if !closes {
                    return Ok(HashSet::new());
                }
                stack.pop();
                continue;
            }
            let top_index = stack.len() - 1;
            let caveat = &stack[top_index].credential.caveats()[stack[top_index].next];
            stack[top_index].next += 1;
            match caveat {
                Caveat::FirstParty { .. }
                | Caveat::RangeConstraint { .. }
                | Caveat::MembershipConstraint { .. } => {
                    let advanced =
                        match self.crypto.mac(&stack[top_index].signature, caveat.identifier_bytes()) {
                            Ok(signature) => signature,
                            Err(_) => return Ok(HashSet::new()),
                        };
                    stack[top_index].signature = advanced;
                    let mut surviving = HashSet::new();
                    for mut ctx in contexts.into_iter() {
                        if caveat.evaluate(&mut ctx).is_ok() {
                            VERIFIER_FIRST_PARTY_SUCCESS.click();
                            surviving.insert(ctx);
                        } else {
                            VERIFIER_FIRST_PARTY_FAILURE.click();
                        }
                    }
                    contexts = surviving;
                }
                Caveat::ThirdParty { identifier, key, .. } => {
                    let current_signature = stack[top_index].signature.clone();
                    let root_key = match self.crypto.decrypt(&current_signature, key) {
                        Ok(root_key) => root_key,
                        Err(_) => return Ok(HashSet::new()),
                    };
                    let mut mac_input = key.clone();
                    mac_input.extend_from_slice(identifier.as_bytes());
                    let advanced = match self.crypto.mac(&current_signature, &mac_input) {
                        Ok(signature) => signature,
                        Err(_) => return Ok(HashSet::new()),
                    };
                    stack[top_index].signature = advanced;

                    if verified_third_party.contains(identifier.as_bytes()) {
                        continue;
                    }

                    let candidates = root.bound_discharges(identifier.as_bytes());
                    let invalid_for_identifier = invalid_discharges
                        .get(identifier.as_bytes())
                        .cloned()
                        .unwrap_or_default();
                    let remaining: Vec<(usize, &Credential)> = candidates
                        .iter()
                        .enumerate()
                        .filter(|(index, _)| !invalid_for_identifier.contains(index))
                        .collect();
                    if remaining.is_empty() {
                        VERIFIER_THIRD_PARTY_FAILURE.click();
                        return Ok(HashSet::new());
                    }

                    // This caveat's discharge alternatives consume the rest of the search:
                    // each candidate recurses over the full remaining stack, and their
                    // results are unioned. This function returns directly rather than
                    // continuing its own loop, since the recursive calls already drive the
                    // outer frames (including this one) to completion.
                    let mut union: HashSet<Context> = HashSet::new();
                    for (index, discharge) in remaining {
                        let discharge_signature =
                            match self.crypto.mac(&root_key, discharge.identifier()) {
                                Ok(signature) => signature,
                                Err(_) => {
                                    invalid_discharges
                                        .entry(identifier.as_bytes().to_vec())
                                        .or_default()
                                        .insert(index);
                                    continue;
                                }
                            };
                        let mut branch_stack: Vec<Frame<'_>> = Vec::with_capacity(stack.len() + 1);
                        for frame in &stack {
                            branch_stack.push(Frame {
                                credential: frame.credential,
                                is_primary: frame.is_primary,
                                signature: frame.signature.clone(),
                                next: frame.next,
                            });
                        }
                        branch_stack.push(Frame {
                            credential: discharge,
                            is_primary: false,
                            signature: discharge_signature,
                            next: 0,
                        });
                        let mut branch_verified = verified_third_party.clone();
                        branch_verified.insert(identifier.as_bytes().to_vec());
                        let mut branch_invalid = invalid_discharges.clone();
                        let result = self.run(
                            root,
                            branch_stack,
                            contexts.clone(),
                            &mut branch_verified,
                            &mut branch_invalid,
                        )?;
                        if result.is_empty() {
                            invalid_discharges
                                .entry(identifier.as_bytes().to_vec())
                                .or_default()
                                .insert(index);
                        } else {
                            union.extend(result);
                        }
                    }
                    if union.is_empty() {
                        VERIFIER_THIRD_PARTY_FAILURE.click();
                        return Ok(HashSet::new());
                    }
                    VERIFIER_THIRD_PARTY_SUCCESS.click();
                    return Ok(union);
                }
            }
        }
    }
}
