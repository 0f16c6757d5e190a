use std::collections::HashSet;
use std::sync::Arc;

use macaronage::{Caveat, Context, Credential, Error, HmacCtrProvider, Secret, Verifier};

fn mint(crypto: &HmacCtrProvider, secret: &str, id: &str) -> Credential {
    Credential::mint(crypto, &Secret::new(secret), id.as_bytes().to_vec(), Vec::<String>::new())
        .unwrap()
}

#[test]
fn s1_mint_and_verify_with_no_caveats() {
    let crypto = HmacCtrProvider;
    let secret = Secret::new("s");
    let cred = mint(&crypto, "s", "x");
    let verifier = Verifier::new(&crypto);
    let result = verifier.verify(&cred, &secret, &Context::new()).unwrap();
    assert_eq!(HashSet::from([Context::new()]), result);
}

#[test]
fn s2_range_narrowing_success() {
    let crypto = HmacCtrProvider;
    let secret = Secret::new("s");
    let mut cred = mint(&crypto, "s", "x");
    cred.append_first_party(&crypto, Caveat::range("TIME", 0, 100).unwrap())
        .unwrap();
    let verifier = Verifier::new(&crypto);
    let result = verifier.verify(&cred, &secret, &Context::new()).unwrap();
    let ctx = result.into_iter().next().expect("one surviving context");
    assert_eq!(Some((0, 100)), ctx.copy_of_range("TIME"));
}

#[test]
fn s3_range_disjoint_failure() {
    let crypto = HmacCtrProvider;
    let secret = Secret::new("s");
    let mut cred = mint(&crypto, "s", "x");
    cred.append_first_party(&crypto, Caveat::range("TIME", 5, 10).unwrap())
        .unwrap();
    let mut initial = Context::new();
    initial.add_range("TIME", 11, 15).unwrap();
    let verifier = Verifier::new(&crypto);
    let result = verifier.verify(&cred, &secret, &initial).unwrap();
    assert!(result.is_empty());
}

#[test]
fn s4_third_party_with_good_discharge() {
    let crypto = HmacCtrProvider;
    let secret = Secret::new("s");
    let mut primary = mint(&crypto, "s", "x");
    let root_key = Secret::new("k");
    primary
        .append_third_party(&crypto, Caveat::third_party("t", &root_key, ["d"]))
        .unwrap();
    let discharge = mint(&crypto, "k", "t");
    primary.bind_discharge(&crypto, &discharge).unwrap();
    let verifier = Verifier::new(&crypto);
    let result = verifier.verify(&primary, &secret, &Context::new()).unwrap();
    assert_eq!(HashSet::from([Context::new()]), result);
}

#[test]
fn s5_third_party_with_forged_discharge() {
    let crypto = HmacCtrProvider;
    let secret = Secret::new("s");
    let mut primary = mint(&crypto, "s", "x");
    let root_key = Secret::new("k");
    primary
        .append_third_party(&crypto, Caveat::third_party("t", &root_key, ["d"]))
        .unwrap();
    let forged = mint(&crypto, "not-k", "t");
    primary.bind_discharge(&crypto, &forged).unwrap();
    let verifier = Verifier::new(&crypto);
    let result = verifier.verify(&primary, &secret, &Context::new()).unwrap();
    assert!(result.is_empty());
}

#[test]
fn s6_alternative_discharges_union_to_two_contexts() {
    let crypto = HmacCtrProvider;
    let secret = Secret::new("s");
    let mut primary = mint(&crypto, "s", "x");
    primary
        .append_first_party(&crypto, Caveat::range("TIME", 0, 100).unwrap())
        .unwrap();
    let root_key = Secret::new("k");
    primary
        .append_third_party(&crypto, Caveat::third_party("t", &root_key, ["d"]))
        .unwrap();

    let mut discharge_a = mint(&crypto, "k", "t");
    discharge_a
        .append_first_party(&crypto, Caveat::membership("ACCESS", ["r1"]).unwrap())
        .unwrap();
    discharge_a
        .append_first_party(&crypto, Caveat::range("TIME", -100, 0).unwrap())
        .unwrap();

    let mut discharge_b = mint(&crypto, "k", "t");
    discharge_b
        .append_first_party(&crypto, Caveat::membership("ACCESS", ["r2"]).unwrap())
        .unwrap();
    discharge_b
        .append_first_party(&crypto, Caveat::range("TIME", 100, 200).unwrap())
        .unwrap();

    let mut discharge_c = mint(&crypto, "k", "t");
    discharge_c
        .append_first_party(&crypto, Caveat::range("TIME", 200, 300).unwrap())
        .unwrap();

    primary.bind_discharge(&crypto, &discharge_a).unwrap();
    primary.bind_discharge(&crypto, &discharge_b).unwrap();
    primary.bind_discharge(&crypto, &discharge_c).unwrap();

    let verifier = Verifier::new(&crypto);
    let result = verifier.verify(&primary, &secret, &Context::new()).unwrap();
    assert_eq!(2, result.len());

    let mut expect_a = Context::new();
    expect_a.add_range("TIME", 0, 0).unwrap();
    expect_a.add_membership("ACCESS", ["r1"]).unwrap();
    let mut expect_b = Context::new();
    expect_b.add_range("TIME", 100, 100).unwrap();
    expect_b.add_membership("ACCESS", ["r2"]).unwrap();
    assert!(result.contains(&expect_a));
    assert!(result.contains(&expect_b));
}

#[test]
fn discharge_forgery_under_wrong_root_key_never_verifies() {
    let crypto = HmacCtrProvider;
    let secret = Secret::new("s");
    let mut primary = mint(&crypto, "s", "x");
    let root_key = Secret::new("k");
    primary
        .append_third_party(&crypto, Caveat::third_party("t", &root_key, ["d"]))
        .unwrap();
    for wrong_key in ["k2", "", "kk", "K"] {
        let forged = mint(&crypto, wrong_key, "t");
        let mut attempt = primary.clone();
        attempt.bind_discharge(&crypto, &forged).unwrap();
        let verifier = Verifier::new(&crypto);
        let result = verifier.verify(&attempt, &secret, &Context::new()).unwrap();
        assert!(result.is_empty(), "forged discharge under key {wrong_key:?} should not verify");
    }
}

#[test]
fn bind_isolation_rejects_recursive_discharge() {
    let crypto = HmacCtrProvider;
    let mut discharge = mint(&crypto, "s", "d");
    let grandchild = mint(&crypto, "s", "g");
    discharge.bind_discharge(&crypto, &grandchild).unwrap();
    let mut primary = mint(&crypto, "s", "x");
    let err = primary.bind_discharge(&crypto, &discharge).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));
}

#[test]
fn union_over_discharges_only_counts_satisfying_branches() {
    let crypto = HmacCtrProvider;
    let secret = Secret::new("s");
    let mut primary = mint(&crypto, "s", "x");
    let root_key = Secret::new("k");
    primary
        .append_third_party(&crypto, Caveat::third_party("t", &root_key, ["d"]))
        .unwrap();

    let good = mint(&crypto, "k", "t");
    let mut bad = mint(&crypto, "k", "t");
    bad.append_first_party(
        &crypto,
        Caveat::first_party(
            "impossible",
            Arc::new(|_ctx: &mut Context| {
                Err(Error::InvalidArgument {
                    reason: "never satisfiable".to_string(),
                })
            }),
        ),
    )
    .unwrap();

    primary.bind_discharge(&crypto, &good).unwrap();
    primary.bind_discharge(&crypto, &bad).unwrap();

    let verifier = Verifier::new(&crypto);
    let result = verifier.verify(&primary, &secret, &Context::new()).unwrap();
    assert_eq!(HashSet::from([Context::new()]), result);
}
