use resolver::server::utils::signature_utils::SignatureUtil;

#[test]
fn test_signature_generation() {
    let util = SignatureUtil::new("session-token");
    let sig1 = util.generate_signature(&["premium51", "5886102", "1760000000", "42"]);
    let sig2 = util.generate_signature(&["premium51", "5886102", "1760000000", "42"]);

    assert_eq!(sig1, sig2);
    assert_eq!(sig1.len(), 64);
}

#[test]
fn test_signature_verification() {
    let util = SignatureUtil::new("session-token");
    let parts = ["premium51", "5886102", "1760000000", "42"];

    let signature = util.generate_signature(&parts);

    // valid signature should verify
    assert!(util.verify_signature(&parts, &signature));

    // invalid signature should fail
    assert!(!util.verify_signature(&parts, "invalid"));

    // different nonce should fail
    assert!(!util.verify_signature(&["premium51", "5886102", "1760000000", "43"], &signature));

    // different key should fail
    assert!(!SignatureUtil::new("other-token").verify_signature(&parts, &signature));
}

#[test]
fn test_fingerprint_is_stable_and_short() {
    let a = SignatureUtil::fingerprint(&["cdnlive", "Mozilla/5.0"]);
    let b = SignatureUtil::fingerprint(&["cdnlive", "Mozilla/5.0"]);
    let c = SignatureUtil::fingerprint(&["hunter", "Mozilla/5.0"]);

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.len(), 32);
}
