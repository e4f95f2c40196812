//! Property-based tests for the guardrail and the credential vault.

use datagate_core::guardrail::FORBIDDEN_KEYWORDS;
use datagate_core::{DataGateError, Guardrail, Vault, enforce_limit, validate_sql};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use proptest::prelude::*;
use proptest::sample::Index;

fn table_name() -> impl Strategy<Value = String> {
    "t_[a-z0-9_]{0,12}"
}

/// XORs one byte of a base64 field with `mask`.
fn flip_byte(field: &str, at: &Index, mask: u8) -> String {
    let mut bytes = STANDARD.decode(field).unwrap();
    let i = at.index(bytes.len());
    bytes[i] ^= mask;
    STANDARD.encode(bytes)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn test_enforce_limit_idempotent_for_any_text(sql in ".{0,200}", max_rows in 1usize..100_000) {
        let once = enforce_limit(&sql, max_rows);
        prop_assert_eq!(enforce_limit(&once, max_rows), once);
    }

    #[test]
    fn test_enforce_limit_always_mentions_limit(sql in "SELECT [a-z_, ]{1,40}", max_rows in 1usize..1000) {
        let bounded = enforce_limit(&sql, max_rows);
        prop_assert!(bounded.to_lowercase().contains("limit"));
        prop_assert!(!bounded.ends_with(';'));
    }

    #[test]
    fn test_non_select_statements_rejected(
        verb in prop::sample::select(FORBIDDEN_KEYWORDS),
        rest in "[a-z_ ]{0,30}",
    ) {
        let sql = format!("{} {}", verb, rest);
        let err = validate_sql(&sql, &["public.orders".to_string()]).unwrap_err();
        prop_assert!(err.is_rejection());
        prop_assert_eq!(err.to_string(), "Only SELECT queries are allowed");
    }

    #[test]
    fn test_forbidden_keyword_anywhere_rejected(
        verb in prop::sample::select(FORBIDDEN_KEYWORDS),
        upper in any::<bool>(),
    ) {
        let verb = if upper { verb.to_uppercase() } else { verb.to_string() };
        let sql = format!("SELECT id FROM orders WHERE note = 'x' OR {} IS NULL", verb);
        let err = validate_sql(&sql, &["public.orders".to_string()]).unwrap_err();
        prop_assert!(err.to_string().starts_with("Forbidden keyword: "));
    }

    #[test]
    fn test_allowlisted_tables_pass_and_others_fail(
        allowed in table_name(),
        other in table_name(),
        max_rows in 1usize..10_000,
    ) {
        prop_assume!(allowed != other);
        let guardrail = Guardrail::new(Some("public"), max_rows);
        let tables = vec![format!("public.{}", allowed)];

        let sql = format!("SELECT * FROM {}", allowed);
        prop_assert_eq!(
            guardrail.prepare(&sql, &tables).unwrap(),
            format!("{} LIMIT {}", sql, max_rows)
        );

        let joined = format!("SELECT * FROM {} a JOIN {} b ON a.id = b.id", allowed, other);
        let err = guardrail.prepare(&joined, &tables).unwrap_err();
        let is_rejection = matches!(err, DataGateError::GuardrailRejection { .. });
        prop_assert!(is_rejection);
        prop_assert_eq!(err.to_string(), format!("Table not allowed: {}", other));
    }

    #[test]
    fn test_vault_round_trip_arbitrary_secrets(secret in "\\PC{0,64}") {
        let vault = Vault::from_secret(&"5a".repeat(32)).unwrap();
        let payload = vault.encrypt(&secret).unwrap();
        let decrypted = vault.decrypt(&payload).unwrap();
        prop_assert_eq!(decrypted.as_str(), secret.as_str());
    }

    #[test]
    fn test_vault_single_byte_tampering_fails(
        secret in "\\PC{1,64}",
        field in 0usize..3,
        at in any::<Index>(),
        mask in 1u8..=255,
    ) {
        let vault = Vault::from_secret(&"5a".repeat(32)).unwrap();
        let mut payload = vault.encrypt(&secret).unwrap();
        match field {
            0 => payload.ciphertext = flip_byte(&payload.ciphertext, &at, mask),
            1 => payload.iv = flip_byte(&payload.iv, &at, mask),
            _ => payload.auth_tag = flip_byte(&payload.auth_tag, &at, mask),
        }

        let result = vault.decrypt(&payload);
        prop_assert!(
            matches!(result, Err(DataGateError::Decryption { .. })),
            "tampered field {} still decrypted",
            field
        );
    }
}
