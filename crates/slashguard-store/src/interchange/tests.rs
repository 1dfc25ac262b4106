//! Tests for the interchange codec.

use slashguard_core::interchange::InterchangeDocument;
use slashguard_core::types::{Bytes32, PublicKey};

use crate::engine::SlashingProtection;
use crate::error::{InterchangeError, StoreError};

const GVR_HEX: &str = "0x6464646464646464646464646464646464646464646464646464646464646464";
const PUBKEY_HEX: &str = "0xb845089a1457f811bfbd6944f3a9cbc13a768b8effb02a4b8a86f49ae94f5abb6680bb5b9b1f30e5ab08a275fc0d4e26";

fn protection() -> SlashingProtection {
    SlashingProtection::in_memory().expect("failed to open in-memory protection database")
}

fn gvr() -> Bytes32 {
    GVR_HEX.parse().expect("parse gvr")
}

fn pubkey() -> PublicKey {
    PUBKEY_HEX.parse().expect("parse pubkey")
}

fn import(protection: &SlashingProtection, json: &str) -> Result<(), InterchangeError> {
    protection.import_data(json.as_bytes())
}

fn count(protection: &SlashingProtection, table: &str) -> i64 {
    protection
        .store()
        .with_read_tx::<_, StoreError>(|tx| {
            Ok(tx.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?)
        })
        .expect("count rows")
}

fn simple_document() -> String {
    format!(
        r#"{{
            "metadata": {{
                "interchange_format_version": "5",
                "genesis_validators_root": "{GVR_HEX}"
            }},
            "data": [
                {{
                    "pubkey": "{PUBKEY_HEX}",
                    "signed_blocks": [
                        {{ "slot": "12", "signing_root": "0x0101010101010101010101010101010101010101010101010101010101010101" }},
                        {{ "slot": "13" }}
                    ],
                    "signed_attestations": [
                        {{ "source_epoch": "5", "target_epoch": "10", "signing_root": "0x0202020202020202020202020202020202020202020202020202020202020202" }}
                    ]
                }}
            ]
        }}"#
    )
}

#[test]
fn imports_a_simple_document() {
    let protection = protection();
    import(&protection, &simple_document()).expect("import");

    assert_eq!(count(&protection, "validators"), 1);
    assert_eq!(count(&protection, "signed_blocks"), 2);
    assert_eq!(count(&protection, "signed_attestations"), 1);

    // The imported history protects immediately: a conflicting proposal at
    // slot 12 is refused, a fresh slot is fine.
    let conflicting = Bytes32::left_pad(0xee);
    assert!(!protection
        .may_sign_block(&pubkey(), &conflicting, 12, &gvr())
        .expect("decision"));
    assert!(protection
        .may_sign_block(&pubkey(), &conflicting, 14, &gvr())
        .expect("decision"));
}

#[test]
fn empty_or_missing_data_is_a_no_op_success() {
    let protection = protection();
    import(
        &protection,
        &format!(
            r#"{{ "metadata": {{ "interchange_format_version": "5",
                                 "genesis_validators_root": "{GVR_HEX}" }},
                  "data": [] }}"#
        ),
    )
    .expect("empty data import");
    import(
        &protection,
        &format!(
            r#"{{ "metadata": {{ "interchange_format_version": "5",
                                 "genesis_validators_root": "{GVR_HEX}" }} }}"#
        ),
    )
    .expect("missing data import");
    assert_eq!(count(&protection, "validators"), 0);
}

#[test]
fn unsupported_version_is_rejected() {
    let protection = protection();
    let err = import(
        &protection,
        &format!(
            r#"{{ "metadata": {{ "interchange_format_version": "4",
                                 "genesis_validators_root": "{GVR_HEX}" }},
                  "data": [] }}"#
        ),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        InterchangeError::UnsupportedVersion { found } if found == "4"
    ));
}

#[test]
fn failed_import_leaves_an_empty_database_empty() {
    let protection = protection();
    let err = import(
        &protection,
        &format!(
            r#"{{
                "metadata": {{
                    "interchange_format_version": "5",
                    "genesis_validators_root": "{GVR_HEX}"
                }},
                "data": [
                    {{
                        "pubkey": "{PUBKEY_HEX}",
                        "signed_blocks": [ {{ "slot": "12" }} ],
                        "signed_attestations": [
                            {{ "source_epoch": "5", "target_epoch": "10" }},
                            {{ "source_epoch": "11", "target_epoch": "10" }}
                        ]
                    }}
                ]
            }}"#
        ),
    )
    .unwrap_err();
    assert!(matches!(err, InterchangeError::SourceAfterTarget { .. }));

    // Nothing survives, not even the metadata scoping or the validator row.
    assert_eq!(count(&protection, "validators"), 0);
    assert_eq!(count(&protection, "signed_blocks"), 0);
    assert_eq!(count(&protection, "signed_attestations"), 0);
    assert_eq!(count(&protection, "metadata"), 0);
    assert_eq!(count(&protection, "low_watermarks"), 0);
}

#[test]
fn failed_import_leaves_existing_data_unchanged() {
    let protection = protection();
    import(&protection, &simple_document()).expect("first import");
    let blocks_before = count(&protection, "signed_blocks");

    let err = import(
        &protection,
        &format!(
            r#"{{
                "metadata": {{
                    "interchange_format_version": "5",
                    "genesis_validators_root": "{GVR_HEX}"
                }},
                "data": [
                    {{
                        "pubkey": "{PUBKEY_HEX}",
                        "signed_blocks": [ {{ "slot": "99" }} ],
                        "signed_attestations": [
                            {{ "source_epoch": "12", "target_epoch": "11" }}
                        ]
                    }}
                ]
            }}"#
        ),
    )
    .unwrap_err();
    assert!(matches!(err, InterchangeError::SourceAfterTarget { .. }));
    assert_eq!(count(&protection, "signed_blocks"), blocks_before);
}

#[test]
fn genesis_root_conflict_rejects_the_import() {
    let protection = protection();
    import(&protection, &simple_document()).expect("first import");

    let other = "0x6565656565656565656565656565656565656565656565656565656565656565";
    let err = import(
        &protection,
        &format!(
            r#"{{ "metadata": {{ "interchange_format_version": "5",
                                 "genesis_validators_root": "{other}" }},
                  "data": [] }}"#
        ),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        InterchangeError::GenesisValidatorsRootMismatch { .. }
    ));
}

#[test]
fn repeated_import_deduplicates_silently() {
    let protection = protection();
    import(&protection, &simple_document()).expect("first import");
    import(&protection, &simple_document()).expect("second import");

    assert_eq!(count(&protection, "signed_blocks"), 2);
    assert_eq!(count(&protection, "signed_attestations"), 1);
}

#[test]
fn conflicting_rows_are_both_retained() {
    let protection = protection();
    import(&protection, &simple_document()).expect("first import");

    // Same slot 12, different root: retained alongside, not an error.
    import(
        &protection,
        &format!(
            r#"{{
                "metadata": {{
                    "interchange_format_version": "5",
                    "genesis_validators_root": "{GVR_HEX}"
                }},
                "data": [
                    {{
                        "pubkey": "{PUBKEY_HEX}",
                        "signed_blocks": [
                            {{ "slot": "12", "signing_root": "0x0303030303030303030303030303030303030303030303030303030303030303" }}
                        ],
                        "signed_attestations": []
                    }}
                ]
            }}"#
        ),
    )
    .expect("conflicting import");
    assert_eq!(count(&protection, "signed_blocks"), 3);
}

#[test]
fn import_raises_watermarks_only_upward() {
    let protection = protection();
    import(&protection, &simple_document()).expect("first import");

    let watermark = |protection: &SlashingProtection| {
        let id = protection
            .validator_id(&pubkey())
            .expect("lookup")
            .expect("registered");
        protection
            .store()
            .with_read_tx::<_, StoreError>(|tx| crate::dao::watermarks::find(tx, id))
            .expect("read watermark")
            .expect("watermark row")
    };

    // Minimum imported slot was 12, minimum source/target 5/10.
    let wm = watermark(&protection);
    assert_eq!(wm.slot, Some(12));
    assert_eq!(wm.source_epoch, Some(5));
    assert_eq!(wm.target_epoch, Some(10));

    // A later import with a higher minimum raises the floors.
    import(
        &protection,
        &format!(
            r#"{{
                "metadata": {{
                    "interchange_format_version": "5",
                    "genesis_validators_root": "{GVR_HEX}"
                }},
                "data": [
                    {{
                        "pubkey": "{PUBKEY_HEX}",
                        "signed_blocks": [ {{ "slot": "20" }} ],
                        "signed_attestations": [
                            {{ "source_epoch": "8", "target_epoch": "15" }}
                        ]
                    }}
                ]
            }}"#
        ),
    )
    .expect("raising import");
    let wm = watermark(&protection);
    assert_eq!(wm.slot, Some(20));
    assert_eq!(wm.source_epoch, Some(8));
    assert_eq!(wm.target_epoch, Some(15));

    // A lower minimum never lowers them.
    import(
        &protection,
        &format!(
            r#"{{
                "metadata": {{
                    "interchange_format_version": "5",
                    "genesis_validators_root": "{GVR_HEX}"
                }},
                "data": [
                    {{
                        "pubkey": "{PUBKEY_HEX}",
                        "signed_blocks": [ {{ "slot": "2" }} ],
                        "signed_attestations": [
                            {{ "source_epoch": "1", "target_epoch": "2" }}
                        ]
                    }}
                ]
            }}"#
        ),
    )
    .expect("lower import");
    let wm = watermark(&protection);
    assert_eq!(wm.slot, Some(20));
    assert_eq!(wm.source_epoch, Some(8));
    assert_eq!(wm.target_epoch, Some(15));
}

#[test]
fn export_requires_a_scoped_database() {
    let protection = protection();
    let err = protection.export(Vec::new()).unwrap_err();
    assert!(matches!(
        err,
        InterchangeError::MissingGenesisValidatorsRoot
    ));
}

#[test]
fn export_skips_validators_without_history() {
    let protection = protection();
    import(&protection, &simple_document()).expect("import");

    // Registered but never signed anything: no watermark, no export entry.
    let idle = PublicKey::new(vec![0xcc; 48]);
    protection
        .register_validators(std::slice::from_ref(&idle))
        .expect("register");

    let mut buffer = Vec::new();
    protection.export(&mut buffer).expect("export");
    let document: InterchangeDocument =
        serde_json::from_slice(&buffer).expect("well-formed export");
    assert_eq!(document.data.len(), 1);
    assert_eq!(document.data[0].pubkey, pubkey());
}

#[test]
fn export_floor_filters_below_the_watermark() {
    let protection = protection();
    import(&protection, &simple_document()).expect("import");

    // Raise the slot watermark to 13 by importing a minimum above 12.
    import(
        &protection,
        &format!(
            r#"{{
                "metadata": {{
                    "interchange_format_version": "5",
                    "genesis_validators_root": "{GVR_HEX}"
                }},
                "data": [
                    {{
                        "pubkey": "{PUBKEY_HEX}",
                        "signed_blocks": [ {{ "slot": "13" }} ],
                        "signed_attestations": []
                    }}
                ]
            }}"#
        ),
    )
    .expect("raising import");

    let mut buffer = Vec::new();
    protection.export(&mut buffer).expect("export");
    let document: InterchangeDocument =
        serde_json::from_slice(&buffer).expect("well-formed export");
    let slots: Vec<u64> = document.data[0]
        .signed_blocks
        .iter()
        .map(|b| b.slot)
        .collect();
    assert_eq!(slots, vec![13]);
}

#[test]
fn incremental_exporter_streams_one_validator_at_a_time() {
    let protection = protection();
    import(&protection, &simple_document()).expect("import");

    let other = PublicKey::new(vec![0xdd; 48]);
    assert!(protection
        .may_sign_block(&other, &Bytes32::left_pad(9), 42, &gvr())
        .expect("decision"));

    let mut exporter = protection
        .create_incremental_exporter(Vec::new())
        .expect("begin export");
    exporter.export(&pubkey()).expect("export first");
    exporter.export(&other).expect("export second");
    // Unknown validators are skipped without breaking the document.
    exporter
        .export(&PublicKey::new(vec![0x01; 48]))
        .expect("export unknown");
    let buffer = exporter.finalize().expect("finalize");

    let document: InterchangeDocument =
        serde_json::from_slice(&buffer).expect("well-formed export");
    assert_eq!(document.metadata.genesis_validators_root, gvr());
    assert_eq!(document.data.len(), 2);
    assert_eq!(document.data[1].pubkey, other);
    assert_eq!(document.data[1].signed_blocks[0].slot, 42);
}

#[test]
fn export_with_filter_exports_only_the_listed_validators() {
    let protection = protection();
    import(&protection, &simple_document()).expect("import");

    let other = PublicKey::new(vec![0xdd; 48]);
    assert!(protection
        .may_sign_block(&other, &Bytes32::left_pad(9), 42, &gvr())
        .expect("decision"));

    let mut buffer = Vec::new();
    protection
        .export_with_filter(&mut buffer, std::slice::from_ref(&other))
        .expect("filtered export");
    let document: InterchangeDocument =
        serde_json::from_slice(&buffer).expect("well-formed export");
    assert_eq!(document.data.len(), 1);
    assert_eq!(document.data[0].pubkey, other);
}

#[test]
fn unparsable_document_is_rejected_before_any_write() {
    let protection = protection();
    let err = import(&protection, "{ not json").unwrap_err();
    assert!(matches!(err, InterchangeError::Parse(_)));
    assert_eq!(count(&protection, "metadata"), 0);
}
