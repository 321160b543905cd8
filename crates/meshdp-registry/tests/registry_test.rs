//! Registry build over realistic manifest sets.

use meshdp_core::{CapabilityDescriptor, CapabilitySource, RegistryConfig, ValueCodec};
use meshdp_registry::{
    manifest, CollisionReason, Conflict, FingerprintRegistry, MatchKind, ProfileManifest,
    RegistryBuilder, RegistryError,
};
use std::collections::HashMap;

fn motion_sensor() -> ProfileManifest {
    ProfileManifest::new("pir_motion", "motion sensor")
        .with_fingerprint("_VEND_abc12345", "MODEL01")
        .with_capability(
            CapabilityDescriptor::new("alarm_motion", CapabilitySource::Datapoint { dp: 1 })
                .with_codec(ValueCodec::Boolean),
        )
}

fn generic_sensor() -> ProfileManifest {
    ProfileManifest::new("generic_sensor", "generic sensor")
        .with_fingerprint("_VEND_abc12345", "MODEL01")
        .as_fallback()
}

#[test]
fn test_motion_sensor_beats_generic_sensor() {
    // Declaration order must not matter here.
    for manifests in [
        vec![generic_sensor(), motion_sensor()],
        vec![motion_sensor(), generic_sensor()],
    ] {
        let mut builder = RegistryBuilder::default();
        builder.add_manifests(manifests);
        let output = builder.build().unwrap();

        let hit = output.registry.lookup("_VEND_abc12345", "MODEL01").unwrap();
        assert_eq!(hit.profile.id, "pir_motion");
        assert_eq!(hit.kind, MatchKind::Exact);

        let record = &output.report.collisions[0];
        assert_eq!(record.chosen_profile, "pir_motion");
        assert!(matches!(record.reason, CollisionReason::Specificity { .. }));
    }
}

#[test]
fn test_case_variants_are_one_fingerprint() {
    let output = RegistryBuilder::default()
        .with_manifest(
            ProfileManifest::new("contact", "contact sensor").with_fingerprint("_VEND_ABC12345", "MODEL01"),
        )
        .with_manifest(ProfileManifest::new("sensor", "sensor").with_fingerprint("_vend_abc12345", "model01"))
        .build()
        .unwrap();

    assert_eq!(output.report.resolved_fingerprints, 1);
    assert_eq!(output.report.collisions.len(), 1);
    assert_eq!(
        output.report.collisions[0].candidate_profiles,
        vec!["contact", "sensor"]
    );
    assert_eq!(
        output.registry.lookup("_Vend_Abc12345", "Model01").unwrap().profile.id,
        "contact"
    );
}

#[test]
fn test_equal_priority_case_variants_fail_the_build() {
    let err = RegistryBuilder::default()
        .with_manifest(ProfileManifest::new("a", "contact sensor").with_fingerprint("_VEND_ABC12345", "MODEL01"))
        .with_manifest(ProfileManifest::new("b", "door sensor").with_fingerprint("_vend_abc12345", "model01"))
        .build()
        .unwrap_err();
    match err {
        RegistryError::Unresolved(conflicts) => {
            assert_eq!(conflicts.len(), 1);
            assert!(matches!(conflicts[0], Conflict::EqualPriority { .. }));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_malformed_and_wellformed_entries_fail_when_strict() {
    let manifests = || {
        vec![
            ProfileManifest::new("plug_a", "smart plug").with_fingerprint("_TZ3000_abc12345TS011F", "TS011F"),
            ProfileManifest::new("plug_b", "energy").with_fingerprint("_TZ3000_abc12345", "TS011F"),
        ]
    };

    let mut strict = RegistryBuilder::default();
    strict.add_manifests(manifests());
    assert!(matches!(strict.build(), Err(RegistryError::Unresolved(_))));

    let mut lenient = RegistryBuilder::new(RegistryConfig {
        strict_repairs: false,
        ..RegistryConfig::default()
    });
    lenient.add_manifests(manifests());
    let output = lenient.build().unwrap();
    assert_eq!(
        output.registry.lookup("_TZ3000_abc12345", "TS011F").unwrap().profile.id,
        "plug_a"
    );
}

#[test]
fn test_every_fingerprint_resolves_to_one_profile() {
    let mut builder = RegistryBuilder::default();
    let mut declared = Vec::new();
    for i in 0..20u32 {
        let category = match i % 3 {
            0 => "temperature sensor",
            1 => "sensor",
            _ => "generic",
        };
        let mut m = ProfileManifest::new(format!("profile_{}", i), category);
        // Overlapping cross products between neighbouring profiles of
        // different specificity.
        m.manufacturer_names = vec![
            format!("_TZE200_{:08}", i / 3),
            format!("_TZE200_{:08}", i / 3 + 100),
        ];
        m.product_ids = vec!["TS0601".into()];
        declared.extend(m.declared_fingerprints());
        builder.add_manifest(m);
    }

    let output = builder.build().unwrap();
    let mut owners: HashMap<String, usize> = HashMap::new();
    for (fp, profile) in output.registry.entries() {
        *owners.entry(fp.to_string()).or_default() += 1;
        assert!(output.registry.profile(profile).is_some());
    }
    assert!(owners.values().all(|count| *count == 1));

    for fp in declared {
        let hit = output.registry.lookup(&fp.manufacturer, &fp.model).unwrap();
        assert_eq!(hit.kind, MatchKind::Exact);
    }
}

#[test]
fn test_load_dir_and_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("10_generic.json"),
        r#"{"id": "generic", "category": "universal", "fallback": true}"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("00_soil.json"),
        r#"{"profiles": [{
            "id": "soil",
            "category": "soil sensor",
            "manufacturer_names": ["_TZE200_myd45weu", "_TZE200_ga1maeof"],
            "product_ids": ["TS0601"],
            "cluster_bindings": [61184],
            "quirks": {"time_sync": true},
            "capabilities": [
                {"capability": "measure_temperature", "source": {"kind": "datapoint", "dp": 5},
                 "codec": {"kind": "divide", "divisor": 10}},
                {"capability": "measure_humidity", "source": {"kind": "datapoint", "dp": 3}}
            ]
        }]}"#,
    )
    .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let manifests = manifest::load_dir(dir.path()).unwrap();
    assert_eq!(manifests.len(), 2);
    assert_eq!(manifests[0].id, "soil");

    let mut builder = RegistryBuilder::default();
    builder.load_dir(dir.path()).unwrap();
    let output = builder.build().unwrap();

    let path = dir.path().join("registry.json");
    output.registry.save(&path).unwrap();
    let loaded = FingerprintRegistry::load(&path).unwrap();

    assert_eq!(loaded.fingerprint_count(), 2);
    assert_eq!(loaded.fallback_profile(), Some("generic"));
    let hit = loaded.lookup("_TZE200_GA1MAEOF", "TS0601").unwrap();
    assert_eq!(hit.kind, MatchKind::Exact);
    assert!(hit.profile.quirks.time_sync);
    assert_eq!(hit.profile.datapoint_map.len(), 2);

    let prefix = loaded.lookup("_TZE200_unknown1", "TS0601").unwrap();
    assert_eq!(prefix.kind, MatchKind::Prefix);
    assert_eq!(prefix.profile.id, "soil");

    let generic = loaded.lookup("IKEA of Sweden", "TRADFRI bulb").unwrap();
    assert_eq!(generic.kind, MatchKind::Generic);
}
