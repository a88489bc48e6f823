use genconfig::{
    SchemaModel, ViolationKind,
    resolve::{Stage, resolve},
};
use serde_json::{Value, json};

fn schema(properties: Value) -> SchemaModel {
    SchemaModel::from_value(json!({ "metaType": "menu", "properties": properties }))
}

fn lines(text: &str) -> Vec<&str> {
    text.lines().collect()
}

#[test]
fn test_default_false_bool() {
    let schema = schema(json!({
        "foo": { "metaType": "bool", "config": "FOO", "default": false }
    }));
    let resolution = resolve(&schema, json!({})).unwrap();

    assert_eq!(resolution.resolved, ["FOO"]);
    assert_eq!(resolution.makefile, "FOO=n\n");
    assert!(!resolution.header.contains("FOO"));
    assert_eq!(resolution.config, json!({"foo": false}));
}

#[test]
fn test_select_forces_knob() {
    let schema = schema(json!({
        "bar": { "metaType": "bool", "config": "BAR", "default": false, "select": "FOO" },
        "foo": { "metaType": "bool", "config": "FOO", "default": false }
    }));
    let resolution = resolve(&schema, json!({"bar": true})).unwrap();

    assert_eq!(lines(&resolution.makefile), ["BAR=y", "FOO=y"]);
    assert_eq!(lines(&resolution.header), ["#define BAR 1", "#define FOO 1"]);
}

#[test]
fn test_unmet_dependency() {
    let schema = schema(json!({
        "foo": { "metaType": "bool", "config": "FOO", "default": false, "depends": "BAR" },
        "bar": { "metaType": "bool", "config": "BAR", "default": false }
    }));
    let rejection = resolve(&schema, json!({"foo": true, "bar": false})).unwrap_err();

    assert_eq!(rejection.stage, Stage::DependencyChecking);
    assert_eq!(rejection.violations.len(), 1);
    let violation = &rejection.violations[0];
    assert_eq!(violation.kind, ViolationKind::Dependency);
    assert_eq!(violation.knob.as_deref(), Some("FOO"));
    assert_eq!(violation.expression.as_deref(), Some("BAR"));
    assert_eq!(violation.message, "\"FOO\" depends on: \"BAR\"");
}

#[test]
fn test_choice_resolves_one_alternative() {
    let schema = schema(json!({
        "pick": { "metaType": "boolChoice", "choice": { "x": "X_KNOB", "y": "Y_KNOB" } }
    }));
    let resolution = resolve(&schema, json!({"pick": "x"})).unwrap();

    assert_eq!(resolution.resolved, ["X_KNOB"]);
    assert_eq!(resolution.makefile, "X_KNOB=y\n");
    assert_eq!(resolution.header, "#define X_KNOB 1\n");
    assert!(!resolution.makefile.contains("Y_KNOB"));
    assert!(!resolution.header.contains("Y_KNOB"));
    assert_eq!(resolution.knobs.len(), 2);
}

#[test]
fn test_undeclared_choice_key() {
    let schema = schema(json!({
        "pick": { "metaType": "boolChoice", "choice": { "x": "X_KNOB", "y": "Y_KNOB" } }
    }));
    let rejection = resolve(&schema, json!({"pick": "z"})).unwrap_err();
    assert_eq!(rejection.stage, Stage::TypeChecking);
    assert_eq!(rejection.violations[0].kind, ViolationKind::Type);
}

fn kernel() -> SchemaModel {
    schema(json!({
        "name": { "metaType": "str", "config": "configNAME", "default": "zeke" },
        "hz": { "metaType": "int", "config": "configHZ", "default": 100 },
        "smp": { "metaType": "bool", "config": "configSMP", "default": true },
        "fs": {
            "metaType": "menu",
            "title": "File systems",
            "properties": {
                "ext2": { "metaType": "tristate", "config": "configEXT2", "default": "m" },
                "fat": { "metaType": "tristate", "config": "configFAT", "default": "y" },
                "nfs": { "metaType": "tristate", "config": "configNFS", "default": "n" }
            }
        },
        "debug": {
            "metaType": "menuconfig",
            "select": "configKSTACK",
            "properties": {
                "enabled": { "metaType": "bool", "config": "configDEBUG", "default": false },
                "verbose": { "metaType": "bool", "config": "configDEBUG_VERBOSE", "default": true, "makeOnly": true }
            }
        },
        "kstack": { "metaType": "bool", "config": "configKSTACK", "default": false },
        "sched": {
            "metaType": "boolChoice",
            "choice": { "rr": "configSCHED_RR", "fifo": "configSCHED_FIFO" },
            "default": "rr",
            "depends": "configSMP"
        }
    }))
}

#[test]
fn test_tristate_emission() {
    let resolution = resolve(&kernel(), json!({})).unwrap();
    let header = lines(&resolution.header);

    assert!(header.contains(&"#define configEXT2 2"));
    assert!(header.contains(&"#define configFAT 1"));
    assert!(!resolution.header.contains("configNFS"));
    assert!(resolution.makefile.contains("configNFS=n\n"));
    assert!(resolution.makefile.contains("configEXT2=m\n"));
}

#[test]
fn test_menuconfig_gating_and_make_only() {
    let off = resolve(&kernel(), json!({})).unwrap();
    assert!(off.resolved.contains(&"configDEBUG".to_string()));
    assert!(!off.resolved.contains(&"configDEBUG_VERBOSE".to_string()));
    assert!(off.makefile.contains("configKSTACK=n\n"));

    let on = resolve(&kernel(), json!({"debug": {"enabled": true}})).unwrap();
    assert!(on.makefile.contains("configDEBUG_VERBOSE=y\n"));
    assert!(!on.header.contains("configDEBUG_VERBOSE"));
    assert!(on.makefile.contains("configKSTACK=y\n"));
    assert!(on.header.contains("#define configKSTACK 1\n"));
}

#[test]
fn test_full_listing_order() {
    let resolution = resolve(&kernel(), json!({"name": "a\"b", "hz": 250})).unwrap();
    assert_eq!(
        lines(&resolution.makefile),
        [
            "configNAME=\"a\\\"b\"",
            "configHZ=250",
            "configSMP=y",
            "configEXT2=m",
            "configFAT=y",
            "configNFS=n",
            "configDEBUG=n",
            "configKSTACK=n",
            "configSCHED_RR=y",
        ]
    );
    assert_eq!(
        lines(&resolution.header),
        [
            "#define configNAME \"a\\\"b\"",
            "#define configHZ 250",
            "#define configSMP 1",
            "#define configEXT2 2",
            "#define configFAT 1",
            "#define configSCHED_RR 1",
        ]
    );
}

#[test]
fn test_deterministic_output() {
    let input = json!({"hz": 1000, "fs": {"nfs": "y"}, "sched": "fifo"});
    let first = resolve(&kernel(), input.clone()).unwrap();
    let second = resolve(&kernel(), input).unwrap();
    assert_eq!(first.makefile, second.makefile);
    assert_eq!(first.header, second.header);
}

#[test]
fn test_resolved_config_round_trips() {
    let first = resolve(
        &kernel(),
        json!({"debug": {"enabled": true}, "sched": "fifo", "junk": 1}),
    )
    .unwrap();
    let second = resolve(&kernel(), first.config.clone()).unwrap();

    assert_eq!(first.config, second.config);
    assert_eq!(first.makefile, second.makefile);
    assert_eq!(first.header, second.header);
    assert!(first.config.get("junk").is_none());
}

#[test]
fn test_dependency_violations_all_reported() {
    let rejection = resolve(
        &kernel(),
        json!({"smp": false, "sched": "fifo", "extra": {"x": 1}}),
    )
    .unwrap_err();
    assert_eq!(rejection.violations.len(), 1);
    assert_eq!(rejection.violations[0].knob.as_deref(), Some("configSCHED_FIFO"));

    let schema = schema(json!({
        "a": { "metaType": "bool", "config": "A", "default": true, "depends": "C" },
        "b": { "metaType": "int", "config": "B", "default": 3, "depends": "C || A && !A" },
        "c": { "metaType": "bool", "config": "C", "default": false }
    }));
    let rejection = resolve(&schema, json!({})).unwrap_err();
    let knobs: Vec<_> = rejection
        .violations
        .iter()
        .map(|v| v.knob.as_deref().unwrap_or_default())
        .collect();
    assert_eq!(knobs, ["A", "B"]);
}

#[test]
fn test_type_errors_stop_before_dependencies() {
    let schema = schema(json!({
        "a": { "metaType": "bool", "config": "A", "default": true, "depends": "C" },
        "n": { "metaType": "int", "config": "N", "default": 1 },
        "c": { "metaType": "bool", "config": "C", "default": false }
    }));
    let rejection = resolve(&schema, json!({"n": "one", "c": "no"})).unwrap_err();
    assert_eq!(rejection.stage, Stage::TypeChecking);
    assert_eq!(rejection.violations.len(), 2);
    assert!(rejection.violations.iter().all(|v| v.kind == ViolationKind::Type));
}

#[test]
fn test_duplicate_knob_is_conflict() {
    let schema = schema(json!({
        "a": { "metaType": "bool", "config": "SAME", "default": true },
        "pick": { "metaType": "boolChoice", "choice": { "x": "SAME" } }
    }));
    let rejection = resolve(&schema, json!({})).unwrap_err();
    assert_eq!(rejection.stage, Stage::Compiling);
    assert_eq!(rejection.violations[0].kind, ViolationKind::Conflict);
    assert!(rejection.violations[0].message.contains("`a`"));
    assert!(rejection.violations[0].message.contains("`pick`"));
}

#[test]
fn test_schema_errors_reported_together() {
    let schema = schema(json!({
        "a": { "metaType": "bool", "default": true },
        "b": { "metaType": "widget" },
        "c": { "metaType": "boolChoice" },
        "d": { "metaType": "int", "config": "D", "default": 1, "depends": "A &&" }
    }));
    let rejection = resolve(&schema, json!({})).unwrap_err();
    assert_eq!(rejection.stage, Stage::Compiling);
    assert_eq!(rejection.violations.len(), 4);
    assert!(rejection.violations.iter().all(|v| v.kind == ViolationKind::Schema));
    assert_eq!(rejection.violations[3].expression.as_deref(), Some("A &&"));
}

#[test]
fn test_select_chains_are_not_transitive() {
    let schema = schema(json!({
        "a": { "metaType": "bool", "config": "A", "default": true, "select": "B" },
        "b": { "metaType": "bool", "config": "B", "default": false, "select": "C" },
        "c": { "metaType": "bool", "config": "C", "default": false }
    }));
    let resolution = resolve(&schema, json!({})).unwrap();
    assert_eq!(lines(&resolution.makefile), ["A=y", "B=y", "C=n"]);

    // Feeding the result back lets the next hop fire.
    let again = resolve(&schema, resolution.config).unwrap();
    assert_eq!(lines(&again.makefile), ["A=y", "B=y", "C=y"]);
}

#[test]
fn test_guarded_select_with_value() {
    let schema = schema(json!({
        "net": {
            "metaType": "bool", "config": "NET", "default": true,
            "select": { "knob": "MTU", "value": 9000, "expression": "JUMBO" }
        },
        "jumbo": { "metaType": "bool", "config": "JUMBO", "default": false },
        "mtu": { "metaType": "int", "config": "MTU", "default": 1500 }
    }));
    let plain = resolve(&schema, json!({})).unwrap();
    assert!(plain.makefile.contains("MTU=1500\n"));

    let jumbo = resolve(&schema, json!({"jumbo": true})).unwrap();
    assert!(jumbo.makefile.contains("MTU=9000\n"));
}

#[test]
fn test_absent_choice_resolves_nothing() {
    let schema = schema(json!({
        "pick": { "metaType": "boolChoice", "choice": { "x": "X", "y": "Y" } },
        "z": { "metaType": "bool", "config": "Z", "default": true, "depends": "X || Y" }
    }));
    let rejection = resolve(&schema, json!({})).unwrap_err();
    assert_eq!(rejection.violations.len(), 1);
    assert_eq!(rejection.violations[0].knob.as_deref(), Some("Z"));

    let resolution = resolve(&schema, json!({"pick": "y"})).unwrap();
    assert_eq!(resolution.resolved, ["Y", "Z"]);
}

#[test]
fn test_string_value_cannot_add_lines() {
    let schema = schema(json!({
        "name": { "metaType": "str", "config": "NAME", "default": "" }
    }));
    let resolution = resolve(&schema, json!({"name": "x\n#define EVIL 1\n"})).unwrap();

    assert_eq!(lines(&resolution.header), ["#define NAME \"x\\n#define EVIL 1\\n\""]);
    assert_eq!(lines(&resolution.makefile), ["NAME=\"x\\n#define EVIL 1\\n\""]);
}

#[test]
fn test_dotted_property_key_rejected() {
    let schema = schema(json!({
        "a.b": { "metaType": "bool", "config": "AB", "default": true }
    }));
    let rejection = resolve(&schema, json!({})).unwrap_err();
    assert_eq!(rejection.stage, Stage::Compiling);
    assert_eq!(rejection.violations.len(), 1);
    assert_eq!(rejection.violations[0].kind, ViolationKind::Schema);
    assert!(rejection.violations[0].message.contains("`a.b`"));
}
