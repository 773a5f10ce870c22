use metricloom::config::ModuleConfig;
use metricloom::reconcile::diff;
use proptest::prelude::*;
use serde_json::json;

fn config(id: &str, param: i64, links: Vec<String>) -> ModuleConfig {
    let mut params = serde_json::Map::new();
    params.insert("value".into(), json!(param));
    ModuleConfig {
        id: id.to_string(),
        module_name: "outputs.memory".to_string(),
        name: id.to_string(),
        params,
        links,
        is_field: false,
        is_tag: false,
        replace_existing: false,
        parent: None,
    }
}

#[test]
fn detects_added_removed_and_changed() {
    let current = vec![config("a", 1, vec![]), config("b", 1, vec![])];
    let desired = vec![config("b", 2, vec![]), config("c", 1, vec![])];

    let out = diff(&current, &desired);
    assert_eq!(out.added.len(), 1);
    assert_eq!(out.added[0].id, "c");
    assert_eq!(out.removed.len(), 1);
    assert_eq!(out.removed[0].id, "a");
    assert_eq!(out.changed.len(), 1);
    assert_eq!(out.changed[0].id, "b");
    assert_eq!(out.changed[0].params["value"], json!(2));
}

#[test]
fn link_edits_count_as_changes() {
    let current = vec![config("a", 1, vec!["x".into()])];
    let desired = vec![config("a", 1, vec!["y".into()])];
    let out = diff(&current, &desired);
    assert_eq!(out.changed.len(), 1);
    assert!(out.added.is_empty());
    assert!(out.removed.is_empty());
}

#[test]
fn identical_configurations_yield_an_empty_diff() {
    let current = vec![config("a", 1, vec!["b".into()]), config("b", 2, vec![])];
    assert!(diff(&current, &current.clone()).is_empty());
}

fn arb_configs() -> impl Strategy<Value = Vec<ModuleConfig>> {
    proptest::collection::btree_map("[a-e]", 0i64..4, 0..5).prop_map(|entries| {
        entries
            .into_iter()
            .map(|(id, param)| config(&id, param, vec![]))
            .collect()
    })
}

proptest! {
    #[test]
    fn diff_against_itself_is_empty(configs in arb_configs()) {
        prop_assert!(diff(&configs, &configs).is_empty());
    }

    #[test]
    fn diff_partitions_the_id_space(current in arb_configs(), desired in arb_configs()) {
        let out = diff(&current, &desired);

        let current_ids: Vec<&str> = current.iter().map(|c| c.id.as_str()).collect();
        let desired_ids: Vec<&str> = desired.iter().map(|c| c.id.as_str()).collect();

        for entry in &out.added {
            prop_assert!(!current_ids.contains(&entry.id.as_str()));
            prop_assert!(desired_ids.contains(&entry.id.as_str()));
        }
        for entry in &out.removed {
            prop_assert!(current_ids.contains(&entry.id.as_str()));
            prop_assert!(!desired_ids.contains(&entry.id.as_str()));
        }
        for entry in &out.changed {
            prop_assert!(current_ids.contains(&entry.id.as_str()));
            prop_assert!(desired_ids.contains(&entry.id.as_str()));
            let old = current.iter().find(|c| c.id == entry.id).unwrap();
            prop_assert_ne!(old.canonical(), entry.canonical());
        }

        // Ids in the intersection that did not change appear nowhere.
        let touched: Vec<&str> = out
            .added
            .iter()
            .chain(out.removed.iter())
            .chain(out.changed.iter())
            .map(|c| c.id.as_str())
            .collect();
        for entry in &desired {
            let unchanged = current
                .iter()
                .any(|c| c.id == entry.id && c.canonical() == entry.canonical());
            if unchanged {
                prop_assert!(!touched.contains(&entry.id.as_str()));
            }
        }
    }

    #[test]
    fn applying_the_diff_reaches_the_desired_state(
        current in arb_configs(),
        desired in arb_configs(),
    ) {
        let out = diff(&current, &desired);
        let stop = out.ids_to_stop();
        let mut result: Vec<ModuleConfig> = current
            .iter()
            .filter(|c| !stop.contains(&c.id))
            .cloned()
            .collect();
        result.extend(out.entries_to_start());

        let mut result_canonical: Vec<String> = result.iter().map(|c| c.canonical()).collect();
        let mut desired_canonical: Vec<String> = desired.iter().map(|c| c.canonical()).collect();
        result_canonical.sort();
        desired_canonical.sort();
        prop_assert_eq!(result_canonical, desired_canonical);
    }
}
