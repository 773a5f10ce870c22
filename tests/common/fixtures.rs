//! Configuration-text builders for the integration tests.

use serde_json::{Value, json};

pub fn decl(id: &str, module_name: &str, links: &[&str]) -> Value {
    json!({ "id": id, "module_name": module_name, "links": links })
}

pub fn tag_decl(id: &str, module_name: &str, parent: &str, is_tag: bool, params: Value) -> Value {
    json!({
        "id": id,
        "module_name": module_name,
        "parent": parent,
        "is_tag": is_tag,
        "is_field": !is_tag,
        "params": params,
    })
}

pub fn decl_with_params(id: &str, module_name: &str, links: &[&str], params: Value) -> Value {
    json!({ "id": id, "module_name": module_name, "links": links, "params": params })
}

pub fn config_text(decls: &[Value]) -> String {
    Value::Array(decls.to_vec()).to_string()
}
