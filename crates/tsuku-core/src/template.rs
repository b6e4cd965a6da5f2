use std::collections::BTreeMap;

use serde_json::Value;
use tsuku_domain::Params;

/// Variable map for template expansion: `version`, `version_tag`, `os`,
/// `arch` at plan time, plus whatever an action adds.
pub type Vars = BTreeMap<String, String>;

/// Replaces literal `{name}` tokens with `vars[name]`. Unknown tokens are
/// left as-is; there is no escaping and no nested expression syntax.
#[must_use]
pub fn expand_vars(input: &str, vars: &Vars) -> String {
    let mut out = input.to_string();
    for (key, value) in vars {
        let token = format!("{{{key}}}");
        if out.contains(&token) {
            out = out.replace(&token, value);
        }
    }
    out
}

/// Recursively expands template variables through strings, lists, and maps.
/// Non-string scalars pass through untouched.
#[must_use]
pub fn expand_value(value: &Value, vars: &Vars) -> Value {
    match value {
        Value::String(s) => Value::String(expand_vars(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand_value(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_value(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[must_use]
pub fn expand_params(params: &Params, vars: &Vars) -> Params {
    params
        .iter()
        .map(|(k, v)| (k.clone(), expand_value(v, vars)))
        .collect()
}

/// Rewrites `vars["os"]` through the step's `os_mapping` table, if any.
/// Mappings let recipes translate Go-style platform names into whatever the
/// upstream release artifacts use.
pub fn apply_os_mapping(vars: &mut Vars, params: &Params) {
    apply_mapping(vars, params, "os_mapping", "os");
}

/// Rewrites `vars["arch"]` through the step's `arch_mapping` table, if any.
pub fn apply_arch_mapping(vars: &mut Vars, params: &Params) {
    apply_mapping(vars, params, "arch_mapping", "arch");
}

fn apply_mapping(vars: &mut Vars, params: &Params, table_key: &str, var_key: &str) {
    let Some(Value::Object(mapping)) = params.get(table_key) else {
        return;
    };
    let Some(current) = vars.get(var_key) else {
        return;
    };
    if let Some(Value::String(mapped)) = mapping.get(current) {
        vars.insert(var_key.to_string(), mapped.clone());
    }
}
