//! Parses `--attr name=value` command-line bindings into attribute adds on
//! a live `ST` instance.
//!
//! `name=text` binds a plain string. `name=@path.json` loads `path.json`
//! and binds it by shape: a JSON object becomes an aggregate (`add_aggr`),
//! a JSON array becomes a multi-valued attribute (one `add` per element,
//! StringTemplate's own rule for repeated `add` calls), and any other JSON
//! scalar binds directly.

use st_lib::{Value, ST};

pub fn apply_attr(st: &ST, raw: &str) -> Result<(), String> {
    let (name, value) = raw.split_once('=').ok_or_else(|| format!("malformed --attr, expected name=value: {raw}"))?;
    if let Some(path) = value.strip_prefix('@') {
        let text = std::fs::read_to_string(path).map_err(|e| format!("{path}: {e}"))?;
        let json: serde_json::Value = serde_json::from_str(&text).map_err(|e| format!("{path}: {e}"))?;
        bind_json(st, name, json);
    } else {
        st.add(name, value);
    }
    Ok(())
}

fn bind_json(st: &ST, name: &str, json: serde_json::Value) {
    match json {
        serde_json::Value::Object(map) => {
            let fields: Vec<String> = map.keys().cloned().collect();
            let field_refs: Vec<&str> = fields.iter().map(String::as_str).collect();
            let values: Vec<Value> = map.into_values().map(json_to_value).collect();
            st.add_aggr(name, &field_refs, values);
        }
        serde_json::Value::Array(items) => {
            for item in items {
                st.add(name, json_to_value(item));
            }
        }
        scalar => {
            st.add(name, json_to_value(scalar));
        }
    }
}

fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::str(s),
        serde_json::Value::Array(items) => Value::list(items.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => {
            let mut aggregate = st_lib::Aggregate::new();
            for (k, v) in map {
                aggregate.set(k, json_to_value(v));
            }
            Value::Aggregate(std::rc::Rc::new(aggregate))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_lib::Group;

    fn new_st(body: &str) -> ST {
        let group = Group::from_string(format!(r#"t(x) ::= "{body}""#)).unwrap();
        group.get_instance_of("/t").unwrap()
    }

    #[test]
    fn plain_attr_binds_a_string() {
        let st = new_st("<x>");
        apply_attr(&st, "x=Ada").unwrap();
        assert_eq!(st.render(), "Ada");
    }

    #[test]
    fn malformed_attr_without_equals_sign_is_an_error() {
        let st = new_st("<x>");
        assert!(apply_attr(&st, "no-equals-sign").is_err());
    }

    #[test]
    fn json_array_binds_as_a_multi_valued_attribute() {
        let st = Group::from_string(r#"t(xs) ::= "<xs; separator=",">""#).unwrap().get_instance_of("/t").unwrap();
        bind_json(&st, "xs", serde_json::json!(["a", "b", "c"]));
        assert_eq!(st.render(), "a,b,c");
    }

    #[test]
    fn json_object_binds_as_an_aggregate() {
        let st = Group::from_string(r#"t(person) ::= "<person.name> is <person.age>""#).unwrap().get_instance_of("/t").unwrap();
        bind_json(&st, "person", serde_json::json!({"name": "Ada", "age": 36}));
        assert_eq!(st.render(), "Ada is 36");
    }

    #[test]
    fn json_scalar_binds_directly() {
        let st = new_st("<x>");
        bind_json(&st, "x", serde_json::json!(42));
        assert_eq!(st.render(), "42");
    }
}
