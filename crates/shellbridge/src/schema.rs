//! JSON schema of the driver's replies.
//!
//! schemars emits draft 2020-12 (`$defs`); consumers that only understand
//! draft-07 expect `definitions`, so references are rewritten.

use serde_json::Value;

use crate::driver::Reply;

/// Schema for one [`Reply`] line, using draft-07 `definitions`.
pub fn reply_schema() -> Value {
    let schema = schemars::schema_for!(Reply);
    let value = serde_json::to_value(&schema).unwrap_or(Value::Null);
    to_draft07(value)
}

/// Move `$defs` to `definitions` and rewrite every `$ref` that points into it.
pub fn to_draft07(mut schema: Value) -> Value {
    if let Some(obj) = schema.as_object_mut() {
        if let Some(defs) = obj.remove("$defs") {
            obj.insert("definitions".to_string(), defs);
        }
    }
    rewrite_refs(&mut schema);
    schema
}

fn rewrite_refs(value: &mut Value) {
    match value {
        Value::Object(obj) => {
            for (key, val) in obj.iter_mut() {
                match val {
                    Value::String(target) if key == "$ref" => {
                        if let Some(name) = target.strip_prefix("#/$defs/") {
                            *target = format!("#/definitions/{name}");
                        }
                    }
                    _ => rewrite_refs(val),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(rewrite_refs),
        _ => {}
    }
}
