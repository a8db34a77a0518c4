/// JSON <-> Lua value conversion
///
/// Scripts exchange data with the engine as JSON. JSON null travels as the
/// `lua.null()` sentinel and JSON arrays carry the array metatable, so both
/// survive a trip through a script unchanged. On the way back, tables with the
/// array metatable or contiguous positive integer keys become arrays, every
/// other table becomes an object.

use mlua::{Lua, LuaSerdeExt, Value as LuaValue};
use serde_json::{Map, Number, Value};

/// Nesting limit for table conversion; deeper tables are almost always cyclic
const MAX_DEPTH: usize = 64;

/// Convert a JSON value into a Lua value owned by `lua`
pub fn json_to_lua(lua: &Lua, value: &Value) -> mlua::Result<LuaValue> {
    lua.to_value(value)
}

/// Convert a Lua value back into JSON
///
/// Functions, userdata and threads have no JSON form and become null.
pub fn lua_to_json(lua: &Lua, value: LuaValue) -> mlua::Result<Value> {
    convert(lua, value, 0)
}

fn convert(lua: &Lua, value: LuaValue, depth: usize) -> mlua::Result<Value> {
    if depth > MAX_DEPTH {
        return Err(mlua::Error::RuntimeError(format!(
            "table nesting deeper than {} levels (cyclic table?)",
            MAX_DEPTH
        )));
    }

    match value {
        LuaValue::Nil => Ok(Value::Null),
        LuaValue::Boolean(b) => Ok(Value::Bool(b)),
        LuaValue::Integer(i) => Ok(Value::Number(Number::from(i))),
        LuaValue::Number(f) => Ok(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)),
        LuaValue::String(s) => Ok(Value::String(s.to_str()?.to_string())),
        LuaValue::Table(table) => {
            let marked = table.metatable().is_some_and(|mt| mt == lua.array_metatable());

            // Check if it's an array or object
            let mut is_array = true;
            let mut max_index = 0usize;
            let mut count = 0usize;

            for pair in table.pairs::<LuaValue, LuaValue>() {
                let (key, _) = pair?;
                count += 1;
                match key {
                    LuaValue::Integer(i) if i > 0 => max_index = max_index.max(i as usize),
                    _ => {
                        is_array = false;
                        break;
                    }
                }
            }

            if is_array && count == max_index && (count > 0 || marked) {
                let mut items = Vec::with_capacity(max_index);
                for i in 1..=max_index {
                    let item: LuaValue = table.raw_get(i)?;
                    items.push(convert(lua, item, depth + 1)?);
                }
                Ok(Value::Array(items))
            } else {
                let mut fields = Map::new();
                for pair in table.pairs::<LuaValue, LuaValue>() {
                    let (key, item) = pair?;
                    let key = match key {
                        LuaValue::String(s) => s.to_str()?.to_string(),
                        LuaValue::Integer(i) => i.to_string(),
                        LuaValue::Number(f) => f.to_string(),
                        _ => continue,
                    };
                    fields.insert(key, convert(lua, item, depth + 1)?);
                }
                Ok(Value::Object(fields))
            }
        }
        _ => Ok(Value::Null),
    }
}

/// Short type label used when describing bound values in diagnostics
pub fn type_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "record",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn nested_values_survive_a_trip_through_lua() {
        let lua = Lua::new();
        let original = json!({
            "name": "Ada",
            "age": 36,
            "score": 9.5,
            "tags": ["a", "b"],
            "address": { "city": "London" },
            "active": true
        });

        let back = lua_to_json(&lua, json_to_lua(&lua, &original).unwrap()).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn sparse_tables_become_objects() {
        let lua = Lua::new();
        let value: LuaValue = lua.load("return { [1] = 'a', [3] = 'c' }").eval().unwrap();
        assert_eq!(lua_to_json(&lua, value).unwrap(), json!({ "1": "a", "3": "c" }));
    }

    #[test]
    fn nulls_and_empty_lists_survive_a_trip_through_lua() {
        let lua = Lua::new();
        let original = json!({
            "token": null,
            "items": [],
            "mixed": [1, null, 3],
            "nested": { "empty": [] }
        });

        let back = lua_to_json(&lua, json_to_lua(&lua, &original).unwrap()).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn scripts_see_null_as_a_bound_value() {
        let lua = Lua::new();
        lua.globals()
            .set("data", json_to_lua(&lua, &json!({ "token": null, "items": [] })).unwrap())
            .unwrap();
        let value: LuaValue = lua
            .load("data.items[#data.items + 1] = 'x' return data")
            .eval()
            .unwrap();
        assert_eq!(lua_to_json(&lua, value).unwrap(), json!({ "token": null, "items": ["x"] }));
    }

    #[test]
    fn empty_tables_become_records() {
        let lua = Lua::new();
        let value: LuaValue = lua.load("return {}").eval().unwrap();
        assert_eq!(lua_to_json(&lua, value).unwrap(), json!({}));
    }

    #[test]
    fn cyclic_tables_are_rejected() {
        let lua = Lua::new();
        let value: LuaValue = lua.load("local t = {} t.self = t return t").eval().unwrap();
        assert!(lua_to_json(&lua, value).is_err());
    }

    #[test]
    fn functions_become_null() {
        let lua = Lua::new();
        let value: LuaValue = lua.load("return function() end").eval().unwrap();
        assert_eq!(lua_to_json(&lua, value).unwrap(), Value::Null);
    }
}
