//! The built-in `std` tree seeded into every global context.
//!
//! The full standard library catalog lives outside this crate; what is
//! installed here is the supplemental core set: collector controls
//! (`std.gc`), the serializers (`std.json`, `std.ini`), the
//! pinned-semantics numeric helpers (`std.numeric`), and the output
//! bindings (`std.debug`, `std.io`). Every binding is an ordinary native
//! function value, so host code can extend or replace the tree through
//! the same mechanism.

pub mod ini;
pub mod json;

use std::rc::Rc;

use crate::{
    context::GlobalContext,
    exception::{ExecResult, Exception},
    function::Function,
    gc::Generation,
    ops,
    reference::Reference,
    value::Value,
};

/// Builds the `std` object and binds it read-only in the global scope.
pub(crate) fn install(global: &Rc<GlobalContext>) {
    let std_object = Value::object_from_pairs([
        ("gc", gc_object()),
        ("json", json_object()),
        ("ini", ini_object()),
        ("numeric", numeric_object()),
        ("debug", debug_object()),
        ("io", io_object()),
    ]);
    global.define_constant("std", std_object);
}

fn native(name: &str, body: impl Fn(&Rc<GlobalContext>, Vec<Value>) -> ExecResult<Value> + 'static) -> Value {
    let owned = name.to_owned();
    Value::Function(Function::native(owned, move |global, _self_ref, args| {
        let mut values = Vec::with_capacity(args.len());
        for arg in &args {
            values.push(arg.read()?);
        }
        body(global, values).map(Reference::temporary)
    }))
}

fn arg(values: &[Value], index: usize, name: &str) -> ExecResult<Value> {
    values
        .get(index)
        .cloned()
        .ok_or_else(|| Exception::runtime(format!("missing argument `{name}`")))
}

fn generation_arg(values: &[Value], index: usize, fallback: Generation) -> ExecResult<Generation> {
    match values.get(index) {
        None | Some(Value::Null) => Ok(fallback),
        Some(value) => match value.as_integer()? {
            0 => Ok(Generation::Newest),
            1 => Ok(Generation::Middle),
            2 => Ok(Generation::Oldest),
            other => Err(Exception::runtime(format!(
                "invalid generation (value was `{other}`, expected 0, 1 or 2)"
            ))),
        },
    }
}

fn gc_object() -> Value {
    Value::object_from_pairs([
        (
            "collect",
            native("std.gc.collect", |global, values| {
                let limit = generation_arg(&values, 0, Generation::Oldest)?;
                Ok(Value::Integer(global.collect(Some(limit)) as i64))
            }),
        ),
        (
            "count_variables",
            native("std.gc.count_variables", |global, _values| {
                Ok(Value::Integer(global.gc().count_pooled_variables() as i64))
            }),
        ),
        (
            "threshold",
            native("std.gc.threshold", |global, values| {
                let generation = generation_arg(&values, 0, Generation::Newest)?;
                Ok(Value::Integer(global.gc().get_threshold(generation) as i64))
            }),
        ),
        (
            "set_threshold",
            native("std.gc.set_threshold", |global, values| {
                let generation = generation_arg(&values, 0, Generation::Newest)?;
                let threshold = arg(&values, 1, "threshold")?.as_integer()?;
                if threshold < 1 {
                    return Err(Exception::runtime(format!(
                        "invalid threshold (value was `{threshold}`)"
                    )));
                }
                global.gc().set_threshold(generation, threshold as usize);
                Ok(Value::Null)
            }),
        ),
    ])
}

fn json_object() -> Value {
    Value::object_from_pairs([
        (
            "format",
            native("std.json.format", |_global, values| {
                Ok(Value::from(json::format(&arg(&values, 0, "value")?)))
            }),
        ),
        (
            "format5",
            native("std.json.format5", |_global, values| {
                Ok(Value::from(json::format5(&arg(&values, 0, "value")?)))
            }),
        ),
        (
            "parse",
            native("std.json.parse", |_global, values| {
                let text = arg(&values, 0, "text")?;
                json::parse(text.as_string()?)
            }),
        ),
    ])
}

fn ini_object() -> Value {
    Value::object_from_pairs([
        (
            "parse",
            native("std.ini.parse", |_global, values| {
                let text = arg(&values, 0, "text")?;
                ini::parse(text.as_string()?)
            }),
        ),
        (
            "format",
            native("std.ini.format", |_global, values| {
                Ok(Value::from(ini::format(&arg(&values, 0, "value")?)?))
            }),
        ),
    ])
}

fn numeric_object() -> Value {
    Value::object_from_pairs([(
        "sign",
        native("std.numeric.sign", |_global, values| {
            ops::unary(crate::air::UnaryOp::Sign, &arg(&values, 0, "value")?)
        }),
    )])
}

fn debug_object() -> Value {
    Value::object_from_pairs([
        (
            "log",
            native("std.debug.log", |global, values| {
                emit_line(global, &values);
                Ok(Value::Null)
            }),
        ),
        (
            "dump",
            native("std.debug.dump", |global, values| {
                let value = arg(&values, 0, "value")?;
                global.with_writer(|writer| {
                    writer.write_text(&value.dump_string());
                    writer.finish_line();
                });
                Ok(value)
            }),
        ),
    ])
}

fn io_object() -> Value {
    Value::object_from_pairs([(
        "print",
        native("std.io.print", |global, values| {
            emit_line(global, &values);
            Ok(Value::Null)
        }),
    )])
}

fn emit_line(global: &Rc<GlobalContext>, values: &[Value]) {
    global.with_writer(|writer| {
        for (n, value) in values.iter().enumerate() {
            if n != 0 {
                writer.write_text(" ");
            }
            writer.write_text(&value.print_string());
        }
        writer.finish_line();
    });
}
