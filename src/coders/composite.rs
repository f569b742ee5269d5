use log::trace;

use super::{eval_size, mismatch, CoderCtx, FieldCoder};
use crate::bits::{BitReader, BitWriter, ByteOrder};
use crate::expr::Scope;
use crate::parser;
use crate::result::{Error, Result};
use crate::template::{BindingDescriptor, Choice, ChoicePrefix, Template};
use crate::value::Value;

fn lookup<'t>(ctx: &CoderCtx<'t>, type_name: &str) -> Result<&'t Template> {
    ctx.templates
        .get(type_name)
        .ok_or_else(|| Error::Value(format!("unknown template `{}`", type_name)))
}

// Walks the alternatives in declared order with `#prefix` bound to the
// peeked discriminator. Returns None when nothing matches and no
// default exists, leaving the reader where it started; object arrays
// treat that as the end of the list.
fn resolve_choice<'t>(
    ctx: &CoderCtx<'t>,
    reader: &mut BitReader,
    template: &Template,
    choice: &Choice,
    scope: &Scope,
) -> Result<Option<&'t Template>> {
    let prefix = match choice.prefix {
        ChoicePrefix::None => None,
        ChoicePrefix::Bits(bits) => {
            reader.mark();
            match reader.get_uint(bits, ByteOrder::Big) {
                Ok(raw) => Some(Value::Int(raw as i64)),
                Err(Error::BufferExhausted(_)) => {
                    reader.restore();
                    return Ok(None);
                }
                Err(e) => {
                    reader.clear_mark();
                    return Err(e);
                }
            }
        }
        ChoicePrefix::Text { terminator } => {
            reader.mark();
            match reader.get_text_until(terminator, false, template.charset()?) {
                Ok(text) => Some(Value::Str(text)),
                Err(e) => {
                    reader.restore();
                    return Err(e);
                }
            }
        }
    };

    for alternative in &choice.alternatives {
        let matched = {
            let scope = match &prefix {
                Some(prefix) => scope.with_prefix(prefix),
                None => *scope,
            };
            ctx.evaluator
                .eval_bool(template.expr(&alternative.condition)?, &scope)?
        };
        if matched {
            settle_prefix(reader, choice.prefix);
            trace!("choice resolved to {}", alternative.type_name);
            return lookup(ctx, &alternative.type_name).map(Some);
        }
    }
    if let Some(default) = &choice.default {
        settle_prefix(reader, choice.prefix);
        trace!("choice fell back to default {}", default);
        return lookup(ctx, default).map(Some);
    }
    reader.restore();
    Ok(None)
}

// A bit prefix is consumed by the resolution; a text prefix is only
// peeked and is re-read by the selected template's own fields.
fn settle_prefix(reader: &mut BitReader, prefix: ChoicePrefix) {
    match prefix {
        ChoicePrefix::None => {}
        ChoicePrefix::Bits(_) => reader.clear_mark(),
        ChoicePrefix::Text { .. } => reader.restore(),
    }
}

fn encode_prefix(writer: &mut BitWriter, choice: &Choice, context: &str) -> Result<()> {
    let ChoicePrefix::Bits(bits) = choice.prefix else {
        return Ok(());
    };
    if let Some(alternative) = choice.alternatives.iter().find(|a| a.type_name == context) {
        let prefix = alternative.prefix.ok_or_else(|| {
            Error::Value(format!("alternative {} declares no prefix to write", context))
        })?;
        return writer.put_uint(prefix, bits, ByteOrder::Big);
    }
    if choice.default.as_deref() == Some(context) {
        return Ok(());
    }
    Err(Error::Value(format!(
        "{} is not among the choice alternatives",
        context
    )))
}

pub(crate) struct ObjectCoder;

impl FieldCoder for ObjectCoder {
    fn decode(
        &self,
        ctx: &CoderCtx,
        reader: &mut BitReader,
        template: &Template,
        bind: &BindingDescriptor,
        scope: &Scope,
    ) -> Result<Value> {
        let BindingDescriptor::Object { type_name, choice } = bind else {
            return Err(mismatch(bind));
        };
        let child_template = match (choice, type_name) {
            (Some(choice), _) => resolve_choice(ctx, reader, template, choice, scope)?
                .ok_or_else(|| Error::Value("no matching choice alternative".into()))?,
            (None, Some(type_name)) => lookup(ctx, type_name)?,
            (None, None) => return Err(mismatch(bind)),
        };
        let child = parser::decode_struct(ctx, reader, child_template, Some(scope.root))?;
        Ok(Value::Object(child))
    }

    fn encode(
        &self,
        ctx: &CoderCtx,
        writer: &mut BitWriter,
        _template: &Template,
        bind: &BindingDescriptor,
        scope: &Scope,
        value: &Value,
    ) -> Result<()> {
        let BindingDescriptor::Object { choice, .. } = bind else {
            return Err(mismatch(bind));
        };
        let obj = value.as_object()?;
        if let Some(choice) = choice {
            encode_prefix(writer, choice, obj.context())?;
        }
        let child_template = lookup(ctx, obj.context())?;
        parser::encode_struct(ctx, writer, child_template, obj, Some(scope.root))
    }
}

pub(crate) struct ArrayObjectCoder;

impl FieldCoder for ArrayObjectCoder {
    fn decode(
        &self,
        ctx: &CoderCtx,
        reader: &mut BitReader,
        template: &Template,
        bind: &BindingDescriptor,
        scope: &Scope,
    ) -> Result<Value> {
        let BindingDescriptor::ArrayObject { size, element, choice } = bind else {
            return Err(mismatch(bind));
        };
        let count = eval_size(ctx, template, size, scope)?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            let child_template = match (choice, element) {
                (Some(choice), _) => match resolve_choice(ctx, reader, template, choice, scope)? {
                    Some(child_template) => child_template,
                    None => break,
                },
                (None, Some(element)) => lookup(ctx, element)?,
                (None, None) => return Err(mismatch(bind)),
            };
            let child = parser::decode_struct(ctx, reader, child_template, Some(scope.root))?;
            items.push(Value::Object(child));
        }
        Ok(Value::List(items))
    }

    fn encode(
        &self,
        ctx: &CoderCtx,
        writer: &mut BitWriter,
        template: &Template,
        bind: &BindingDescriptor,
        scope: &Scope,
        value: &Value,
    ) -> Result<()> {
        let BindingDescriptor::ArrayObject { size, choice, .. } = bind else {
            return Err(mismatch(bind));
        };
        let items = value.as_list()?;
        let count = eval_size(ctx, template, size, scope)?;
        if choice.is_none() && items.len() != count {
            return Err(Error::Value(format!(
                "array holds {} elements, the descriptor declares {}",
                items.len(),
                count
            )));
        }
        for item in items {
            let obj = item.as_object()?;
            if let Some(choice) = choice {
                encode_prefix(writer, choice, obj.context())?;
            }
            let child_template = lookup(ctx, obj.context())?;
            parser::encode_struct(ctx, writer, child_template, obj, Some(scope.root))?;
        }
        Ok(())
    }
}

pub(crate) struct ArrayPrimitiveCoder;

impl FieldCoder for ArrayPrimitiveCoder {
    fn decode(
        &self,
        ctx: &CoderCtx,
        reader: &mut BitReader,
        template: &Template,
        bind: &BindingDescriptor,
        scope: &Scope,
    ) -> Result<Value> {
        let BindingDescriptor::ArrayPrimitive { size, element } = bind else {
            return Err(mismatch(bind));
        };
        let count = eval_size(ctx, template, size, scope)?;
        let coder = ctx.coders.get(element.kind())?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(coder.decode(ctx, reader, template, element, scope)?);
        }
        Ok(Value::List(items))
    }

    fn encode(
        &self,
        ctx: &CoderCtx,
        writer: &mut BitWriter,
        template: &Template,
        bind: &BindingDescriptor,
        scope: &Scope,
        value: &Value,
    ) -> Result<()> {
        let BindingDescriptor::ArrayPrimitive { size, element } = bind else {
            return Err(mismatch(bind));
        };
        let items = value.as_list()?;
        let count = eval_size(ctx, template, size, scope)?;
        if items.len() != count {
            return Err(Error::Value(format!(
                "array holds {} elements, the descriptor declares {}",
                items.len(),
                count
            )));
        }
        let coder = ctx.coders.get(element.kind())?;
        for item in items {
            coder.encode(ctx, writer, template, element, scope, item)?;
        }
        Ok(())
    }
}
