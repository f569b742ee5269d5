use std::collections::HashMap;
use std::sync::Arc;

use semver::Version;

use crate::bits::BitReader;
use crate::checksum::{ChecksumFn, ChecksumRegistry};
use crate::coders::{CoderCtx, CoderRegistry, FieldCoder};
use crate::convert::{Converter, ConverterRegistry, Validator, ValidatorRegistry};
use crate::expr::Evaluator;
use crate::registry::TemplateRegistry;
use crate::result::{Error, Result};
use crate::template::{DescriptorKind, Template, TemplateBuilder};
use crate::value::{ObjectValue, Value};

pub mod bits;
pub mod charset;
pub mod checksum;
pub mod coders;
pub mod convert;
pub mod expr;
mod parser;
pub mod registry;
pub mod result;
pub mod template;
pub mod value;

// The engine facade: templates, coders and collaborators are wired
// here once, then decode/encode calls borrow them per message.
#[derive(Debug, Default)]
pub struct Codec {
    templates: TemplateRegistry,
    coders: CoderRegistry,
    evaluator: Evaluator,
    checksums: ChecksumRegistry,
    converters: ConverterRegistry,
    validators: ValidatorRegistry,
    vars: HashMap<String, Value>,
    version: Option<Version>,
}

#[derive(Debug)]
pub struct Decoded {
    pub value: ObjectValue,
    pub consumed: usize,
}

#[derive(Debug)]
pub struct StreamDecoded {
    pub offset: usize,
    pub value: ObjectValue,
    pub consumed: usize,
}

// Result of a whole-stream decode: everything that parsed plus the
// failures that were skipped over during resync.
#[derive(Debug, Default)]
pub struct DecodeAll {
    pub messages: Vec<StreamDecoded>,
    pub errors: Vec<(usize, Error)>,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, builder: TemplateBuilder) -> Result<()> {
        let template = template::compile(builder, &self.converters, &self.validators, &self.checksums)?;
        self.templates.register(template)
    }

    pub fn set_protocol_version(&mut self, version: &str) -> Result<()> {
        let parsed = Version::parse(version)
            .map_err(|e| Error::Version(format!("bad protocol version `{}`: {}", version, e)))?;
        self.version = Some(parsed);
        Ok(())
    }

    pub fn set_var(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_owned(), value);
    }

    pub fn register_function<F>(&mut self, type_ref: &str, name: &str, function: F)
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.evaluator.register_function(type_ref, name, function);
    }

    pub fn register_converter(&mut self, id: &str, converter: Arc<dyn Converter>) -> Result<()> {
        self.converters.register(id, converter)
    }

    pub fn register_validator(&mut self, id: &str, validator: Arc<dyn Validator>) -> Result<()> {
        self.validators.register(id, validator)
    }

    pub fn register_checksum(&mut self, name: &str, algorithm: ChecksumFn) -> Result<()> {
        self.checksums.register(name, algorithm)
    }

    pub fn register_coder(&mut self, kind: DescriptorKind, coder: Box<dyn FieldCoder>) -> Result<()> {
        self.coders.register(kind, coder)
    }

    pub fn template(&self, context: &str) -> Option<&Template> {
        self.templates.get(context)
    }

    pub fn describe(&self, context: &str) -> Result<String> {
        self.template(context)
            .map(Template::describe)
            .ok_or_else(|| Error::config(context, "no such template"))
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Decoded> {
        let ctx = self.ctx();
        let mut reader = BitReader::new(bytes);
        let template = self.templates.select(&mut reader)?;
        let (value, consumed) = parser::decode_message(&ctx, &mut reader, template)?;
        Ok(Decoded { value, consumed })
    }

    pub fn decode_as(&self, context: &str, bytes: &[u8]) -> Result<Decoded> {
        let template = self
            .template(context)
            .ok_or_else(|| Error::config(context, "no such template"))?;
        let ctx = self.ctx();
        let mut reader = BitReader::new(bytes);
        let (value, consumed) = parser::decode_message(&ctx, &mut reader, template)?;
        Ok(Decoded { value, consumed })
    }

    // Decodes a stream of messages, resyncing on the next start marker
    // after a failure so one corrupt message does not take down the
    // rest of the buffer.
    pub fn decode_all(&self, bytes: &[u8]) -> DecodeAll {
        let ctx = self.ctx();
        let mut reader = BitReader::new(bytes);
        let mut result = DecodeAll::default();
        while !reader.is_eof() {
            let template = match self.templates.select(&mut reader) {
                Ok(template) => template,
                Err(_) => {
                    let next = reader.position() + 1;
                    if next >= bytes.len() {
                        break;
                    }
                    reader.seek(next);
                    if self.templates.find_next(&mut reader).is_none() {
                        break;
                    }
                    continue;
                }
            };
            let offset = reader.position();
            match parser::decode_message(&ctx, &mut reader, template) {
                Ok((value, consumed)) => result.messages.push(StreamDecoded {
                    offset,
                    value,
                    consumed,
                }),
                Err(error) => {
                    result.errors.push((offset, error));
                    reader.seek(offset + 1);
                    if self.templates.find_next(&mut reader).is_none() {
                        break;
                    }
                }
            }
        }
        result
    }

    pub fn encode(&self, obj: &ObjectValue) -> Result<Vec<u8>> {
        let template = self
            .template(obj.context())
            .ok_or_else(|| Error::config(obj.context(), "no such template"))?;
        parser::encode_message(&self.ctx(), template, obj)
    }

    pub fn find_next(&self, reader: &mut BitReader) -> Option<usize> {
        self.templates.find_next(reader)
    }

    fn ctx(&self) -> CoderCtx<'_> {
        CoderCtx {
            coders: &self.coders,
            templates: &self.templates,
            evaluator: &self.evaluator,
            checksums: &self.checksums,
            vars: &self.vars,
            version: self.version.as_ref(),
        }
    }
}
