use std::collections::HashMap;
use std::sync::Arc;

use derive_getters::Getters;
use log::debug;
use semver::Version;

use crate::bits::{BitOrder, ByteOrder};
use crate::charset::{Charset, DEFAULT_CHARSET};
use crate::checksum::ChecksumRegistry;
use crate::convert::{Converter, ConverterRegistry, Validator, ValidatorRegistry};
use crate::expr::{self, Expr};
use crate::result::{Error, Result};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    Integer,
    Float,
    Bits,
    StringFixed,
    StringTerminated,
    ArrayPrimitive,
    ArrayObject,
    Object,
    Checksum,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizeExpr {
    Const(usize),
    Expr(String),
}

impl From<usize> for SizeExpr {
    fn from(size: usize) -> Self {
        SizeExpr::Const(size)
    }
}

impl From<&str> for SizeExpr {
    fn from(source: &str) -> Self {
        SizeExpr::Expr(source.to_owned())
    }
}

#[derive(Debug, Clone)]
pub enum BindingDescriptor {
    Integer {
        bits: u32,
        byte_order: ByteOrder,
        signed: bool,
    },
    Float {
        bits: u32,
        byte_order: ByteOrder,
    },
    Bits {
        size: SizeExpr,
        bit_order: BitOrder,
    },
    StringFixed {
        size: SizeExpr,
        charset: String,
    },
    StringTerminated {
        terminator: u8,
        consume: bool,
        charset: String,
    },
    ArrayPrimitive {
        size: SizeExpr,
        element: Box<BindingDescriptor>,
    },
    ArrayObject {
        size: SizeExpr,
        element: Option<String>,
        choice: Option<Choice>,
    },
    Object {
        type_name: Option<String>,
        choice: Option<Choice>,
    },
    Checksum {
        bits: u32,
        byte_order: ByteOrder,
        skip_start: usize,
        skip_end: usize,
        algorithm: String,
        start_value: u64,
    },
}

impl BindingDescriptor {
    pub fn uint(bits: u32, byte_order: ByteOrder) -> Self {
        BindingDescriptor::Integer {
            bits,
            byte_order,
            signed: false,
        }
    }

    pub fn int(bits: u32, byte_order: ByteOrder) -> Self {
        BindingDescriptor::Integer {
            bits,
            byte_order,
            signed: true,
        }
    }

    pub fn float32(byte_order: ByteOrder) -> Self {
        BindingDescriptor::Float { bits: 32, byte_order }
    }

    pub fn float64(byte_order: ByteOrder) -> Self {
        BindingDescriptor::Float { bits: 64, byte_order }
    }

    pub fn bit_set(size: impl Into<SizeExpr>, bit_order: BitOrder) -> Self {
        BindingDescriptor::Bits {
            size: size.into(),
            bit_order,
        }
    }

    pub fn text(size: impl Into<SizeExpr>) -> Self {
        BindingDescriptor::StringFixed {
            size: size.into(),
            charset: DEFAULT_CHARSET.to_owned(),
        }
    }

    pub fn text_until(terminator: u8, consume: bool) -> Self {
        BindingDescriptor::StringTerminated {
            terminator,
            consume,
            charset: DEFAULT_CHARSET.to_owned(),
        }
    }

    pub fn array(size: impl Into<SizeExpr>, element: BindingDescriptor) -> Self {
        BindingDescriptor::ArrayPrimitive {
            size: size.into(),
            element: Box::new(element),
        }
    }

    pub fn objects(size: impl Into<SizeExpr>, type_name: &str) -> Self {
        BindingDescriptor::ArrayObject {
            size: size.into(),
            element: Some(type_name.to_owned()),
            choice: None,
        }
    }

    pub fn objects_with(size: impl Into<SizeExpr>, choice: Choice) -> Self {
        BindingDescriptor::ArrayObject {
            size: size.into(),
            element: None,
            choice: Some(choice),
        }
    }

    pub fn object(type_name: &str) -> Self {
        BindingDescriptor::Object {
            type_name: Some(type_name.to_owned()),
            choice: None,
        }
    }

    pub fn object_with(choice: Choice) -> Self {
        BindingDescriptor::Object {
            type_name: None,
            choice: Some(choice),
        }
    }

    pub fn with_charset(mut self, name: &str) -> Self {
        match &mut self {
            BindingDescriptor::StringFixed { charset, .. }
            | BindingDescriptor::StringTerminated { charset, .. } => *charset = name.to_owned(),
            _ => {}
        }
        self
    }

    pub fn kind(&self) -> DescriptorKind {
        match self {
            BindingDescriptor::Integer { .. } => DescriptorKind::Integer,
            BindingDescriptor::Float { .. } => DescriptorKind::Float,
            BindingDescriptor::Bits { .. } => DescriptorKind::Bits,
            BindingDescriptor::StringFixed { .. } => DescriptorKind::StringFixed,
            BindingDescriptor::StringTerminated { .. } => DescriptorKind::StringTerminated,
            BindingDescriptor::ArrayPrimitive { .. } => DescriptorKind::ArrayPrimitive,
            BindingDescriptor::ArrayObject { .. } => DescriptorKind::ArrayObject,
            BindingDescriptor::Object { .. } => DescriptorKind::Object,
            BindingDescriptor::Checksum { .. } => DescriptorKind::Checksum,
        }
    }

    fn describe(&self) -> String {
        match self {
            BindingDescriptor::Integer { bits, byte_order, signed } => {
                format!("{}int({}, {:?})", if *signed { "" } else { "u" }, bits, byte_order)
            }
            BindingDescriptor::Float { bits, byte_order } => format!("float({}, {:?})", bits, byte_order),
            BindingDescriptor::Bits { size, bit_order } => format!("bits({:?}, {:?})", size, bit_order),
            BindingDescriptor::StringFixed { size, charset } => format!("text({:?}, {})", size, charset),
            BindingDescriptor::StringTerminated { terminator, consume, charset } => {
                format!("text_until(0x{:02x}, consume={}, {})", terminator, consume, charset)
            }
            BindingDescriptor::ArrayPrimitive { size, element } => {
                format!("array({:?}, {})", size, element.describe())
            }
            BindingDescriptor::ArrayObject { size, element, .. } => {
                format!("objects({:?}, {})", size, element.as_deref().unwrap_or("<choice>"))
            }
            BindingDescriptor::Object { type_name, .. } => {
                format!("object({})", type_name.as_deref().unwrap_or("<choice>"))
            }
            BindingDescriptor::Checksum { bits, algorithm, skip_start, skip_end, .. } => {
                format!("checksum({}, {}, skip {}..{})", bits, algorithm, skip_start, skip_end)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoicePrefix {
    None,
    Bits(u32),
    Text { terminator: u8 },
}

#[derive(Debug, Clone)]
pub struct Alternative {
    pub(crate) condition: String,
    pub(crate) prefix: Option<u64>,
    pub(crate) type_name: String,
}

#[derive(Debug, Clone)]
pub struct Choice {
    pub(crate) prefix: ChoicePrefix,
    pub(crate) alternatives: Vec<Alternative>,
    pub(crate) default: Option<String>,
}

impl Choice {
    pub fn by_prefix(prefix_bits: u32) -> Self {
        Self {
            prefix: ChoicePrefix::Bits(prefix_bits),
            alternatives: vec![],
            default: None,
        }
    }

    pub fn by_condition() -> Self {
        Self {
            prefix: ChoicePrefix::None,
            alternatives: vec![],
            default: None,
        }
    }

    pub fn by_text_prefix(terminator: u8) -> Self {
        Self {
            prefix: ChoicePrefix::Text { terminator },
            alternatives: vec![],
            default: None,
        }
    }

    pub fn alternative(mut self, condition: &str, type_name: &str) -> Self {
        self.alternatives.push(Alternative {
            condition: condition.to_owned(),
            prefix: None,
            type_name: type_name.to_owned(),
        });
        self
    }

    pub fn alternative_prefixed(mut self, prefix: u64, condition: &str, type_name: &str) -> Self {
        self.alternatives.push(Alternative {
            condition: condition.to_owned(),
            prefix: Some(prefix),
            type_name: type_name.to_owned(),
        });
        self
    }

    pub fn with_default(mut self, type_name: &str) -> Self {
        self.default = Some(type_name.to_owned());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipAmount {
    Bits(u32),
    UntilTerminator { terminator: u8 },
}

#[derive(Debug, Clone)]
pub struct SkipDef {
    pub(crate) amount: SkipAmount,
    pub(crate) condition: Option<String>,
}

impl SkipDef {
    pub fn bits(count: u32) -> Self {
        Self {
            amount: SkipAmount::Bits(count),
            condition: None,
        }
    }

    pub fn until(terminator: u8) -> Self {
        Self {
            amount: SkipAmount::UntilTerminator { terminator },
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: &str) -> Self {
        self.condition = Some(condition.to_owned());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigSpec {
    pub(crate) min_value: Option<Value>,
    pub(crate) max_value: Option<Value>,
    pub(crate) default_value: Option<Value>,
    pub(crate) pattern: Option<String>,
    pub(crate) enumeration: Option<Vec<Value>>,
}

impl ConfigSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min(mut self, value: impl Into<Value>) -> Self {
        self.min_value = Some(value.into());
        self
    }

    pub fn with_max(mut self, value: impl Into<Value>) -> Self {
        self.max_value = Some(value.into());
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_owned());
        self
    }

    pub fn with_enumeration(mut self, values: Vec<Value>) -> Self {
        self.enumeration = Some(values);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Header {
    start: Vec<String>,
    end: Option<String>,
    charset: String,
    min_protocol: Option<String>,
    max_protocol: Option<String>,
}

impl Header {
    pub fn new(start: &[&str]) -> Self {
        Self {
            start: start.iter().map(|s| (*s).to_owned()).collect(),
            end: None,
            charset: DEFAULT_CHARSET.to_owned(),
            min_protocol: None,
            max_protocol: None,
        }
    }

    pub fn with_end(mut self, end: &str) -> Self {
        self.end = Some(end.to_owned());
        self
    }

    pub fn with_charset(mut self, charset: &str) -> Self {
        self.charset = charset.to_owned();
        self
    }

    pub fn with_min_protocol(mut self, version: &str) -> Self {
        self.min_protocol = Some(version.to_owned());
        self
    }

    pub fn with_max_protocol(mut self, version: &str) -> Self {
        self.max_protocol = Some(version.to_owned());
        self
    }
}

#[derive(Debug)]
pub struct FieldDef {
    name: String,
    bind: BindingDescriptor,
    skips: Vec<SkipDef>,
    condition: Option<String>,
    converter: Option<String>,
    validator: Option<String>,
    min_protocol: Option<String>,
    max_protocol: Option<String>,
    config: Option<ConfigSpec>,
}

impl FieldDef {
    pub fn new(name: &str, bind: BindingDescriptor) -> Self {
        Self {
            name: name.to_owned(),
            bind,
            skips: vec![],
            condition: None,
            converter: None,
            validator: None,
            min_protocol: None,
            max_protocol: None,
            config: None,
        }
    }

    pub fn with_condition(mut self, condition: &str) -> Self {
        self.condition = Some(condition.to_owned());
        self
    }

    pub fn with_skip(mut self, skip: SkipDef) -> Self {
        self.skips.push(skip);
        self
    }

    pub fn with_converter(mut self, id: &str) -> Self {
        self.converter = Some(id.to_owned());
        self
    }

    pub fn with_validator(mut self, id: &str) -> Self {
        self.validator = Some(id.to_owned());
        self
    }

    pub fn with_min_protocol(mut self, version: &str) -> Self {
        self.min_protocol = Some(version.to_owned());
        self
    }

    pub fn with_max_protocol(mut self, version: &str) -> Self {
        self.max_protocol = Some(version.to_owned());
        self
    }

    pub fn with_config(mut self, config: ConfigSpec) -> Self {
        self.config = Some(config);
        self
    }
}

#[derive(Debug, Default)]
pub struct TemplateBuilder {
    context: String,
    message: bool,
    header: Option<Header>,
    fields: Vec<FieldDef>,
    evaluated: Vec<(String, String)>,
}

impl TemplateBuilder {
    pub fn message(context: &str) -> Self {
        Self {
            context: context.to_owned(),
            message: true,
            ..Default::default()
        }
    }

    pub fn structure(context: &str) -> Self {
        Self {
            context: context.to_owned(),
            message: false,
            ..Default::default()
        }
    }

    pub fn header(&mut self, header: Header) -> &mut Self {
        self.header = Some(header);
        self
    }

    pub fn field(&mut self, def: FieldDef) -> &mut Self {
        self.fields.push(def);
        self
    }

    pub fn evaluated(&mut self, name: &str, expression: &str) -> &mut Self {
        self.evaluated.push((name.to_owned(), expression.to_owned()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct CompiledHeader {
    pub(crate) start: Vec<Vec<u8>>,
    pub(crate) start_text: Vec<String>,
    pub(crate) end: Option<Vec<u8>>,
    pub(crate) charset: String,
    pub(crate) min_version: Option<Version>,
    pub(crate) max_version: Option<Version>,
}

#[derive(Clone)]
pub struct FieldPlan {
    pub(crate) name: String,
    pub(crate) bind: BindingDescriptor,
    pub(crate) skips: Vec<SkipDef>,
    pub(crate) condition: Option<String>,
    pub(crate) converter: Option<Arc<dyn Converter>>,
    pub(crate) validator: Option<Arc<dyn Validator>>,
    pub(crate) min_version: Option<Version>,
    pub(crate) max_version: Option<Version>,
}

impl FieldPlan {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bind(&self) -> &BindingDescriptor {
        &self.bind
    }

    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }
}

impl std::fmt::Debug for FieldPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldPlan")
            .field("name", &self.name)
            .field("bind", &self.bind)
            .field("condition", &self.condition)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct EvaluatedField {
    pub(crate) name: String,
    pub(crate) expression: String,
}

#[derive(Debug, Getters)]
pub struct Template {
    context: String,
    #[getter(skip)]
    header: Option<CompiledHeader>,
    fields: Vec<FieldPlan>,
    evaluated: Vec<EvaluatedField>,
    checksum: Option<usize>,
    #[getter(skip)]
    exprs: HashMap<String, Expr>,
    version_boundaries: Vec<Version>,
}

impl Template {
    pub(crate) fn header(&self) -> Option<&CompiledHeader> {
        self.header.as_ref()
    }

    pub(crate) fn expr(&self, source: &str) -> Result<&Expr> {
        self.exprs
            .get(source)
            .ok_or_else(|| Error::Value(format!("uncompiled expression `{}`", source)))
    }

    pub(crate) fn charset(&self) -> Result<Charset> {
        match &self.header {
            Some(header) => Charset::lookup(&header.charset),
            None => Ok(Charset::default()),
        }
    }

    pub fn is_message(&self) -> bool {
        self.header.is_some()
    }

    pub fn describe(&self) -> String {
        let mut out = String::new();
        match &self.header {
            Some(header) => {
                out.push_str(&format!(
                    "message {} (start {:?}, charset {})\n",
                    self.context, header.start_text, header.charset
                ));
            }
            None => out.push_str(&format!("structure {}\n", self.context)),
        }
        for field in &self.fields {
            out.push_str(&format!("  {}: {}", field.name, field.bind.describe()));
            if let Some(condition) = &field.condition {
                out.push_str(&format!(" if `{}`", condition));
            }
            out.push('\n');
        }
        for evaluated in &self.evaluated {
            out.push_str(&format!("  {} = `{}`\n", evaluated.name, evaluated.expression));
        }
        out
    }
}

pub(crate) fn version_admits(
    active: Option<&Version>,
    min: Option<&Version>,
    max: Option<&Version>,
) -> bool {
    let Some(active) = active else { return true };
    if let Some(min) = min {
        if active < min {
            return false;
        }
    }
    if let Some(max) = max {
        if active > max {
            return false;
        }
    }
    true
}

struct Compiler<'a> {
    context: String,
    converters: &'a ConverterRegistry,
    validators: &'a ValidatorRegistry,
    checksums: &'a ChecksumRegistry,
    exprs: HashMap<String, Expr>,
    boundaries: Vec<Version>,
}

pub(crate) fn compile(
    builder: TemplateBuilder,
    converters: &ConverterRegistry,
    validators: &ValidatorRegistry,
    checksums: &ChecksumRegistry,
) -> Result<Template> {
    if builder.context.is_empty() {
        return Err(Error::config("template", "empty context key"));
    }
    let mut compiler = Compiler {
        context: builder.context.clone(),
        converters,
        validators,
        checksums,
        exprs: HashMap::new(),
        boundaries: vec![],
    };

    let header = match (builder.message, builder.header) {
        (true, None) => {
            return Err(compiler.fail("", "message templates require a header descriptor"))
        }
        (false, Some(_)) => {
            return Err(compiler.fail("", "structure templates carry no header descriptor"))
        }
        (false, None) => None,
        (true, Some(header)) => Some(compiler.compile_header(header)?),
    };

    let mut fields = Vec::with_capacity(builder.fields.len());
    let mut checksum = None;
    for (index, def) in builder.fields.into_iter().enumerate() {
        if fields.iter().any(|f: &FieldPlan| f.name == def.name) {
            return Err(compiler.fail(&def.name, "duplicate field name"));
        }
        if def.bind.kind() == DescriptorKind::Checksum {
            if header.is_none() {
                return Err(compiler.fail(&def.name, "checksum fields require a message template"));
            }
            if checksum.is_some() {
                return Err(compiler.fail(&def.name, "more than one checksum field"));
            }
            checksum = Some(index);
        }
        fields.push(compiler.compile_field(def)?);
    }
    if let Some(index) = checksum {
        if index != fields.len() - 1 {
            return Err(compiler.fail(
                &fields[index].name,
                "the checksum must be the last physical field",
            ));
        }
    }

    let mut evaluated = Vec::with_capacity(builder.evaluated.len());
    for (name, expression) in builder.evaluated {
        compiler.intern(&name, &expression)?;
        evaluated.push(EvaluatedField { name, expression });
    }

    compiler.boundaries.sort();
    compiler.boundaries.dedup();

    debug!(
        "compiled template {} ({} fields, {} evaluated)",
        compiler.context,
        fields.len(),
        evaluated.len()
    );
    Ok(Template {
        context: compiler.context,
        header,
        fields,
        evaluated,
        checksum,
        exprs: compiler.exprs,
        version_boundaries: compiler.boundaries,
    })
}

impl<'a> Compiler<'a> {
    fn fail(&self, field: &str, reason: impl std::fmt::Display) -> Error {
        let context = if field.is_empty() {
            self.context.clone()
        } else {
            format!("{}.{}", self.context, field)
        };
        Error::config(context, reason)
    }

    fn intern(&mut self, field: &str, source: &str) -> Result<()> {
        if self.exprs.contains_key(source) {
            return Ok(());
        }
        let parsed = expr::parse(source)
            .map_err(|e| self.fail(field, format!("malformed expression `{}`: {}", source, e)))?;
        self.exprs.insert(source.to_owned(), parsed);
        Ok(())
    }

    fn intern_size(&mut self, field: &str, size: &SizeExpr) -> Result<()> {
        match size {
            SizeExpr::Const(0) => Err(self.fail(field, "size must be positive")),
            SizeExpr::Const(_) => Ok(()),
            SizeExpr::Expr(source) => self.intern(field, source),
        }
    }

    fn parse_version(&self, field: &str, version: &str) -> Result<Version> {
        Version::parse(version)
            .map_err(|e| self.fail(field, format!("bad protocol version `{}`: {}", version, e)))
    }

    fn compile_header(&mut self, header: Header) -> Result<CompiledHeader> {
        if header.start.is_empty() || header.start.iter().any(|s| s.is_empty()) {
            return Err(self.fail("", "header start markers must be non-empty"));
        }
        let charset = Charset::lookup(&header.charset).map_err(|e| self.fail("", e))?;
        let start = header
            .start
            .iter()
            .map(|s| charset.encode(s))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| self.fail("", e))?;
        let end = header
            .end
            .as_deref()
            .map(|s| charset.encode(s))
            .transpose()
            .map_err(|e| self.fail("", e))?;
        let min_version = header
            .min_protocol
            .as_deref()
            .map(|v| self.parse_version("", v))
            .transpose()?;
        let max_version = header
            .max_protocol
            .as_deref()
            .map(|v| self.parse_version("", v))
            .transpose()?;
        if let (Some(min), Some(max)) = (&min_version, &max_version) {
            if min > max {
                return Err(self.fail("", "header protocol range is inverted"));
            }
        }
        self.boundaries.extend(min_version.iter().cloned());
        self.boundaries.extend(max_version.iter().cloned());
        Ok(CompiledHeader {
            start,
            start_text: header.start,
            end,
            charset: header.charset,
            min_version,
            max_version,
        })
    }

    fn compile_field(&mut self, def: FieldDef) -> Result<FieldPlan> {
        self.check_descriptor(&def.name, &def.bind, false)?;
        for skip in &def.skips {
            if let Some(condition) = &skip.condition {
                self.intern(&def.name, condition)?;
            }
            if let SkipAmount::Bits(0) = skip.amount {
                return Err(self.fail(&def.name, "skip of zero bits"));
            }
        }
        if let Some(condition) = &def.condition {
            self.intern(&def.name, condition)?;
        }
        if let Some(config) = &def.config {
            self.check_config(&def.name, &def.bind, config)?;
        }

        let converter = def
            .converter
            .as_deref()
            .map(|id| self.converters.resolve(id))
            .transpose()
            .map_err(|e| self.fail(&def.name, e))?;
        let validator = def
            .validator
            .as_deref()
            .map(|id| self.validators.resolve(id))
            .transpose()
            .map_err(|e| self.fail(&def.name, e))?;

        let min_version = def
            .min_protocol
            .as_deref()
            .map(|v| self.parse_version(&def.name, v))
            .transpose()?;
        let max_version = def
            .max_protocol
            .as_deref()
            .map(|v| self.parse_version(&def.name, v))
            .transpose()?;
        if let (Some(min), Some(max)) = (&min_version, &max_version) {
            if min > max {
                return Err(self.fail(&def.name, "field protocol range is inverted"));
            }
        }
        self.boundaries.extend(min_version.iter().cloned());
        self.boundaries.extend(max_version.iter().cloned());

        Ok(FieldPlan {
            name: def.name,
            bind: def.bind,
            skips: def.skips,
            condition: def.condition,
            converter,
            validator,
            min_version,
            max_version,
        })
    }

    fn check_descriptor(&mut self, field: &str, bind: &BindingDescriptor, nested: bool) -> Result<()> {
        match bind {
            BindingDescriptor::Integer { bits, .. } => {
                if *bits == 0 {
                    return Err(self.fail(field, "integer width of zero bits"));
                }
            }
            BindingDescriptor::Float { bits, .. } => {
                if *bits != 32 && *bits != 64 {
                    return Err(self.fail(field, format!("float width must be 32 or 64, got {}", bits)));
                }
            }
            BindingDescriptor::Bits { size, .. } => self.intern_size(field, size)?,
            BindingDescriptor::StringFixed { size, charset } => {
                self.intern_size(field, size)?;
                Charset::lookup(charset).map_err(|e| self.fail(field, e))?;
            }
            BindingDescriptor::StringTerminated { charset, .. } => {
                Charset::lookup(charset).map_err(|e| self.fail(field, e))?;
            }
            BindingDescriptor::ArrayPrimitive { size, element } => {
                if nested {
                    return Err(self.fail(field, "arrays cannot nest inside array elements"));
                }
                self.intern_size(field, size)?;
                match element.kind() {
                    DescriptorKind::Integer
                    | DescriptorKind::Float
                    | DescriptorKind::Bits
                    | DescriptorKind::StringFixed
                    | DescriptorKind::StringTerminated => {}
                    kind => {
                        return Err(self.fail(
                            field,
                            format!("{:?} elements are not primitive; use an object array", kind),
                        ))
                    }
                }
                self.check_descriptor(field, element, true)?;
            }
            BindingDescriptor::ArrayObject { size, element, choice } => {
                if nested {
                    return Err(self.fail(field, "arrays cannot nest inside array elements"));
                }
                self.intern_size(field, size)?;
                if element.is_none() && choice.is_none() {
                    return Err(self.fail(field, "object arrays need an element type or a choice"));
                }
                if let Some(choice) = choice {
                    self.check_choice(field, choice)?;
                }
            }
            BindingDescriptor::Object { type_name, choice } => {
                if type_name.is_none() && choice.is_none() {
                    return Err(self.fail(field, "object fields need a type or a choice"));
                }
                if let Some(choice) = choice {
                    self.check_choice(field, choice)?;
                }
            }
            BindingDescriptor::Checksum {
                bits, algorithm, ..
            } => {
                if nested {
                    return Err(self.fail(field, "checksums cannot be array elements"));
                }
                if *bits == 0 || *bits > 64 || *bits % 8 != 0 {
                    return Err(self.fail(field, "checksum width must be a whole number of bytes"));
                }
                self.checksums
                    .get(algorithm)
                    .map_err(|e| self.fail(field, e))?;
            }
        }
        Ok(())
    }

    fn check_choice(&mut self, field: &str, choice: &Choice) -> Result<()> {
        if choice.alternatives.is_empty() && choice.default.is_none() {
            return Err(self.fail(field, "choice without alternatives or a default"));
        }
        if let ChoicePrefix::Bits(bits) = choice.prefix {
            if bits == 0 || bits > 32 {
                return Err(self.fail(field, "choice prefix must be 1..=32 bits"));
            }
        }
        for alternative in &choice.alternatives {
            if alternative.type_name.is_empty() {
                return Err(self.fail(field, "choice alternative without a type"));
            }
            self.intern(field, &alternative.condition)?;
        }
        Ok(())
    }

    // Value-shape checks for configuration descriptors: range and
    // enumeration constraints must be coherent before a template is
    // accepted.
    fn check_config(&self, field: &str, bind: &BindingDescriptor, config: &ConfigSpec) -> Result<()> {
        let is_array = matches!(
            bind.kind(),
            DescriptorKind::ArrayPrimitive | DescriptorKind::ArrayObject
        );
        let scalar_bound = config.min_value.is_some() || config.max_value.is_some() || config.pattern.is_some();
        if is_array && scalar_bound {
            return Err(self.fail(field, "min/max/pattern cannot apply to array fields"));
        }
        if config.enumeration.is_some() && scalar_bound {
            return Err(self.fail(field, "enumeration excludes min/max/pattern"));
        }

        if let (Some(min), Some(max)) = (&config.min_value, &config.max_value) {
            match (min, max) {
                (Value::Int(min), Value::Int(max)) if min > max => {
                    return Err(self.fail(field, "min value above max value"))
                }
                (Value::Int(_), Value::Int(_)) => {}
                _ => return Err(self.fail(field, "min/max must be integers")),
            }
        }
        if let Some(Value::Int(default)) = &config.default_value {
            if let Some(Value::Int(min)) = &config.min_value {
                if default < min {
                    return Err(self.fail(field, "default below min value"));
                }
            }
            if let Some(Value::Int(max)) = &config.max_value {
                if default > max {
                    return Err(self.fail(field, "default above max value"));
                }
            }
        }
        if let Some(pattern) = &config.pattern {
            let regex = regex::Regex::new(pattern)
                .map_err(|e| self.fail(field, format!("bad pattern: {}", e)))?;
            if !matches!(
                bind.kind(),
                DescriptorKind::StringFixed | DescriptorKind::StringTerminated
            ) {
                return Err(self.fail(field, "patterns only apply to string fields"));
            }
            if let Some(Value::Str(default)) = &config.default_value {
                if !regex.is_match(default) {
                    return Err(self.fail(field, "default does not match the pattern"));
                }
            }
        }
        if let Some(enumeration) = &config.enumeration {
            if enumeration.is_empty() {
                return Err(self.fail(field, "empty enumeration"));
            }
            let kind = enumeration[0].kind();
            if enumeration.iter().any(|v| v.kind() != kind) {
                return Err(self.fail(field, "mixed-type enumeration"));
            }
            if let Some(default) = &config.default_value {
                if !enumeration.contains(default) {
                    return Err(self.fail(field, "default not part of the enumeration"));
                }
            }
        }
        Ok(())
    }
}
