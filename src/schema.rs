//! In-process schema decoder.
//!
//! Parses the schema files once with [`protofish`] and renders each record in the protobuf text
//! format. Unlike [`ProtocDecoder`](crate::protoc::ProtocDecoder), all records share the same
//! process, so there is no isolation between them. Panics raised while decoding a record are
//! caught and reported as diagnostics of that record.
//!
//! Imports inside the schema files are not followed. All files that define the types needed by
//! the message have to be listed explicitly; they are located through the import paths.

use protofish::context::{Context, MessageInfo, MessageRef};
use protofish::decode::{FieldValue, MessageValue, PackedArray, UnknownValue, Value};
use snafu::{OptionExt, ResultExt};
use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::Config;
use crate::decoder::*;

/// Decoder holding a parsed schema.
pub struct SchemaDecoder
{
    context: Context,
    message: MessageRef,
}

impl SchemaDecoder
{
    /// Loads the schema files listed in the configuration.
    pub fn load(config: &Config) -> Result<Self, DecoderError>
    {
        let sources = config
            .proto_files
            .iter()
            .map(|file| {
                let path = locate(file, &config.import_paths)?;
                debug!(path = %path.display(), "Reading schema file");
                std::fs::read_to_string(&path).context(SchemaRead { path })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let decoder = Self::from_sources(&sources, &config.message_type)?;
        info!(
            message_type = %config.message_type,
            files = sources.len(),
            "Loaded schema"
        );
        Ok(decoder)
    }

    /// Parses schema sources and selects the message type.
    pub fn from_sources<S: AsRef<str>>(
        sources: &[S],
        message_type: &str,
    ) -> Result<Self, DecoderError>
    {
        let context = Context::parse(sources).context(SchemaParse {})?;

        // Accept the leading dot of a fully qualified reference.
        let name = message_type.trim_start_matches('.');
        let message = context
            .get_message(name)
            .map(|m| m.self_ref)
            .context(UnknownMessageType { name })?;

        Ok(SchemaDecoder { context, message })
    }

    /// Renders a decoded message value.
    pub fn render(&self, value: &MessageValue) -> (String, Vec<String>)
    {
        let mut printer = TextPrinter {
            ctx: &self.context,
            text: String::new(),
            diagnostics: vec![],
            depth: 0,
        };
        printer.message(value);
        (printer.text, printer.diagnostics)
    }
}

impl Decoder for SchemaDecoder
{
    fn decode(&mut self, payload: &[u8]) -> Result<DecodeOutput, DecoderError>
    {
        let message = self.message;
        let context = &self.context;
        let decoded = panic::catch_unwind(AssertUnwindSafe(|| context.decode(message, payload)));
        let value = match decoded {
            Ok(value) => value,
            Err(cause) => {
                let reason = cause
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| cause.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown cause".to_string());
                return Ok(DecodeOutput::failed(format!(
                    "Failed to decode record: {}",
                    reason
                )));
            }
        };

        let (text, diagnostics) = self.render(&value);
        let mut diagnostics = diagnostics.join("\n");
        if !diagnostics.is_empty() {
            diagnostics.push('\n');
        }
        Ok(DecodeOutput {
            success: diagnostics.is_empty(),
            text: text.into(),
            diagnostics: diagnostics.into(),
        })
    }
}

/// Finds a schema file directly or relative to one of the import paths.
fn locate(file: &Path, import_paths: &[PathBuf]) -> Result<PathBuf, DecoderError>
{
    if file.is_file() {
        return Ok(file.to_path_buf());
    }
    if file.is_relative() {
        if let Some(found) = import_paths
            .iter()
            .map(|dir| dir.join(file))
            .find(|p| p.is_file())
        {
            return Ok(found);
        }
    }
    Err(DecoderError::SchemaNotFound {
        path: file.to_path_buf(),
    })
}

struct TextPrinter<'a>
{
    ctx: &'a Context,
    text: String,
    diagnostics: Vec<String>,
    depth: usize,
}

impl<'a> TextPrinter<'a>
{
    fn message(&mut self, value: &MessageValue)
    {
        let ctx = self.ctx;
        let info = ctx.resolve_message(value.msg_ref);
        for field in &value.fields {
            self.field(info, field);
        }

        if let Some(garbage) = &value.garbage {
            self.diagnostics.push(format!(
                "{}: {} bytes of trailing garbage",
                info.full_name,
                garbage.len()
            ));
        }
    }

    fn field(&mut self, info: &MessageInfo, field: &FieldValue)
    {
        // Values that did not match the schema are printed by field number.
        let name = match (&field.value, info.get_field(field.number)) {
            (Value::Unknown(..), _) | (_, None) => field.number.to_string(),
            (_, Some(f)) => f.name.clone(),
        };

        match &field.value {
            Value::Message(inner) => {
                self.line(&format!("{} {{", name));
                self.depth += 1;
                self.message(inner);
                self.depth -= 1;
                self.line("}");
            }
            Value::Packed(array) => {
                for item in packed_items(array) {
                    self.line(&format!("{}: {}", name, item));
                }
            }
            Value::Incomplete(_, bytes) => {
                self.diagnostics.push(format!(
                    "{}.{}: incomplete value, {} bytes left",
                    info.full_name,
                    name,
                    bytes.len()
                ));
            }
            Value::Unknown(UnknownValue::Invalid(_, bytes)) => {
                self.diagnostics.push(format!(
                    "{}.{}: invalid wire type, {} bytes skipped",
                    info.full_name,
                    name,
                    bytes.len()
                ));
            }
            other => {
                let scalar = self.scalar(other);
                self.line(&format!("{}: {}", name, scalar));
            }
        }
    }

    fn scalar(&self, value: &Value) -> String
    {
        match value {
            Value::Double(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Int32(v) => v.to_string(),
            Value::Int64(v) => v.to_string(),
            Value::UInt32(v) => v.to_string(),
            Value::UInt64(v) => v.to_string(),
            Value::SInt32(v) => v.to_string(),
            Value::SInt64(v) => v.to_string(),
            Value::Fixed32(v) => v.to_string(),
            Value::Fixed64(v) => v.to_string(),
            Value::SFixed32(v) => v.to_string(),
            Value::SFixed64(v) => v.to_string(),
            Value::Bool(v) => v.to_string(),
            Value::String(s) => quote(s.as_bytes()),
            Value::Bytes(b) => quote(b),
            Value::Enum(e) => match self.ctx.resolve_enum(e.enum_ref).get_field_by_value(e.value) {
                Some(field) => field.name.clone(),
                None => e.value.to_string(),
            },
            Value::Unknown(UnknownValue::Varint(v)) => v.to_string(),
            Value::Unknown(UnknownValue::Fixed64(v)) => format!("0x{:016x}", v),
            Value::Unknown(UnknownValue::Fixed32(v)) => format!("0x{:08x}", v),
            Value::Unknown(UnknownValue::VariableLength(b)) => quote(b),
            Value::Unknown(UnknownValue::Invalid(_, b)) | Value::Incomplete(_, b) => quote(b),
            Value::Message(..) | Value::Packed(..) => String::new(),
        }
    }

    fn line(&mut self, content: &str)
    {
        for _ in 0..self.depth {
            self.text.push_str("  ");
        }
        self.text.push_str(content);
        self.text.push('\n');
    }
}

fn packed_items(array: &PackedArray) -> Vec<String>
{
    fn items<T: ToString>(values: &[T]) -> Vec<String>
    {
        values.iter().map(T::to_string).collect()
    }

    match array {
        PackedArray::Double(v) => items(v),
        PackedArray::Float(v) => items(v),
        PackedArray::Int32(v) => items(v),
        PackedArray::Int64(v) => items(v),
        PackedArray::UInt32(v) => items(v),
        PackedArray::UInt64(v) => items(v),
        PackedArray::SInt32(v) => items(v),
        PackedArray::SInt64(v) => items(v),
        PackedArray::Fixed32(v) => items(v),
        PackedArray::Fixed64(v) => items(v),
        PackedArray::SFixed32(v) => items(v),
        PackedArray::SFixed64(v) => items(v),
        PackedArray::Bool(v) => items(v),
    }
}

/// Quotes bytes as a text format string literal.
fn quote(bytes: &[u8]) -> String
{
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for &b in bytes {
        match b {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b'"' => out.push_str("\\\""),
            b'\'' => out.push_str("\\'"),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{:03o}", b);
            }
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod test
{
    use super::*;

    const SCHEMA: &str = r#"
        syntax = "proto3";
        package Fish;

        enum Kind { UNKNOWN = 0; PERCH = 1; PIKE = 2; }

        message Location {
            string lake = 1;
            sint32 depth = 2;
        }

        message Catch {
            string name = 1;
            Kind kind = 2;
            Location location = 3;
            repeated int32 weights = 4;
            bytes tag = 5;
        }
    "#;

    fn decoder() -> SchemaDecoder
    {
        SchemaDecoder::from_sources(&[SCHEMA], "Fish.Catch").unwrap()
    }

    #[test]
    fn render_message()
    {
        let payload = b"\x0a\x05Perch\x10\x01\x1a\x08\x0a\x04Oulu\x10\x04\x22\x02\x01\x02\x2a\x02\x00\xff";
        let output = decoder().decode(payload).unwrap();

        assert!(output.success);
        assert!(output.diagnostics.is_empty());
        assert_eq!(
            std::str::from_utf8(&output.text).unwrap(),
            concat!(
                "name: \"Perch\"\n",
                "kind: PERCH\n",
                "location {\n",
                "  lake: \"Oulu\"\n",
                "  depth: 2\n",
                "}\n",
                "weights: 1\n",
                "weights: 2\n",
                "tag: \"\\000\\377\"\n",
            )
        );
    }

    #[test]
    fn unknown_fields_use_numbers()
    {
        let output = decoder().decode(b"\x08\x01\x78\x96\x01").unwrap();
        assert!(!output.is_failure());
        assert_eq!(
            std::str::from_utf8(&output.text).unwrap(),
            "1: 1\n15: 150\n"
        );
    }

    #[test]
    fn incomplete_record_is_a_failure()
    {
        let output = decoder().decode(b"\x0a\x10Pe").unwrap();
        assert!(output.is_failure());
        assert!(std::str::from_utf8(&output.diagnostics)
            .unwrap()
            .contains("incomplete value"));
    }

    #[test]
    fn unknown_message_type()
    {
        match SchemaDecoder::from_sources(&[SCHEMA], "Fish.Whale") {
            Err(DecoderError::UnknownMessageType { name }) => assert_eq!(name, "Fish.Whale"),
            Err(e) => panic!("Unexpected error: {}", e),
            Ok(_) => panic!("Whale is not a fish"),
        }
    }

    #[test]
    fn leading_dot_is_accepted()
    {
        assert!(SchemaDecoder::from_sources(&[SCHEMA], ".Fish.Catch").is_ok());
    }

    #[test]
    fn missing_schema_file()
    {
        let result = locate(Path::new("no/such/file.proto"), &[PathBuf::from("nowhere")]);
        assert!(matches!(result, Err(DecoderError::SchemaNotFound { .. })));
    }

    #[test]
    fn quoting()
    {
        assert_eq!(quote(b"a\"b\\\n\x01"), r#""a\"b\\\n\001""#);
    }
}
