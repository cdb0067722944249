//! Static, flattened record layouts.
//!
//! Every record type declares its fields once, parent before child, and the
//! position in that list is the field index used by change masks.

use bitmaps::Bitmap;
use log::warn;
use serde::Serialize;

use crate::address::OffsetAddress;
use crate::codec::ScalarKind;

/// Maximum number of flattened fields per record.
pub const MAX_FIELDS: usize = 64;

pub type FieldMask = Bitmap<MAX_FIELDS>;

/// Path of the flag that arms the write path of a record.
pub const WRITE_ENABLE: &str = "write_enable";

/// Prefix of write-intent fields.
pub const OUTPUT_PREFIX: &str = "out";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldKind {
    Structure,
    Scalar(ScalarKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldBinding {
    pub index: usize,
    pub path: &'static str,
    pub kind: FieldKind,
    /// Offset relative to the record base; `None` for structural fields.
    pub offset: Option<OffsetAddress>,
}

impl FieldBinding {
    pub const fn structure(index: usize, path: &'static str) -> Self {
        Self {
            index,
            path,
            kind: FieldKind::Structure,
            offset: None,
        }
    }

    pub const fn flag(index: usize, path: &'static str) -> Self {
        Self {
            index,
            path,
            kind: FieldKind::Scalar(ScalarKind::Bool),
            offset: None,
        }
    }

    pub const fn scalar(index: usize, path: &'static str, kind: ScalarKind, byte: i64) -> Self {
        Self {
            index,
            path,
            kind: FieldKind::Scalar(kind),
            offset: Some(OffsetAddress::bytes(byte)),
        }
    }

    pub const fn bit(index: usize, path: &'static str, byte: i64, bit: u8) -> Self {
        Self {
            index,
            path,
            kind: FieldKind::Scalar(ScalarKind::Bool),
            offset: Some(OffsetAddress::bit(byte, bit)),
        }
    }

    pub fn is_output(&self) -> bool {
        self.path
            .strip_prefix(OUTPUT_PREFIX)
            .map_or(false, |rest| rest.starts_with('.'))
    }

    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self.kind {
            FieldKind::Scalar(kind) => Some(kind),
            FieldKind::Structure => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecordSchema {
    pub type_name: &'static str,
    pub byte_width: usize,
    pub fields: &'static [FieldBinding],
    pub monitor: &'static str,
}

impl RecordSchema {
    pub fn field(&self, index: usize) -> Option<&FieldBinding> {
        self.fields.get(index)
    }

    pub fn find(&self, path: &str) -> Option<&FieldBinding> {
        self.fields.iter().find(|f| f.path == path)
    }

    pub fn is_writable(&self) -> bool {
        self.fields.iter().any(|f| f.is_output())
    }

    /// Mask of the fields selected by this schema's monitor expression.
    pub fn monitored_mask(&self) -> FieldMask {
        monitored_mask(self, &parse_monitor_expression(self.monitor))
    }
}

/// Expands a monitor expression such as `write_enable, out{mode, open_cmd}`
/// into dotted paths. Unbalanced braces are logged and yield what was parsed
/// so far.
pub fn parse_monitor_expression(expression: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut prefixes: Vec<String> = Vec::new();
    let mut token = String::new();

    let push_token = |token: &mut String, prefixes: &[String], paths: &mut Vec<String>| {
        let name = token.trim();
        if !name.is_empty() {
            let mut full = prefixes.join(".");
            if !full.is_empty() {
                full.push('.');
            }
            full.push_str(name);
            paths.push(full);
        }
        token.clear();
    };

    for c in expression.chars() {
        match c {
            ',' => push_token(&mut token, &prefixes, &mut paths),
            '{' => {
                prefixes.push(token.trim().to_string());
                token.clear();
            }
            '}' => {
                push_token(&mut token, &prefixes, &mut paths);
                if prefixes.pop().is_none() {
                    warn!("⚠️  Unbalanced '}}' in monitor expression '{}'", expression);
                    return paths;
                }
            }
            _ => token.push(c),
        }
    }
    push_token(&mut token, &prefixes, &mut paths);

    if !prefixes.is_empty() {
        warn!("⚠️  Unclosed '{{' in monitor expression '{}'", expression);
    }
    paths
}

/// A path selects the field with that exact path and all of its descendants.
pub fn monitored_mask(schema: &RecordSchema, paths: &[String]) -> FieldMask {
    let mut mask = FieldMask::new();
    for field in schema.fields {
        let selected = paths.iter().any(|p| {
            field.path == p
                || field
                    .path
                    .strip_prefix(p.as_str())
                    .map_or(false, |rest| rest.starts_with('.'))
        });
        if selected && field.index < MAX_FIELDS {
            mask.set(field.index, true);
        }
    }
    mask
}

/// Indices of the set bits in `mask`, ascending.
pub fn mask_indices(mask: &FieldMask) -> Vec<usize> {
    let mut indices = Vec::new();
    let mut next = mask.first_index();
    while let Some(index) = next {
        indices.push(index);
        next = mask.next_index(index);
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::factory::RecordKind;

    #[test]
    fn expands_nested_monitor_expression() {
        assert_eq!(
            parse_monitor_expression("write_enable, out{mode, open_cmd}"),
            vec!["write_enable", "out.mode", "out.open_cmd"]
        );
        assert_eq!(
            parse_monitor_expression("a{b{c, d}, e}"),
            vec!["a.b.c", "a.b.d", "a.e"]
        );
        assert!(parse_monitor_expression("").is_empty());
    }

    #[test]
    fn field_indices_match_declaration_order() {
        for kind in RecordKind::ALL {
            let schema = kind.schema();
            assert!(schema.fields.len() <= MAX_FIELDS);
            for (position, field) in schema.fields.iter().enumerate() {
                assert_eq!(field.index, position, "{} field {}", schema.type_name, field.path);
            }
            for field in schema.fields.iter().filter(|f| f.offset.is_some()) {
                let offset = field.offset.unwrap();
                let width = field.scalar_kind().map(|k| k.width()).unwrap_or(0);
                assert!(
                    offset.index() + width <= schema.byte_width,
                    "{} field {} overflows",
                    schema.type_name,
                    field.path
                );
            }
        }
    }

    #[test]
    fn parent_path_selects_descendants() {
        let schema = RecordKind::Valve.schema();
        let mask = monitored_mask(schema, &["out".to_string()]);
        let selected: Vec<_> = mask_indices(&mask)
            .into_iter()
            .map(|i| schema.fields[i].path)
            .collect();
        assert_eq!(
            selected,
            vec!["out", "out.mode", "out.open_cmd", "out.close_cmd", "out.reset"]
        );
    }
}
