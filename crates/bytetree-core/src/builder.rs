//! Descriptor builders.
//!
//! Free functions create a [`DescriptorBuilder`] per field kind; chained
//! methods fill in the optional entries; [`DescriptorBuilder::build`]
//! normalizes the result into a shared [`DescRef`]. Struct builders compute
//! field offsets and the total size from fixed field sizes, folding `pad`
//! entries into the offsets. Bit struct builders do the same in bits.
//!
//! ```
//! use bytetree_core::builder::{field, pad, struct_desc};
//! use bytetree_core::field_types::{UINT16, UINT32};
//!
//! let header = struct_desc("header", [field(&UINT16, "a"), pad(2), field(&UINT32, "b")])
//!     .build()?;
//! assert_eq!(header.attr_offs, [0, 4]);
//! assert_eq!(header.fixed_size(), Some(8));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::sync::Arc;

use bytetree_common::Endian;

use crate::descriptor::{Case, DescRef, Descriptor, EnumOption, FieldContext, Meta, StreamCodec};
use crate::field_type::{FieldType, Kind};
use crate::field_types;
use crate::{CaseKey, Error, Result, Value};

/// Chaining builder for one descriptor and its children.
#[must_use]
#[derive(Clone)]
pub struct DescriptorBuilder {
    desc: Descriptor,
    entries: Vec<DescriptorBuilder>,
    cases: Vec<(CaseKey, DescriptorBuilder)>,
    default_case: Option<Box<DescriptorBuilder>>,
    sub_struct: Option<Box<DescriptorBuilder>>,
    steptree: Option<Box<DescriptorBuilder>>,
    endian: Option<Endian>,
}

impl DescriptorBuilder {
    fn new(field_type: &'static FieldType, name: impl Into<String>) -> Self {
        Self {
            desc: Descriptor::new(field_type, name),
            entries: Vec::new(),
            cases: Vec::new(),
            default_case: None,
            sub_struct: None,
            steptree: None,
            endian: None,
        }
    }

    /// Set `SIZE`: a literal, a dotted path, or a [`Meta::func`].
    pub fn size(mut self, size: impl Into<Meta>) -> Self {
        self.desc.size = Some(size.into());
        self
    }

    /// Set `POINTER`.
    pub fn pointer(mut self, pointer: impl Into<Meta>) -> Self {
        self.desc.pointer = Some(pointer.into());
        self
    }

    /// Set `ALIGN`.
    pub fn align(mut self, align: usize) -> Self {
        self.desc.align = Some(align);
        self
    }

    /// Set `CARRY_OFF`.
    pub fn carry_off(mut self, carry_off: bool) -> Self {
        self.desc.carry_off = carry_off;
        self
    }

    /// Make this block start its own steptree scope.
    pub fn steptree_root(mut self) -> Self {
        self.desc.steptree_root = true;
        self
    }

    /// Attach a steptree, parsed after every sibling in the enclosing scope.
    pub fn steptree(mut self, steptree: DescriptorBuilder) -> Self {
        self.steptree = Some(Box::new(steptree));
        self
    }

    /// Default value of a leaf field.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.desc.default = Some(value.into());
        self
    }

    /// Replace the field type.
    pub fn field_type(mut self, field_type: &'static FieldType) -> Self {
        self.desc.field_type = field_type;
        self
    }

    /// Set `CASE` (a path, a selector, or a while predicate).
    pub fn case(mut self, case: impl Into<Case>) -> Self {
        self.desc.case = Some(case.into());
        self
    }

    /// Add a custom metadata entry.
    pub fn meta(mut self, key: &str, value: impl Into<Meta>) -> Self {
        self.desc.set_meta_entry(key, value.into());
        self
    }

    /// Store every endian-sensitive type in this subtree in `endian`.
    ///
    /// A nested builder with its own `endian` keeps it.
    pub fn endian(mut self, endian: Endian) -> Self {
        self.endian = Some(endian);
        self
    }

    /// Normalize into a shared descriptor.
    pub fn build(self) -> Result<DescRef> {
        self.build_in(None)
    }

    fn build_in(self, inherited: Option<Endian>) -> Result<DescRef> {
        let endian = self.endian.or(inherited);
        let mut desc = self.desc;
        if let Some(endian) = endian {
            desc.field_type = desc.field_type.with_endian(endian);
        }

        let mut entries = Vec::with_capacity(self.entries.len());
        for entry in self.entries {
            entries.push(entry.build_in(endian)?);
        }
        for (key, case) in self.cases {
            desc.case_map.insert(key, entries.len());
            entries.push(case.build_in(endian)?);
        }
        if let Some(default) = self.default_case {
            desc.default_case = Some(default.build_in(endian)?);
        }
        if let Some(sub) = self.sub_struct {
            desc.sub_struct = Some(sub.build_in(endian)?);
        }
        if let Some(steptree) = self.steptree {
            desc.steptree = Some(steptree.build_in(endian)?);
        }

        match desc.field_type.kind {
            Kind::Struct => layout_struct(&mut desc, entries)?,
            Kind::BitStruct => layout_bit_struct(&mut desc, entries)?,
            Kind::Union => {
                // The raw buffer is the only home of a union's bytes.
                if desc.steptree.is_some() || entries.iter().any(|v| v.has_pointers_or_steptrees()) {
                    return Err(Error::descriptor(format!(
                        "union '{}' may not hold pointer-based or steptree fields",
                        desc.name
                    )));
                }
                // Views are selected by name.
                for (i, view) in entries.iter().enumerate() {
                    desc.case_map.insert(CaseKey::Str(view.name.clone()), i);
                }
                desc.entries = entries;
            }
            _ => desc.entries = entries,
        }
        if desc.field_type.kind != Kind::Switch {
            check_unique_names(&desc)?;
            desc.rebuild_name_map();
        }
        Ok(Arc::new(desc))
    }
}

fn check_unique_names(desc: &Descriptor) -> Result<()> {
    let mut seen = crate::descriptor::FxHashMap::default();
    for entry in desc.entries.iter().filter(|e| !e.name.is_empty()) {
        if seen.insert(entry.name.as_str(), ()).is_some() {
            return Err(Error::descriptor(format!(
                "'{}' has two fields named '{}'",
                desc.name, entry.name
            )));
        }
    }
    Ok(())
}

fn is_pad(desc: &Descriptor) -> bool {
    desc.field_type.kind == Kind::Pad
}

fn literal_size(desc: &Descriptor) -> Result<usize> {
    desc.size.as_ref().and_then(Meta::as_literal).ok_or_else(|| {
        Error::descriptor(format!("padding in '{}' needs a literal size", desc.name))
    })
}

/// Compute byte offsets and the total size of a struct, folding padding.
fn layout_struct(desc: &mut Descriptor, entries: Vec<DescRef>) -> Result<()> {
    let mut offset = 0;
    for entry in entries {
        if is_pad(&entry) {
            offset += literal_size(&entry)?;
            continue;
        }
        if entry.pointer.is_some() {
            return Err(Error::descriptor(format!(
                "struct '{}' field '{}' sits at a fixed offset and cannot take a POINTER",
                desc.name, entry.name
            )));
        }
        let size = entry.fixed_size().ok_or_else(|| {
            Error::descriptor(format!(
                "struct '{}' field '{}' ({}) has no fixed size",
                desc.name, entry.name, entry.field_type
            ))
        })?;
        desc.attr_offs.push(offset);
        desc.entries.push(entry);
        offset += size;
    }
    match desc.size.as_ref().and_then(Meta::as_literal) {
        Some(declared) if declared < offset => Err(Error::descriptor(format!(
            "struct '{}' declares {} bytes but its fields need {}",
            desc.name, declared, offset
        ))),
        Some(_) => Ok(()),
        None => {
            desc.size = Some(Meta::Literal(offset));
            Ok(())
        }
    }
}

/// Compute bit offsets of a bit struct, folding padding (in bits).
fn layout_bit_struct(desc: &mut Descriptor, entries: Vec<DescRef>) -> Result<()> {
    let mut bit = 0;
    for entry in entries {
        if is_pad(&entry) {
            bit += literal_size(&entry)?;
            continue;
        }
        let width = entry.bit_size().ok_or_else(|| {
            Error::descriptor(format!(
                "bit struct '{}' field '{}' ({}) is not bit-based",
                desc.name, entry.name, entry.field_type
            ))
        })?;
        desc.attr_offs.push(bit);
        desc.entries.push(entry);
        bit += width;
    }
    let bytes = desc.size.as_ref().and_then(Meta::as_literal).unwrap_or((bit + 7) / 8);
    if bit > bytes * 8 || bytes > 16 {
        return Err(Error::descriptor(format!(
            "bit struct '{}' needs {} bits but holds {} bytes (16 at most)",
            desc.name, bit, bytes
        )));
    }
    desc.size = Some(Meta::Literal(bytes));
    Ok(())
}

/// A leaf field.
pub fn field(field_type: &'static FieldType, name: &str) -> DescriptorBuilder {
    DescriptorBuilder::new(field_type, name)
}

/// Padding of `size` bytes (bits inside a bit struct).
pub fn pad(size: usize) -> DescriptorBuilder {
    DescriptorBuilder::new(&field_types::PAD, "").size(size)
}

/// A fixed-size struct. Offsets and size come from the fields.
pub fn struct_desc(name: &str, fields: impl IntoIterator<Item = DescriptorBuilder>) -> DescriptorBuilder {
    let mut builder = DescriptorBuilder::new(&field_types::STRUCT, name);
    builder.entries.extend(fields);
    builder
}

/// A container: fields laid out one after another.
pub fn container_desc(name: &str, fields: impl IntoIterator<Item = DescriptorBuilder>) -> DescriptorBuilder {
    let mut builder = DescriptorBuilder::new(&field_types::CONTAINER, name);
    builder.entries.extend(fields);
    builder
}

/// An array of `size` elements sharing one descriptor.
pub fn array_desc(name: &str, size: impl Into<Meta>, element: DescriptorBuilder) -> DescriptorBuilder {
    let mut builder = DescriptorBuilder::new(&field_types::ARRAY, name).size(size);
    builder.sub_struct = Some(Box::new(element));
    builder
}

/// An array read for as long as `more` says another element follows.
pub fn while_array_desc<F>(name: &str, more: F, element: DescriptorBuilder) -> DescriptorBuilder
where
    F: Fn(&FieldContext<'_>) -> Result<bool> + Send + Sync + 'static,
{
    let mut builder = DescriptorBuilder::new(&field_types::WHILE_ARRAY, name);
    builder.desc.case = Some(Case::While(Arc::new(more)));
    builder.sub_struct = Some(Box::new(element));
    builder
}

/// A switch choosing among `cases` by the key `case` yields.
pub fn switch_desc<K>(
    name: &str,
    case: impl Into<Case>,
    cases: impl IntoIterator<Item = (K, DescriptorBuilder)>,
    default: Option<DescriptorBuilder>,
) -> DescriptorBuilder
where
    K: Into<CaseKey>,
{
    let mut builder = DescriptorBuilder::new(&field_types::SWITCH, name).case(case);
    builder.cases = cases.into_iter().map(|(k, b)| (k.into(), b)).collect();
    builder.default_case = default.map(Box::new);
    builder
}

/// A union of `size` bytes with alternative views. `case`, if given,
/// picks the view to activate after parsing by view name.
pub fn union_desc(
    name: &str,
    size: usize,
    case: Option<Case>,
    views: impl IntoIterator<Item = DescriptorBuilder>,
) -> DescriptorBuilder {
    let mut builder = DescriptorBuilder::new(&field_types::UNION, name).size(size);
    builder.desc.case = case;
    builder.entries.extend(views);
    builder
}

/// A bit struct of `size` bytes.
pub fn bit_struct_desc(
    field_type: &'static FieldType,
    name: &str,
    size: usize,
    fields: impl IntoIterator<Item = DescriptorBuilder>,
) -> DescriptorBuilder {
    let mut builder = DescriptorBuilder::new(field_type, name).size(size);
    builder.entries.extend(fields);
    builder
}

/// A sub-structure stored through a stream transformation.
pub fn stream_adapter_desc(
    name: &str,
    adapter: impl StreamCodec + 'static,
    inner: DescriptorBuilder,
) -> DescriptorBuilder {
    let mut builder = DescriptorBuilder::new(&field_types::STREAM_ADAPTER, name);
    builder.desc.adapter = Some(Arc::new(adapter));
    builder.sub_struct = Some(Box::new(inner));
    builder
}

fn with_options<V: Into<Value>>(
    field_type: &'static FieldType,
    name: &str,
    options: impl IntoIterator<Item = (&'static str, V)>,
) -> DescriptorBuilder {
    let mut builder = DescriptorBuilder::new(field_type, name);
    builder.desc.options = options
        .into_iter()
        .map(|(name, value)| EnumOption::new(name, value))
        .collect();
    builder
}

/// An enum field with named options.
pub fn enum_desc<V: Into<Value>>(
    field_type: &'static FieldType,
    name: &str,
    options: impl IntoIterator<Item = (&'static str, V)>,
) -> DescriptorBuilder {
    with_options(field_type, name, options)
}

/// A bool field with named flags; each value is the flag's mask.
pub fn bool_desc<V: Into<Value>>(
    field_type: &'static FieldType,
    name: &str,
    flags: impl IntoIterator<Item = (&'static str, V)>,
) -> DescriptorBuilder {
    with_options(field_type, name, flags)
}
