//! Array importer: native array back to a managed [`Array`].
//!
//! Native arrays carry no type descriptor the importer trusts; the caller's
//! target type drives every step. Nested arrays are fetched with a single
//! `get_nested_info` call and rebuilt by consuming the length and buffer
//! vectors in the order the exporter produced them.

use crate::array::{signed_code_type, Array};
use crate::bridge::Bridge;
use crate::buffers::{check_data, check_offsets, encode_primitive, read_primitive, BufferKind, LeafBuffers};
use crate::codec::{categorical_wire_type, nested_buffer_count, nested_length_count, WireType};
use crate::error::{BridgeError, BridgeResult};
use crate::handle::ArrayHandle;
use crate::ids::ArrayId;
use crate::metrics::ARRAYS_IMPORTED;
use crate::types::{ArrayType, PrimitiveType};
use crate::value::Value;
use arrow::buffer::Buffer;
use tracing::debug;

impl Bridge {
    /// Rebuild the managed array `handle` refers to as type `ty`.
    ///
    /// The handle is only borrowed; the caller still owns its reference.
    ///
    /// # Errors
    /// `UnsupportedType` for a categorical `ty` without categories (see
    /// [`Bridge::info_to_array_with_categories`]), `ShapeMismatch` when the
    /// native buffers do not fit `ty`, `NativeOperationFailure` when the
    /// engine cannot produce the requested layout.
    pub fn info_to_array(&self, handle: &ArrayHandle, ty: &ArrayType) -> BridgeResult<Array> {
        self.import(handle.id(), ty, None)
    }

    /// Like [`Bridge::info_to_array`], resolving a run-time categorical type
    /// against `categories`.
    ///
    /// # Errors
    /// As for [`Bridge::info_to_array`].
    pub fn info_to_array_with_categories(
        &self,
        handle: &ArrayHandle,
        ty: &ArrayType,
        categories: &[String],
    ) -> BridgeResult<Array> {
        self.import(handle.id(), ty, Some(categories))
    }

    pub(crate) fn import(&self, id: ArrayId, ty: &ArrayType, categories: Option<&[String]>) -> BridgeResult<Array> {
        debug!(ty = %ty, id = id.raw(), "info_to_array");
        let engine = self.engine();
        let arr = match ty {
            ArrayType::Primitive(p) => {
                let leaf = self.call("info_to_numpy_array", engine.info_to_numpy_array(id))?;
                expect_code(&leaf, WireType::of(*p), ty)?;
                let data = fixed_width(&leaf, p.byte_width(), ty)?;
                Array::Primitive {
                    ty: *p,
                    data,
                    len: leaf.len,
                }
            }
            ArrayType::Nullable(p) => {
                let leaf = self.call("info_to_nullable_array", engine.info_to_nullable_array(id))?;
                expect_code(&leaf, WireType::of(*p), ty)?;
                Array::Nullable {
                    ty: *p,
                    data: fixed_width(&leaf, p.byte_width(), ty)?,
                    validity: leaf.require(BufferKind::Validity)?,
                    len: leaf.len,
                }
            }
            ArrayType::Decimal { precision, scale } => {
                let leaf = self.call("info_to_nullable_array", engine.info_to_nullable_array(id))?;
                expect_code(&leaf, WireType::Decimal, ty)?;
                Array::Decimal {
                    precision: *precision,
                    scale: *scale,
                    data: fixed_width(&leaf, 16, ty)?,
                    validity: leaf.require(BufferKind::Validity)?,
                    len: leaf.len,
                }
            }
            ArrayType::String | ArrayType::Binary => {
                let leaf = self.call("info_to_string_array", engine.info_to_string_array(id))?;
                let binary = matches!(ty, ArrayType::Binary);
                let offsets = leaf.require(BufferKind::Offsets)?;
                let data = leaf.require(BufferKind::Data)?;
                check_offsets(&offsets, leaf.len, leaf.n_chars, "info_to_array")?;
                check_data(&data, leaf.n_chars, 1, "info_to_array")?;
                Array::Varlen {
                    binary,
                    offsets,
                    data,
                    validity: leaf.require(BufferKind::Validity)?,
                    len: leaf.len,
                }
            }
            ArrayType::List(_) | ArrayType::Struct(_) | ArrayType::Map { .. } => {
                let parts = self.call("get_nested_info", engine.get_nested_info(id))?;
                let (want_l, want_b) = (nested_length_count(ty), nested_buffer_count(ty));
                if parts.lengths.len() != want_l || parts.buffers.len() != want_b {
                    return Err(BridgeError::shape(format!(
                        "info_to_array: {ty} needs {want_l} lengths and {want_b} buffers, native side returned {} and {}",
                        parts.lengths.len(),
                        parts.buffers.len()
                    )));
                }
                let mut cur = NestedCursor {
                    lengths: &parts.lengths,
                    buffers: &parts.buffers,
                    li: 0,
                    bi: 0,
                };
                cur.build(ty)?
            }
            ArrayType::DictString => {
                let parts = self.call("info_to_dict_parts", engine.info_to_dict_parts(id))?;
                let dictionary = self.wrap_array(parts.dictionary);
                let indices = self.wrap_array(parts.indices);
                Array::DictString {
                    dictionary: Box::new(self.import(dictionary.id(), &ArrayType::String, None)?),
                    indices: Box::new(self.import(
                        indices.id(),
                        &ArrayType::Nullable(PrimitiveType::Int32),
                        None,
                    )?),
                    has_global_dictionary: parts.has_global_dictionary,
                    has_deduped_local_dictionary: parts.has_deduped_local_dictionary,
                }
            }
            ArrayType::Categorical {
                categories: known,
                ordered,
            } => {
                let categories: Vec<String> = match (known, categories) {
                    (Some(c), _) => c.clone(),
                    (None, Some(c)) => c.to_vec(),
                    (None, None) => {
                        return Err(BridgeError::unsupported(format!(
                            "info_to_array: categories of {ty} are only known at run time"
                        )));
                    }
                };
                let (leaf, n) = self.call(
                    "info_to_categorical_array",
                    engine.info_to_categorical_array(id),
                )?;
                if n as usize != categories.len() {
                    return Err(BridgeError::shape(format!(
                        "info_to_array: native array has {n} categories, {} expected",
                        categories.len()
                    )));
                }
                let wire = categorical_wire_type(categories.len());
                expect_code(&leaf, wire, ty)?;
                let code_type = signed_code_type(categories.len());
                Array::Categorical {
                    codes: codes_to_signed(&leaf, wire, code_type)?,
                    code_type,
                    categories,
                    ordered: *ordered,
                    len: leaf.len,
                }
            }
            ArrayType::Interval(bound) => {
                let (left, right) = self.call("info_to_interval_array", engine.info_to_interval_array(id))?;
                expect_code(&left, WireType::of(*bound), ty)?;
                if left.len != right.len {
                    return Err(BridgeError::shape(format!(
                        "info_to_array: interval bounds have {} and {} elements",
                        left.len, right.len
                    )));
                }
                Array::Interval {
                    bound: *bound,
                    left: fixed_width(&left, bound.byte_width(), ty)?,
                    right: fixed_width(&right, bound.byte_width(), ty)?,
                    len: left.len,
                }
            }
        };
        self.bump(ARRAYS_IMPORTED, 1);
        Ok(arr)
    }
}

fn expect_code(leaf: &LeafBuffers, wire: WireType, ty: &ArrayType) -> BridgeResult<()> {
    if leaf.type_code == wire.code() {
        Ok(())
    } else {
        Err(BridgeError::shape(format!(
            "info_to_array: native array holds wire type {}, {ty} needs {}",
            leaf.type_code,
            wire.code()
        )))
    }
}

fn fixed_width(leaf: &LeafBuffers, width: usize, ty: &ArrayType) -> BridgeResult<Buffer> {
    let data = leaf.require(BufferKind::Data)?;
    check_data(&data, leaf.len, width, &format!("info_to_array({ty})"))?;
    Ok(data)
}

/// Unsigned wire codes (MAX = NA) back to signed managed codes (-1 = NA).
fn codes_to_signed(leaf: &LeafBuffers, wire: WireType, code_type: PrimitiveType) -> BridgeResult<Buffer> {
    let source = wire
        .primitive()
        .ok_or_else(|| BridgeError::unsupported(format!("{wire:?} is not a code type")))?;
    let data = leaf.require(BufferKind::Data)?;
    check_data(&data, leaf.len, source.byte_width(), "info_to_array(categorical)")?;
    let na = match source {
        PrimitiveType::UInt8 => u64::from(u8::MAX),
        PrimitiveType::UInt16 => u64::from(u16::MAX),
        PrimitiveType::UInt32 => u64::from(u32::MAX),
        _ => u64::MAX,
    };
    let vals: Vec<Value> = (0..leaf.len)
        .map(|i| match read_primitive(source, &data, i).as_u64() {
            Some(c) if c != na => Value::Int(c as i64),
            _ => Value::Int(-1),
        })
        .collect();
    encode_primitive(code_type, &vals, false)
}

/// Consumes nested lengths and buffers in export order.
struct NestedCursor<'a> {
    lengths: &'a [u64],
    buffers: &'a [Option<Buffer>],
    li: usize,
    bi: usize,
}

impl NestedCursor<'_> {
    fn len(&mut self) -> BridgeResult<usize> {
        let l = self
            .lengths
            .get(self.li)
            .copied()
            .ok_or_else(|| BridgeError::shape("info_to_array: length vector ended early"))?;
        self.li += 1;
        Ok(l as usize)
    }

    fn next(&mut self) -> BridgeResult<Option<Buffer>> {
        let b = self
            .buffers
            .get(self.bi)
            .cloned()
            .ok_or_else(|| BridgeError::shape("info_to_array: buffer vector ended early"))?;
        self.bi += 1;
        Ok(b)
    }

    fn take(&mut self, what: &str) -> BridgeResult<Buffer> {
        let pos = self.bi;
        self.next()?.ok_or_else(|| {
            BridgeError::shape(format!(
                "info_to_array: missing {what} buffer at position {pos}"
            ))
        })
    }

    fn build(&mut self, ty: &ArrayType) -> BridgeResult<Array> {
        if let ArrayType::Map { key, value } = ty {
            let entries = self.build(&ArrayType::map_storage_type(key, value))?;
            return Ok(Array::Map {
                entries: Box::new(entries),
            });
        }
        let len = self.len()?;
        let arr = match ty {
            ArrayType::List(inner) => {
                let offsets = self.take("offsets")?;
                let validity = self.take("bitmap")?;
                let values = self.build(inner)?;
                check_offsets(&offsets, len, values.len(), "info_to_array(list)")?;
                Array::List {
                    offsets,
                    validity,
                    values: Box::new(values),
                    len,
                }
            }
            ArrayType::Struct(fields) => {
                let validity = self.take("bitmap")?;
                let mut children = Vec::with_capacity(fields.len());
                for f in fields {
                    let c = self.build(&f.ty)?;
                    if c.len() != len {
                        return Err(BridgeError::shape(format!(
                            "info_to_array: struct field {} has {} rows, struct has {len}",
                            f.name,
                            c.len()
                        )));
                    }
                    children.push(c);
                }
                Array::Struct {
                    names: fields.iter().map(|f| f.name.clone()).collect(),
                    children,
                    validity,
                    len,
                }
            }
            ArrayType::String | ArrayType::Binary => {
                let offsets = self.take("offsets")?;
                let validity = self.take("bitmap")?;
                let data = self.take("data")?;
                let n_chars = crate::buffers::offset_at(&offsets, len);
                check_offsets(&offsets, len, n_chars, "info_to_array(string)")?;
                check_data(&data, n_chars, 1, "info_to_array(string)")?;
                Array::Varlen {
                    binary: matches!(ty, ArrayType::Binary),
                    offsets,
                    data,
                    validity,
                    len,
                }
            }
            ArrayType::Nullable(p) => {
                let validity = self.take("bitmap")?;
                let data = self.take("data")?;
                check_data(&data, len, p.byte_width(), "info_to_array(nullable)")?;
                Array::Nullable {
                    ty: *p,
                    data,
                    validity,
                    len,
                }
            }
            ArrayType::Decimal { precision, scale } => {
                let validity = self.take("bitmap")?;
                let data = self.take("data")?;
                check_data(&data, len, 16, "info_to_array(decimal)")?;
                Array::Decimal {
                    precision: *precision,
                    scale: *scale,
                    data,
                    validity,
                    len,
                }
            }
            ArrayType::Primitive(p) => {
                self.next()?;
                let data = self.take("data")?;
                check_data(&data, len, p.byte_width(), "info_to_array(primitive)")?;
                Array::Primitive { ty: *p, data, len }
            }
            other => {
                return Err(BridgeError::unsupported(format!(
                    "info_to_array: unsupported type for subarray {other}"
                )));
            }
        };
        Ok(arr)
    }
}
