//! Wire codec for shard write requests.
//!
//! Counts travel as LEB128 varints, strings as length-prefixed UTF-8,
//! blobs as length-prefixed bytes. Insert values are streamed without
//! per-value tags: their type comes from the request's insert columns,
//! which are decoded first. Expressions and literals are self-tagged.
//!
//! The request mode flags changed encoding in 4.2.0: newer streams carry
//! one packed bitfield, older streams carry discrete fields. Both
//! encodings preserve the same semantics.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::expr::{BinaryOp, Expr};
use crate::meta::{DataType, Reference, Scalar, SessionSettings};
use crate::request::{DuplicateKeyAction, Item, ShardId, ShardWriteRequest};

/// Protocol version a stream is encoded for, in release order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion(u32);

impl ProtocolVersion {
    const fn release(major: u32, minor: u32, revision: u32) -> Self {
        Self(major * 1_000_000 + minor * 10_000 + revision * 100 + 99)
    }

    pub const V4_0_0: ProtocolVersion = ProtocolVersion::release(4, 0, 0);
    pub const V4_1_0: ProtocolVersion = ProtocolVersion::release(4, 1, 0);
    /// First version carrying the packed mode bitfield and return values.
    pub const V4_2_0: ProtocolVersion = ProtocolVersion::release(4, 2, 0);
    pub const CURRENT: ProtocolVersion = ProtocolVersion::V4_2_0;

    pub fn on_or_after(self, other: ProtocolVersion) -> bool {
        self >= other
    }

    pub const fn internal_id(self) -> u32 {
        self.0
    }
}

/// Errors raised while encoding or decoding a stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("stream carried invalid utf-8")]
    InvalidUtf8,

    #[error("invalid {what} tag [{tag}]")]
    InvalidTag { what: &'static str, tag: u64 },

    #[error("mode bitfield must set exactly one duplicate-key bit, got [{bits:#x}]")]
    InvalidModes { bits: u64 },

    #[error("{0}")]
    Invalid(String),
}

const MODE_CONTINUE_ON_ERROR: u64 = 1 << 0;
const MODE_VALIDATE_CONSTRAINTS: u64 = 1 << 1;
const MODE_DUPLICATE_KEY_IGNORE: u64 = 1 << 2;
const MODE_DUPLICATE_KEY_OVERWRITE: u64 = 1 << 3;
const MODE_DUPLICATE_KEY_UPDATE_OR_FAIL: u64 = 1 << 4;

/// Pack the request mode flags into one bitfield.
fn pack_modes(
    continue_on_error: bool,
    validate_constraints: bool,
    duplicate_key_action: DuplicateKeyAction,
) -> u64 {
    let mut bits = 0;
    if continue_on_error {
        bits |= MODE_CONTINUE_ON_ERROR;
    }
    if validate_constraints {
        bits |= MODE_VALIDATE_CONSTRAINTS;
    }
    bits |= match duplicate_key_action {
        DuplicateKeyAction::Ignore => MODE_DUPLICATE_KEY_IGNORE,
        DuplicateKeyAction::Overwrite => MODE_DUPLICATE_KEY_OVERWRITE,
        DuplicateKeyAction::UpdateOrFail => MODE_DUPLICATE_KEY_UPDATE_OR_FAIL,
    };
    bits
}

fn unpack_modes(bits: u64) -> Result<(bool, bool, DuplicateKeyAction), WireError> {
    let duplicate_bits = bits
        & (MODE_DUPLICATE_KEY_IGNORE | MODE_DUPLICATE_KEY_OVERWRITE | MODE_DUPLICATE_KEY_UPDATE_OR_FAIL);
    let duplicate_key_action = match duplicate_bits {
        MODE_DUPLICATE_KEY_IGNORE => DuplicateKeyAction::Ignore,
        MODE_DUPLICATE_KEY_OVERWRITE => DuplicateKeyAction::Overwrite,
        MODE_DUPLICATE_KEY_UPDATE_OR_FAIL => DuplicateKeyAction::UpdateOrFail,
        _ => return Err(WireError::InvalidModes { bits }),
    };
    Ok((
        bits & MODE_CONTINUE_ON_ERROR != 0,
        bits & MODE_VALIDATE_CONSTRAINTS != 0,
        duplicate_key_action,
    ))
}

pub fn write_vint(out: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.put_u8(byte);
            return;
        }
        out.put_u8(byte | 0x80);
    }
}

pub fn read_vint(input: &mut Bytes) -> Result<u64, WireError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        if input.remaining() < 1 {
            return Err(WireError::UnexpectedEof);
        }
        let byte = input.get_u8();
        if shift >= 64 {
            return Err(WireError::Invalid("varint is too long".to_string()));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn write_bool(out: &mut BytesMut, value: bool) {
    out.put_u8(u8::from(value));
}

fn read_bool(input: &mut Bytes) -> Result<bool, WireError> {
    read_u8(input).map(|byte| byte != 0)
}

fn read_u8(input: &mut Bytes) -> Result<u8, WireError> {
    if input.remaining() < 1 {
        return Err(WireError::UnexpectedEof);
    }
    Ok(input.get_u8())
}

fn read_i32(input: &mut Bytes) -> Result<i32, WireError> {
    if input.remaining() < 4 {
        return Err(WireError::UnexpectedEof);
    }
    Ok(input.get_i32())
}

fn read_i64(input: &mut Bytes) -> Result<i64, WireError> {
    if input.remaining() < 8 {
        return Err(WireError::UnexpectedEof);
    }
    Ok(input.get_i64())
}

fn read_f64(input: &mut Bytes) -> Result<f64, WireError> {
    if input.remaining() < 8 {
        return Err(WireError::UnexpectedEof);
    }
    Ok(input.get_f64())
}

fn write_str(out: &mut BytesMut, value: &str) {
    write_vint(out, value.len() as u64);
    out.put_slice(value.as_bytes());
}

fn read_string(input: &mut Bytes) -> Result<String, WireError> {
    let bytes = read_blob(input)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
}

fn write_blob(out: &mut BytesMut, value: &[u8]) {
    write_vint(out, value.len() as u64);
    out.put_slice(value);
}

fn read_blob(input: &mut Bytes) -> Result<Bytes, WireError> {
    let len = read_vint(input)? as usize;
    if input.remaining() < len {
        return Err(WireError::UnexpectedEof);
    }
    Ok(input.copy_to_bytes(len))
}

fn write_scalar_tagged(out: &mut BytesMut, value: &Scalar) {
    match value {
        Scalar::Null => out.put_u8(0),
        Scalar::Bool(v) => {
            out.put_u8(1);
            write_bool(out, *v);
        }
        Scalar::Long(v) => {
            out.put_u8(2);
            out.put_i64(*v);
        }
        Scalar::Double(v) => {
            out.put_u8(3);
            out.put_f64(*v);
        }
        Scalar::Text(v) => {
            out.put_u8(4);
            write_str(out, v);
        }
        Scalar::Bytes(v) => {
            out.put_u8(5);
            write_blob(out, v);
        }
    }
}

fn read_scalar_tagged(input: &mut Bytes) -> Result<Scalar, WireError> {
    let tag = read_u8(input)?;
    match tag {
        0 => Ok(Scalar::Null),
        1 => Ok(Scalar::Bool(read_bool(input)?)),
        2 => Ok(Scalar::Long(read_i64(input)?)),
        3 => Ok(Scalar::Double(read_f64(input)?)),
        4 => Ok(Scalar::Text(read_string(input)?)),
        5 => Ok(Scalar::Bytes(read_blob(input)?.to_vec())),
        other => Err(WireError::InvalidTag {
            what: "scalar",
            tag: u64::from(other),
        }),
    }
}

/// Write one value with its column's streamer: a null guard, then the
/// payload in the column's type.
fn write_scalar_typed(out: &mut BytesMut, value: &Scalar, data_type: DataType) -> Result<(), WireError> {
    if value.is_null() {
        write_bool(out, false);
        return Ok(());
    }
    write_bool(out, true);
    match (value, data_type) {
        (Scalar::Bool(v), DataType::Bool) => write_bool(out, *v),
        (Scalar::Long(v), DataType::Long) => out.put_i64(*v),
        (Scalar::Double(v), DataType::Double) => out.put_f64(*v),
        (Scalar::Text(v), DataType::Text) => write_str(out, v),
        (Scalar::Bytes(v), DataType::Bytes) => write_blob(out, v),
        (value, data_type) => {
            return Err(WireError::Invalid(format!(
                "value {value:?} cannot be streamed as column type {data_type:?}"
            )));
        }
    }
    Ok(())
}

fn read_scalar_typed(input: &mut Bytes, data_type: DataType) -> Result<Scalar, WireError> {
    if !read_bool(input)? {
        return Ok(Scalar::Null);
    }
    Ok(match data_type {
        DataType::Bool => Scalar::Bool(read_bool(input)?),
        DataType::Long => Scalar::Long(read_i64(input)?),
        DataType::Double => Scalar::Double(read_f64(input)?),
        DataType::Text => Scalar::Text(read_string(input)?),
        DataType::Bytes => Scalar::Bytes(read_blob(input)?.to_vec()),
    })
}

pub fn write_expr(out: &mut BytesMut, expr: &Expr) {
    match expr {
        Expr::Literal(value) => {
            out.put_u8(0);
            write_scalar_tagged(out, value);
        }
        Expr::Column(column) => {
            out.put_u8(1);
            write_str(out, column);
        }
        Expr::Excluded(index) => {
            out.put_u8(2);
            write_vint(out, u64::from(*index));
        }
        Expr::Binary { op, left, right } => {
            out.put_u8(3);
            out.put_u8(op.ordinal());
            write_expr(out, left);
            write_expr(out, right);
        }
    }
}

pub fn read_expr(input: &mut Bytes) -> Result<Expr, WireError> {
    let tag = read_u8(input)?;
    match tag {
        0 => Ok(Expr::Literal(read_scalar_tagged(input)?)),
        1 => Ok(Expr::Column(read_string(input)?)),
        2 => Ok(Expr::Excluded(read_vint(input)? as u32)),
        3 => {
            let op_tag = read_u8(input)?;
            let op = BinaryOp::from_ordinal(op_tag).ok_or(WireError::InvalidTag {
                what: "binary operator",
                tag: u64::from(op_tag),
            })?;
            let left = Box::new(read_expr(input)?);
            let right = Box::new(read_expr(input)?);
            Ok(Expr::Binary { op, left, right })
        }
        other => Err(WireError::InvalidTag {
            what: "expression",
            tag: u64::from(other),
        }),
    }
}

fn write_reference(out: &mut BytesMut, reference: &Reference) {
    write_str(out, &reference.column);
    out.put_u8(reference.data_type.ordinal());
    write_bool(out, reference.nullable);
    write_opt_expr(out, reference.generated.as_ref());
    write_opt_expr(out, reference.default.as_ref());
    write_vint(out, u64::from(reference.position));
}

fn read_reference(input: &mut Bytes) -> Result<Reference, WireError> {
    let column = read_string(input)?;
    let type_tag = read_u8(input)?;
    let data_type = DataType::from_ordinal(type_tag).ok_or(WireError::InvalidTag {
        what: "data type",
        tag: u64::from(type_tag),
    })?;
    let nullable = read_bool(input)?;
    let generated = read_opt_expr(input)?;
    let default = read_opt_expr(input)?;
    let position = read_vint(input)? as u32;
    Ok(Reference {
        column,
        data_type,
        nullable,
        generated,
        default,
        position,
    })
}

fn write_opt_expr(out: &mut BytesMut, expr: Option<&Expr>) {
    match expr {
        Some(expr) => {
            write_bool(out, true);
            write_expr(out, expr);
        }
        None => write_bool(out, false),
    }
}

fn read_opt_expr(input: &mut Bytes) -> Result<Option<Expr>, WireError> {
    if read_bool(input)? {
        Ok(Some(read_expr(input)?))
    } else {
        Ok(None)
    }
}

fn write_session_settings(out: &mut BytesMut, settings: &SessionSettings) {
    write_str(out, &settings.user);
    write_vint(out, settings.search_path.len() as u64);
    for schema in &settings.search_path {
        write_str(out, schema);
    }
    write_bool(out, settings.hash_join_enabled);
}

fn read_session_settings(input: &mut Bytes) -> Result<SessionSettings, WireError> {
    let user = read_string(input)?;
    let schema_count = read_vint(input)? as usize;
    let mut search_path = Vec::with_capacity(schema_count);
    for _ in 0..schema_count {
        search_path.push(read_string(input)?);
    }
    let hash_join_enabled = read_bool(input)?;
    Ok(SessionSettings {
        user,
        search_path,
        hash_join_enabled,
    })
}

/// Encode a request for a peer speaking `version`.
pub fn encode_request(
    request: &ShardWriteRequest,
    version: ProtocolVersion,
) -> Result<Bytes, WireError> {
    let mut out = BytesMut::new();

    write_str(&mut out, &request.shard_id.index);
    write_vint(&mut out, u64::from(request.shard_id.id));
    out.put_slice(request.job_id.as_bytes());

    match &request.update_columns {
        Some(columns) => {
            write_vint(&mut out, columns.len() as u64);
            for column in columns {
                write_str(&mut out, column);
            }
        }
        None => write_vint(&mut out, 0),
    }

    let streamers: Option<Vec<DataType>> = match &request.insert_columns {
        Some(columns) => {
            write_vint(&mut out, columns.len() as u64);
            for reference in columns {
                write_reference(&mut out, reference);
            }
            Some(columns.iter().map(|r| r.data_type).collect())
        }
        None => {
            write_vint(&mut out, 0);
            None
        }
    };

    if version.on_or_after(ProtocolVersion::V4_2_0) {
        let bits = pack_modes(
            request.continue_on_error,
            request.validate_constraints,
            request.duplicate_key_action,
        );
        write_vint(&mut out, bits);
    } else {
        write_bool(&mut out, request.continue_on_error);
        write_vint(&mut out, u64::from(request.duplicate_key_action.ordinal()));
        write_bool(&mut out, request.validate_constraints);
    }

    write_session_settings(&mut out, &request.session_settings);

    write_vint(&mut out, request.items.len() as u64);
    for item in &request.items {
        write_item(&mut out, item, streamers.as_deref())?;
    }

    if version.on_or_after(ProtocolVersion::V4_2_0) {
        match &request.return_values {
            Some(expressions) => {
                write_vint(&mut out, expressions.len() as u64);
                for expression in expressions {
                    write_expr(&mut out, expression);
                }
            }
            None => write_vint(&mut out, 0),
        }
    }

    Ok(out.freeze())
}

/// Decode a request produced by a peer speaking `version`.
pub fn decode_request(
    mut input: Bytes,
    version: ProtocolVersion,
) -> Result<ShardWriteRequest, WireError> {
    let input = &mut input;

    let index = read_string(input)?;
    let shard = read_vint(input)? as u32;
    let shard_id = ShardId::new(index, shard);
    if input.remaining() < 16 {
        return Err(WireError::UnexpectedEof);
    }
    let mut uuid_bytes = [0u8; 16];
    input.copy_to_slice(&mut uuid_bytes);
    let job_id = Uuid::from_bytes(uuid_bytes);

    let update_column_count = read_vint(input)? as usize;
    let update_columns = if update_column_count > 0 {
        let mut columns = Vec::with_capacity(update_column_count);
        for _ in 0..update_column_count {
            columns.push(read_string(input)?);
        }
        Some(columns)
    } else {
        None
    };

    let insert_column_count = read_vint(input)? as usize;
    let (insert_columns, streamers) = if insert_column_count > 0 {
        let mut columns = Vec::with_capacity(insert_column_count);
        for _ in 0..insert_column_count {
            columns.push(read_reference(input)?);
        }
        let streamers: Vec<DataType> = columns.iter().map(|r| r.data_type).collect();
        (Some(columns), Some(streamers))
    } else {
        (None, None)
    };

    let (continue_on_error, validate_constraints, duplicate_key_action) =
        if version.on_or_after(ProtocolVersion::V4_2_0) {
            unpack_modes(read_vint(input)?)?
        } else {
            let continue_on_error = read_bool(input)?;
            let ordinal = read_vint(input)? as u32;
            let duplicate_key_action =
                DuplicateKeyAction::from_ordinal(ordinal).ok_or(WireError::InvalidTag {
                    what: "duplicate-key action",
                    tag: u64::from(ordinal),
                })?;
            let validate_constraints = read_bool(input)?;
            (continue_on_error, validate_constraints, duplicate_key_action)
        };

    let session_settings = read_session_settings(input)?;

    let item_count = read_vint(input)? as usize;
    let mut items = Vec::with_capacity(item_count);
    for _ in 0..item_count {
        items.push(read_item(input, streamers.as_deref())?);
    }

    let return_values = if version.on_or_after(ProtocolVersion::V4_2_0) {
        let count = read_vint(input)? as usize;
        if count > 0 {
            let mut expressions = Vec::with_capacity(count);
            for _ in 0..count {
                expressions.push(read_expr(input)?);
            }
            Some(expressions)
        } else {
            None
        }
    } else {
        None
    };

    Ok(ShardWriteRequest {
        shard_id,
        job_id,
        continue_on_error,
        validate_constraints,
        duplicate_key_action,
        session_settings,
        update_columns,
        insert_columns,
        return_values,
        items,
    })
}

fn write_item(out: &mut BytesMut, item: &Item, streamers: Option<&[DataType]>) -> Result<(), WireError> {
    write_str(out, &item.id);
    out.put_i32(item.location);
    out.put_i64(item.version);
    out.put_i64(item.seq_no);
    out.put_i64(item.primary_term);

    match &item.update_assignments {
        Some(assignments) => {
            write_bool(out, true);
            write_vint(out, assignments.len() as u64);
            for assignment in assignments {
                write_expr(out, assignment);
            }
        }
        None => write_bool(out, false),
    }

    match &item.insert_values {
        Some(values) => {
            let streamers = streamers.ok_or_else(|| {
                WireError::Invalid(
                    "item has insert values but the request has no insert columns".to_string(),
                )
            })?;
            if values.len() != streamers.len() {
                return Err(WireError::Invalid(format!(
                    "item has {} insert values for {} insert columns",
                    values.len(),
                    streamers.len(),
                )));
            }
            write_vint(out, values.len() as u64);
            for (value, data_type) in values.iter().zip(streamers) {
                write_scalar_typed(out, value, *data_type)?;
            }
        }
        None => write_vint(out, 0),
    }

    match &item.source {
        Some(source) => {
            write_bool(out, true);
            write_blob(out, source);
        }
        None => write_bool(out, false),
    }
    Ok(())
}

fn read_item(input: &mut Bytes, streamers: Option<&[DataType]>) -> Result<Item, WireError> {
    let id = read_string(input)?;
    let location = read_i32(input)?;
    let version = read_i64(input)?;
    let seq_no = read_i64(input)?;
    let primary_term = read_i64(input)?;

    let update_assignments = if read_bool(input)? {
        let count = read_vint(input)? as usize;
        let mut assignments = Vec::with_capacity(count);
        for _ in 0..count {
            assignments.push(read_expr(input)?);
        }
        Some(assignments)
    } else {
        None
    };

    let value_count = read_vint(input)? as usize;
    let insert_values = if value_count > 0 {
        let streamers = streamers.ok_or_else(|| {
            WireError::Invalid("stream carries insert values without insert columns".to_string())
        })?;
        if value_count != streamers.len() {
            return Err(WireError::Invalid(format!(
                "stream carries {value_count} insert values for {} insert columns",
                streamers.len(),
            )));
        }
        let mut values = Vec::with_capacity(value_count);
        for data_type in streamers {
            values.push(read_scalar_typed(input, *data_type)?);
        }
        Some(values)
    } else {
        None
    };

    let source = if read_bool(input)? {
        Some(read_blob(input)?)
    } else {
        None
    };

    Ok(Item {
        id,
        location,
        update_assignments,
        insert_values,
        version,
        seq_no,
        primary_term,
        source,
    })
}
