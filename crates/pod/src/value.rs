use crate::error::ErrorKind;
use crate::{ChoiceType, Error, RawId, Type};

/// A rectangle dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rectangle {
    pub width: u32,
    pub height: u32,
}

/// A rational number, typically a rate or a frame duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction {
    pub num: u32,
    pub denom: u32,
}

/// One property of an [`Object`].
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub key: u32,
    pub flags: u32,
    pub value: Value,
}

/// A keyed object value, the shape every parameter takes.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    /// The type of the object, such as a format or a buffer requirement.
    pub object_type: u32,
    /// The parameter id the object answers for.
    pub object_id: u32,
    /// The properties of the object.
    pub properties: Vec<Property>,
}

impl Object {
    /// Construct a new empty object.
    pub fn new(object_type: impl RawId, object_id: impl RawId) -> Self {
        Self {
            object_type: object_type.into_id(),
            object_id: object_id.into_id(),
            properties: Vec::new(),
        }
    }

    /// Look up a property by key.
    pub fn property(&self, key: impl RawId) -> Option<&Value> {
        let key = key.into_id();

        self.properties
            .iter()
            .find(|p| p.key == key)
            .map(|p| &p.value)
    }

    /// Insert or replace a property.
    pub fn set_property(&mut self, key: impl RawId, value: Value) {
        let key = key.into_id();

        if let Some(p) = self.properties.iter_mut().find(|p| p.key == key) {
            p.value = value;
            return;
        }

        self.properties.push(Property {
            key,
            flags: 0,
            value,
        });
    }
}

/// A set of alternatives for one value.
///
/// The first value is the default which survives fixation.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub kind: ChoiceType,
    pub values: Vec<Value>,
}

impl Choice {
    /// An enumeration of alternatives with a preferred default.
    pub fn enumeration(default: Value, alternatives: impl IntoIterator<Item = Value>) -> Self {
        let mut values = Vec::new();
        values.push(default);
        values.extend(alternatives);

        Self {
            kind: ChoiceType::ENUM,
            values,
        }
    }

    /// A `default, min, max` range.
    pub fn range(default: Value, min: Value, max: Value) -> Self {
        Self {
            kind: ChoiceType::RANGE,
            values: vec![default, min, max],
        }
    }

    /// The default of the choice.
    pub fn default(&self) -> Option<&Value> {
        self.values.first()
    }
}

/// A timed control in a [`Sequence`].
#[derive(Debug, Clone, PartialEq)]
pub struct Control {
    /// Offset of the control in the current cycle, in samples.
    pub offset: u32,
    /// The kind of control, such as properties or midi.
    pub kind: u32,
    pub value: Value,
}

/// An ordered list of timed controls.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sequence {
    pub unit: u32,
    pub controls: Vec<Control>,
}

/// A plain-old-data value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Id(u32),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Rectangle(Rectangle),
    Fraction(Fraction),
    Fd(i64),
    Array(Vec<Value>),
    Choice(Box<Choice>),
    Struct(Vec<Value>),
    Object(Object),
    Sequence(Sequence),
}

impl Value {
    /// Construct an id value from a typed identifier.
    #[inline]
    pub fn id(value: impl RawId) -> Self {
        Self::Id(value.into_id())
    }

    /// Construct a choice value.
    #[inline]
    pub fn choice(choice: Choice) -> Self {
        Self::Choice(Box::new(choice))
    }

    /// The wire type of the value.
    pub fn ty(&self) -> Type {
        match self {
            Value::None => Type::NONE,
            Value::Bool(..) => Type::BOOL,
            Value::Id(..) => Type::ID,
            Value::Int(..) => Type::INT,
            Value::Long(..) => Type::LONG,
            Value::Float(..) => Type::FLOAT,
            Value::Double(..) => Type::DOUBLE,
            Value::String(..) => Type::STRING,
            Value::Bytes(..) => Type::BYTES,
            Value::Rectangle(..) => Type::RECTANGLE,
            Value::Fraction(..) => Type::FRACTION,
            Value::Fd(..) => Type::FD,
            Value::Array(..) => Type::ARRAY,
            Value::Choice(..) => Type::CHOICE,
            Value::Struct(..) => Type::STRUCT,
            Value::Object(..) => Type::OBJECT,
            Value::Sequence(..) => Type::SEQUENCE,
        }
    }

    /// Access the value as an identifier.
    #[inline]
    pub fn as_id(&self) -> Option<u32> {
        match *self {
            Value::Id(id) => Some(id),
            _ => None,
        }
    }

    /// Access the value as an integer.
    #[inline]
    pub fn as_int(&self) -> Option<i32> {
        match *self {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Access the value as a long.
    #[inline]
    pub fn as_long(&self) -> Option<i64> {
        match *self {
            Value::Long(v) => Some(v),
            Value::Int(v) => Some(v as i64),
            _ => None,
        }
    }

    /// Access the value as a boolean.
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Access the value as a string.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Access the value as a fraction.
    #[inline]
    pub fn as_fraction(&self) -> Option<Fraction> {
        match *self {
            Value::Fraction(v) => Some(v),
            _ => None,
        }
    }

    /// Access the value as a rectangle.
    #[inline]
    pub fn as_rectangle(&self) -> Option<Rectangle> {
        match *self {
            Value::Rectangle(v) => Some(v),
            _ => None,
        }
    }

    /// Access the value as an object.
    #[inline]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Access the value as a choice.
    #[inline]
    pub fn as_choice(&self) -> Option<&Choice> {
        match self {
            Value::Choice(c) => Some(c),
            _ => None,
        }
    }

    /// Encode the value into a fresh word-aligned buffer.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Encode the value, appending to the given buffer.
    ///
    /// The buffer is assumed to be word-aligned at its current length.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        let header = buf.len();
        buf.extend_from_slice(&[0u8; 8]);

        let start = buf.len();
        self.encode_body(buf)?;
        let size = buf.len() - start;

        let Ok(size32) = u32::try_from(size) else {
            return Err(Error::new(ErrorKind::SizeOverflow));
        };

        buf[header..header + 4].copy_from_slice(&size32.to_le_bytes());
        buf[header + 4..header + 8].copy_from_slice(&self.ty().into_raw().to_le_bytes());

        pad_to_word(buf);
        Ok(())
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        match self {
            Value::None => {}
            Value::Bool(v) => buf.extend_from_slice(&u32::from(*v).to_le_bytes()),
            Value::Id(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Int(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Long(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Float(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Double(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::String(s) => {
                buf.extend_from_slice(s.as_bytes());
                buf.push(0);
            }
            Value::Bytes(b) => buf.extend_from_slice(b),
            Value::Rectangle(r) => {
                buf.extend_from_slice(&r.width.to_le_bytes());
                buf.extend_from_slice(&r.height.to_le_bytes());
            }
            Value::Fraction(fr) => {
                buf.extend_from_slice(&fr.num.to_le_bytes());
                buf.extend_from_slice(&fr.denom.to_le_bytes());
            }
            Value::Fd(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Array(values) => {
                let (child_ty, child_size) = child_layout(values)?;
                buf.extend_from_slice(&(child_size as u32).to_le_bytes());
                buf.extend_from_slice(&child_ty.into_raw().to_le_bytes());

                for value in values {
                    encode_sized_body(value, child_ty, child_size, buf)?;
                }
            }
            Value::Choice(choice) => {
                let (child_ty, child_size) = child_layout(&choice.values)?;
                buf.extend_from_slice(&choice.kind.into_raw().to_le_bytes());
                buf.extend_from_slice(&0u32.to_le_bytes());
                buf.extend_from_slice(&(child_size as u32).to_le_bytes());
                buf.extend_from_slice(&child_ty.into_raw().to_le_bytes());

                for value in &choice.values {
                    encode_sized_body(value, child_ty, child_size, buf)?;
                }
            }
            Value::Struct(fields) => {
                for field in fields {
                    field.encode_into(buf)?;
                }
            }
            Value::Object(object) => {
                buf.extend_from_slice(&object.object_type.to_le_bytes());
                buf.extend_from_slice(&object.object_id.to_le_bytes());

                for p in &object.properties {
                    buf.extend_from_slice(&p.key.to_le_bytes());
                    buf.extend_from_slice(&p.flags.to_le_bytes());
                    p.value.encode_into(buf)?;
                }
            }
            Value::Sequence(seq) => {
                buf.extend_from_slice(&seq.unit.to_le_bytes());
                buf.extend_from_slice(&0u32.to_le_bytes());

                for c in &seq.controls {
                    buf.extend_from_slice(&c.offset.to_le_bytes());
                    buf.extend_from_slice(&c.kind.to_le_bytes());
                    c.value.encode_into(buf)?;
                }
            }
        }

        Ok(())
    }

    /// Decode a single value from the start of the given buffer.
    pub fn decode(bytes: &[u8]) -> Result<Value, Error> {
        let mut cursor = Cursor::new(bytes);
        cursor.read_value()
    }
}

/// Round the buffer length up to the next word boundary.
fn pad_to_word(buf: &mut Vec<u8>) {
    while buf.len() % 8 != 0 {
        buf.push(0);
    }
}

/// The fixed body size of a type, if it has one.
fn sized_body(ty: Type) -> Option<usize> {
    match ty {
        Type::BOOL | Type::ID | Type::INT | Type::FLOAT => Some(4),
        Type::LONG | Type::DOUBLE | Type::FD => Some(8),
        Type::RECTANGLE | Type::FRACTION => Some(8),
        _ => None,
    }
}

fn child_layout(values: &[Value]) -> Result<(Type, usize), Error> {
    let Some(first) = values.first() else {
        return Ok((Type::NONE, 0));
    };

    let ty = first.ty();

    let Some(size) = sized_body(ty) else {
        return Err(Error::new(ErrorKind::UnsizedChild(ty)));
    };

    for value in values {
        if value.ty() != ty {
            return Err(Error::new(ErrorKind::MixedArray));
        }
    }

    Ok((ty, size))
}

fn encode_sized_body(
    value: &Value,
    ty: Type,
    size: usize,
    buf: &mut Vec<u8>,
) -> Result<(), Error> {
    if value.ty() != ty {
        return Err(Error::new(ErrorKind::MixedArray));
    }

    let start = buf.len();
    value.encode_body(buf)?;

    if buf.len() - start != size {
        return Err(Error::new(ErrorKind::BadChildSize {
            expected: size,
            actual: buf.len() - start,
        }));
    }

    Ok(())
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let Some(bytes) = self.data.get(self.pos..self.pos + n) else {
            return Err(Error::new(ErrorKind::BufferUnderflow));
        };

        self.pos += n;
        Ok(bytes)
    }

    fn read_u32(&mut self) -> Result<u32, Error> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn align(&mut self) {
        self.pos = self.pos.next_multiple_of(8);
    }

    fn read_value(&mut self) -> Result<Value, Error> {
        let size = self.read_u32()? as usize;
        let ty = Type::from_raw(self.read_u32()?);
        let body = self.take(size)?;
        self.align();
        decode_body(ty, body)
    }
}

fn decode_body(ty: Type, body: &[u8]) -> Result<Value, Error> {
    let mut cursor = Cursor::new(body);

    let value = match ty {
        Type::NONE => Value::None,
        Type::BOOL => Value::Bool(cursor.read_u32()? != 0),
        Type::ID => Value::Id(cursor.read_u32()?),
        Type::INT => Value::Int(cursor.read_u32()? as i32),
        Type::LONG => {
            let lo = cursor.read_u32()? as u64;
            let hi = cursor.read_u32()? as u64;
            Value::Long(((hi << 32) | lo) as i64)
        }
        Type::FLOAT => Value::Float(f32::from_bits(cursor.read_u32()?)),
        Type::DOUBLE => {
            let lo = cursor.read_u32()? as u64;
            let hi = cursor.read_u32()? as u64;
            Value::Double(f64::from_bits((hi << 32) | lo))
        }
        Type::STRING => {
            let Some((&0, data)) = body.split_last() else {
                return Err(Error::new(ErrorKind::BadStringData));
            };

            let Ok(s) = core::str::from_utf8(data) else {
                return Err(Error::new(ErrorKind::BadStringData));
            };

            Value::String(s.into())
        }
        Type::BYTES => Value::Bytes(body.to_vec()),
        Type::RECTANGLE => Value::Rectangle(Rectangle {
            width: cursor.read_u32()?,
            height: cursor.read_u32()?,
        }),
        Type::FRACTION => Value::Fraction(Fraction {
            num: cursor.read_u32()?,
            denom: cursor.read_u32()?,
        }),
        Type::FD => {
            let lo = cursor.read_u32()? as u64;
            let hi = cursor.read_u32()? as u64;
            Value::Fd(((hi << 32) | lo) as i64)
        }
        Type::ARRAY => {
            let child_size = cursor.read_u32()? as usize;
            let child_ty = Type::from_raw(cursor.read_u32()?);
            Value::Array(decode_children(&mut cursor, child_ty, child_size)?)
        }
        Type::CHOICE => {
            let kind = ChoiceType::from_raw(cursor.read_u32()?);
            let _flags = cursor.read_u32()?;
            let child_size = cursor.read_u32()? as usize;
            let child_ty = Type::from_raw(cursor.read_u32()?);
            let values = decode_children(&mut cursor, child_ty, child_size)?;
            Value::Choice(Box::new(Choice { kind, values }))
        }
        Type::STRUCT => {
            let mut fields = Vec::new();

            while cursor.pos < body.len() {
                fields.push(cursor.read_value()?);
            }

            Value::Struct(fields)
        }
        Type::OBJECT => {
            let object_type = cursor.read_u32()?;
            let object_id = cursor.read_u32()?;
            let mut properties = Vec::new();

            while cursor.pos < body.len() {
                let key = cursor.read_u32()?;
                let flags = cursor.read_u32()?;
                let value = cursor.read_value()?;
                properties.push(Property { key, flags, value });
            }

            Value::Object(Object {
                object_type,
                object_id,
                properties,
            })
        }
        Type::SEQUENCE => {
            let unit = cursor.read_u32()?;
            let _pad = cursor.read_u32()?;
            let mut controls = Vec::new();

            while cursor.pos < body.len() {
                let offset = cursor.read_u32()?;
                let kind = cursor.read_u32()?;
                let value = cursor.read_value()?;
                controls.push(Control {
                    offset,
                    kind,
                    value,
                });
            }

            Value::Sequence(Sequence { unit, controls })
        }
        ty => return Err(Error::new(ErrorKind::UnsupportedType(ty.into_raw()))),
    };

    Ok(value)
}

fn decode_children(
    cursor: &mut Cursor<'_>,
    child_ty: Type,
    child_size: usize,
) -> Result<Vec<Value>, Error> {
    if cursor.pos >= cursor.data.len() {
        return Ok(Vec::new());
    }

    let Some(expected) = sized_body(child_ty) else {
        return Err(Error::new(ErrorKind::UnsizedChild(child_ty)));
    };

    if expected != child_size {
        return Err(Error::new(ErrorKind::BadChildSize {
            expected,
            actual: child_size,
        }));
    }

    let mut values = Vec::new();

    while cursor.pos < cursor.data.len() {
        let body = cursor.take(child_size)?;
        values.push(decode_body(child_ty, body)?);
    }

    Ok(values)
}
