use crate::{Object, Property, RawId, Value};

/// A fluent builder for [`Object`] values.
///
/// # Examples
///
/// ```
/// use pod::{Builder, Value};
///
/// let object = Builder::object(3, 1)
///     .property(1, Value::Id(2))
///     .property(2, Value::Int(48000))
///     .build();
///
/// assert_eq!(object.property(2u32), Some(&Value::Int(48000)));
/// ```
pub struct Builder {
    object: Object,
}

impl Builder {
    /// Start building an object with the given type and parameter id.
    pub fn object(object_type: impl RawId, object_id: impl RawId) -> Self {
        Self {
            object: Object::new(object_type, object_id),
        }
    }

    /// Append a property.
    pub fn property(mut self, key: impl RawId, value: Value) -> Self {
        self.object.properties.push(Property {
            key: key.into_id(),
            flags: 0,
            value,
        });

        self
    }

    /// Append a property with flags.
    pub fn property_with_flags(mut self, key: impl RawId, flags: u32, value: Value) -> Self {
        self.object.properties.push(Property {
            key: key.into_id(),
            flags,
            value,
        });

        self
    }

    /// Finish the object.
    pub fn build(self) -> Object {
        self.object
    }

    /// Finish the object wrapped as a [`Value`].
    pub fn build_value(self) -> Value {
        Value::Object(self.object)
    }
}
