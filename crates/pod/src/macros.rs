//! Macros used to declare identifier and flag types.

/// Declare transparent `u32` identifier types.
///
/// Each type carries a set of named constants, raw conversions and a `Debug`
/// implementation that prints the constant name when it is known.
#[macro_export]
macro_rules! __id {
    (
        $(
            $(#[$ty_meta:meta])*
            $vis:vis struct $ty:ident(u32) {
                $unknown:ident;
                $(
                    $(#[$field_meta:meta])*
                    $field:ident = $value:expr;
                )*
            }
        )*
    ) => {
        $(
            $(#[$ty_meta])*
            #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
            #[repr(transparent)]
            $vis struct $ty(u32);

            impl $ty {
                $(
                    $(#[$field_meta])*
                    $vis const $field: Self = Self($value);
                )*

                /// Convert the identifier into its raw value.
                #[inline]
                $vis const fn into_raw(self) -> u32 {
                    self.0
                }

                /// Convert a raw value into the identifier.
                #[inline]
                $vis const fn from_raw(value: u32) -> Self {
                    Self(value)
                }

                /// Test if the identifier is not one of the declared values.
                #[inline]
                $vis fn is_unknown(&self) -> bool {
                    match self.0 {
                        $($value => false,)*
                        _ => true,
                    }
                }
            }

            impl $crate::RawId for $ty {
                #[inline]
                fn into_id(self) -> u32 {
                    self.0
                }

                #[inline]
                fn from_id(value: u32) -> Self {
                    Self(value)
                }
            }

            impl core::fmt::Debug for $ty {
                fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                    match self.0 {
                        $($value => write!(f, "{}", stringify!($field)),)*
                        _ => write!(f, "{}({})", stringify!($unknown), self.0),
                    }
                }
            }
        )*
    };
}

pub use __id as id;

/// Declare transparent flag-set types.
#[macro_export]
macro_rules! __flags {
    (
        $(
            $(#[$ty_meta:meta])*
            $vis:vis struct $ty:ident($repr:ty) {
                $none:ident;
                $(
                    $(#[$field_meta:meta])*
                    $field:ident = $value:expr;
                )*
            }
        )*
    ) => {
        $(
            $(#[$ty_meta])*
            #[derive(Clone, Copy, Default, PartialEq, Eq)]
            #[repr(transparent)]
            $vis struct $ty($repr);

            impl $ty {
                /// Empty flags.
                $vis const $none: Self = Self(0);

                $(
                    $(#[$field_meta])*
                    $vis const $field: Self = Self($value);
                )*

                /// Test if the set contains another set.
                #[inline]
                $vis fn contains(self, other: Self) -> bool {
                    (self.0 & other.0) == other.0
                }

                /// Convert the flags into their raw representation.
                #[inline]
                $vis const fn into_raw(self) -> $repr {
                    self.0
                }

                /// Convert a raw representation into flags.
                #[inline]
                $vis const fn from_raw(value: $repr) -> Self {
                    Self(value)
                }

                /// Access bits in the set which carry no declared meaning.
                #[inline]
                $vis fn unknown_bits(&self) -> $repr {
                    self.0 $(& !$value)*
                }
            }

            impl core::ops::BitOr for $ty {
                type Output = Self;

                #[inline]
                fn bitor(self, rhs: Self) -> Self::Output {
                    Self(self.0 | rhs.0)
                }
            }

            impl core::ops::BitOrAssign for $ty {
                #[inline]
                fn bitor_assign(&mut self, rhs: Self) {
                    self.0 |= rhs.0;
                }
            }

            impl core::fmt::Debug for $ty {
                fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                    write!(f, "{}(", stringify!($ty))?;

                    let mut first = true;
                    let mut value = self.0;

                    $(
                        if $value != 0 && value & $value == $value {
                            if !first {
                                write!(f, " | ")?;
                            }

                            write!(f, "{}", stringify!($field))?;
                            value &= !$value;
                            first = false;
                        }
                    )*

                    if value != 0 {
                        if !first {
                            write!(f, " | ")?;
                        }

                        write!(f, "0x{:x}", value)?;
                    }

                    write!(f, ")")
                }
            }
        )*
    };
}

pub use __flags as flags;
