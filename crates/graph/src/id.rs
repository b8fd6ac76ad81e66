use core::fmt;

macro_rules! id {
    (
        $($(#[$meta:meta])* $vis:vis struct $name:ident;)*
    ) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
            #[repr(transparent)]
            pub struct $name(u32);

            impl $name {
                #[doc = concat!(" Create a new `", stringify!($name), "` from a `u32`.")]
                #[inline]
                pub fn new(id: u32) -> Self {
                    Self(id)
                }

                #[doc = concat!(" Convert the `", stringify!($name), "` into a `u32`.")]
                #[inline]
                pub fn into_u32(self) -> u32 {
                    self.0
                }

                /// Get the index form of the identifier.
                ///
                /// Since it was constructed from a `u32`, it can always be
                /// safely coerced into one.
                #[inline]
                pub fn index(self) -> usize {
                    self.0 as usize
                }
            }

            impl fmt::Display for $name {
                #[inline]
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    self.0.fmt(f)
                }
            }

            impl fmt::Debug for $name {
                #[inline]
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    self.0.fmt(f)
                }
            }
        )*
    }
}

id! {
    /// A node identifier, stable for the lifetime of the node.
    pub struct NodeId;
    /// A port identifier, scoped to one direction of one node.
    pub struct PortId;
    /// A link identifier.
    pub struct LinkId;
    /// A mix-slot identifier, scoped to one port.
    pub struct MixId;
    /// An identifier of a block in the shared memory pool.
    pub struct MemId;
}
