use core::fmt;

use crate::ArenaIndex;

macro_rules! define_id {
    ($($(#[$outer:meta])* $vis:vis struct $name:ident;)*) => {
        $(
            $(#[$outer])*
            #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
            #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
            #[repr(transparent)]
            $vis struct $name(u32);

            impl $name {
                #[inline]
                pub const fn from_index(index: usize) -> Self {
                    Self(index as u32)
                }

                #[inline]
                pub const fn index(self) -> usize {
                    self.0 as usize
                }
            }

            impl ArenaIndex for $name {
                #[inline]
                fn from_index(index: usize) -> Self {
                    Self::from_index(index)
                }

                #[inline]
                fn index(self) -> usize {
                    self.index()
                }
            }

            impl fmt::Debug for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}({})", stringify!($name), self.0)
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    };
}

define_id! {
    /// Identifies a body within a world
    pub struct BodyId;
    /// Identifies a fixture within a world
    pub struct FixtureId;
    /// Identifies a joint within a world
    pub struct JointId;
    /// Identifies a contact and its manifold within a world
    pub struct ContactId;
}
