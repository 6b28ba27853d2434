//! Raw identifiers of native-side objects.
//!
//! These are what actually crosses the engine boundary. They carry no
//! ownership; the RAII wrappers in [`crate::handle`] do. They're small, `Copy`
//! and hashable so engines can key their registries on them.

macro_rules! native_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw engine value. Only engines should mint ids.
            pub fn new(v: u64) -> Self {
                Self(v)
            }

            /// Return the underlying numeric value.
            pub fn raw(&self) -> u64 {
                self.0
            }
        }
    };
}

native_id!(
    /// Identifies one native array.
    ArrayId
);
native_id!(
    /// Identifies one native table.
    TableId
);
native_id!(
    /// Identifies the routing metadata a shuffle kept for later reversal.
    ShuffleInfoId
);
