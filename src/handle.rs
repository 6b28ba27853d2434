//! Move-only ownership tokens for native objects.
//!
//! A handle owns exactly one reference to a native array, table or shuffle
//! info. Dropping it releases that reference; [`into_raw`](ArrayHandle::into_raw)
//! hands the reference to someone else instead. Since handles are neither
//! `Clone` nor `Copy`, a reference cannot be released twice through them.
//!
//! Release failures during `drop` can only be logged. Callers that need to see
//! them use the explicit functions in [`crate::lifetime`].

use crate::ids::{ArrayId, ShuffleInfoId, TableId};
use crate::native::NativeEngine;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

macro_rules! owned_handle {
    ($(#[$meta:meta])* $name:ident, $id:ty, $release:ident, $what:literal) => {
        $(#[$meta])*
        pub struct $name {
            id: $id,
            live: bool,
            engine: Arc<dyn NativeEngine>,
        }

        impl $name {
            /// Take ownership of a raw reference.
            pub fn from_raw(id: $id, engine: Arc<dyn NativeEngine>) -> Self {
                Self {
                    id,
                    live: true,
                    engine,
                }
            }

            pub fn id(&self) -> $id {
                self.id
            }

            /// Give up ownership without releasing; the caller now owns the reference.
            pub fn into_raw(mut self) -> $id {
                self.live = false;
                self.id
            }

            pub(crate) fn engine(&self) -> &Arc<dyn NativeEngine> {
                &self.engine
            }

            /// Release now and report the engine's answer.
            pub(crate) fn release(mut self) -> anyhow::Result<()> {
                self.live = false;
                self.engine.$release(self.id)
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                if !self.live {
                    return;
                }
                if let Err(e) = self.engine.$release(self.id) {
                    warn!(id = self.id.raw(), error = %e, "failed to release native {}", $what);
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("id", &self.id.raw())
                    .field("live", &self.live)
                    .finish()
            }
        }
    };
}

owned_handle!(
    /// Owns one native array reference.
    ArrayHandle,
    ArrayId,
    delete_info,
    "array"
);

owned_handle!(
    /// Owns one native table; releasing it releases the columns it still holds.
    TableHandle,
    TableId,
    delete_table,
    "table"
);

owned_handle!(
    /// Owns routing metadata kept by a shuffle.
    ShuffleInfoHandle,
    ShuffleInfoId,
    delete_shuffle_info,
    "shuffle info"
);
