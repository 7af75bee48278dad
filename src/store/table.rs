//! Column family definitions for type-safe RocksDB operations.

use crate::store::codec::DbCodec;

/// Column Family trait for type-safe RocksDB operations.
/// Defines a column family together with codecs for its keys and values.
pub trait TypedCf {
    type Key: Clone + std::fmt::Debug;
    type Value: Clone + std::fmt::Debug;
    type KeyCodec: DbCodec<Self::Key>;
    type ValueCodec: DbCodec<Self::Value>;

    /// Column family name - must be unique across the database
    const NAME: &'static str;
}

/// Macro to define a TypedCf with the default codecs: order-preserving
/// key bytes and JSON values.
#[macro_export]
macro_rules! define_typed_cf {
    ($name:ident, $key:ty, $value:ty, $cf_name:literal) => {
        pub struct $name;

        impl $crate::store::table::TypedCf for $name {
            type Key = $key;
            type Value = $value;
            type KeyCodec = $crate::store::codec::OrderedKeyCodec;
            type ValueCodec = $crate::store::codec::JsonDbCodec;
            const NAME: &'static str = $cf_name;
        }
    };
}
