//! Utility helpers: serialization helpers (JSON/file serializers).
pub mod serialization;

pub use serialization::FileSerializer;
pub use serialization::FileUtils;
pub use serialization::JsonSerializer;
pub use serialization::PrettyJsonSerializer;
pub use serialization::Serializer;
