pub mod deserializer;
pub mod format;
pub mod serializer;
