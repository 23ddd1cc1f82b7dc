pub mod id;

pub use id::AuthorId;
