pub mod auth;
pub mod authors;
pub mod books;
