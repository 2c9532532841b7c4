mod chat;
mod poem;
mod reader;
mod user;

pub use chat::*;
pub use poem::*;
pub use reader::*;
pub use user::*;

#[cfg(test)]
mod tests;
