//! Verso core: poems, per-user chat sessions, ordered turn history, and the
//! exchange pipeline that replays a conversation into a language model.

pub mod accounts;
pub mod catalog;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod model;
pub mod storage;
