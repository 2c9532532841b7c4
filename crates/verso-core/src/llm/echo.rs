//! Offline provider: answers without any network access. Handy for local
//! development and for exercising the chat pipeline end to end.

use super::{FragmentStream, MessageRole, ModelRequest};
use crate::error::Result;

pub(crate) fn reply(request: &ModelRequest) -> String {
    let question = request.last_user_message().unwrap_or_default().trim();
    let earlier = request
        .messages
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .count()
        .saturating_sub(1);
    format!("You asked: \"{question}\". This is an offline reply; the conversation so far has {earlier} earlier messages.")
}

/// The same reply, delivered word by word.
pub(crate) fn stream(request: &ModelRequest) -> FragmentStream {
    let fragments: Vec<Result<String>> = reply(request)
        .split_inclusive(' ')
        .map(|word| Ok(word.to_string()))
        .collect();
    Box::pin(futures_util::stream::iter(fragments))
}
