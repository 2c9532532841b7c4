use super::ExchangeSettings;
use crate::llm::{ModelMessage, ModelRequest};
use crate::model::{Poem, Role, Turn};

const POEM_OPEN: &str = "<<<POEM";
const POEM_CLOSE: &str = "POEM>>>";

/// Persona, poem identity, and the poem text exactly as stored.
pub fn system_instruction(settings: &ExchangeSettings, poem: &Poem) -> String {
    format!(
        "{persona}\nAlways answer in {language}.\n\n\
         The conversation is about the poem \"{title}\" by {author}. \
         Its full text is given verbatim between {POEM_OPEN} and {POEM_CLOSE}.\n\n\
         {POEM_OPEN}\n{content}\n{POEM_CLOSE}",
        persona = settings.persona.trim(),
        language = settings.language,
        title = poem.title,
        author = poem.author,
        content = poem.content,
    )
}

/// Assemble the model request: system instruction, prior turns in order,
/// then the new question. Consecutive turns of the same role are kept as-is.
pub fn build_request(
    settings: &ExchangeSettings,
    poem: &Poem,
    history: &[Turn],
    question: &str,
) -> ModelRequest {
    let mut messages: Vec<ModelMessage> = history
        .iter()
        .map(|turn| match turn.role {
            Role::User => ModelMessage::user(turn.content.clone()),
            Role::Model => ModelMessage::assistant(turn.content.clone()),
        })
        .collect();
    messages.push(ModelMessage::user(question));

    ModelRequest {
        system: system_instruction(settings, poem),
        messages,
    }
}
