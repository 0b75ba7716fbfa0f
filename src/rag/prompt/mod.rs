
use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::index::SearchHit;

/// System prompt used when the configuration does not provide one
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are ragterm, a terminal assistant that answers questions using only the \
context chunks supplied with each question.

Rules:
- Base every statement on the supplied chunks. If they do not contain the \
answer, say that the provided context does not cover it.
- Do not invent facts, file names, APIs or commands that are not in the chunks.
- Cite the chunks you used by their source, for example (source: docs/setup.md).
- Prefer short answers. Use plain text or simple Markdown that reads well in a terminal.
- Put code, commands and configuration in fenced code blocks.
- If the question is ambiguous, state the assumption you made.";

/// Default template for the user turn. Variables: `Query` and `Chunks`
/// (each with `ID`, `Source` and `Content`).
pub const DEFAULT_USER_PROMPT_TEMPLATE: &str = "USER QUERY:
{{ Query }}

CONTEXT:
{%- if Chunks %}
{%- for c in Chunks %}
----
CHUNK id={{ c.ID }} source={{ c.Source }}
TEXT: {{ c.Content }}
{%- endfor %}
----
{%- else %}
(no relevant chunks)
{%- endif %}";

const TEMPLATE_NAME: &str = "user_prompt";
const UNKNOWN_SOURCE: &str = "unknown";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("parse user prompt template: {0}")]
    TemplateParse(#[source] minijinja::Error),
    #[error("render user prompt template: {0}")]
    TemplateExecute(#[source] minijinja::Error),
}

/// Extracts `(source, ordinal)` from a hit's stored metadata
pub type MetaDecoder = fn(&str) -> (String, usize);

#[derive(Debug, Default, Deserialize)]
struct ChunkMeta {
    #[serde(default)]
    source: String,
    #[serde(default)]
    ordinal: usize,
}

/// Decode the `{source, ordinal}` metadata written by the embedding pipeline.
/// Anything unreadable decodes as an empty source and ordinal zero.
#[inline]
pub fn decode_chunk_meta(raw: &str) -> (String, usize) {
    let meta = serde_json::from_str::<ChunkMeta>(raw).unwrap_or_default();
    (meta.source, meta.ordinal)
}

#[derive(Debug, Serialize)]
struct TemplateChunk<'a> {
    #[serde(rename = "ID")]
    id: usize,
    #[serde(rename = "Source")]
    source: String,
    #[serde(rename = "Content")]
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct TemplateData<'a> {
    #[serde(rename = "Query")]
    query: &'a str,
    #[serde(rename = "Chunks")]
    chunks: Vec<TemplateChunk<'a>>,
}

/// Render the user turn for `query` with the retrieved `hits`.
///
/// A chunk's id is its ordinal, or its position in `hits` when the ordinal is
/// zero or no decoder is given. An empty source is shown as `unknown`.
/// The query and each chunk's content are trimmed.
#[inline]
pub fn build_user_prompt(
    query: &str,
    hits: &[SearchHit],
    decoder: Option<MetaDecoder>,
    template: Option<&str>,
) -> Result<String, PromptError> {
    let chunks = hits
        .iter()
        .enumerate()
        .map(|(position, hit)| {
            let (source, ordinal) = decoder.map(|decode| decode(&hit.meta)).unwrap_or_default();
            TemplateChunk {
                id: if ordinal == 0 { position } else { ordinal },
                source: if source.is_empty() {
                    UNKNOWN_SOURCE.to_string()
                } else {
                    source
                },
                content: hit.content.trim(),
            }
        })
        .collect();

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_template(TEMPLATE_NAME, template.unwrap_or(DEFAULT_USER_PROMPT_TEMPLATE))
        .map_err(PromptError::TemplateParse)?;

    env.get_template(TEMPLATE_NAME)
        .and_then(|t| t.render(TemplateData { query: query.trim(), chunks }))
        .map_err(PromptError::TemplateExecute)
}
