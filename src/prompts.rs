//! System prompts for the summarization capability.

/// System role for the distillation call. The model acts as a neutral
/// clerk condensing one round of discussion.
pub const DISTILLATION_SYSTEM_PROMPT: &str = "You are a strictly neutral, \
rigorous clerk who distills discussion rounds into structured digests. You \
never take sides and you never invent positions that were not expressed.";

use crate::storage::Comment;

/// Build the user prompt for one round of comments.
///
/// The prompt pins the exact JSON shape the engine validates against; any
/// deviation is rejected as a malformed response.
pub fn build_distillation_prompt(comments: &[Comment]) -> String {
    let comment_texts = comments
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, c.content))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Your entire reply must be a single parseable JSON object with exactly this structure, with no surrounding prose or Markdown fences:

{{
  "consensus": "The core agreement most of these comments share. If there is no clear consensus, describe the state of the discussion objectively.",
  "disagreements": [
    {{
      "point": "A main point of contention.",
      "views": ["One position on it", "An opposing or alternative position"]
    }}
  ],
  "new_questions": [
    "A valuable open question raised by the discussion, suitable for the next round"
  ],
  "confidence_score": 0.85
}}

Below are {} comments on the same subject. Distill them:

{}

Requirements:
- Remain strictly neutral
- Be logically rigorous
- Lose no substantive information
- Keep the language concise
"#,
        comments.len(),
        comment_texts
    )
}
