//! Built-in prompt templates for the default pipeline
//!
//! Each note type has an embedded template used when no override exists at
//! `<config>/prompts/standard/<type>.md`. Templates carry a `{transcript}`
//! placeholder substituted literally, never format-interpreted, so braces
//! inside spoken content cannot break the prompt.

const MEETING: &str = r#"You are given the transcript of a meeting with speaker labels.
Produce clear, well-structured meeting notes in markdown with these sections:

## Summary
Two or three sentences capturing what the meeting was about and what was decided.

## Attendees
List the speakers and, where the conversation makes it clear, who they are.

## Discussion
The main topics in the order they came up, with the key points under each.

## Decisions
Every decision reached, one bullet per decision.

## Action Items
Each action item as `- [ ] owner: task`, using the speaker label when no name is known.

Keep the original meaning; do not invent content that is not in the transcript.

Transcript:

{transcript}"#;

const SUPERVISION: &str = r#"You are given the transcript of a supervision session.
Write structured supervision notes in markdown:

## Session Overview
When and what the session covered, in two sentences.

## Topics Discussed
Each topic with a short paragraph of what was explored.

## Reflections
Points of reflection or insight raised during the session.

## Agreed Actions
Concrete follow-ups with owners where stated.

Use a professional, neutral register. Do not add interpretation beyond the transcript.

Transcript:

{transcript}"#;

const CLIENT: &str = r#"You are given the transcript of a client session with speaker labels.
Produce concise client session notes in markdown:

## Presenting Topics
What the client brought to the session.

## Key Discussion
The substance of the conversation, organized by theme.

## Observations
Notable statements or changes, quoted or closely paraphrased.

## Next Steps
Agreed follow-ups and any scheduled future work.

Be factual and avoid diagnostic language not present in the transcript.

Transcript:

{transcript}"#;

const LECTURE: &str = r#"You are given the transcript of a lecture.
Rewrite it as structured study notes in markdown:

# Title
Derive a short descriptive title from the content.

## Overview
A paragraph summarizing the lecture's scope.

## Key Concepts
Each concept as a subsection with a clear explanation in your own words.

## Examples
Worked examples or case studies mentioned, with their point.

## Takeaways
A bullet list of the most important things to remember.

Preserve technical accuracy; keep all formulas and definitions.

Transcript:

{transcript}"#;

const BRAINDUMP: &str = r#"You are given the transcript of a spoken braindump.
Organize it into tidy markdown notes:

## Main Ideas
Group related thoughts under short headings.

## Tasks
Anything that sounds like a todo as `- [ ] task`.

## Questions
Open questions the speaker raised.

Clean up filler words and repetition but keep every distinct idea.

Transcript:

{transcript}"#;

/// The embedded template for a built-in note type.
#[must_use]
pub fn builtin_prompt(note_type: &str) -> Option<&'static str> {
    match note_type {
        "meeting" => Some(MEETING),
        "supervision" => Some(SUPERVISION),
        "client" => Some(CLIENT),
        "lecture" => Some(LECTURE),
        "braindump" => Some(BRAINDUMP),
        _ => None,
    }
}
