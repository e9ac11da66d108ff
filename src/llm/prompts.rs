//! LLM prompts for judging and page-grounded answering.

/// Collection of prompts used by the judge and the generator.
pub struct Prompts;

impl Prompts {
    /// System prompt for the hosted judge.
    pub fn system_judge() -> &'static str {
        "You are a strict, impartial grader. You only ever reply with a single JSON object."
    }

    /// Rubric prompt for scoring a generated answer against a reference answer.
    ///
    /// Placeholders: `{question}`, `{expected_answer}`, `{generated_answer}`.
    pub fn generation_judge() -> &'static str {
        r#"You are an expert evaluator assessing the quality of AI-generated answers in a document question-answering system.

## Task
Evaluate the GENERATED ANSWER against the REFERENCE ANSWER for the given QUESTION.

## Evaluation Criteria
Score each dimension with an integer from 1 to 5:

### Correctness (1-5)
- 5: Completely accurate, all facts match reference
- 4: Mostly accurate, minor omissions
- 3: Partially accurate, some incorrect details
- 2: Mostly incorrect, few accurate points
- 1: Completely incorrect or irrelevant

### Completeness (1-5)
- 5: Covers all key points from reference
- 4: Covers most key points
- 3: Covers some key points
- 2: Missing most key points
- 1: Missing all key points

### Relevance (1-5)
- 5: Directly addresses the question
- 4: Mostly relevant with minor tangents
- 3: Somewhat relevant
- 2: Mostly irrelevant
- 1: Completely off-topic

### Coherence (1-5)
- 5: Clear, well-structured, easy to follow
- 4: Generally clear with minor issues
- 3: Understandable but disorganized
- 2: Difficult to follow
- 1: Incoherent

## Input
QUESTION: {question}

REFERENCE ANSWER: {expected_answer}

GENERATED ANSWER: {generated_answer}

## Output Format
Respond with a JSON object ONLY (no additional text):
{
    "correctness": <1-5>,
    "completeness": <1-5>,
    "relevance": <1-5>,
    "coherence": <1-5>,
    "reasoning": "<brief explanation of scores>"
}"#
    }

    /// Instruction sent along with the page images to the vision-language model.
    ///
    /// Placeholder: `{question}`.
    pub fn page_answer() -> &'static str {
        r#"The images above are pages from a product or operations manual.
Answer the question using only information visible on these pages.
If the pages do not contain the answer, say so.

Question: {question}"#
    }

    /// Substitute `{name}` placeholders in a single pass.
    ///
    /// Values are inserted verbatim and never rescanned, so an answer that
    /// happens to contain `{question}` stays as written. Braces that do not
    /// name a known placeholder are kept.
    pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];

            let replacement = after.find('}').and_then(|close| {
                let name = &after[..close];
                vars.iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| (*value, close))
            });

            match replacement {
                Some((value, close)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }

        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_replaces_known_placeholders() {
        let filled = Prompts::fill("Q: {question} A: {answer}", &[("question", "why?"), ("answer", "because")]);
        assert_eq!(filled, "Q: why? A: because");
    }

    #[test]
    fn test_fill_keeps_json_braces() {
        let filled = Prompts::fill("{\n  \"a\": 1\n} {x}", &[("x", "y")]);
        assert_eq!(filled, "{\n  \"a\": 1\n} y");
    }

    #[test]
    fn test_fill_does_not_rescan_values() {
        let filled = Prompts::fill(
            "{generated_answer} / {question}",
            &[("question", "real"), ("generated_answer", "{question}")],
        );
        assert_eq!(filled, "{question} / real");
    }

    #[test]
    fn test_judge_prompt_has_all_placeholders() {
        let prompt = Prompts::generation_judge();
        for placeholder in ["{question}", "{expected_answer}", "{generated_answer}"] {
            assert!(prompt.contains(placeholder), "missing {}", placeholder);
        }
        for field in ["correctness", "completeness", "relevance", "coherence", "reasoning"] {
            assert!(prompt.contains(field));
        }
    }
}
