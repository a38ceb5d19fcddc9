/// Response-style instructions appended to every generation request.
pub const RESPONSE_STYLE_INSTRUCTIONS: &str = "Please provide your response in a clear, \
conversational format. Also allows up to a list of 10 properties. Avoid using markdown \
syntax or special formatting. Use natural paragraphs and bullet points with simple \
dashes (-) when needed.";

/// Folds the loaded data context and the user's question into the single
/// prompt string both backends receive.
pub fn compose_request_prompt(prompt: &str, context: &str) -> String {
    format!("Context:\n{context}\n\nUser Question: {prompt}\n\n{RESPONSE_STYLE_INSTRUCTIONS}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composed_prompt_carries_question_context_and_instructions() {
        let composed = compose_request_prompt("Any homes near Tracy?", "listings: 3bd 2ba");

        assert!(composed.contains("User Question: Any homes near Tracy?"));
        assert!(composed.starts_with("Context:\nlistings: 3bd 2ba"));
        assert!(composed.ends_with(RESPONSE_STYLE_INSTRUCTIONS));
    }

    #[test]
    fn empty_context_still_produces_a_well_formed_prompt() {
        let composed = compose_request_prompt("hello", "");
        assert!(composed.starts_with("Context:\n\n"));
        assert!(composed.contains("User Question: hello"));
    }
}
