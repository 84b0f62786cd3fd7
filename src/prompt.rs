//! Prompt construction for code-generation requests.

/// Builds the system instruction mandating a single fenced code block.
pub fn system_instruction(language: &str) -> String {
    format!(
        "You are a code generation engine. Write RUNNABLE {lang} code that completes the task \
         and prints its result.\n\
         OUTPUT FORMAT: Return ONLY the raw code inside a single ```{lang} fenced code block. \
         No explanations before or after the block.",
        lang = language
    )
}

/// Builds the fix directive quoting a previous failure.
pub fn error_directive(failure: &str) -> String {
    format!("PREVIOUS ERROR: {}\nFix this error.", failure)
}

/// Builds the user prompt from task, context and the previous failure, if any.
pub fn user_prompt(task: &str, context: Option<&str>, failure: Option<&str>) -> String {
    let directive = failure.map(error_directive).unwrap_or_default();
    format!(
        "TASK: {}\nCONTEXT: {}\n{}\nGenerate Code.",
        task,
        context.unwrap_or_default(),
        directive
    )
}
