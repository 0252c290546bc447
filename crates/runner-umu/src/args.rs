/// Splits a raw argument string into tokens the way the shortcut editor
/// accepts them: double quotes group spaces into one token, a quote
/// boundary on either side ends any token in progress, and a quoted
/// empty string survives as an empty argument. There is no escape
/// syntax; an unmatched quote groups through the end of the string.
pub fn split_command_arguments(raw: &str) -> Vec<String> {
    let mut tokens = vec![String::new()];
    let mut in_quotes = false;

    for ch in raw.chars() {
        match ch {
            '"' => {
                if in_quotes {
                    in_quotes = false;
                    tokens.push(String::new());
                } else {
                    in_quotes = true;
                    if tokens.last().is_some_and(|token| !token.is_empty()) {
                        tokens.push(String::new());
                    }
                }
            }
            ' ' if !in_quotes => {
                if tokens.last().is_some_and(|token| !token.is_empty()) {
                    tokens.push(String::new());
                }
            }
            _ => {
                if let Some(token) = tokens.last_mut() {
                    token.push(ch);
                }
            }
        }
    }

    // Only the trailing separator artifact is dropped; interior empty
    // tokens are deliberate arguments.
    if tokens.last().is_some_and(|token| token.is_empty()) {
        tokens.pop();
    }
    tokens
}
