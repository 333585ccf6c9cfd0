//! Naive shell-style command tokenizer.
//!
//! Splits on unquoted whitespace and honors single and double quotes (quotes
//! group, they do not nest or escape). This is deliberately not a shell: no
//! expansion, no pipelines, no redirection syntax.

pub(crate) fn tokenize(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;

    for ch in command.chars() {
        if ch == '\'' && !in_double {
            in_single = !in_single;
        } else if ch == '"' && !in_single {
            in_double = !in_double;
        } else if ch.is_whitespace() && !in_single && !in_double {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(ch);
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::tokenize;

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(tokenize("echo Hello world"), ["echo", "Hello", "world"]);
        assert_eq!(tokenize("  ls   -la  "), ["ls", "-la"]);
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn double_quotes_group_words() {
        assert_eq!(
            tokenize("bash -c \"echo to-out; echo to-err >&2\""),
            ["bash", "-c", "echo to-out; echo to-err >&2"]
        );
    }

    #[test]
    fn single_quotes_preserve_double_quotes() {
        assert_eq!(tokenize("echo 'a \"b\" c'"), ["echo", "a \"b\" c"]);
    }
}
