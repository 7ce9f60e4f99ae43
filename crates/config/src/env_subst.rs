/// Replace `${ENV_VAR}` placeholders in raw config text.
///
/// Unresolvable variables are left as-is. `$${NAME}` is an escape and yields
/// the literal `${NAME}`.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// Same as [`substitute_env`] with an explicit lookup, so tests don't have to
/// touch the process environment.
pub(crate) fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(escaped) = tail.strip_prefix("$${") {
            result.push_str("${");
            rest = escaped;
            continue;
        }

        let Some(body) = tail.strip_prefix("${") else {
            result.push('$');
            rest = &tail[1..];
            continue;
        };

        match body.find('}') {
            Some(end) if end > 0 => {
                let name = &body[..end];
                match lookup(name) {
                    Some(value) => result.push_str(&value),
                    None => {
                        result.push_str("${");
                        result.push_str(name);
                        result.push('}');
                    },
                }
                rest = &body[end + 1..];
            },
            // `${}` or an unterminated placeholder: emit literally.
            _ => {
                result.push_str("${");
                rest = body;
            },
        }
    }

    result.push_str(rest);
    result
}
