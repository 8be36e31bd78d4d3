/// Replace `${ENV_VAR}` placeholders in config string values.
///
/// Unresolvable variables are left as-is.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// Replace `${ENV_VAR}` placeholders using a custom lookup function.
///
/// This is the implementation used by [`substitute_env`]; the separate
/// signature makes it testable without mutating the process environment.
fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match lookup(name) {
                    Some(val) => result.push_str(&val),
                    None => {
                        result.push_str("${");
                        result.push_str(name);
                        result.push('}');
                    },
                }
                rest = &after[end + 1..];
            },
            _ => {
                // Malformed or empty placeholder: emit the marker literally.
                result.push_str("${");
                rest = after;
            },
        }
    }
    result.push_str(rest);

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "ENGINE_PROXY_TOKEN" => Some("s3cret".to_string()),
            "ENGINE_HOST" => Some("engine.local".to_string()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(
            substitute_env_with("auth_token = \"${ENGINE_PROXY_TOKEN}\"", lookup),
            "auth_token = \"s3cret\""
        );
    }

    #[test]
    fn substitutes_several_vars_on_one_line() {
        assert_eq!(
            substitute_env_with("http://${ENGINE_HOST}/${ENGINE_PROXY_TOKEN}", lookup),
            "http://engine.local/s3cret"
        );
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_env_with("${COMMBRIDGE_NONEXISTENT_XYZ}", lookup),
            "${COMMBRIDGE_NONEXISTENT_XYZ}"
        );
    }

    #[test]
    fn keeps_unterminated_and_empty_placeholders() {
        assert_eq!(substitute_env_with("a ${ b", lookup), "a ${ b");
        assert_eq!(substitute_env_with("${}", lookup), "${}");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
