use super::error::ConfigError;

/// Resolve `${VAR}` and `${VAR:-fallback}` references from the environment.
///
/// An unset variable without a fallback is an error, so a missing secret
/// never silently becomes an empty auth header. An unterminated `${` is
/// copied through literally.
pub fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            result.push_str(&rest[start..]);
            return Ok(result);
        };

        let reference = &after[..end];
        let (name, fallback) = match reference.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (reference, None),
        };

        if name.is_empty() {
            result.push_str("${");
            result.push_str(reference);
            result.push('}');
        } else {
            match (std::env::var(name), fallback) {
                (Ok(value), _) => result.push_str(&value),
                (Err(_), Some(fallback)) => result.push_str(fallback),
                (Err(_), None) => {
                    return Err(ConfigError::UndefinedVariable {
                        name: name.to_string(),
                    })
                }
            }
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}
