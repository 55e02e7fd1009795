//! Best-effort kind -> resource-name derivation.
//!
//! Guessing the plural resource name from a kind with suffix rules is lossy:
//! irregular plurals come out wrong (`Endpoints` is already plural, `Proxy`
//! pluralizes fine but `Datum` does not). Callers should supply the
//! authoritative resource name from real API discovery via
//! [`crate::apply::EngineConfig::resource_names`]; this fallback exists for
//! tests and quick embedding, nothing more.

/// Guesses the lowercase plural resource name for a kind.
///
/// Suffix rules only: trailing `s`/`x`/`z`/`ch`/`sh` take `es`, trailing
/// consonant + `y` becomes `ies`, everything else takes `s`.
#[must_use]
pub fn guess_resource(kind: &str) -> String {
    let lower = kind.to_ascii_lowercase();
    if lower.is_empty() {
        return lower;
    }

    if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with('z')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        return format!("{lower}es");
    }

    if let Some(stem) = lower.strip_suffix('y') {
        let penultimate = stem.chars().last();
        let vowel = matches!(penultimate, Some('a' | 'e' | 'i' | 'o' | 'u'));
        if !vowel && !stem.is_empty() {
            return format!("{stem}ies");
        }
    }

    format!("{lower}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_plural() {
        assert_eq!(guess_resource("Widget"), "widgets");
        assert_eq!(guess_resource("Deployment"), "deployments");
    }

    #[test]
    fn test_y_suffix() {
        assert_eq!(guess_resource("Policy"), "policies");
        assert_eq!(guess_resource("Gateway"), "gateways");
    }

    #[test]
    fn test_sibilant_suffix() {
        assert_eq!(guess_resource("Ingress"), "ingresses");
        assert_eq!(guess_resource("Batch"), "batches");
    }

    #[test]
    fn test_lossy_for_irregulars() {
        // Documented wrong answers: this is why discovery mappings win.
        assert_eq!(guess_resource("Endpoints"), "endpointses");
    }

    #[test]
    fn test_empty_kind() {
        assert_eq!(guess_resource(""), "");
    }
}
