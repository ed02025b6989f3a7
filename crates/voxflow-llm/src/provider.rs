//! Provider table and model-based routing
//!
//! A model identifier resolves to a provider in four steps: an explicit
//! provider tag from the profile wins when its credential is configured, a
//! fixed table of model-name substrings is scanned next, then openrouter
//! serves as the universal aggregator fallback, and finally deepseek as the
//! default. Resolution fails only when none of those have a credential.

use std::env;

use tracing::{debug, warn};

use crate::LlmError;

/// Static description of one LLM provider endpoint.
#[derive(Debug, Clone, Copy)]
struct ProviderSpec {
    name: &'static str,
    base_url: &'static str,
    api_key_env: &'static str,
}

const PROVIDERS: &[ProviderSpec] = &[
    ProviderSpec {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        api_key_env: "DEEPSEEK_API_KEY",
    },
    ProviderSpec {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        api_key_env: "OPENROUTER_API_KEY",
    },
    ProviderSpec {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        api_key_env: "OPENAI_API_KEY",
    },
    ProviderSpec {
        name: "zai",
        base_url: "https://api.z.ai/v1",
        api_key_env: "ZAI_API_KEY",
    },
];

/// Model-substring → provider auto-detection rules, scanned in order.
const MODEL_PROVIDER_HINTS: &[(&str, &str)] = &[
    ("deepseek", "deepseek"),
    ("gpt-", "openai"),
    ("o1", "openai"),
    ("o3", "openai"),
    ("claude", "openrouter"),
    ("anthropic/", "openrouter"),
    ("google/", "openrouter"),
    ("meta-llama/", "openrouter"),
    ("mistralai/", "openrouter"),
    ("qwen", "openrouter"),
    ("gemini", "openrouter"),
    ("llama", "openrouter"),
];

/// A provider resolved for one invocation, credential included.
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub name: &'static str,
    pub base_url: &'static str,
    pub api_key: String,
}

impl ResolvedProvider {
    /// The chat completions endpoint for this provider.
    #[must_use]
    pub fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// OpenRouter requires referer and title headers on every request.
    #[must_use]
    pub fn needs_referer_headers(&self) -> bool {
        self.name == "openrouter"
    }
}

fn spec_by_name(name: &str) -> Option<&'static ProviderSpec> {
    PROVIDERS.iter().find(|p| p.name == name)
}

/// Resolve which provider serves `model`.
///
/// # Errors
///
/// Returns `LlmError::Misconfiguration` when an explicitly requested provider
/// has no credential, and `LlmError::NoProviderConfigured` when neither the
/// hint table nor the fallbacks produce a configured provider.
pub fn resolve_provider(
    model: &str,
    explicit_provider: Option<&str>,
) -> Result<ResolvedProvider, LlmError> {
    resolve_with(model, explicit_provider, |var| {
        env::var(var).ok().filter(|v| !v.is_empty())
    })
}

/// Resolution with an injectable credential lookup, shared by tests.
fn resolve_with<F>(
    model: &str,
    explicit_provider: Option<&str>,
    lookup: F,
) -> Result<ResolvedProvider, LlmError>
where
    F: Fn(&str) -> Option<String>,
{
    let resolved = |spec: &'static ProviderSpec, api_key: String| ResolvedProvider {
        name: spec.name,
        base_url: spec.base_url,
        api_key,
    };

    // 1. Explicit provider tag from the profile.
    if let Some(name) = explicit_provider.filter(|n| !n.is_empty()) {
        if let Some(spec) = spec_by_name(name) {
            return match lookup(spec.api_key_env) {
                Some(key) => Ok(resolved(spec, key)),
                None => Err(LlmError::Misconfiguration(format!(
                    "provider '{}' selected but {} is not set",
                    name, spec.api_key_env
                ))),
            };
        }
    }

    // 2. Auto-detect from the model name; first configured match wins.
    let model_lower = model.to_lowercase();
    for (hint, provider_name) in MODEL_PROVIDER_HINTS {
        if model_lower.contains(hint) {
            let Some(spec) = spec_by_name(provider_name) else {
                continue;
            };
            match lookup(spec.api_key_env) {
                Some(key) => {
                    debug!(provider = provider_name, model, "auto-detected provider");
                    return Ok(resolved(spec, key));
                }
                None => {
                    warn!(
                        provider = provider_name,
                        model,
                        key_env = spec.api_key_env,
                        "auto-detected provider is not configured, trying fallbacks"
                    );
                }
            }
        }
    }

    // 3. OpenRouter as the universal aggregator fallback.
    if let Some(spec) = spec_by_name("openrouter") {
        if let Some(key) = lookup(spec.api_key_env) {
            debug!(model, "falling back to openrouter");
            return Ok(resolved(spec, key));
        }
    }

    // 4. Default provider.
    if let Some(spec) = spec_by_name("deepseek") {
        if let Some(key) = lookup(spec.api_key_env) {
            return Ok(resolved(spec, key));
        }
    }

    Err(LlmError::NoProviderConfigured {
        model: model.to_string(),
    })
}

/// Which providers have a configured credential, for readiness reporting.
#[must_use]
pub fn configured_providers() -> Vec<(&'static str, bool)> {
    PROVIDERS
        .iter()
        .map(|spec| {
            let configured = env::var(spec.api_key_env)
                .map(|v| !v.is_empty())
                .unwrap_or(false);
            (spec.name, configured)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |var| map.get(var).map(|v| (*v).to_string())
    }

    #[test]
    fn explicit_provider_wins_when_configured() {
        let resolved = resolve_with(
            "deepseek-chat",
            Some("openai"),
            lookup_from(&[("OPENAI_API_KEY", "k1"), ("DEEPSEEK_API_KEY", "k2")]),
        )
        .unwrap();
        assert_eq!(resolved.name, "openai");
        assert_eq!(resolved.api_key, "k1");
    }

    #[test]
    fn explicit_provider_without_credential_errors() {
        let err = resolve_with(
            "deepseek-chat",
            Some("openai"),
            lookup_from(&[("DEEPSEEK_API_KEY", "k2")]),
        )
        .unwrap_err();
        assert!(matches!(err, LlmError::Misconfiguration(_)));
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn model_hints_route_by_substring() {
        let lookup = lookup_from(&[
            ("DEEPSEEK_API_KEY", "d"),
            ("OPENAI_API_KEY", "o"),
            ("OPENROUTER_API_KEY", "r"),
        ]);
        assert_eq!(
            resolve_with("deepseek-reasoner", None, &lookup).unwrap().name,
            "deepseek"
        );
        assert_eq!(resolve_with("gpt-4o", None, &lookup).unwrap().name, "openai");
        assert_eq!(
            resolve_with("anthropic/claude-sonnet-4", None, &lookup)
                .unwrap()
                .name,
            "openrouter"
        );
        assert_eq!(
            resolve_with("google/gemini-2.0-flash-001", None, &lookup)
                .unwrap()
                .name,
            "openrouter"
        );
    }

    #[test]
    fn unconfigured_hint_falls_through_to_openrouter() {
        // gpt-* detects openai, but only openrouter has a key.
        let resolved = resolve_with(
            "gpt-4o",
            None,
            lookup_from(&[("OPENROUTER_API_KEY", "r")]),
        )
        .unwrap();
        assert_eq!(resolved.name, "openrouter");
    }

    #[test]
    fn unknown_model_defaults_to_deepseek() {
        let resolved = resolve_with(
            "mystery-model-9000",
            None,
            lookup_from(&[("DEEPSEEK_API_KEY", "d")]),
        )
        .unwrap();
        assert_eq!(resolved.name, "deepseek");
    }

    #[test]
    fn nothing_configured_is_an_error() {
        let err = resolve_with("gpt-4o", None, lookup_from(&[])).unwrap_err();
        match err {
            LlmError::NoProviderConfigured { model } => assert_eq!(model, "gpt-4o"),
            other => panic!("expected NoProviderConfigured, got {other:?}"),
        }
    }

    #[test]
    fn openrouter_carries_extra_headers() {
        let resolved = resolve_with(
            "qwen/qwen3-235b-a22b",
            None,
            lookup_from(&[("OPENROUTER_API_KEY", "r")]),
        )
        .unwrap();
        assert!(resolved.needs_referer_headers());
        assert_eq!(
            resolved.chat_url(),
            "https://openrouter.ai/api/v1/chat/completions"
        );
    }
}
