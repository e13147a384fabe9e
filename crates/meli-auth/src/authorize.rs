//! Authorization URL construction and pasted-code intake
//!
//! The user opens the URL, consents, and MercadoLibre redirects the
//! browser to `redirect_uri?code=...`. Nothing here listens for that
//! redirect; the code comes back through `parse_authorization_input`.

use crate::constants::CODE_CHALLENGE_METHOD;

/// Build the authorization URL for the PKCE flow.
///
/// Query values use `application/x-www-form-urlencoded` rules: reserved
/// characters are percent-encoded and a space becomes `+`.
pub fn build_authorization_url(
    endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    challenge: &str,
) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs([
            ("response_type", "code"),
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("code_challenge", challenge),
            ("code_challenge_method", CODE_CHALLENGE_METHOD),
        ])
        .finish();

    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{separator}{query}")
}

/// Extract the authorization code from what the user pasted.
///
/// Accepts the bare code, the full redirect URL (`...?code=TG-...&state=...`),
/// or a bare query string. Returns `None` for blank input or a URL without
/// a `code` parameter.
pub fn parse_authorization_input(input: &str) -> Option<String> {
    let value = input.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(url) = url::Url::parse(value) {
        return url
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.trim().to_owned())
            .filter(|v| !v.is_empty());
    }

    if value.contains("code=") {
        let query = value.trim_start_matches('?');
        return url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.trim().to_owned())
            .filter(|v| !v.is_empty());
    }

    // Some providers hand back `code#state`
    let code = value.split('#').next().unwrap_or(value).trim();
    (!code.is_empty()).then(|| code.to_owned())
}
