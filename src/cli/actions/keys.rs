use crate::keys::generate_encoded_key;
use secrecy::ExposeSecret;

/// Environment lines for a fresh, independent set of keys.
#[must_use]
pub fn render() -> String {
    [
        "STOREFRONT_PII_LOOKUP_KEY",
        "STOREFRONT_PII_ENCRYPTION_KEY",
        "STOREFRONT_TOKEN_SIGNING_KEY",
    ]
    .iter()
    .map(|name| format!("{name}={}\n", generate_encoded_key().expose_secret()))
    .collect()
}

pub fn execute() {
    print!("{}", render());
}
