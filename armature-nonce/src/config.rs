use crate::error::{NonceError, Result};
use std::env;

/// Default nonce lifetime: one day.
pub const DEFAULT_LIFETIME: i64 = 86_400;

/// Default text shown when a guarded request is rejected.
pub const DEFAULT_MESSAGE: &str = "Are you sure you want to do this?";

/// Environment variable overriding the lifetime, in seconds.
pub const ENV_LIFETIME: &str = "ARMATURE_NONCE_LIFETIME";

/// Environment variable overriding the rejection message.
pub const ENV_MESSAGE: &str = "ARMATURE_NONCE_MESSAGE";

/// Nonce lifetime and presentation settings.
///
/// Built once at startup and shared behind an `Arc` by every issuer and
/// guard; there is no process-wide mutable state.
#[derive(Debug, Clone)]
pub struct NonceOptions {
    /// Token lifetime in seconds. A token stays valid for at most this long.
    lifetime: i64,

    /// Message returned with aborted requests
    message: String,

    /// Default field / query parameter name carrying the nonce
    pub field_name: String,

    /// Field name of the rendered referer input
    pub referer_field_name: String,

    /// Field checked first by AJAX verification
    pub ajax_field_name: String,

    /// Header checked before any field
    pub header_name: String,

    /// Origin of the administration area, used by the legacy admin referer check
    pub admin_origin: Option<String>,
}

impl NonceOptions {
    /// Create options with the given lifetime and rejection message.
    pub fn new(lifetime: i64, message: impl Into<String>) -> Result<Self> {
        Ok(Self {
            lifetime: validate_lifetime(lifetime)?,
            message: message.into(),
            ..Self::default()
        })
    }

    /// Load defaults, overridden by `ARMATURE_NONCE_LIFETIME` and
    /// `ARMATURE_NONCE_MESSAGE` when set.
    pub fn from_env() -> Result<Self> {
        let mut options = Self::default();

        if let Ok(raw) = env::var(ENV_LIFETIME) {
            let lifetime = raw.trim().parse::<i64>().map_err(|_| {
                NonceError::InvalidConfiguration(format!(
                    "{} must be an integer number of seconds, got '{}'",
                    ENV_LIFETIME, raw
                ))
            })?;
            options = options.with_lifetime(lifetime)?;
        }

        if let Ok(message) = env::var(ENV_MESSAGE) {
            options = options.with_message(message);
        }

        Ok(options)
    }

    /// Token lifetime in seconds.
    pub fn lifetime(&self) -> i64 {
        self.lifetime
    }

    /// Rejection message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Length of one tick in seconds (half the lifetime, at least one second).
    pub fn tick_length(&self) -> i64 {
        (self.lifetime / 2).max(1)
    }

    /// Swap the stock confirmation text for the configured message.
    /// Any other text is returned unchanged.
    pub fn translate<'a>(&'a self, text: &'a str) -> &'a str {
        if text == DEFAULT_MESSAGE {
            self.message.as_str()
        } else {
            text
        }
    }

    /// Set lifetime
    pub fn with_lifetime(mut self, lifetime: i64) -> Result<Self> {
        self.lifetime = validate_lifetime(lifetime)?;
        Ok(self)
    }

    /// Set rejection message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Set field name
    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    /// Set referer field name
    pub fn with_referer_field_name(mut self, name: impl Into<String>) -> Self {
        self.referer_field_name = name.into();
        self
    }

    /// Set AJAX field name
    pub fn with_ajax_field_name(mut self, name: impl Into<String>) -> Self {
        self.ajax_field_name = name.into();
        self
    }

    /// Set header name
    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// Set admin origin
    pub fn with_admin_origin(mut self, origin: impl Into<String>) -> Self {
        self.admin_origin = Some(origin.into());
        self
    }
}

impl Default for NonceOptions {
    fn default() -> Self {
        Self {
            lifetime: DEFAULT_LIFETIME,
            message: DEFAULT_MESSAGE.to_string(),
            field_name: "_nonce".to_string(),
            referer_field_name: "_nonce_http_referer".to_string(),
            ajax_field_name: "_ajax_nonce".to_string(),
            header_name: "X-Nonce".to_string(),
            admin_origin: None,
        }
    }
}

fn validate_lifetime(lifetime: i64) -> Result<i64> {
    if lifetime <= 0 {
        return Err(NonceError::InvalidConfiguration(format!(
            "nonce lifetime must be positive, got {}",
            lifetime
        )));
    }
    Ok(lifetime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = NonceOptions::default();
        assert_eq!(options.lifetime(), 86_400);
        assert_eq!(options.message(), DEFAULT_MESSAGE);
        assert_eq!(options.field_name, "_nonce");
        assert_eq!(options.tick_length(), 43_200);
    }

    #[test]
    fn test_rejects_non_positive_lifetime() {
        assert!(matches!(
            NonceOptions::new(0, DEFAULT_MESSAGE),
            Err(NonceError::InvalidConfiguration(_))
        ));
        assert!(NonceOptions::new(-60, DEFAULT_MESSAGE).is_err());
        assert!(NonceOptions::default().with_lifetime(0).is_err());
    }

    #[test]
    fn test_builder() {
        let options = NonceOptions::new(60, "Really?")
            .unwrap()
            .with_field_name("_token")
            .with_header_name("X-Token")
            .with_admin_origin("https://example.com/admin");

        assert_eq!(options.lifetime(), 60);
        assert_eq!(options.tick_length(), 30);
        assert_eq!(options.field_name, "_token");
        assert_eq!(options.header_name, "X-Token");
        assert_eq!(
            options.admin_origin.as_deref(),
            Some("https://example.com/admin")
        );
    }

    #[test]
    fn test_one_second_lifetime_has_one_second_tick() {
        let options = NonceOptions::new(1, DEFAULT_MESSAGE).unwrap();
        assert_eq!(options.tick_length(), 1);
    }

    #[test]
    fn test_translate_only_replaces_stock_message() {
        let options = NonceOptions::default().with_message("Link expired.");
        assert_eq!(options.translate(DEFAULT_MESSAGE), "Link expired.");
        assert_eq!(options.translate("Something else"), "Something else");
    }
}
