//! Collaborators the nonce subsystem depends on, and the context binding
//! them to a codec.

use crate::codec::{TokenCodec, VerifyResult};
use crate::config::NonceOptions;
use crate::error::{NonceError, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, warn};

/// Supplies the identity of the acting user or session.
pub trait SessionProvider: Send + Sync {
    fn current_identity(&self) -> String;
}

/// Supplies the per-installation signing secret.
pub trait SecretProvider: Send + Sync {
    fn current_secret(&self) -> Vec<u8>;
}

/// Read access to the request being handled.
pub trait RequestContext {
    /// Request URI (path and query) as sent by the client.
    fn current_uri(&self) -> String;

    /// Header value, matched case-insensitively.
    fn header(&self, name: &str) -> Option<String>;

    /// `Referer` header, if any.
    fn referer_header(&self) -> Option<String> {
        self.header("Referer")
    }

    /// Query string parameter.
    fn query_param(&self, name: &str) -> Option<String>;

    /// Form or JSON body field.
    fn body_param(&self, name: &str) -> Option<String>;

    /// Query parameter, falling back to the body.
    fn request_param(&self, name: &str) -> Option<String> {
        self.query_param(name).or_else(|| self.body_param(name))
    }
}

/// Source of the current unix time in seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Fixed identity, for single-user tools and tests.
#[derive(Debug, Clone)]
pub struct StaticSession(pub String);

impl SessionProvider for StaticSession {
    fn current_identity(&self) -> String {
        self.0.clone()
    }
}

/// Secret held in memory.
#[derive(Clone)]
pub struct StaticSecret {
    secret: Vec<u8>,
}

impl StaticSecret {
    /// Wrap a secret, rejecting empty or short keys.
    pub fn new(secret: Vec<u8>) -> Result<Self> {
        if secret.len() < 32 {
            return Err(NonceError::InvalidConfiguration(
                "Secret key must be at least 32 bytes".to_string(),
            ));
        }
        Ok(Self { secret })
    }

    /// Generate a random 32 byte secret.
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        Self {
            secret: (0..32).map(|_| rng.r#gen()).collect(),
        }
    }
}

impl SecretProvider for StaticSecret {
    fn current_secret(&self) -> Vec<u8> {
        self.secret.clone()
    }
}

// Secrets must never end up in logs.
impl std::fmt::Debug for StaticSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSecret")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// In-memory request, used by handlers that are not wired to a server type
/// and by tests.
#[derive(Debug, Clone, Default)]
pub struct NonceRequest {
    pub method: String,
    pub uri: String,
    pub headers: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl NonceRequest {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let query_params: HashMap<String, String> = uri
            .split_once('?')
            .and_then(|(_, query)| serde_urlencoded::from_str::<Vec<(String, String)>>(query).ok())
            .map(|pairs| pairs.into_iter().collect())
            .unwrap_or_default();

        Self {
            method: method.into(),
            uri,
            query_params,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// URL-encoded form body.
    pub fn with_form(self, fields: &[(&str, &str)]) -> Self {
        let body = serde_urlencoded::to_string(fields).unwrap_or_default();
        self.with_body(body.into_bytes())
    }
}

impl RequestContext for NonceRequest {
    fn current_uri(&self) -> String {
        self.uri.clone()
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    fn query_param(&self, name: &str) -> Option<String> {
        self.query_params.get(name).cloned()
    }

    fn body_param(&self, name: &str) -> Option<String> {
        if self.body.is_empty() {
            return None;
        }

        // Try to parse as JSON
        if let Ok(json) = serde_json::from_slice::<serde_json::Value>(&self.body) {
            return json
                .get(name)
                .and_then(|value| value.as_str())
                .map(|s| s.to_string());
        }

        // Try to parse as form data
        if let Ok(form_data) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(&self.body) {
            return form_data
                .into_iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value);
        }

        None
    }
}

/// Options, collaborators and codec shared by the issuer and the guard.
#[derive(Clone)]
pub struct NonceContext {
    codec: TokenCodec,
    options: Arc<NonceOptions>,
    session: Arc<dyn SessionProvider>,
    secrets: Arc<dyn SecretProvider>,
    clock: Arc<dyn Clock>,
}

impl NonceContext {
    pub fn new(
        options: NonceOptions,
        session: Arc<dyn SessionProvider>,
        secrets: Arc<dyn SecretProvider>,
    ) -> Self {
        let options = Arc::new(options);
        Self {
            codec: TokenCodec::new(options.clone()),
            options,
            session,
            secrets,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &NonceOptions {
        &self.options
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Tick index right now.
    pub fn current_window(&self) -> i64 {
        self.codec.window(self.clock.now())
    }

    /// Mint a nonce for the current identity and tick.
    pub fn create(&self, action: &str) -> Result<String> {
        let window = self.current_window();
        let token = self.codec.mint(
            &self.session.current_identity(),
            action,
            window,
            &self.secrets.current_secret(),
        )?;
        debug!(action = %action, window, "Minted nonce");
        Ok(token)
    }

    /// Verify a nonce for the current identity against the current and
    /// previous tick.
    pub fn verify(&self, token: &str, action: &str) -> Result<VerifyResult> {
        let result = self.codec.verify(
            token,
            &self.session.current_identity(),
            action,
            &self.secrets.current_secret(),
            self.current_window(),
        )?;

        match result {
            VerifyResult::Invalid => warn!(action = %action, "Nonce verification failed"),
            valid => debug!(action = %action, result = ?valid, "Nonce verified"),
        }

        Ok(result)
    }
}

impl std::fmt::Debug for NonceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceContext")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(clock: Arc<ManualClock>) -> NonceContext {
        NonceContext::new(
            NonceOptions::new(60, "Sure?").unwrap(),
            Arc::new(StaticSession("7".to_string())),
            Arc::new(StaticSecret::generate()),
        )
        .with_clock(clock)
    }

    #[test]
    fn test_create_then_verify() {
        let clock = Arc::new(ManualClock::new(1_000_020));
        let ctx = context(clock.clone());

        let token = ctx.create("publish").unwrap();
        assert_eq!(ctx.verify(&token, "publish").unwrap(), VerifyResult::Fresh);
        assert_eq!(ctx.verify(&token, "unpublish").unwrap(), VerifyResult::Invalid);

        clock.advance(30);
        assert_eq!(ctx.verify(&token, "publish").unwrap(), VerifyResult::Aging);

        clock.advance(31);
        assert_eq!(ctx.verify(&token, "publish").unwrap(), VerifyResult::Invalid);
    }

    #[test]
    fn test_identity_is_bound() {
        let secret: Arc<dyn SecretProvider> = Arc::new(StaticSecret::generate());
        let alice = NonceContext::new(
            NonceOptions::default(),
            Arc::new(StaticSession("alice".to_string())),
            secret.clone(),
        );
        let bob = NonceContext::new(
            NonceOptions::default(),
            Arc::new(StaticSession("bob".to_string())),
            secret,
        );

        let token = alice.create("transfer").unwrap();
        assert!(alice.verify(&token, "transfer").unwrap().is_valid());
        assert_eq!(bob.verify(&token, "transfer").unwrap(), VerifyResult::Invalid);
    }

    #[test]
    fn test_static_secret_rules() {
        assert!(StaticSecret::new(vec![1, 2, 3]).is_err());
        assert!(StaticSecret::new(vec![0u8; 32]).is_ok());
        assert_eq!(StaticSecret::generate().current_secret().len(), 32);

        let debug = format!("{:?}", StaticSecret::new(vec![7u8; 32]).unwrap());
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_request_params() {
        let request = NonceRequest::new("POST", "/admin/edit?post=5&_nonce=abc")
            .with_header("x-nonce", "from-header")
            .with_form(&[("_ajax_nonce", "from-form")]);

        assert_eq!(request.header("X-Nonce").as_deref(), Some("from-header"));
        assert_eq!(request.query_param("post").as_deref(), Some("5"));
        assert_eq!(request.request_param("_nonce").as_deref(), Some("abc"));
        assert_eq!(request.request_param("_ajax_nonce").as_deref(), Some("from-form"));
        assert_eq!(request.request_param("missing"), None);
    }

    #[test]
    fn test_json_body_param() {
        let request = NonceRequest::new("POST", "/api/save")
            .with_body(br#"{"_nonce":"json-token","count":3}"#.to_vec());

        assert_eq!(request.body_param("_nonce").as_deref(), Some("json-token"));
        assert_eq!(request.body_param("count"), None);
    }
}
