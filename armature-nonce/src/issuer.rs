//! Nonce issuing in plain, URL and form-field form.

use crate::codec::VerifyResult;
use crate::context::{NonceContext, RequestContext};
use crate::error::{NonceError, Result};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};
use url::Url;

/// Length of generated random actions.
pub const RANDOM_ACTION_LEN: usize = 12;

/// Action string used for [`NonceAction::Default`].
pub const DEFAULT_ACTION: &str = "-1";

/// Presentation form of an issued nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NonceKind {
    /// Bare token
    #[default]
    Plain,
    /// Token appended to a URL
    Url,
    /// Hidden form inputs
    Field,
}

impl NonceKind {
    /// Parse a kind name. Unknown names fall back to `Plain`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "url" => NonceKind::Url,
            "field" => NonceKind::Field,
            _ => NonceKind::Plain,
        }
    }
}

impl From<&str> for NonceKind {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

/// Operation a nonce protects.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NonceAction {
    /// Catch-all action, for callers that do not scope their nonces
    #[default]
    Default,
    /// Caller-chosen action name
    Named(String),
    /// Fresh random action per issue. Only recoverable in object mode.
    Random,
}

impl NonceAction {
    pub fn named(action: impl Into<String>) -> Self {
        NonceAction::Named(action.into())
    }

    /// `""` and `"-1"` map to `Default`, `"rand"` / `"random"` to `Random`.
    pub fn parse(s: &str) -> Self {
        match s {
            "" | DEFAULT_ACTION => NonceAction::Default,
            "rand" | "random" => NonceAction::Random,
            other => NonceAction::Named(other.to_string()),
        }
    }
}

impl From<&str> for NonceAction {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl fmt::Display for NonceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NonceAction::Default => f.write_str(DEFAULT_ACTION),
            NonceAction::Named(action) => f.write_str(action),
            NonceAction::Random => f.write_str("random"),
        }
    }
}

/// What [`NonceIssuer::generate`] should produce.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub kind: NonceKind,
    pub action: NonceAction,
    /// Field / query parameter name; `None` uses the configured field name
    pub name: Option<String>,
    /// Append the referer input when rendering fields
    pub referer: bool,
    /// Return a [`NonceObject`] instead of the bare value
    pub object: bool,
    /// Number of plain nonces; values below 2 issue a single nonce
    pub count: i64,
    /// Target of URL nonces
    pub url: Option<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            kind: NonceKind::Plain,
            action: NonceAction::Default,
            name: None,
            referer: true,
            object: false,
            count: 1,
            url: None,
        }
    }
}

impl GenerateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: NonceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_action(mut self, action: impl Into<NonceAction>) -> Self {
        self.action = action.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_referer(mut self, referer: bool) -> Self {
        self.referer = referer;
        self
    }

    pub fn with_object(mut self, object: bool) -> Self {
        self.object = object;
        self
    }

    pub fn with_count(mut self, count: i64) -> Self {
        self.count = count;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Token minted for a random action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchNonce {
    pub token: String,
    pub action: String,
}

/// Result of a plain issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlainNonce {
    Single(String),
    Batch(Vec<BatchNonce>),
}

impl PlainNonce {
    pub fn as_single(&self) -> Option<&str> {
        match self {
            PlainNonce::Single(token) => Some(token.as_str()),
            PlainNonce::Batch(_) => None,
        }
    }
}

/// Nonce together with everything needed to verify it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NonceRecord {
    /// Plain token, URL or rendered field; `None` when the URL was rejected
    pub token: Option<String>,
    pub action: String,
    pub name: String,
    pub referer: String,
}

/// Object-mode output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum NonceObject {
    Single(NonceRecord),
    Batch(Vec<NonceRecord>),
}

impl NonceObject {
    pub fn records(&self) -> &[NonceRecord] {
        match self {
            NonceObject::Single(record) => std::slice::from_ref(record),
            NonceObject::Batch(records) => records,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Output of [`NonceIssuer::generate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedNonce {
    Plain(PlainNonce),
    Url(Option<String>),
    Field(String),
    Object(NonceObject),
}

impl GeneratedNonce {
    /// The single string value, if the output is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            GeneratedNonce::Plain(plain) => plain.as_single(),
            GeneratedNonce::Url(url) => url.as_deref(),
            GeneratedNonce::Field(field) => Some(field.as_str()),
            GeneratedNonce::Object(_) => None,
        }
    }
}

/// Issues nonces for the current identity.
#[derive(Debug, Clone)]
pub struct NonceIssuer {
    ctx: NonceContext,
}

impl NonceIssuer {
    pub fn new(ctx: NonceContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &NonceContext {
        &self.ctx
    }

    /// Issue one nonce, or with `count > 1` one nonce for each of `count`
    /// freshly generated random actions.
    ///
    /// A `Random` action issued here cannot be verified later since the
    /// generated action is not returned; use object mode for that.
    pub fn issue_plain(&self, action: &NonceAction, count: i64) -> Result<PlainNonce> {
        if count > 1 {
            return Ok(PlainNonce::Batch(self.issue_batch(count)?));
        }

        let action = self.resolve_action(action, false);
        Ok(PlainNonce::Single(self.ctx.create(&action)?))
    }

    /// Append a nonce to `url`. Returns `None` when `url` is not an absolute
    /// URL with a host.
    pub fn issue_url(
        &self,
        action: &NonceAction,
        url: &str,
        name: Option<&str>,
    ) -> Result<Option<String>> {
        let action = self.resolve_action(action, false);
        self.nonce_url(&action, url, self.field_name(name))
    }

    /// Render the hidden nonce input, optionally followed by the referer input.
    pub fn issue_field(
        &self,
        request: &dyn RequestContext,
        action: &NonceAction,
        name: Option<&str>,
        include_referer: bool,
    ) -> Result<String> {
        let action = self.resolve_action(action, false);
        self.nonce_field(request, &action, self.field_name(name), include_referer)
    }

    /// Issue according to `options` and wrap the result in records carrying
    /// the action, field name and request URI.
    pub fn issue_object(
        &self,
        request: &dyn RequestContext,
        options: &GenerateOptions,
    ) -> Result<NonceObject> {
        let name = self.field_name(options.name.as_deref()).to_string();
        let referer = request.current_uri();

        if options.kind == NonceKind::Plain && options.count > 1 {
            let records = self
                .issue_batch(options.count)?
                .into_iter()
                .map(|entry| NonceRecord {
                    token: Some(entry.token),
                    action: entry.action,
                    name: name.clone(),
                    referer: referer.clone(),
                })
                .collect();
            return Ok(NonceObject::Batch(records));
        }

        let action = self.resolve_action(&options.action, true);
        let token = match options.kind {
            NonceKind::Plain => Some(self.ctx.create(&action)?),
            NonceKind::Url => {
                let url = options.url.as_deref().unwrap_or_default();
                self.nonce_url(&action, url, &name)?
            }
            NonceKind::Field => {
                Some(self.nonce_field(request, &action, &name, options.referer)?)
            }
        };

        Ok(NonceObject::Single(NonceRecord {
            token,
            action,
            name,
            referer,
        }))
    }

    /// Issue a nonce as described by `options`.
    pub fn generate(
        &self,
        request: &dyn RequestContext,
        options: &GenerateOptions,
    ) -> Result<GeneratedNonce> {
        if options.object {
            return Ok(GeneratedNonce::Object(self.issue_object(request, options)?));
        }

        match options.kind {
            NonceKind::Field => Ok(GeneratedNonce::Field(self.issue_field(
                request,
                &options.action,
                options.name.as_deref(),
                options.referer,
            )?)),
            NonceKind::Url => {
                let url = options.url.as_deref().unwrap_or_default();
                Ok(GeneratedNonce::Url(self.issue_url(
                    &options.action,
                    url,
                    options.name.as_deref(),
                )?))
            }
            NonceKind::Plain => Ok(GeneratedNonce::Plain(
                self.issue_plain(&options.action, options.count)?,
            )),
        }
    }

    /// Hidden input holding the current request URI.
    pub fn referer_field(&self, request: &dyn RequestContext) -> String {
        format!(
            r#"<input type="hidden" name="{}" value="{}" />"#,
            escape_attr(&self.ctx.options().referer_field_name),
            escape_attr(&request.current_uri())
        )
    }

    /// Verify a nonce issued for `action`. A `Random` action can never match.
    pub fn verify(&self, token: &str, action: &NonceAction) -> Result<VerifyResult> {
        match action {
            NonceAction::Random => Ok(VerifyResult::Invalid),
            action => self.ctx.verify(token, &action.to_string()),
        }
    }

    fn issue_batch(&self, count: i64) -> Result<Vec<BatchNonce>> {
        (0..count)
            .map(|_| {
                let action = random_action();
                let token = self.ctx.create(&action)?;
                Ok(BatchNonce { token, action })
            })
            .collect()
    }

    fn resolve_action(&self, action: &NonceAction, surfaced: bool) -> String {
        match action {
            NonceAction::Random => {
                let generated = random_action();
                if surfaced {
                    debug!("Generated random nonce action");
                } else {
                    warn!(
                        "Random nonce action requested without object output; \
                         the action is discarded and the nonce cannot be verified"
                    );
                }
                generated
            }
            other => other.to_string(),
        }
    }

    fn field_name<'a>(&'a self, name: Option<&'a str>) -> &'a str {
        name.unwrap_or(&self.ctx.options().field_name)
    }

    fn nonce_url(&self, action: &str, url: &str, name: &str) -> Result<Option<String>> {
        let mut parsed = match parse_target_url(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "Rejected URL for nonce");
                return Ok(None);
            }
        };

        if !parsed.path().ends_with('/') {
            let path = format!("{}/", parsed.path());
            parsed.set_path(&path);
        }

        let token = self.ctx.create(action)?;
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(key, _)| key != name)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        parsed
            .query_pairs_mut()
            .clear()
            .extend_pairs(pairs)
            .append_pair(name, &token);

        Ok(Some(parsed.into()))
    }

    fn nonce_field(
        &self,
        request: &dyn RequestContext,
        action: &str,
        name: &str,
        include_referer: bool,
    ) -> Result<String> {
        let token = self.ctx.create(action)?;
        let name = escape_attr(name);
        let mut field = format!(
            r#"<input type="hidden" id="{}" name="{}" value="{}" />"#,
            name,
            name,
            escape_attr(&token)
        );

        if include_referer {
            field.push_str(&self.referer_field(request));
        }

        Ok(field)
    }
}

/// Absolute URL with a host, or `NonceError::InvalidUrl`.
fn parse_target_url(url: &str) -> Result<Url> {
    match Url::parse(url.trim()) {
        Ok(parsed) if parsed.has_host() => Ok(parsed),
        Ok(_) => Err(NonceError::InvalidUrl(format!("'{}' has no host", url))),
        Err(e) => Err(NonceError::InvalidUrl(format!("'{}': {}", url, e))),
    }
}

/// 12 character alphanumeric action, no symbols.
pub fn random_action() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_ACTION_LEN)
        .map(char::from)
        .collect()
}

fn escape_attr(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '"' => "&quot;".to_string(),
            '\'' => "&#x27;".to_string(),
            '&' => "&amp;".to_string(),
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            _ => c.to_string(),
        })
        .collect()
}
