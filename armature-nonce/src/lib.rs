//! # Armature Nonces
//!
//! Stateless, action-scoped anti-forgery nonces for Armature applications.
//!
//! ## Features
//!
//! - ✅ **Stateless** - Nonces are recomputed on verification, never stored
//! - ✅ **Action Scoped** - Each nonce is bound to an action and the acting identity
//! - ✅ **Tick/Tock Windows** - Valid for the current and the previous half-lifetime
//! - ✅ **Three Presentations** - Plain token, URL query parameter, hidden form field
//! - ✅ **Referer Guards** - AJAX and admin request verification with opt-in abort
//! - ✅ **Constant-Time Checks** - No timing side channel on comparison
//!
//! ## Quick Start
//!
//! ```rust
//! use armature_nonce::{NonceContext, NonceIssuer, NonceOptions, StaticSecret, StaticSession};
//! use armature_nonce::{NonceAction, VerifyResult};
//! use std::sync::Arc;
//!
//! let ctx = NonceContext::new(
//!     NonceOptions::default(),
//!     Arc::new(StaticSession("user-42".to_string())),
//!     Arc::new(StaticSecret::generate()),
//! );
//! let issuer = NonceIssuer::new(ctx);
//!
//! let action = NonceAction::named("delete-post_7");
//! let plain = issuer.issue_plain(&action, 1).unwrap();
//! let token = plain.as_single().unwrap();
//!
//! assert_eq!(issuer.verify(token, &action).unwrap(), VerifyResult::Fresh);
//! ```
//!
//! ## URL and Field Nonces
//!
//! ```rust
//! use armature_nonce::*;
//! use std::sync::Arc;
//!
//! let ctx = NonceContext::new(
//!     NonceOptions::default(),
//!     Arc::new(StaticSession("user-42".to_string())),
//!     Arc::new(StaticSecret::generate()),
//! );
//! let issuer = NonceIssuer::new(ctx);
//! let request = NonceRequest::new("GET", "/admin/edit.php?post=7");
//! let action = NonceAction::named("trash-post_7");
//!
//! // Invalid URLs yield no value at all
//! assert!(issuer.issue_url(&action, "not-a-url", None).unwrap().is_none());
//!
//! let url = issuer.issue_url(&action, "https://example.com", None).unwrap().unwrap();
//! assert!(url.starts_with("https://example.com/?_nonce="));
//!
//! let field = issuer.issue_field(&request, &action, None, true).unwrap();
//! assert!(field.contains(r#"name="_nonce""#));
//! assert!(field.contains(r#"name="_nonce_http_referer""#));
//! ```
//!
//! ## Verifying Requests
//!
//! ```rust
//! use armature_nonce::*;
//! use std::sync::Arc;
//!
//! let ctx = NonceContext::new(
//!     NonceOptions::default(),
//!     Arc::new(StaticSession("user-42".to_string())),
//!     Arc::new(StaticSecret::generate()),
//! );
//! let token = ctx.create("like-comment").unwrap();
//! let guard = RefererGuard::new(ctx);
//!
//! let request = NonceRequest::new("POST", "/ajax").with_header("X-Nonce", token);
//! let action = NonceAction::named("like-comment");
//! assert!(guard.verify_ajax_referer(&request, &action, None, true).unwrap().is_valid());
//!
//! // Without a nonce the admin guard aborts; the caller answers with 403.
//! let bare = NonceRequest::new("POST", "/admin/options.php");
//! let err = guard.verify_admin_referer(&bare, &action, None).unwrap_err();
//! assert_eq!(err.status_code(), 403);
//! ```

pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod guard;
pub mod issuer;

pub use codec::{TokenCodec, VerifyResult, TOKEN_LEN};
pub use config::{NonceOptions, DEFAULT_LIFETIME, DEFAULT_MESSAGE};
pub use context::{
    Clock, ManualClock, NonceContext, NonceRequest, RequestContext, SecretProvider,
    SessionProvider, StaticSecret, StaticSession, SystemClock,
};
pub use error::{NonceError, Result};
pub use guard::RefererGuard;
pub use issuer::{
    BatchNonce, GenerateOptions, GeneratedNonce, NonceAction, NonceIssuer, NonceKind,
    NonceObject, NonceRecord, PlainNonce,
};
