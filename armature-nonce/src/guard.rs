use crate::codec::VerifyResult;
use crate::context::{NonceContext, RequestContext};
use crate::error::{NonceError, Result};
use crate::issuer::NonceAction;
use tracing::{debug, warn};

/// HTTP status used for aborted requests.
pub const ABORT_STATUS: u16 = 403;

/// Checks the nonce carried by an incoming request.
///
/// Aborting never terminates anything here: it is reported as
/// [`NonceError::AbortedRequest`] and the request layer turns that into the
/// error response (see [`NonceError::status_code`]).
#[derive(Debug, Clone)]
pub struct RefererGuard {
    ctx: NonceContext,
}

impl RefererGuard {
    pub fn new(ctx: NonceContext) -> Self {
        Self { ctx }
    }

    /// Verify the nonce of an AJAX request.
    ///
    /// With `die_on_failure` an invalid nonce yields `Err(AbortedRequest)`,
    /// otherwise `Ok(VerifyResult::Invalid)`.
    pub fn verify_ajax_referer(
        &self,
        request: &dyn RequestContext,
        action: &NonceAction,
        query_arg: Option<&str>,
        die_on_failure: bool,
    ) -> Result<VerifyResult> {
        let result = self.check(request, action, query_arg)?;

        if result == VerifyResult::Invalid && die_on_failure {
            return Err(self.abort(action));
        }

        Ok(result)
    }

    /// Verify the nonce of an administrative request. Always aborts on an
    /// invalid nonce, except for default-action requests that come from the
    /// configured admin origin.
    pub fn verify_admin_referer(
        &self,
        request: &dyn RequestContext,
        action: &NonceAction,
        query_arg: Option<&str>,
    ) -> Result<VerifyResult> {
        let result = self.check(request, action, query_arg)?;

        if result == VerifyResult::Invalid {
            if *action == NonceAction::Default && self.referred_by_admin(request) {
                debug!("Default-action request referred by admin origin");
                return Ok(result);
            }
            return Err(self.abort(action));
        }

        Ok(result)
    }

    /// Nonce carried by the request: the configured header first, then
    /// `query_arg` if given, else the AJAX field and the regular field.
    pub fn extract_token(
        &self,
        request: &dyn RequestContext,
        query_arg: Option<&str>,
    ) -> Option<String> {
        let options = self.ctx.options();

        if let Some(token) = request.header(&options.header_name) {
            return Some(token);
        }

        match query_arg {
            Some(name) => request.request_param(name),
            None => request
                .request_param(&options.ajax_field_name)
                .or_else(|| request.request_param(&options.field_name)),
        }
    }

    fn check(
        &self,
        request: &dyn RequestContext,
        action: &NonceAction,
        query_arg: Option<&str>,
    ) -> Result<VerifyResult> {
        let Some(token) = self.extract_token(request, query_arg) else {
            debug!(action = %action, "No nonce in request");
            return Ok(VerifyResult::Invalid);
        };

        match action {
            NonceAction::Random => Ok(VerifyResult::Invalid),
            action => self.ctx.verify(&token, &action.to_string()),
        }
    }

    fn referred_by_admin(&self, request: &dyn RequestContext) -> bool {
        match (&self.ctx.options().admin_origin, request.referer_header()) {
            (Some(origin), Some(referer)) => referer
                .to_lowercase()
                .starts_with(&origin.to_lowercase()),
            _ => false,
        }
    }

    fn abort(&self, action: &NonceAction) -> NonceError {
        warn!(action = %action, "Aborting request with invalid nonce");
        NonceError::AbortedRequest {
            status: ABORT_STATUS,
            message: self.ctx.options().message().to_string(),
        }
    }
}
