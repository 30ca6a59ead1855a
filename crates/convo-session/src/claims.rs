use jsonwebtoken::{DecodingKey, Validation, decode};

use convo_types::UserId;
use convo_types::api::Claims;

use crate::error::SessionError;

/// Read the viewer's id from an access token.
///
/// The signature is not checked here; the backend verifies the token on
/// every request and the client only needs to know who it is.
pub fn claims_from_token(token: &str) -> Result<Claims, SessionError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}

pub fn viewer_from_token(token: &str) -> Result<UserId, SessionError> {
    claims_from_token(token).map(|claims| UserId::from(claims.id))
}
