use crate::models::identity::{Identity, Permission, PermissionGrant, Role, UserType};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use log::warn;
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

/// Why a token could not be turned into an [`Identity`].
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token is not three dot-separated parts")]
    Malformed,
    #[error("token payload is not base64url: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("token claims are not valid JSON: {0}")]
    Claims(#[from] serde_json::Error),
    #[error("token claims are not a JSON object")]
    NotAnObject,
    #[error("token is missing the `{0}` claim")]
    MissingClaim(&'static str),
    #[error("unknown role `{0}`")]
    UnknownRole(String),
    #[error("unknown user type `{0}`")]
    UnknownType(String),
    #[error("token signature rejected: {0}")]
    Signature(#[from] jsonwebtoken::errors::Error),
}

/// Optional HS256 check of the token signature. Expiry is not checked here,
/// the store owns that rule.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn hs256(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        TokenVerifier {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    fn verify(&self, token: &str) -> Result<Value, TokenError> {
        Ok(decode::<Value>(token, &self.key, &self.validation)?.claims)
    }
}

/// Decodes a three-part token into an [`Identity`].
///
/// Both claim shapes are accepted: flat (`role`, `type`, `branchId`, ...) and
/// nested under `userInfo`. When both are present the nested value wins.
pub fn decode_identity(token: &str, verifier: Option<&TokenVerifier>) -> Result<Identity, TokenError> {
    identity_from_claims(&decode_claims(token, verifier)?)
}

/// Decodes a token returned by login or registration. The `userInfo` object
/// sent next to the token is treated as the nested claim shape when the token
/// does not carry one itself.
pub fn decode_login(
    token: &str,
    user_info: Option<&Value>,
    verifier: Option<&TokenVerifier>,
) -> Result<Identity, TokenError> {
    let mut claims = decode_claims(token, verifier)?;
    if let (Some(info @ Value::Object(_)), Value::Object(map)) = (user_info, &mut claims) {
        map.entry("userInfo").or_insert_with(|| info.clone());
    }
    identity_from_claims(&claims)
}

/// The part of a token that identifies its holder, without role or grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSubject {
    pub id: String,
    pub expires_at: i64,
}

/// Decodes only the id and expiry, so a token whose role travelled next to it
/// (as login `userInfo`) can still be matched against a stored user.
pub fn decode_subject(token: &str, verifier: Option<&TokenVerifier>) -> Result<TokenSubject, TokenError> {
    let claims = decode_claims(token, verifier)?;
    if !claims.is_object() {
        return Err(TokenError::NotAnObject);
    }
    let nested = claims.get("userInfo").filter(|v| v.is_object());
    Ok(TokenSubject {
        id: subject_id(&claims, nested)?,
        expires_at: claims
            .get("exp")
            .and_then(as_seconds)
            .ok_or(TokenError::MissingClaim("exp"))?,
    })
}

fn decode_claims(token: &str, verifier: Option<&TokenVerifier>) -> Result<Value, TokenError> {
    let payload = payload_part(token)?;
    match verifier {
        Some(verifier) => verifier.verify(token),
        None => {
            let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
            Ok(serde_json::from_slice::<Value>(&bytes)?)
        }
    }
}

/// Returns true if `token` has the three non-empty parts of a signed token.
pub fn is_structurally_valid(token: &str) -> bool {
    payload_part(token).is_ok()
}

fn payload_part(token: &str) -> Result<&str, TokenError> {
    let mut parts = token.trim().split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None)
            if !header.is_empty() && !payload.is_empty() && !signature.is_empty() =>
        {
            Ok(payload)
        }
        _ => Err(TokenError::Malformed),
    }
}

fn identity_from_claims(claims: &Value) -> Result<Identity, TokenError> {
    if !claims.is_object() {
        return Err(TokenError::NotAnObject);
    }
    let nested = claims.get("userInfo").filter(|v| v.is_object());
    let field = |name: &'static str| claim(claims, nested, name);

    let id = subject_id(claims, nested)?;
    let expires_at = claims
        .get("exp")
        .and_then(as_seconds)
        .ok_or(TokenError::MissingClaim("exp"))?;
    let issued_at = claims
        .get("iat")
        .and_then(as_seconds)
        .ok_or(TokenError::MissingClaim("iat"))?;

    let role_name = field("role")
        .and_then(Value::as_str)
        .ok_or(TokenError::MissingClaim("role"))?;
    let role = Role::from_str(role_name).map_err(|_| TokenError::UnknownRole(role_name.to_string()))?;
    let user_type = match field("type").and_then(Value::as_str) {
        Some(name) => {
            UserType::from_str(name).map_err(|_| TokenError::UnknownType(name.to_string()))?
        }
        None => role.default_type(),
    };

    // Branch id and name are resolved per shape so nested wins as a whole
    let (nested_ref_id, nested_name) = branch_ref(nested.and_then(|n| n.get("branch")));
    let (flat_ref_id, flat_name) = branch_ref(claims.get("branch"));
    let branch_id = nested
        .and_then(|n| n.get("branchId"))
        .and_then(as_text)
        .or(nested_ref_id)
        .or_else(|| claims.get("branchId").and_then(as_text))
        .or(flat_ref_id);
    let branch_name = nested_name.or(flat_name);

    Ok(Identity {
        id,
        role,
        user_type,
        mobile: field("mobile").and_then(as_text),
        branch_id,
        branch_name,
        permissions: field("permissions").map(parse_grants).unwrap_or_default(),
        is_active: field("isActive").and_then(Value::as_bool).unwrap_or(true),
        issued_at,
        expires_at,
    })
}

fn subject_id(claims: &Value, nested: Option<&Value>) -> Result<String, TokenError> {
    ["id", "_id"]
        .iter()
        .find_map(|key| claims.get(*key).and_then(as_text))
        .or_else(|| ["id", "_id"].iter().find_map(|key| nested?.get(*key).and_then(as_text)))
        .ok_or(TokenError::MissingClaim("id"))
}

/// `branch` is either a bare name or an `{ id | _id, name }` object.
fn branch_ref(value: Option<&Value>) -> (Option<String>, Option<String>) {
    match value {
        Some(Value::String(name)) if !name.is_empty() => (None, Some(name.clone())),
        Some(branch @ Value::Object(_)) => (
            branch
                .get("id")
                .or_else(|| branch.get("_id"))
                .and_then(as_text),
            branch.get("name").and_then(as_text),
        ),
        _ => (None, None),
    }
}

fn claim<'a>(claims: &'a Value, nested: Option<&'a Value>, name: &str) -> Option<&'a Value> {
    nested
        .and_then(|n| n.get(name))
        .filter(|v| !v.is_null())
        .or_else(|| claims.get(name).filter(|v| !v.is_null()))
}

/// Grants arrive either as `{ permission, branchId? }` objects or as bare
/// strings (global). Unknown permission names are dropped.
fn parse_grants(value: &Value) -> Vec<PermissionGrant> {
    let mut grants: Vec<PermissionGrant> = Vec::new();
    for entry in value.as_array().map(Vec::as_slice).unwrap_or_default() {
        let (name, branch_id) = match entry {
            Value::String(name) => (name.as_str(), None),
            Value::Object(_) => match entry.get("permission").and_then(Value::as_str) {
                Some(name) => (name, entry.get("branchId").and_then(as_text)),
                None => {
                    warn!("[TOKEN] permission entry without a name: {}", entry);
                    continue;
                }
            },
            other => {
                warn!("[TOKEN] unexpected permission entry: {}", other);
                continue;
            }
        };
        let permission = match Permission::from_str(name) {
            Ok(p) => p,
            Err(_) => {
                warn!("[TOKEN] dropping unknown permission `{}`", name);
                continue;
            }
        };
        let grant = PermissionGrant {
            permission,
            branch_id,
        };
        if !grants.contains(&grant) {
            grants.push(grant);
        }
    }
    grants
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_seconds(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn unsigned(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{body}.c2lnbmF0dXJl")
    }

    #[test]
    fn decodes_flat_claims() {
        let token = unsigned(&json!({
            "id": "u1", "iat": 100, "exp": 200,
            "role": "branchManager", "type": "manager",
            "mobile": "09123456789", "branchId": "B1",
        }));
        let identity = decode_identity(&token, None).unwrap();
        assert_eq!(identity.id, "u1");
        assert_eq!(identity.role, Role::BranchManager);
        assert_eq!(identity.user_type, UserType::Manager);
        assert_eq!(identity.branch_id.as_deref(), Some("B1"));
        assert_eq!(identity.mobile.as_deref(), Some("09123456789"));
        assert!(identity.is_active);
        assert_eq!((identity.issued_at, identity.expires_at), (100, 200));
    }

    #[test]
    fn nested_user_info_takes_precedence() {
        let token = unsigned(&json!({
            "id": "u2", "iat": 1, "exp": 2,
            "role": "customer", "branchId": "FLAT",
            "userInfo": {
                "role": "staff",
                "type": "staff",
                "branch": { "_id": "B7", "name": "Downtown" },
                "permissions": [
                    { "permission": "MANAGE_BRANCH_ORDERS", "branchId": "B7" },
                    "VIEW_REPORTS"
                ]
            }
        }));
        let identity = decode_identity(&token, None).unwrap();
        assert_eq!(identity.role, Role::Staff);
        assert_eq!(identity.branch_id.as_deref(), Some("B7"));
        assert_eq!(identity.branch_name.as_deref(), Some("Downtown"));
        assert_eq!(
            identity.permissions,
            vec![
                PermissionGrant::scoped(Permission::ManageBranchOrders, "B7"),
                PermissionGrant::global(Permission::ViewReports),
            ]
        );
    }

    #[test]
    fn flat_branch_fills_in_when_nested_has_none() {
        let token = unsigned(&json!({
            "id": "u3", "iat": 1, "exp": 2,
            "branchId": "FLAT", "branch": { "id": "IGNORED", "name": "Harbor" },
            "userInfo": { "role": "branchManager" }
        }));
        let identity = decode_identity(&token, None).unwrap();
        assert_eq!(identity.branch_id.as_deref(), Some("FLAT"));
        assert_eq!(identity.branch_name.as_deref(), Some("Harbor"));
    }

    #[test]
    fn subject_needs_only_id_and_expiry() {
        let token = unsigned(&json!({ "iat": 1, "exp": 2, "userInfo": { "_id": "u5" } }));
        assert_eq!(
            decode_subject(&token, None).unwrap(),
            TokenSubject { id: "u5".into(), expires_at: 2 }
        );
        let no_exp = unsigned(&json!({ "id": "u5" }));
        assert!(matches!(
            decode_subject(&no_exp, None),
            Err(TokenError::MissingClaim("exp"))
        ));
    }

    #[test]
    fn branch_object_fills_missing_branch_id() {
        let token = unsigned(&json!({
            "id": 42, "iat": 1, "exp": 2,
            "userInfo": { "role": "staff", "branch": { "id": "B3" } }
        }));
        let identity = decode_identity(&token, None).unwrap();
        assert_eq!(identity.id, "42");
        assert_eq!(identity.branch_id.as_deref(), Some("B3"));
        assert_eq!(identity.user_type, UserType::Staff);
    }

    #[test]
    fn unknown_and_duplicate_permissions_are_collapsed() {
        let token = unsigned(&json!({
            "id": "u", "iat": 1, "exp": 2, "role": "admin",
            "permissions": ["MANAGE_FOODS", "MANAGE_FOODS", "FLY_TO_MOON", 7]
        }));
        let identity = decode_identity(&token, None).unwrap();
        assert_eq!(
            identity.permissions,
            vec![PermissionGrant::global(Permission::ManageFoods)]
        );
    }

    #[test]
    fn login_user_info_fills_in_for_thin_tokens() {
        let token = unsigned(&json!({ "id": "u9", "iat": 1, "exp": 2 }));
        let info = json!({ "role": "admin", "permissions": ["MANAGE_USERS"] });
        let identity = decode_login(&token, Some(&info), None).unwrap();
        assert_eq!(identity.role, Role::Admin);
        assert_eq!(identity.user_type, UserType::Admin);
        assert_eq!(
            identity.permissions,
            vec![PermissionGrant::global(Permission::ManageUsers)]
        );
        assert!(matches!(
            decode_identity(&token, None),
            Err(TokenError::MissingClaim("role"))
        ));
    }

    #[test]
    fn rejects_structurally_broken_tokens() {
        assert!(matches!(decode_identity("abc", None), Err(TokenError::Malformed)));
        assert!(matches!(decode_identity("a..c", None), Err(TokenError::Malformed)));
        assert!(matches!(decode_identity("a.b.c.d", None), Err(TokenError::Malformed)));
        assert!(matches!(decode_identity("a.!!!.c", None), Err(TokenError::Encoding(_))));
        assert!(!is_structurally_valid("only.two"));
    }

    #[test]
    fn rejects_missing_claims_and_unknown_role() {
        let no_exp = unsigned(&json!({ "id": "u", "iat": 1, "role": "customer" }));
        assert!(matches!(
            decode_identity(&no_exp, None),
            Err(TokenError::MissingClaim("exp"))
        ));
        let no_role = unsigned(&json!({ "id": "u", "iat": 1, "exp": 2 }));
        assert!(matches!(
            decode_identity(&no_role, None),
            Err(TokenError::MissingClaim("role"))
        ));
        let bad_role = unsigned(&json!({ "id": "u", "iat": 1, "exp": 2, "role": "root" }));
        assert!(matches!(
            decode_identity(&bad_role, None),
            Err(TokenError::UnknownRole(r)) if r == "root"
        ));
    }

    #[test]
    fn verifier_accepts_signed_and_rejects_forged() {
        let claims = json!({ "id": "u", "iat": 1, "exp": 2, "role": "customer" });
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();

        let good = TokenVerifier::hs256(b"secret");
        assert_eq!(decode_identity(&token, Some(&good)).unwrap().id, "u");

        let bad = TokenVerifier::hs256(b"other");
        assert!(matches!(
            decode_identity(&token, Some(&bad)),
            Err(TokenError::Signature(_))
        ));
    }
}
