use crate::handlers::api_client::AuthBackend;
use crate::handlers::guard::{BranchSource, GuardRequirements};
use crate::handlers::store::AuthSnapshot;
use crate::middleware::guard::Guard;
use crate::models::envelope::ApiEnvelope;
use crate::models::identity::{Permission, Role};
use actix_web::{http::StatusCode, web, HttpMessage, HttpRequest, HttpResponse, Responder};
use log::error;
use serde::Serialize;

fn current_snapshot(req: &HttpRequest) -> AuthSnapshot {
    req.extensions()
        .get::<AuthSnapshot>()
        .cloned()
        .unwrap_or_default()
}

//Branch Capabilities Response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchCapabilities {
    pub branch_id: String,
    pub role: Role,
    pub permissions: Vec<Permission>,
}

//Get User Permissions
//Get User Permissions Input: user id in path
//Get User Permissions Output: ApiEnvelope<Vec<PermissionEntry>>
pub async fn get_user_permissions(
    req: HttpRequest,
    backend: web::Data<dyn AuthBackend>,
    path: web::Path<String>,
) -> impl Responder {
    let user_id = path.into_inner();
    let snapshot = current_snapshot(&req);

    match backend
        .fetch_user_permissions(snapshot.token(), &user_id)
        .await
    {
        Ok(entries) => HttpResponse::Ok().json(ApiEnvelope::success(entries)),
        Err(e) => {
            error!("[ADMIN] fetching permissions of {} failed: {}", user_id, e);
            let status = e
                .status()
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            HttpResponse::build(status)
                .json(ApiEnvelope::<()>::failure(e.user_message(), status.as_u16()))
        }
    }
}

//Get Branch Capabilities
//Get Branch Capabilities Input: branch id in path
//Get Branch Capabilities Output: ApiEnvelope<BranchCapabilities>
pub async fn get_branch_capabilities(req: HttpRequest, path: web::Path<String>) -> impl Responder {
    let branch_id = path.into_inner();
    let snapshot = current_snapshot(&req);

    let Some(identity) = snapshot.identity() else {
        return HttpResponse::Unauthorized()
            .json(ApiEnvelope::<()>::failure("Authentication required", 401));
    };
    let capabilities = BranchCapabilities {
        permissions: snapshot.authorizer().branch_permissions(&branch_id),
        role: identity.role,
        branch_id,
    };
    HttpResponse::Ok().json(ApiEnvelope::success(capabilities))
}

//Config Admin Routes
// GET /admin/users/{user_id}/permissions        admin | superAdmin + MANAGE_PERMISSIONS
// GET /admin/branches/{branch_id}/capabilities  back-office roles with access to the branch
pub fn config_admin_routes(cfg: &mut web::ServiceConfig) {
    let manage_permissions = GuardRequirements::new()
        .require_auth()
        .require_roles([Role::Admin, Role::SuperAdmin])
        .require_permission(Permission::ManagePermissions, None);
    let branch_member = GuardRequirements::new()
        .require_auth()
        .require_roles([Role::Staff, Role::BranchManager, Role::Admin, Role::SuperAdmin])
        .require_branch(BranchSource::path("branch_id"));

    cfg.service(
        web::scope("/admin")
            .service(
                web::resource("/users/{user_id}/permissions")
                    .wrap(Guard::new(manage_permissions))
                    .route(web::get().to(get_user_permissions)),
            )
            .service(
                web::resource("/branches/{branch_id}/capabilities")
                    .wrap(Guard::new(branch_member))
                    .route(web::get().to(get_branch_capabilities)),
            ),
    );
}
