use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use crate::config::AppConfig;
use crate::handlers;
use crate::state::AppState;

pub fn routes(config: &AppConfig) -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .nest("/auth", auth_routes())
        .nest("/documents", document_routes(config))
        .nest("/admin", admin_routes())
}

fn auth_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::auth::register))
        .routes(routes!(handlers::auth::login))
        .routes(routes!(handlers::auth::logout))
        .routes(routes!(handlers::auth::me, handlers::auth::update_me))
        .routes(routes!(handlers::auth::change_password))
        .routes(routes!(handlers::auth::oauth_login))
        .routes(routes!(handlers::auth::oauth_callback))
}

fn document_routes(config: &AppConfig) -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(
            handlers::documents::list_documents,
            handlers::documents::upload_document
        ))
        .routes(routes!(
            handlers::documents::get_document,
            handlers::documents::update_document,
            handlers::documents::replace_document,
            handlers::documents::delete_document
        ))
        .routes(routes!(handlers::documents::download_document))
        .layer(handlers::documents::upload_body_limit(
            config.storage.max_upload_size,
        ))
}

fn admin_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::admin::list_users))
        .routes(routes!(
            handlers::admin::get_user,
            handlers::admin::update_user,
            handlers::admin::delete_user
        ))
        .routes(routes!(handlers::admin::set_user_active))
        .routes(routes!(handlers::admin::set_user_admin))
        .routes(routes!(handlers::admin::list_all_documents))
        .routes(routes!(handlers::admin::delete_any_document))
}
