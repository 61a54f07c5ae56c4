use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = "E-commerce storefront backend: product catalog, per-user carts, \
Stripe checkout, and order management. All endpoints return a \
`{success, data}` envelope; errors use `{success: false, error}`."
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "auth", description = "Registration, login, and session management"),
        (name = "products", description = "Product catalog"),
        (name = "cart", description = "The caller's shopping cart"),
        (name = "payments", description = "Checkout and payment methods"),
        (name = "orders", description = "Order history and admin order management"),
        (name = "admin", description = "Administrative reporting and user management"),
        (name = "health", description = "Liveness")
    ),
    paths(
        crate::handlers::auth::register,
        crate::handlers::auth::login,
        crate::handlers::auth::me,
        crate::handlers::auth::logout,
        crate::handlers::auth::update_password,

        crate::handlers::products::list_products,
        crate::handlers::products::featured_products,
        crate::handlers::products::list_categories,
        crate::handlers::products::list_by_category,
        crate::handlers::products::get_by_slug,
        crate::handlers::products::get_product,
        crate::handlers::products::create_product,
        crate::handlers::products::update_product,
        crate::handlers::products::delete_product,

        crate::handlers::carts::get_cart,
        crate::handlers::carts::cart_summary,
        crate::handlers::carts::add_item,
        crate::handlers::carts::update_item,
        crate::handlers::carts::remove_item,
        crate::handlers::carts::clear_cart,

        crate::handlers::payments::create_intent,
        crate::handlers::payments::confirm,
        crate::handlers::payments::list_methods,
        crate::handlers::payments::save_method,
        crate::handlers::payments::webhook,

        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::list_all_orders,
        crate::handlers::orders::order_stats,
        crate::handlers::orders::set_order_status,

        crate::handlers::admin::dashboard,
        crate::handlers::admin::list_users,
        crate::handlers::admin::update_role,
        crate::handlers::admin::delete_user,
        crate::handlers::admin::settings,

        crate::handlers::health::health,
    ),
    components(
        schemas(
            crate::entities::user::Model,
            crate::entities::user::UserRole,
            crate::entities::product::Model,
            crate::entities::product::ProductCategory,
            crate::entities::product_variant::Model,
            crate::entities::cart::Model,
            crate::entities::cart_item::Model,
            crate::entities::order::Model,
            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentStatus,
            crate::entities::order_item::Model,
            crate::entities::order_status_history::Model,

            crate::services::users::RegisterInput,
            crate::services::users::LoginInput,
            crate::services::users::UpdatePasswordInput,
            crate::services::users::AuthenticatedUser,
            crate::services::catalog::CreateProductInput,
            crate::services::catalog::CreateVariantInput,
            crate::services::catalog::UpdateProductInput,
            crate::services::catalog::ProductView,
            crate::services::carts::AddItemInput,
            crate::services::carts::UpdateItemInput,
            crate::services::carts::VariantSelection,
            crate::services::carts::CartView,
            crate::services::carts::CartSummary,
            crate::services::checkout::Address,
            crate::services::checkout::CreateIntentInput,
            crate::services::checkout::ConfirmInput,
            crate::services::checkout::CheckoutQuote,
            crate::services::checkout::IntentView,
            crate::services::orders::OrderView,
            crate::services::orders::OrderStats,
            crate::services::orders::StatusCount,
            crate::services::reports::Dashboard,
            crate::handlers::payments::SaveMethodRequest,
            crate::handlers::orders::SetStatusRequest,
            crate::handlers::admin::UpdateRoleRequest,

            crate::errors::ErrorResponse,
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
