use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{hash_password, verify_password, AuthService},
    db::DbPool,
    entities::user::{self, UserRole},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Account lifecycle: registration, login, profile, password changes.
#[derive(Clone)]
pub struct UserService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    auth: Arc<AuthService>,
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct RegisterInput {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct LoginInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct UpdatePasswordInput {
    #[validate(length(min = 1))]
    pub current_password: String,
    pub new_password: String,
}

/// Token plus the user it authenticates, returned by register and login.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AuthenticatedUser {
    pub token: String,
    pub user: user::Model,
}

/// Minimum 8 chars with at least one uppercase, one lowercase, and one digit.
pub fn check_password_policy(password: &str) -> Result<(), ServiceError> {
    let long_enough = password.len() >= 8;
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if long_enough && has_upper && has_lower && has_digit {
        Ok(())
    } else {
        Err(ServiceError::ValidationError(
            "Password must be at least 8 characters and include an uppercase letter, \
             a lowercase letter, and a number"
                .to_string(),
        ))
    }
}

impl UserService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, auth: Arc<AuthService>) -> Self {
        Self {
            db,
            event_sender,
            auth,
        }
    }

    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn register(&self, input: RegisterInput) -> Result<AuthenticatedUser, ServiceError> {
        input.validate()?;
        check_password_policy(&input.password)?;

        let email = input.email.trim().to_lowercase();
        let existing = user::Entity::find()
            .filter(user::Column::Email.eq(email.clone()))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::ValidationError(
                "User already exists with this email".to_string(),
            ));
        }

        let user = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name.trim().to_string()),
            email: Set(email),
            password_hash: Set(hash_password(&input.password)?),
            role: Set(UserRole::User),
            stripe_customer_id: Set(None),
            last_login: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await?;

        self.event_sender
            .send_or_log(Event::UserRegistered(user.id))
            .await;

        let token = self.auth.generate_token(&user)?;
        Ok(AuthenticatedUser { token, user })
    }

    /// Uniform `Unauthorized` for unknown email and wrong password alike.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn login(&self, input: LoginInput) -> Result<AuthenticatedUser, ServiceError> {
        input.validate()?;

        let email = input.email.trim().to_lowercase();
        let user = user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("Invalid credentials".to_string()))?;

        if !verify_password(&input.password, &user.password_hash) {
            return Err(ServiceError::Unauthorized("Invalid credentials".to_string()));
        }

        let mut active: user::ActiveModel = user.into();
        active.last_login = Set(Some(Utc::now()));
        let user = active.update(&*self.db).await?;

        let token = self.auth.generate_token(&user)?;
        Ok(AuthenticatedUser { token, user })
    }

    #[instrument(skip(self))]
    pub async fn get(&self, user_id: Uuid) -> Result<user::Model, ServiceError> {
        user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))
    }

    #[instrument(skip(self, input))]
    pub async fn update_password(
        &self,
        user_id: Uuid,
        input: UpdatePasswordInput,
    ) -> Result<(), ServiceError> {
        input.validate()?;
        check_password_policy(&input.new_password)?;

        let user = self.get(user_id).await?;
        if !verify_password(&input.current_password, &user.password_hash) {
            return Err(ServiceError::Unauthorized(
                "Current password is incorrect".to_string(),
            ));
        }

        let mut active: user::ActiveModel = user.into();
        active.password_hash = Set(hash_password(&input.new_password)?);
        active.updated_at = Set(Some(Utc::now()));
        active.update(&*self.db).await?;
        Ok(())
    }
}
