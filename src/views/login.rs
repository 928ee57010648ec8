use crate::api::{ApiClient, ApiError};
use crate::router::Route;
use crate::session::SessionStore;

pub const FALLBACK_DETAIL: &str = "Invalid Access Token";
pub const GENERIC_FAILURE: &str = "An error occurred during the login process.";

/// Result of a login submission: either go somewhere or block on an alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Navigate(Route),
    Alert(String),
}

/// Form state. `loading` is only a hint; resubmission is not blocked.
#[derive(Debug, Default, Clone)]
pub struct LoginForm {
    pub token: String,
    pub loading: bool,
}

impl LoginForm {
    pub async fn submit(&mut self, api: &ApiClient, store: &SessionStore) -> LoginOutcome {
        self.loading = true;
        let outcome = login(api, store, &self.token).await;
        self.loading = false;
        outcome
    }
}

/// Entering `/login` with a stored session skips straight to the camera list.
pub async fn enter(store: &SessionStore) -> Option<Route> {
    store.get().await.map(|_| Route::Cameras)
}

pub fn failure_message(err: &ApiError) -> String {
    match err {
        ApiError::Status { .. } => format!("Login failed: {}", err.detail().unwrap_or(FALLBACK_DETAIL)),
        _ => GENERIC_FAILURE.to_string(),
    }
}

pub async fn login(api: &ApiClient, store: &SessionStore, personal_access_token: &str) -> LoginOutcome {
    let session = match api.login(personal_access_token).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("error logging in: {}", e);
            return LoginOutcome::Alert(failure_message(&e));
        }
    };

    if let Err(e) = store.set(&session.token).await {
        tracing::error!("failed to persist session: {:#}", e);
        return LoginOutcome::Alert(GENERIC_FAILURE.to_string());
    }
    LoginOutcome::Navigate(Route::Cameras)
}

pub async fn logout(store: &SessionStore) -> anyhow::Result<Route> {
    store.clear().await?;
    Ok(Route::Login)
}
