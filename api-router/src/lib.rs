use api_state::ApiState;
use axum::{
    extract::FromRef,
    middleware::from_fn,
    routing::{get, post, put},
    Router,
};
use middleware_api_auth::require_subject;
use routes::{
    conversations::{
        conversation_feedback, create_conversation, delete_conversation, get_conversation,
        list_conversations, patch_conversation,
    },
    liveness::live,
    messages::{create_message, create_message_v2, list_messages, message_feedback},
    readiness::ready,
    trials::{create_trial, create_trial_message, create_trial_message_v2, get_trial},
};

pub mod api_state;
pub mod error;
mod middleware_api_auth;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (probes and anonymous trials)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/trials", post(create_trial))
        .route("/trials/{id}", get(get_trial))
        .route("/trials/{id}/messages", post(create_trial_message));

    // Protected API endpoints (require a gateway credential)
    let protected = Router::new()
        .route(
            "/conversations",
            post(create_conversation).get(list_conversations),
        )
        .route(
            "/conversations/{id}",
            get(get_conversation)
                .patch(patch_conversation)
                .delete(delete_conversation),
        )
        .route("/conversations/{id}/feedback", put(conversation_feedback))
        .route(
            "/conversations/{id}/messages",
            post(create_message).get(list_messages),
        )
        .route("/messages/{id}/feedback", put(message_feedback))
        .route_layer(from_fn(require_subject));

    public.merge(protected)
}

/// Router for API functionality, version 2: the retrieval-chain answer flow
/// over the same stored conversations and trials.
pub fn api_routes_v2<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    let public = Router::new().route("/trials/{id}/messages", post(create_trial_message_v2));

    let protected = Router::new()
        .route("/conversations/{id}/messages", post(create_message_v2))
        .route_layer(from_fn(require_subject));

    public.merge(protected)
}
