use crate::server::SharedState;
use axum::{extract::State, response::Html};

/// The upload page. The template is read once at startup; serving it is a
/// pass-through, not rendering logic.
pub async fn home(State(state): State<SharedState>) -> Html<String> {
    Html(state.index_html.as_ref().clone())
}
